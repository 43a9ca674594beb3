//! Entity model registry.
//!
//! # Responsibility
//! - Describe which entity types a store can hold.
//! - Merge entity descriptions from several model sources into one model.
//!
//! # Invariants
//! - Entity names are unique within a merged model.
//! - A merged model always contains at least one entity.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// A record type that can be stored through a [`crate::Repository`].
///
/// The type's registered name links Rust values to rows in the store;
/// it must match an entity description in the manager's model.
///
/// ```ignore
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Widget {
///     name: String,
/// }
///
/// impl Entity for Widget {
///     const ENTITY_NAME: &'static str = "Widget";
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Default + Clone + 'static {
    /// Stable name under which records of this type are stored.
    const ENTITY_NAME: &'static str;
    /// Schema version. Bump when the serialized shape changes.
    const VERSION: u32 = 1;
}

/// Schema entry for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescription {
    pub name: String,
    pub version: u32,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Builds the description registered for entity type `T`.
    pub fn of<T: Entity>() -> Self {
        Self::new(T::ENTITY_NAME, T::VERSION)
    }
}

/// A named group of entity descriptions contributed to a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSource {
    name: String,
    entities: Vec<EntityDescription>,
}

impl ModelSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    /// Registers entity type `T` with this source.
    pub fn with_entity<T: Entity>(self) -> Self {
        self.with_description(EntityDescription::of::<T>())
    }

    pub fn with_description(mut self, description: EntityDescription) -> Self {
        self.entities.push(description);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entities(&self) -> &[EntityDescription] {
        &self.entities
    }
}

/// Errors produced while merging model sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// No source contributed a single entity.
    Empty { sources: Vec<String> },
    /// Two sources registered the same entity name with different versions.
    ConflictingEntity {
        name: String,
        first_version: u32,
        second_version: u32,
    },
    /// Entity name is empty.
    InvalidEntityName { source: String },
    /// Entity version must be at least 1.
    InvalidVersion { name: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty { sources } => write!(
                f,
                "unable to merge a model from sources [{}]: no entities registered",
                sources.join(", ")
            ),
            Self::ConflictingEntity {
                name,
                first_version,
                second_version,
            } => write!(
                f,
                "entity `{name}` registered with conflicting versions {first_version} and {second_version}"
            ),
            Self::InvalidEntityName { source } => {
                write!(f, "model source `{source}` registers an entity with an empty name")
            }
            Self::InvalidVersion { name } => {
                write!(f, "entity `{name}` must have a version of at least 1")
            }
        }
    }
}

impl Error for ModelError {}

/// Merged, immutable entity model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    entities: BTreeMap<String, EntityDescription>,
}

impl Model {
    /// Merges all entity descriptions found in `sources`.
    ///
    /// Identical descriptions registered by several sources collapse into
    /// one entry.
    ///
    /// # Errors
    /// - `ModelError::Empty` when no source contributes an entity.
    /// - `ModelError::ConflictingEntity` when one name maps to two versions.
    pub fn merge(sources: &[ModelSource]) -> Result<Self, ModelError> {
        let mut entities: BTreeMap<String, EntityDescription> = BTreeMap::new();

        for source in sources {
            for description in &source.entities {
                if description.name.trim().is_empty() {
                    return Err(ModelError::InvalidEntityName {
                        source: source.name.clone(),
                    });
                }
                if description.version == 0 {
                    return Err(ModelError::InvalidVersion {
                        name: description.name.clone(),
                    });
                }

                match entities.get(&description.name) {
                    Some(existing) if existing.version != description.version => {
                        return Err(ModelError::ConflictingEntity {
                            name: description.name.clone(),
                            first_version: existing.version,
                            second_version: description.version,
                        });
                    }
                    Some(_) => {}
                    None => {
                        entities.insert(description.name.clone(), description.clone());
                    }
                }
            }
        }

        if entities.is_empty() {
            return Err(ModelError::Empty {
                sources: sources.iter().map(|source| source.name.clone()).collect(),
            });
        }

        Ok(Self { entities })
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.get(name)
    }

    /// Returns whether entity type `T` is registered with a matching version.
    pub fn contains<T: Entity>(&self) -> bool {
        self.entity(T::ENTITY_NAME)
            .is_some_and(|description| description.version == T::VERSION)
    }

    /// Iterates descriptions in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityDescription> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
