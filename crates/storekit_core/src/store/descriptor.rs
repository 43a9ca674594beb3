//! Store backend descriptors.

/// Backing storage for a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// SQLite file under the user-data directory.
    Durable,
    /// Private in-memory database, gone when the manager is dropped.
    Ephemeral,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Durable => "durable",
            Self::Ephemeral => "ephemeral",
        }
    }
}

/// Migration flags applied when a durable store is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreOptions {
    /// Register entities the store has not seen before.
    pub auto_migrate: bool,
    /// Accept entity version changes and keep existing payloads as-is.
    pub infer_mapping: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_migrate: true,
            infer_mapping: true,
        }
    }
}

impl StoreOptions {
    /// Named flag view, as recorded in diagnostics.
    pub fn flags(&self) -> [(&'static str, bool); 2] {
        [
            ("auto_migrate", self.auto_migrate),
            ("infer_mapping", self.infer_mapping),
        ]
    }
}

/// Identifies a store backend and its options. Compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreDescriptor {
    kind: StoreKind,
    options: StoreOptions,
}

impl StoreDescriptor {
    pub fn durable() -> Self {
        Self {
            kind: StoreKind::Durable,
            options: StoreOptions::default(),
        }
    }

    pub fn ephemeral() -> Self {
        Self {
            kind: StoreKind::Ephemeral,
            options: StoreOptions::default(),
        }
    }

    /// Replaces the default migration options.
    ///
    /// Normal callers keep the defaults; this exists for tests that need to
    /// exercise migration refusal.
    pub fn with_options(self, options: StoreOptions) -> Self {
        Self { options, ..self }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::{StoreDescriptor, StoreKind, StoreOptions};

    #[test]
    fn descriptors_compare_by_value() {
        assert_eq!(StoreDescriptor::durable(), StoreDescriptor::durable());
        assert_ne!(StoreDescriptor::durable(), StoreDescriptor::ephemeral());

        let strict = StoreDescriptor::durable().with_options(StoreOptions {
            auto_migrate: false,
            infer_mapping: false,
        });
        assert_ne!(strict, StoreDescriptor::durable());
        assert_eq!(strict.kind(), StoreKind::Durable);
    }

    #[test]
    fn migration_flags_default_to_enabled() {
        let flags = StoreDescriptor::durable().options().flags();
        assert_eq!(flags, [("auto_migrate", true), ("infer_mapping", true)]);
    }
}
