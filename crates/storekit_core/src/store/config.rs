//! Store configuration and on-disk location.
//!
//! # Invariants
//! - Durable stores live at `<data_dir>/<model_name>.sqlite`.
//! - Ephemeral stores never touch the file system.

use super::descriptor::{StoreDescriptor, StoreKind};
use super::InitError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// File extension of durable store files.
pub const STORE_FILE_EXTENSION: &str = "sqlite";

/// Everything a [`crate::PersistenceManager`] needs besides the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Store name; doubles as the durable file stem.
    pub model_name: String,
    pub descriptor: StoreDescriptor,
    /// Overrides the user-data directory for durable stores.
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(model_name: impl Into<String>, descriptor: StoreDescriptor) -> Self {
        Self {
            model_name: model_name.into(),
            descriptor,
            data_dir: None,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Resolves the store file path, or `None` for ephemeral stores.
    ///
    /// # Errors
    /// - `InvalidModelName` when the name is empty or contains path parts.
    /// - `DataDirUnavailable` when no user-data directory can be found.
    pub fn store_path(&self) -> Result<Option<PathBuf>, InitError> {
        self.store_path_with(|key| std::env::var_os(key))
    }

    fn store_path_with(
        &self,
        env: impl Fn(&str) -> Option<OsString>,
    ) -> Result<Option<PathBuf>, InitError> {
        validate_model_name(&self.model_name)?;
        if self.descriptor.kind() == StoreKind::Ephemeral {
            return Ok(None);
        }

        let data_dir = match &self.data_dir {
            Some(dir) => dir.clone(),
            None => resolve_data_dir(env).ok_or(InitError::DataDirUnavailable)?,
        };
        Ok(Some(store_file_path(&data_dir, &self.model_name)))
    }
}

/// Builds `<data_dir>/<model_name>.sqlite`.
pub fn store_file_path(data_dir: &Path, model_name: &str) -> PathBuf {
    data_dir.join(format!("{model_name}.{STORE_FILE_EXTENSION}"))
}

/// Returns the per-user data directory from the process environment.
pub fn user_data_dir() -> Option<PathBuf> {
    resolve_data_dir(|key| std::env::var_os(key))
}

/// Picks the first absolute directory among `$XDG_DATA_HOME`,
/// `$HOME/.local/share` and `%APPDATA%`. Relative values are ignored.
fn resolve_data_dir(env: impl Fn(&str) -> Option<OsString>) -> Option<PathBuf> {
    let absolute = |key: &str| {
        env(key)
            .map(PathBuf::from)
            .filter(|path| path.is_absolute())
    };

    absolute("XDG_DATA_HOME")
        .or_else(|| absolute("HOME").map(|home| home.join(".local").join("share")))
        .or_else(|| absolute("APPDATA"))
}

fn validate_model_name(model_name: &str) -> Result<(), InitError> {
    let trimmed = model_name.trim();
    let invalid = trimmed.is_empty()
        || trimmed != model_name
        || model_name.contains(['/', '\\'])
        || model_name == "."
        || model_name == "..";
    if invalid {
        return Err(InitError::InvalidModelName(model_name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{resolve_data_dir, store_file_path, StoreConfig};
    use crate::store::{InitError, StoreDescriptor};
    use std::collections::HashMap;
    use std::ffi::OsString;
    use std::path::{Path, PathBuf};

    fn env_of(vars: &[(&str, PathBuf)]) -> impl Fn(&str) -> Option<OsString> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone().into_os_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn durable_store_path_uses_model_name_and_extension() {
        let config = StoreConfig::new("Inventory", StoreDescriptor::durable())
            .with_data_dir("/var/lib/app");
        assert_eq!(
            config.store_path().unwrap().as_deref(),
            Some(Path::new("/var/lib/app/Inventory.sqlite"))
        );
    }

    #[test]
    fn ephemeral_store_has_no_path() {
        let config = StoreConfig::new("Inventory", StoreDescriptor::ephemeral())
            .with_data_dir("/var/lib/app");
        assert_eq!(config.store_path().unwrap(), None);
    }

    #[test]
    fn model_names_with_path_parts_are_rejected() {
        for name in ["", " padded", "../escape", "a/b", ".."] {
            let config = StoreConfig::new(name, StoreDescriptor::ephemeral());
            assert!(matches!(
                config.store_path(),
                Err(InitError::InvalidModelName(_))
            ));
        }
    }

    #[test]
    fn store_file_path_joins_directory() {
        assert_eq!(
            store_file_path(Path::new("/data"), "Model"),
            Path::new("/data/Model.sqlite")
        );
    }

    #[test]
    fn data_dir_prefers_xdg_data_home() {
        let root = std::env::temp_dir();
        let env = env_of(&[
            ("XDG_DATA_HOME", root.join("xdg")),
            ("HOME", root.join("home")),
            ("APPDATA", root.join("appdata")),
        ]);
        assert_eq!(resolve_data_dir(env), Some(root.join("xdg")));
    }

    #[test]
    fn data_dir_falls_back_to_home_local_share() {
        let root = std::env::temp_dir();
        let env = env_of(&[("HOME", root.join("home")), ("APPDATA", root.join("appdata"))]);
        assert_eq!(
            resolve_data_dir(env),
            Some(root.join("home").join(".local").join("share"))
        );
    }

    #[test]
    fn relative_directories_are_ignored() {
        let root = std::env::temp_dir();
        let env = env_of(&[
            ("XDG_DATA_HOME", PathBuf::from("relative/xdg")),
            ("HOME", PathBuf::from("relative-home")),
            ("APPDATA", root.join("appdata")),
        ]);
        assert_eq!(resolve_data_dir(env), Some(root.join("appdata")));

        let env = env_of(&[("XDG_DATA_HOME", PathBuf::from("relative/xdg"))]);
        assert_eq!(resolve_data_dir(env), None);
    }

    #[test]
    fn durable_store_defaults_to_user_data_dir() {
        let root = std::env::temp_dir();
        let config = StoreConfig::new("Inventory", StoreDescriptor::durable());

        let path = config
            .store_path_with(env_of(&[("HOME", root.join("home"))]))
            .unwrap();
        assert_eq!(
            path,
            Some(
                root.join("home")
                    .join(".local")
                    .join("share")
                    .join("Inventory.sqlite")
            )
        );

        assert!(matches!(
            config.store_path_with(env_of(&[])),
            Err(InitError::DataDirUnavailable)
        ));
    }
}
