//! Process-wide property table

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, info, warn};

use crate::error::{BuiltinError, IoContext, Result};

pub const CRYPTO_STATE: &str = "ro.crypto.state";
pub const CRYPTO_FS_TYPE: &str = "ro.crypto.fs_type";
pub const CRYPTO_FS_REAL_BLKDEV: &str = "ro.crypto.fs_real_blkdev";
pub const CRYPTO_FS_MNT_POINT: &str = "ro.crypto.fs_mnt_point";
pub const CRYPTO_FS_OPTIONS: &str = "ro.crypto.fs_options";
pub const CRYPTO_FS_FLAGS: &str = "ro.crypto.fs_flags";
pub const CRYPTO_TMPFS_OPTIONS: &str = "ro.crypto.tmpfs_options";
pub const VOLD_DECRYPT: &str = "vold.decrypt";

const PERSIST_PREFIX: &str = "persist.";

/// Key/value store shared by the executor and later boot stages.
///
/// Last writer wins; there are no transactions.
pub trait PropertyStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    /// Load `persist.*` properties saved by earlier boots.
    fn load_persistent(&self) -> Result<usize>;
}

/// Mutex-guarded in-process property table.
#[derive(Debug, Default)]
pub struct MemoryProperties {
    values: Mutex<HashMap<String, String>>,
    persist_dir: Option<PathBuf>,
}

impl MemoryProperties {
    /// A table with no persist directory.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_persist_dir(dir: impl Into<PathBuf>) -> Self {
        MemoryProperties {
            values: Mutex::default(),
            persist_dir: Some(dir.into()),
        }
    }

    fn read_persist_dir(&self, dir: &Path) -> Result<usize> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
        let mut loaded = 0;

        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(PERSIST_PREFIX) {
                continue;
            }
            match fs::read_to_string(entry.path()) {
                Ok(value) => {
                    self.set(&name, value.trim_end_matches('\n'));
                    loaded += 1;
                }
                Err(e) => warn!("skipping persistent property {}: {}", name, e),
            }
        }

        Ok(loaded)
    }
}

impl PropertyStore for MemoryProperties {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        debug!("setprop {} = {}", key, value);
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
    }

    fn load_persistent(&self) -> Result<usize> {
        let Some(dir) = &self.persist_dir else {
            return Ok(0);
        };
        let loaded = self.read_persist_dir(dir)?;
        info!("loaded {} persistent properties from {}", loaded, dir.display());
        Ok(loaded)
    }
}

/// Resolve a `$name` reference against the store.
///
/// `$$literal` yields `$literal`; anything else is returned unchanged.
pub fn expand(props: &dyn PropertyStore, value: &str) -> Result<String> {
    match value.strip_prefix('$') {
        Some(rest) if rest.starts_with('$') => Ok(rest.to_string()),
        Some(name) => props
            .get(name)
            .ok_or_else(|| BuiltinError::MissingProperty(name.to_string())),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let props = MemoryProperties::new();
        assert_eq!(props.get("ro.hardware"), None);
        props.set("ro.hardware", "mt53xx");
        props.set("ro.hardware", "mt5396");
        assert_eq!(props.get("ro.hardware"), Some("mt5396".to_string()));
    }

    #[test]
    fn test_expand_literal() {
        let props = MemoryProperties::new();
        assert_eq!(expand(&props, "plain").unwrap(), "plain");
    }

    #[test]
    fn test_expand_reference() {
        let props = MemoryProperties::new();
        props.set("ro.serialno", "0123");
        assert_eq!(expand(&props, "$ro.serialno").unwrap(), "0123");
    }

    #[test]
    fn test_expand_double_dollar() {
        let props = MemoryProperties::new();
        assert_eq!(expand(&props, "$$HOME").unwrap(), "$HOME");
    }

    #[test]
    fn test_expand_missing() {
        let props = MemoryProperties::new();
        let err = expand(&props, "$ro.missing").unwrap_err();
        assert!(matches!(err, BuiltinError::MissingProperty(ref name) if name == "ro.missing"));
    }

    #[test]
    fn test_load_persistent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("persist.sys.timezone"), "Europe/Oslo\n").unwrap();
        fs::write(dir.path().join("ro.not.persistent"), "x").unwrap();

        let props = MemoryProperties::with_persist_dir(dir.path());
        assert_eq!(props.load_persistent().unwrap(), 1);
        assert_eq!(props.get("persist.sys.timezone"), Some("Europe/Oslo".to_string()));
        assert_eq!(props.get("ro.not.persistent"), None);
    }

    #[test]
    fn test_load_persistent_without_dir() {
        let props = MemoryProperties::new();
        assert_eq!(props.load_persistent().unwrap(), 0);
    }
}
