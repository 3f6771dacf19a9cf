//! Directory-backed key-value store.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::KeyValueStore;
use crate::StoreError;

/// A [`KeyValueStore`] writing one `<key>.json` file per key.
///
/// Writes go to a temporary file in the same directory which is then renamed
/// over the target, so readers in other processes (widgets) never observe a
/// half-written record.
///
/// # Example
///
/// ```no_run
/// use noise_mixer::{FileStore, MixStateStore};
/// use std::sync::Arc;
///
/// let backend = FileStore::new("/var/lib/noise-mixer").unwrap();
/// let store = MixStateStore::new(Arc::new(backend));
/// let state = store.load_last_mix();
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Returns the root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path used for `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(".{key}.json.tmp"));

        let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        file.write_all(value).map_err(|e| StoreError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MixStateStore, LAST_MIX_KEY};
    use crate::MixState;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", b"[1,2]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"[1,2]"[..]));

        store.set("k", b"[3]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"[3]"[..]));

        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
        store.remove("k").unwrap();
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.set(LAST_MIX_KEY, b"{}").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{LAST_MIX_KEY}.json")]);
    }

    #[test]
    fn test_file_store_rejects_bad_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                store.set(key, b"x"),
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn test_file_store_creates_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::new(&nested).unwrap();
        assert!(store.dir().is_dir());
    }

    #[test]
    fn test_mix_state_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let mut state = MixState::default();
        state.slots[2].enabled = true;
        state.slots[2].tone = 1.5;

        {
            let store = MixStateStore::new(Arc::new(FileStore::new(dir.path()).unwrap()));
            assert!(store.save_immediate(&state));
            store.set_resume_on_launch(true);
        }

        let store = MixStateStore::new(Arc::new(FileStore::new(dir.path()).unwrap()));
        assert_eq!(store.load_last_mix(), state);
        assert!(store.resume_on_launch());
    }
}
