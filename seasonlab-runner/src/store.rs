//! Named basket persistence.
//!
//! Layout: `{basket_dir}/{name}.json`, each holding a `Vec<BasketStrategy>`.
//!
//! Writes are atomic (write to `.json.tmp`, rename into place) and serialized
//! through a process-local mutex, so readers never observe a partial file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::info;

use seasonlab_core::BasketStrategy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid basket name {0:?} (use letters, digits, '-' or '_')")]
    InvalidName(String),

    #[error("basket '{0}' not found")]
    NotFound(String),

    #[error("basket '{basket}' has no strategy {key}")]
    UnknownStrategy { basket: String, key: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed basket file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Directory of named baskets.
pub struct BasketStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl BasketStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> Result<PathBuf, StoreError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the basket `name` with `strategies`.
    pub fn save(&self, name: &str, strategies: &[BasketStrategy]) -> Result<(), StoreError> {
        let path = self.path(name)?;
        let _guard = self.lock();
        self.write_atomic(&path, strategies)?;
        info!(basket = name, strategies = strategies.len(), "basket saved");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Vec<BasketStrategy>, StoreError> {
        let path = self.path(name)?;
        read_basket(&path, name)
    }

    /// Basket names, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| {
                let path = e.path();
                if path.extension()? != "json" {
                    return None;
                }
                path.file_stem()?.to_str().map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path(name)?;
        let _guard = self.lock();
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(basket = name, "basket deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Add `strategy` to `name` (creating the basket if needed). An entry with
    /// the same key is replaced in place.
    pub fn upsert(
        &self,
        name: &str,
        strategy: BasketStrategy,
    ) -> Result<Vec<BasketStrategy>, StoreError> {
        let path = self.path(name)?;
        let _guard = self.lock();
        let mut strategies = match read_basket(&path, name) {
            Ok(s) => s,
            Err(StoreError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let key = strategy.key();
        match strategies.iter_mut().find(|s| s.key() == key) {
            Some(existing) => *existing = strategy,
            None => strategies.push(strategy),
        }
        self.write_atomic(&path, &strategies)?;
        info!(basket = name, key = %key, "strategy stored");
        Ok(strategies)
    }

    /// Hide or unhide the strategy with `key`.
    pub fn set_visible(
        &self,
        name: &str,
        key: &str,
        visible: bool,
    ) -> Result<Vec<BasketStrategy>, StoreError> {
        let path = self.path(name)?;
        let _guard = self.lock();
        let mut strategies = read_basket(&path, name)?;
        let entry = strategies
            .iter_mut()
            .find(|s| s.key() == key)
            .ok_or_else(|| StoreError::UnknownStrategy {
                basket: name.to_string(),
                key: key.to_string(),
            })?;
        entry.visible = visible;
        self.write_atomic(&path, &strategies)?;
        info!(basket = name, key, visible, "visibility changed");
        Ok(strategies)
    }

    /// Caller holds the write lock.
    fn write_atomic(&self, path: &Path, strategies: &[BasketStrategy]) -> Result<(), StoreError> {
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(strategies).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_err(e)
        })
    }
}

fn read_basket(path: &Path, name: &str) -> Result<Vec<BasketStrategy>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(name.to_string()))
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, BasketStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BasketStore::new(dir.path().join("baskets"));
        (dir, store)
    }

    fn strategies() -> Vec<BasketStrategy> {
        vec![
            BasketStrategy::new("INFY", 30, 60.0),
            BasketStrategy::new("TCS", 21, 50.0),
        ]
    }

    #[test]
    fn save_load_roundtrip() {
        let (_dir, store) = store();
        store.save("core", &strategies()).unwrap();
        assert_eq!(store.load("core").unwrap(), strategies());
        assert!(!store.dir().join("core.json.tmp").exists());
    }

    #[test]
    fn list_is_sorted_and_ignores_other_files() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
        store.save("zeta", &strategies()).unwrap();
        store.save("alpha", &strategies()).unwrap();
        fs::write(store.dir().join("notes.txt"), "x").unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn delete_and_missing() {
        let (_dir, store) = store();
        store.save("b", &strategies()).unwrap();
        store.delete("b").unwrap();
        assert!(matches!(store.load("b"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("b"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn names_cannot_escape_dir() {
        let (_dir, store) = store();
        for bad in ["", "../x", "a/b", "a.b"] {
            assert!(matches!(store.load(bad), Err(StoreError::InvalidName(_))));
        }
    }

    #[test]
    fn set_visible_toggles_one_entry() {
        let (_dir, store) = store();
        store.save("b", &strategies()).unwrap();
        let updated = store.set_visible("b", "TCS:21@50", false).unwrap();
        assert!(updated[0].visible);
        assert!(!updated[1].visible);
        assert_eq!(store.load("b").unwrap(), updated);
        assert!(matches!(
            store.set_visible("b", "NOPE:1@1", true),
            Err(StoreError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn upsert_creates_and_replaces() {
        let (_dir, store) = store();
        store.upsert("new", BasketStrategy::new("A", 30, 50.0)).unwrap();
        let mut replacement = BasketStrategy::new("A", 30, 50.0);
        replacement.weight = 0.4;
        let all = store.upsert("new", replacement).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].weight, 0.4);
    }

    #[test]
    fn malformed_file_is_reported() {
        let (_dir, store) = store();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.dir().join("bad.json"), "{not json").unwrap();
        assert!(matches!(store.load("bad"), Err(StoreError::Json { .. })));
    }
}
