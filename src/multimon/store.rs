//! Configuration Store
//!
//! Keeps at most one [`Configuration`] per identity key, loads them from the
//! first parseable `monitors.xml` in a prioritized path list, and saves them
//! back to the user path.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::multimon::configuration::{ConfigKey, Configuration};
use crate::multimon::persist::{self, ParseError};

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Persisted file could not be parsed
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Parse failure
        #[source]
        source: ParseError,
    },

    /// Persisted file could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// I/O failure
        #[source]
        source: std::io::Error,
    },
}

/// Identity-keyed configuration store
pub struct ConfigStore {
    /// User path, written by [`ConfigStore::save`]
    user_path: PathBuf,

    /// Stored configurations
    configs: BTreeMap<ConfigKey, Configuration>,

    /// In-flight asynchronous save
    pending_save: Option<JoinHandle<()>>,
}

impl ConfigStore {
    /// Create an empty store writing to `user_path`
    pub fn new(user_path: impl Into<PathBuf>) -> Self {
        Self {
            user_path: user_path.into(),
            configs: BTreeMap::new(),
            pending_save: None,
        }
    }

    /// Path saves go to
    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Configuration stored for exactly these identities
    pub fn lookup(&self, key: &ConfigKey) -> Option<Configuration> {
        self.configs.get(key).cloned()
    }

    /// Store `config`, replacing any configuration with the same identities
    pub fn insert_or_replace(&mut self, config: Configuration) {
        if self.configs.insert(config.key().clone(), config).is_some() {
            debug!("Replaced stored configuration");
        }
    }

    /// Number of stored configurations
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Stored configurations in key order
    pub fn configurations(&self) -> impl Iterator<Item = &Configuration> {
        self.configs.values()
    }

    /// Load the first parseable file of `paths`
    ///
    /// Missing files and parse failures fall through to the next path.
    /// Blocks; called once before the first modeset.
    ///
    /// # Returns
    ///
    /// The path the configurations were loaded from, if any
    pub fn load<P: AsRef<Path>>(&mut self, paths: &[P]) -> Option<PathBuf> {
        for path in paths {
            let path = path.as_ref();

            match Self::read_file(path) {
                Ok(configs) => {
                    info!("Loaded {} monitor configurations from {}", configs.len(), path.display());
                    for config in configs {
                        self.insert_or_replace(config);
                    }
                    return Some(path.to_path_buf());
                }
                Err(StoreError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No monitor configuration at {}", path.display());
                }
                Err(e) => {
                    warn!("Ignoring monitor configuration: {}", e);
                }
            }
        }

        info!("No stored monitor configuration found");
        None
    }

    /// Read and parse one persisted file
    pub fn read_file(path: &Path) -> Result<Vec<Configuration>, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        persist::parse(&content).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save all configurations to the user path without blocking
    ///
    /// Supersedes any save still in flight. Outside a tokio runtime the file
    /// is written synchronously. Failures are logged, never returned.
    pub fn save(&mut self) {
        let contents = persist::serialize(self.configs.values());
        let path = self.user_path.clone();

        if let Some(previous) = self.pending_save.take() {
            if !previous.is_finished() {
                debug!("Cancelling in-flight monitor configuration save");
            }
            previous.abort();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                self.pending_save = Some(handle.spawn(async move {
                    if let Err(e) = write_atomically(&path, contents).await {
                        warn!("Failed to save monitor configuration: {}", e);
                    }
                }));
            }
            Err(_) => {
                if let Err(e) = write_atomically_blocking(&path, &contents) {
                    warn!("Failed to save monitor configuration: {}", e);
                }
            }
        }
    }

    /// Save all configurations to the user path, blocking
    pub fn save_blocking(&mut self) -> Result<(), StoreError> {
        if let Some(previous) = self.pending_save.take() {
            previous.abort();
        }
        let contents = persist::serialize(self.configs.values());
        write_atomically_blocking(&self.user_path, &contents)
    }

    /// Wait for the in-flight save, if any
    pub async fn flush(&mut self) {
        if let Some(pending) = self.pending_save.take() {
            // An aborted save has nothing to report
            let _ = pending.await;
        }
    }
}

/// Sequence for temp file names, so a superseded save never shares one
static SAVE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn temp_path(path: &Path) -> PathBuf {
    let sequence = SAVE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.{}.tmp", std::process::id(), sequence));
    path.with_file_name(name)
}

async fn write_atomically(path: &Path, contents: String) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let tmp = temp_path(path);
    let written = match tokio::fs::write(&tmp, contents).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }

    debug!("Saved monitor configuration to {}", path.display());
    Ok(())
}

fn write_atomically_blocking(path: &Path, contents: &str) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = temp_path(path);
    if let Err(e) = fs::write(&tmp, contents).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }

    debug!("Saved monitor configuration to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multimon::configuration::{OutputIdentity, OutputSettings};
    use crate::multimon::resources::Rect;
    use tempfile::TempDir;

    fn config(x: i32) -> Configuration {
        Configuration::new([(
            OutputIdentity::new("DP-1", "V", "P", "S"),
            OutputSettings::enabled(Rect::new(x, 0, 800, 600), 60.0).primary(true),
        )])
        .unwrap()
    }

    const VALID: &str = r#"<monitors version="1"><configuration><output name="DP-1">
<vendor>V</vendor><product>P</product><serial>S</serial>
<width>800</width><height>600</height><rate>60</rate><x>0</x><y>0</y>
</output></configuration></monitors>"#;

    #[test]
    fn test_insert_replaces_same_identity() {
        let mut store = ConfigStore::new("/nonexistent/monitors.xml");
        store.insert_or_replace(config(0));
        store.insert_or_replace(config(100));

        assert_eq!(store.len(), 1);
        let found = store.lookup(config(0).key()).unwrap();
        assert_eq!(found.settings()[0].rect.x, 100);
    }

    #[test]
    fn test_lookup_missing() {
        let store = ConfigStore::new("/nonexistent/monitors.xml");
        assert!(store.lookup(config(0).key()).is_none());
    }

    #[test]
    fn test_load_falls_through_bad_user_file() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.xml");
        let system = dir.path().join("system.xml");
        fs::write(&user, "<monitors version=\"7\"></monitors>").unwrap();
        fs::write(&system, VALID).unwrap();

        let mut store = ConfigStore::new(&user);
        let loaded = store.load(&[&user, &system]);

        assert_eq!(loaded.as_deref(), Some(system.as_path()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_stops_at_first_parseable() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.xml");
        let system = dir.path().join("system.xml");
        fs::write(&user, r#"<monitors version="1"></monitors>"#).unwrap();
        fs::write(&system, VALID).unwrap();

        let mut store = ConfigStore::new(&user);
        let loaded = store.load(&[&user, &system]);

        assert_eq!(loaded.as_deref(), Some(user.as_path()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::new(dir.path().join("user.xml"));
        assert!(store.load(&[dir.path().join("missing.xml")]).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_without_runtime_writes_synchronously() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("monitors.xml");

        let mut store = ConfigStore::new(&path);
        store.insert_or_replace(config(0));
        store.save();

        let reread = ConfigStore::read_file(&path).unwrap();
        assert_eq!(reread.len(), 1);
        assert!(reread[0].full_eq(&config(0)));
        let names: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["monitors.xml"]);
    }

    #[test]
    fn test_each_save_gets_its_own_temp_file() {
        let path = Path::new("/var/lib/display/monitors.xml");
        let first = temp_path(path);
        let second = temp_path(path);

        assert_ne!(first, second);
        assert_eq!(first.parent(), path.parent());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("monitors.xml."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn test_stale_temp_file_does_not_reach_target() {
        // A superseded write may still land in its own temp file
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitors.xml");
        let stale = temp_path(&path);
        fs::write(&stale, "<monitors version=\"1\"><configuration>").unwrap();

        let mut store = ConfigStore::new(&path);
        store.insert_or_replace(config(300));
        store.save_blocking().unwrap();

        let reread = ConfigStore::read_file(&path).unwrap();
        assert_eq!(reread[0].settings()[0].rect.x, 300);
        assert!(stale.exists());
    }

    #[tokio::test]
    async fn test_save_supersedes_in_flight_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitors.xml");

        let mut store = ConfigStore::new(&path);
        store.insert_or_replace(config(0));
        store.save();
        store.insert_or_replace(config(300));
        store.save();
        store.flush().await;

        let reread = ConfigStore::read_file(&path).unwrap();
        assert_eq!(reread[0].settings()[0].rect.x, 300);
    }

    #[test]
    fn test_save_io_failure_is_reported_by_blocking_save() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let mut store = ConfigStore::new(blocker.join("monitors.xml"));
        store.insert_or_replace(config(0));
        assert!(matches!(store.save_blocking(), Err(StoreError::Io { .. })));
        // The fire-and-forget variant only logs
        store.save();
        assert_eq!(store.len(), 1);
    }
}
