// # File State Store
//
// File-based implementation of StateStore with crash recovery.
//
// ## Write Model
//
// `set_applied` only touches the in-memory map and marks it dirty. The pipeline calls `flush` once after the apply phase, so a run with
// six actions produces one file write instead of six.
//
// ## Crash Recovery
//
// - Atomic writes: temp file, then rename; a failed write removes the temp file
// - Backup: the previous file is copied to `<path>.backup` before each rename
// - Corruption: an unparsable file falls back to the backup, then to empty
//
// ## File Format
//
// ```json
// {
//   "version": "2",
//   "records": {
//     "ff8080...": {
//       "record_name": "cdn.example.com.",
//       "record_type": "A",
//       "ttl": 1,
//       "values": ["104.16.1.1", "104.16.1.2"],
//       "last_applied": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::StateStoreConfig;
use crate::planner::ReconciliationAction;
use crate::traits::state_store::{AppliedRecord, StateStore, StateStoreFactory};

/// Version 1 files stored only value lists; they no longer parse and are
/// treated as corrupt, which costs one rewrite of every record.
const STATE_FILE_VERSION: &str = "2";

/// File-based applied-state store
///
/// # Example
///
/// ```rust,no_run
/// use cfbest_core::planner::ReconciliationAction;
/// use cfbest_core::state::FileStateStore;
/// use cfbest_core::traits::StateStore;
///
/// # async fn applied(action: ReconciliationAction) -> Result<(), Box<dyn std::error::Error>> {
/// let store = FileStateStore::new("/var/lib/cfbest/state.json").await?;
/// store.set_applied(&action).await?;
/// store.flush().await?;
/// # Ok(())
/// # }
/// # fn main() {}
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug, Default)]
struct FileState {
    records: HashMap<String, AppliedRecord>,
    dirty: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StateFileFormat {
    version: String,
    records: HashMap<String, AppliedRecord>,
}

/// Why a state file could not be loaded
enum LoadError {
    /// The file exists but does not hold a valid state document
    Corrupt(String),
    /// The file could not be read at all
    Io(Error),
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// Parent directories are created when missing. A corrupted file is
    /// replaced by its backup when one parses; otherwise the store starts
    /// empty. Only unreadable files are reported as errors.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let records = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                records,
                dirty: false,
            })),
        })
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, AppliedRecord>, Error> {
        let reason = match Self::load(path).await {
            Ok(records) => {
                tracing::debug!(path = %path.display(), records = records.len(), "Loaded applied state");
                return Ok(records);
            }
            Err(LoadError::Io(e)) => return Err(e),
            Err(LoadError::Corrupt(reason)) => reason,
        };

        tracing::warn!(path = %path.display(), %reason, "State file corrupted, trying backup");

        let backup = backup_path(path);
        if !backup.exists() {
            tracing::warn!("No state backup found, starting empty");
            return Ok(HashMap::new());
        }

        match Self::load(&backup).await {
            Ok(records) => {
                tracing::info!(records = records.len(), "Recovered applied state from backup");
                if let Err(e) = fs::copy(&backup, path).await {
                    tracing::error!(error = %e, "Failed to restore state file from backup");
                }
                Ok(records)
            }
            Err(_) => {
                tracing::error!("State backup unusable too, starting empty");
                Ok(HashMap::new())
            }
        }
    }

    async fn load(path: &Path) -> Result<HashMap<String, AppliedRecord>, LoadError> {
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            )))
        })?;

        let parsed: StateFileFormat =
            serde_json::from_str(&content).map_err(|e| LoadError::Corrupt(e.to_string()))?;

        if parsed.version != STATE_FILE_VERSION {
            tracing::warn!(
                expected = STATE_FILE_VERSION,
                found = %parsed.version,
                "State file version mismatch, loading anyway"
            );
        }

        Ok(parsed.records)
    }

    async fn write_state(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;

        let document = StateFileFormat {
            version: STATE_FILE_VERSION.to_string(),
            records: guard.records.clone(),
        };
        let json = serde_json::to_vec_pretty(&document)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        write_atomic(&self.path, &json, true)
            .await
            .map_err(|e| Error::state_store(e.to_string()))?;

        guard.dirty = false;
        tracing::trace!(path = %self.path.display(), "Applied state written");
        Ok(())
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_applied(&self, record_id: &str) -> Result<Option<AppliedRecord>, Error> {
        Ok(self.state.read().await.records.get(record_id).cloned())
    }

    async fn set_applied(&self, action: &ReconciliationAction) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        guard
            .records
            .insert(action.record_id.clone(), AppliedRecord::new(action));
        guard.dirty = true;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        if !self.state.read().await.dirty {
            return Ok(());
        }
        self.write_state().await
    }
}

/// Factory for `StateStoreConfig::File`
pub struct FileStateStoreFactory;

#[async_trait]
impl StateStoreFactory for FileStateStoreFactory {
    async fn create(&self, config: &StateStoreConfig) -> Result<Box<dyn StateStore>, Error> {
        match config {
            StateStoreConfig::File { path } => Ok(Box::new(FileStateStore::new(path).await?)),
            _ => Err(Error::config("Invalid config for file state store")),
        }
    }
}

/// Write `contents` to `path` through a sibling temp file and a rename
///
/// With `keep_backup`, an existing file is first copied to `<path>.backup`.
/// Readers never observe a half-written file, and a failed write leaves no
/// temp file behind.
pub(crate) async fn write_atomic(
    path: &Path,
    contents: &[u8],
    keep_backup: bool,
) -> std::io::Result<()> {
    let temp = sibling(path, "tmp");
    let result = write_then_rename(&temp, path, contents, keep_backup).await;
    if result.is_err()
        && let Err(e) = fs::remove_file(&temp).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %temp.display(), error = %e, "Failed to remove temp file");
    }
    result
}

async fn write_then_rename(
    temp: &Path,
    path: &Path,
    contents: &[u8],
    keep_backup: bool,
) -> std::io::Result<()> {
    {
        let mut file = fs::File::create(temp).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
    }

    if keep_backup
        && path.exists()
        && let Err(e) = fs::copy(path, backup_path(path)).await
    {
        tracing::warn!(path = %path.display(), error = %e, "Failed to create backup");
    }

    fs::rename(temp, path).await
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, "backup")
}

/// `<path>.<suffix>`, keeping any existing extension
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::measurement::{AddressFamily, CarrierKey};
    use crate::planner::RecordType;

    fn action(record_id: &str, ips: &[&str]) -> ReconciliationAction {
        ReconciliationAction {
            carrier: CarrierKey::Telecom,
            address_family: AddressFamily::V4,
            record_id: record_id.to_string(),
            record_name: "cdn.example.com.".to_string(),
            record_type: RecordType::A,
            desired_addresses: ips.iter().map(|ip| ip.parse().unwrap()).collect(),
            ttl: 60,
        }
    }

    #[tokio::test]
    async fn test_set_is_buffered_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let written = action("ct-a", &["1.1.1.1"]);

        let store = FileStateStore::new(&path).await.unwrap();
        store.set_applied(&written).await.unwrap();
        assert!(!path.exists());

        store.flush().await.unwrap();
        assert!(path.exists());

        let reloaded = FileStateStore::new(&path).await.unwrap();
        let record = reloaded.get_applied("ct-a").await.unwrap().unwrap();
        assert!(record.matches(&written));
        assert_eq!(record.ttl, 60);
        assert_eq!(record.record_name, "cdn.example.com.");
    }

    #[tokio::test]
    async fn test_corruption_recovers_previous_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.set_applied(&action("ct-a", &["1.1.1.1"])).await.unwrap();
        store.flush().await.unwrap();
        store.set_applied(&action("ct-a", &["1.1.1.2"])).await.unwrap();
        store.flush().await.unwrap();

        assert!(backup_path(&path).exists());
        fs::write(&path, b"not json").await.unwrap();

        let recovered = FileStateStore::new(&path).await.unwrap();
        let record = recovered.get_applied("ct-a").await.unwrap().unwrap();
        assert!(record.matches(&action("ct-a", &["1.1.1.1"])));
    }

    #[tokio::test]
    async fn test_corruption_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"version\":").await.unwrap();

        let store = FileStateStore::new(&path).await.unwrap();
        assert!(store.get_applied("ct-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_value_only_records_are_not_trusted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let legacy = r#"{"version":"1","records":{"ct-a":{"values":["1.1.1.1"],"last_applied":"2025-01-09T12:00:00Z"}}}"#;
        fs::write(&path, legacy).await.unwrap();

        let store = FileStateStore::new(&path).await.unwrap();
        assert!(store.get_applied("ct-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.set_applied(&action("cm-aaaa", &["2606:4700::1"])).await.unwrap();
        store.flush().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_flush_without_changes_does_not_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStateStore::new(&path).await.unwrap();
        store.flush().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::create_dir(&path).await.unwrap();

        assert!(write_atomic(&path, b"{}", false).await.is_err());
        assert!(!sibling(&path, "tmp").exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_sibling_keeps_extension() {
        assert_eq!(
            sibling(Path::new("/tmp/state.json"), "backup"),
            PathBuf::from("/tmp/state.json.backup")
        );
    }
}
