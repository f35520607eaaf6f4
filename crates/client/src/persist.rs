//! Persisted store snapshot.
//!
//! The snapshot survives process restarts and is laid out as
//!
//! ```json
//! { "atelier": { "auth": { ... }, "cart": { "items": [ ... ] } } }
//! ```
//!
//! Only the `auth` and `cart` slices are persisted. Everything else (server
//! cart mirror, loading flags, last error) is rebuilt at runtime.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cart::GuestCart;
use crate::session::PersistedAuth;

/// Root namespace the slices are stored under.
pub const ROOT_NAMESPACE: &str = "atelier";

/// Errors reading or writing the snapshot.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("snapshot json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The persisted slices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Session slice.
    #[serde(default)]
    pub auth: PersistedAuth,
    /// Guest cart slice.
    #[serde(default)]
    pub cart: GuestCart,
}

#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(rename = "atelier")]
    root: Snapshot,
}

/// Where snapshot text is stored.
pub trait SnapshotBackend: Send + Sync {
    /// Read the stored document, `None` when nothing was stored yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    fn load(&self) -> Result<Option<String>, PersistenceError>;

    /// Replace the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written.
    fn save(&self, contents: &str) -> Result<(), PersistenceError>;
}

/// JSON file backend, written atomically through a sibling temp file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    /// Store the snapshot at `path`, creating parent directories on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotBackend for FileBackend {
    fn load(&self) -> Result<Option<String>, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, contents: &str) -> Result<(), PersistenceError> {
        write_atomically(&self.path, contents)
    }
}

/// Write `contents` to `path` via a temp file and rename.
pub(crate) fn write_atomically(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// In-memory backend for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    contents: Mutex<Option<String>>,
}

impl MemoryBackend {
    /// Backend pre-seeded with a stored document.
    #[must_use]
    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(contents.into())),
        }
    }

    /// The last saved document.
    #[must_use]
    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>, PersistenceError> {
        Ok(self.contents())
    }

    fn save(&self, contents: &str) -> Result<(), PersistenceError> {
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) = Some(contents.to_string());
        Ok(())
    }
}

/// Owns the current snapshot and writes it through to a backend.
///
/// Every update is applied to the in-memory copy first; a failed write is
/// logged and the in-memory state stays authoritative for this process.
pub struct Persistor {
    backend: Box<dyn SnapshotBackend>,
    current: Mutex<Snapshot>,
}

impl Persistor {
    /// Open a persistor, loading whatever the backend holds.
    ///
    /// Missing or unreadable snapshots start fresh.
    #[must_use]
    pub fn open(backend: impl SnapshotBackend + 'static) -> Self {
        let snapshot = match backend.load() {
            Ok(Some(contents)) => match serde_json::from_str::<Document>(&contents) {
                Ok(document) => document.root,
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable snapshot");
                    Snapshot::default()
                }
            },
            Ok(None) => Snapshot::default(),
            Err(e) => {
                warn!(error = %e, "Failed to load snapshot, starting fresh");
                Snapshot::default()
            }
        };

        Self {
            backend: Box::new(backend),
            current: Mutex::new(snapshot),
        }
    }

    /// Persistor backed by memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::open(MemoryBackend::default())
    }

    /// Copy of the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.lock().clone()
    }

    /// Copy of the guest cart slice.
    #[must_use]
    pub fn guest_cart(&self) -> GuestCart {
        self.lock().cart.clone()
    }

    /// Replace the auth slice.
    pub fn save_auth(&self, auth: PersistedAuth) {
        let mut current = self.lock();
        if current.auth == auth {
            return;
        }
        current.auth = auth;
        self.write(&current);
    }

    /// Mutate the guest cart slice and persist it.
    pub fn update_cart<R>(&self, f: impl FnOnce(&mut GuestCart) -> R) -> R {
        let mut current = self.lock();
        let result = f(&mut current.cart);
        self.write(&current);
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, snapshot: &Snapshot) {
        let document = Document {
            root: snapshot.clone(),
        };
        let result = serde_json::to_string_pretty(&document)
            .map_err(PersistenceError::from)
            .and_then(|contents| self.backend.save(&contents));
        match result {
            Ok(()) => debug!("Snapshot persisted"),
            Err(e) => warn!(error = %e, "Failed to persist snapshot"),
        }
    }
}

impl std::fmt::Debug for Persistor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistor")
            .field("current", &*self.lock())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let persistor = Persistor::open(FileBackend::new(dir.path().join("state.json")));
        assert_eq!(persistor.snapshot(), Snapshot::default());
    }

    #[test]
    fn test_corrupt_document_starts_fresh() {
        let persistor = Persistor::open(MemoryBackend::with_contents("{not json"));
        assert_eq!(persistor.snapshot(), Snapshot::default());
    }

    #[test]
    fn test_snapshot_is_namespaced_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let persistor = Persistor::open(FileBackend::new(&path));
        persistor.save_auth(PersistedAuth {
            access_token: Some("acc-1234567890".to_string()),
            ..PersistedAuth::default()
        });

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get(ROOT_NAMESPACE).unwrap().get("auth").is_some());
        assert!(raw.get(ROOT_NAMESPACE).unwrap().get("cart").is_some());
        assert!(raw.get(ROOT_NAMESPACE).unwrap().get("wishlist").is_none());

        let reopened = Persistor::open(FileBackend::new(&path));
        assert_eq!(
            reopened.snapshot().auth.access_token.as_deref(),
            Some("acc-1234567890")
        );
    }
}
