//! File-based snapshot store for persistent storage.

use crate::encoding::SnapshotEncoding;
use crate::error::{StorageError, StorageResult};
use crate::gateway::{check_key, check_save_key, PersistenceGateway};
use async_trait::async_trait;
use replisync_protocol::{Element, Snapshot};
use serde::{Deserialize, Serialize};
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Configuration for a [`FileStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStoreConfig {
    /// Encoding of snapshot files.
    pub encoding: SnapshotEncoding,
    /// Whether to `fsync` each file before it replaces the previous one.
    pub sync_writes: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            encoding: SnapshotEncoding::Json,
            sync_writes: true,
        }
    }
}

impl FileStoreConfig {
    /// Sets the encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: SnapshotEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Enables or disables `fsync` on save.
    #[must_use]
    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}

/// A directory of snapshot files, one per set.
///
/// Set ids are escaped into file names, so any non-empty id is accepted.
/// Saves write a temporary file and rename it over the previous one, so a
/// reader never observes a partially written snapshot.
///
/// # Durability
///
/// With [`FileStoreConfig::sync_writes`] set, the temporary file is synced
/// to disk before the rename.
///
/// # Example
///
/// ```no_run
/// use replisync_storage::{FileStore, FileStoreConfig, PersistenceGateway};
///
/// # async fn run() -> replisync_storage::StorageResult<()> {
/// let store = FileStore::<String>::new("./replicas", FileStoreConfig::default());
/// store.open().await?;
/// let ids = store.list().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStore<T> {
    dir: PathBuf,
    config: FileStoreConfig,
    temp_counter: AtomicU64,
    _element: PhantomData<fn() -> T>,
}

impl<T: Element> FileStore<T> {
    /// Creates a store rooted at `dir`.
    ///
    /// No I/O happens until the first operation; [`PersistenceGateway::open`]
    /// creates the directory.
    pub fn new(dir: impl Into<PathBuf>, config: FileStoreConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            temp_counter: AtomicU64::new(0),
            _element: PhantomData,
        }
    }

    /// Returns the directory holding the snapshot files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &FileStoreConfig {
        &self.config
    }

    /// Returns the file path used for `set_id`.
    #[must_use]
    pub fn path_for(&self, set_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}",
            escape_id(set_id),
            self.config.encoding.extension()
        ))
    }

    fn temp_path_for(&self, set_id: &str) -> PathBuf {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            "{}.{}.{}.tmp",
            escape_id(set_id),
            self.config.encoding.extension(),
            n
        ))
    }
}

#[async_trait]
impl<T: Element> PersistenceGateway<T> for FileStore<T> {
    async fn open(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    async fn load(&self, set_id: &str) -> StorageResult<Option<Snapshot<T>>> {
        check_key(set_id)?;
        let path = self.path_for(set_id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot<T> = self.config.encoding.decode(&bytes)?;
        if snapshot.id != set_id {
            return Err(StorageError::IdMismatch {
                key: set_id.to_string(),
                snapshot_id: snapshot.id,
            });
        }
        tracing::trace!(set_id, items = snapshot.items.len(), "loaded snapshot");
        Ok(Some(snapshot))
    }

    async fn save(&self, set_id: &str, snapshot: &Snapshot<T>) -> StorageResult<()> {
        check_save_key(set_id, snapshot)?;
        let bytes = self.config.encoding.encode(snapshot)?;

        fs::create_dir_all(&self.dir).await?;
        let temp = self.temp_path_for(set_id);
        let written = write_file(&temp, &bytes, self.config.sync_writes).await;
        if let Err(err) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&temp, self.path_for(set_id)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(err.into());
        }

        tracing::trace!(set_id, items = snapshot.items.len(), "saved snapshot");
        Ok(())
    }

    async fn delete(&self, set_id: &str) -> StorageResult<bool> {
        check_key(set_id)?;
        match fs::remove_file(self.path_for(set_id)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let suffix = format!(".{}", self.config.encoding.extension());
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(&suffix) {
                if let Some(id) = unescape_id(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

async fn write_file(path: &Path, bytes: &[u8], sync: bool) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    if sync {
        file.sync_all().await?;
    }
    Ok(())
}

/// Escapes a set id into a portable file name stem.
///
/// ASCII alphanumerics, `-` and `_` are kept; every other byte becomes
/// `%XX`. The mapping is injective, so distinct ids never share a file.
fn escape_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Reverses [`escape_id`]. Returns `None` for names it could not produce.
fn unescape_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = stem.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
