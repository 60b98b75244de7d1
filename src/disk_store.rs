//! Disk Chunk Store Module
//!
//! Reads and writes individual chunk files. Layout:
//!
//! ```text
//! <root>/<object id>/<window start>             (unversioned keys)
//! <root>/<object id>/@<version>/<window start>  (versioned keys)
//! ```
//!
//! The version is percent-encoded the same way object ids are encoded in
//! request URIs.
//!
//! Files hold raw chunk bytes with no header. A file is written once and its
//! modification time is refreshed on every successful read so an external
//! sweeper can evict the least recently used chunks.

use crate::chunk_types::{encode_name, ChunkKey};
use crate::events::{ChunkEvent, ChunkEventSink};
use crate::{ChunkCacheError, Result};
use bytes::Bytes;
use filetime::FileTime;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use uuid::Uuid;

/// Result of a successful write-path call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A new chunk file was created at this path
    Stored(PathBuf),
    /// A chunk file already existed at this path and was left untouched
    AlreadyCached(PathBuf),
}

/// File-based store for chunk windows
pub struct DiskChunkStore {
    root: PathBuf,
    events: Arc<dyn ChunkEventSink>,
}

impl DiskChunkStore {
    pub fn new(root: PathBuf, events: Arc<dyn ChunkEventSink>) -> Self {
        Self { root, events }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every chunk file of the key's object (and version)
    pub fn chunk_dir(&self, key: &ChunkKey) -> std::result::Result<PathBuf, String> {
        validate_object_id(&key.object_id)?;
        let mut dir = self.root.join(&key.object_id);
        if let Some(version) = &key.version {
            dir.push(format!("@{}", encode_name(version)));
        }
        Ok(dir)
    }

    /// Path of the chunk file for a key
    pub fn chunk_path(&self, key: &ChunkKey) -> std::result::Result<PathBuf, String> {
        Ok(self.chunk_dir(key)?.join(key.window_start.to_string()))
    }

    /// Read up to `len` bytes at `offset_in_window` from the cached chunk.
    ///
    /// A read cut short by end-of-file is fine (last chunk of an object).
    /// Every failure is reported as [`ChunkCacheError::CacheMiss`].
    pub async fn load_chunk(
        &self,
        key: &ChunkKey,
        offset_in_window: u64,
        len: usize,
    ) -> Result<Bytes> {
        let path = self.chunk_path(key).map_err(ChunkCacheError::CacheMiss)?;

        let mut file = File::open(&path).await.map_err(|e| {
            ChunkCacheError::CacheMiss(format!("Could not open file {:?}: {}", path, e))
        })?;

        file.seek(SeekFrom::Start(offset_in_window))
            .await
            .map_err(|e| {
                ChunkCacheError::CacheMiss(format!(
                    "Could not seek file {:?} to {}: {}",
                    path, offset_in_window, e
                ))
            })?;

        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match file.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ChunkCacheError::CacheMiss(format!(
                        "Could not read file {:?} at {}: {}",
                        path, offset_in_window, e
                    )));
                }
            }
        }

        if filled == 0 {
            return Err(ChunkCacheError::CacheMiss(format!(
                "No cached bytes in file {:?} at {}",
                path, offset_in_window
            )));
        }

        self.touch(&path).await;

        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    /// Persist a full chunk window unless a file for the key already exists.
    ///
    /// Data goes to a uniquely named temporary file first and is renamed into
    /// place, so readers never see a partially written chunk.
    pub async fn store_chunk(&self, key: &ChunkKey, data: &[u8]) -> Result<StoreOutcome> {
        let dir = self.chunk_dir(key).map_err(ChunkCacheError::CacheWriteError)?;
        let path = dir.join(key.window_start.to_string());

        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ChunkCacheError::CacheWriteError(format!(
                "Could not create chunk directory {:?}: {}",
                dir, e
            ))
        })?;

        if chunk_exists(&path).await? {
            return Ok(StoreOutcome::AlreadyCached(path));
        }

        let temp_path = dir.join(format!(
            "{}.{}.tmp",
            key.window_start,
            Uuid::new_v4().simple()
        ));

        if let Err(e) = tokio::fs::write(&temp_path, data).await {
            remove_temp_file(&temp_path).await;
            return Err(ChunkCacheError::CacheWriteError(format!(
                "Could not write chunk file {:?}: {}",
                temp_path, e
            )));
        }

        // Another writer may have finished while we were writing
        if chunk_exists(&path).await? {
            remove_temp_file(&temp_path).await;
            return Ok(StoreOutcome::AlreadyCached(path));
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            remove_temp_file(&temp_path).await;
            return Err(ChunkCacheError::CacheWriteError(format!(
                "Could not commit chunk file {:?}: {}",
                path, e
            )));
        }

        Ok(StoreOutcome::Stored(path))
    }

    /// Refresh the file's access and modification times. Best-effort.
    async fn touch(&self, path: &Path) {
        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || {
            let now = FileTime::now();
            filetime::set_file_times(&target, now, now)
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::new(ErrorKind::Other, e)));

        if let Err(e) = result {
            self.events.record(ChunkEvent::TouchFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    }
}

async fn chunk_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path).await.map_err(|e| {
        ChunkCacheError::CacheWriteError(format!("Could not stat chunk file {:?}: {}", path, e))
    })
}

async fn remove_temp_file(path: &Path) {
    // Cleanup is best-effort; a leftover .tmp file is never read
    let _ = tokio::fs::remove_file(path).await;
}

/// Reject object ids that cannot be used as a single directory name
pub fn validate_object_id(object_id: &str) -> std::result::Result<(), String> {
    if object_id.is_empty() {
        return Err("Object id must not be empty".to_string());
    }
    if object_id == "." || object_id == ".." {
        return Err(format!("Object id {:?} is not a valid directory name", object_id));
    }
    if object_id.contains(['/', '\\', '\0']) {
        return Err(format!(
            "Object id {:?} contains a path separator or NUL",
            object_id
        ));
    }
    Ok(())
}
