//! Chunk Manager Module
//!
//! Serves byte-range reads against remote objects one chunk window at a time.
//!
//! For every request the manager:
//! 1. aligns the requested offset to its chunk window,
//! 2. answers immediately from the disk chunk store when it can (unconfirmed),
//! 3. always fetches the whole window through the download gateway,
//! 4. emits the requested sub-range of the fetched window,
//! 5. persists the window to disk (write-once),
//! 6. closes the stream.
//!
//! A request therefore yields one or two messages:
//!
//! | disk | network | messages |
//! |---|---|---|
//! | hit  | ok   | disk bytes, network bytes |
//! | miss | ok   | network bytes |
//! | hit  | fail | disk bytes, error |
//! | miss | fail | error |

use crate::chunk_stream::{ChunkMessage, ChunkStream};
use crate::chunk_types::{
    ChunkKey, ChunkLayout, ChunkRequest, ChunkResponse, ChunkSource, ChunkWindow, RemoteObject,
    VersionPolicy,
};
use crate::config::CacheConfig;
use crate::disk_store::{DiskChunkStore, StoreOutcome};
use crate::download::{DownloadGateway, DownloadRequest};
use crate::events::{ChunkEvent, ChunkEventSink, TracingEventSink};
use crate::{ChunkCacheError, Result};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Maximum chunk requests in flight for a single `read_range` call
const READ_RANGE_CONCURRENCY: usize = 4;

/// Chunk-granular read-through cache in front of a download gateway
pub struct ChunkManager {
    cache_dir: PathBuf,
    layout: ChunkLayout,
    version_policy: VersionPolicy,
    store: Arc<DiskChunkStore>,
    gateway: Arc<dyn DownloadGateway>,
    events: Arc<dyn ChunkEventSink>,
}

impl ChunkManager {
    /// Create a chunk manager.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkCacheError::ConfigError`] if `cache_dir` is empty, or if
    /// `chunk_size` is below 4096 or not a multiple of 1024.
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        chunk_size: u64,
        gateway: impl DownloadGateway + 'static,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if cache_dir.as_os_str().is_empty() {
            return Err(ChunkCacheError::ConfigError(
                "Path to chunk cache must not be empty".to_string(),
            ));
        }
        let layout = ChunkLayout::new(chunk_size)?;

        let events: Arc<dyn ChunkEventSink> = Arc::new(TracingEventSink);
        let store = Arc::new(DiskChunkStore::new(cache_dir.clone(), Arc::clone(&events)));

        Ok(Self {
            cache_dir,
            layout,
            version_policy: VersionPolicy::default(),
            store,
            gateway: Arc::new(gateway),
            events,
        })
    }

    /// Create a chunk manager from the `cache` configuration section
    pub fn from_config(
        config: &CacheConfig,
        gateway: impl DownloadGateway + 'static,
    ) -> Result<Self> {
        Ok(Self::new(config.cache_dir.clone(), config.chunk_size, gateway)?
            .with_version_policy(config.version_policy))
    }

    /// Report request events to `events` instead of the default tracing sink
    pub fn with_event_sink(mut self, events: Arc<dyn ChunkEventSink>) -> Self {
        self.store = Arc::new(DiskChunkStore::new(
            self.cache_dir.clone(),
            Arc::clone(&events),
        ));
        self.events = events;
        self
    }

    pub fn with_version_policy(mut self, version_policy: VersionPolicy) -> Self {
        self.version_policy = version_policy;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn chunk_size(&self) -> u64 {
        self.layout.chunk_size()
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    pub fn version_policy(&self) -> VersionPolicy {
        self.version_policy
    }

    /// Cache key of the window starting at `window_start`
    pub fn chunk_key(&self, object: &RemoteObject, window_start: u64) -> ChunkKey {
        let key = ChunkKey::new(object.id.clone(), window_start);
        match self.version_policy {
            VersionPolicy::Immutable => key,
            VersionPolicy::PerVersion => key.with_version(object.version.clone()),
        }
    }

    /// Path of the chunk file that caches `window_start` of `object`, if the
    /// object id can be mapped to a directory
    pub fn chunk_path(&self, object: &RemoteObject, window_start: u64) -> Option<PathBuf> {
        self.store
            .chunk_path(&self.chunk_key(object, window_start))
            .ok()
    }

    /// Start a chunk request and return its message stream.
    ///
    /// The work runs on its own Tokio task and does not block the caller, so
    /// this must be called from within a Tokio runtime. Read the stream until
    /// it ends; dropping or cancelling it stops the task at its next step.
    pub fn request_chunk(&self, request: ChunkRequest) -> ChunkStream {
        let (sender, receiver) = mpsc::channel(1);

        let window = self.layout.align(request.offset());
        let task = ChunkTask {
            key: self.chunk_key(request.object(), window.start),
            request,
            window,
            chunk_size: self.layout.chunk_size(),
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            events: Arc::clone(&self.events),
        };

        tokio::spawn(task.run(sender));

        ChunkStream::new(receiver)
    }

    /// Read `[offset, offset + size)` of an object, possibly spanning windows.
    ///
    /// Each window is requested through [`ChunkManager::request_chunk`] and
    /// resolved with [`ChunkStream::into_authoritative`]. The result stops at
    /// the object's end; any error fails the whole read.
    pub async fn read_range(
        &self,
        object: Arc<RemoteObject>,
        offset: u64,
        size: u64,
        preload: bool,
    ) -> Result<Bytes> {
        if size == 0 {
            return Err(ChunkCacheError::InvalidRequest(format!(
                "Read size must be > 0 (object={}, offset={})",
                object.id, offset
            )));
        }

        let size = match object.size {
            Some(total) => size.min(total.saturating_sub(offset)),
            None => size,
        };
        if size == 0 {
            return Ok(Bytes::new());
        }

        let spans = self.layout.split_range(offset, size);
        if spans.len() == 1 {
            let request = ChunkRequest::new(object, offset, size)?.with_preload(preload);
            return self.request_chunk(request).into_authoritative().await;
        }

        let mut parts = stream::iter(spans)
            .map(|span| {
                let object = Arc::clone(&object);
                async move {
                    let request =
                        ChunkRequest::new(object, span.offset, span.size)?.with_preload(preload);
                    let bytes = self.request_chunk(request).into_authoritative().await?;
                    Ok::<_, ChunkCacheError>((span, bytes))
                }
            })
            .buffered(READ_RANGE_CONCURRENCY);

        let mut out = Vec::new();
        while let Some(part) = parts.next().await {
            let (span, bytes) = part?;
            out.extend_from_slice(&bytes);
            if (bytes.len() as u64) < span.size {
                // Object ends inside this window
                break;
            }
        }

        Ok(Bytes::from(out))
    }
}

/// State owned by the task serving one chunk request
struct ChunkTask {
    request: ChunkRequest,
    window: ChunkWindow,
    key: ChunkKey,
    chunk_size: u64,
    store: Arc<DiskChunkStore>,
    gateway: Arc<dyn DownloadGateway>,
    events: Arc<dyn ChunkEventSink>,
}

impl ChunkTask {
    async fn run(self, sender: mpsc::Sender<ChunkMessage>) {
        // Bytes past the window end are never in this chunk file
        let window_remaining = self.chunk_size - self.window.offset_in_window;
        let read_len = self.request.size().min(window_remaining) as usize;

        match self
            .store
            .load_chunk(&self.key, self.window.offset_in_window, read_len)
            .await
        {
            Ok(bytes) => {
                self.events.record(ChunkEvent::DiskHit {
                    key: self.key.clone(),
                    bytes: bytes.len(),
                });
                let response = ChunkResponse {
                    source: ChunkSource::Disk,
                    bytes,
                };
                if sender.send(Ok(response)).await.is_err() {
                    self.cancelled();
                    return;
                }
            }
            Err(e) => {
                self.events.record(ChunkEvent::DiskMiss {
                    key: self.key.clone(),
                    reason: e.to_string(),
                });
            }
        }

        // Always confirm over the network, even after a disk hit
        let download = DownloadRequest::new(&self.request, &self.window, self.chunk_size);
        let fetched = tokio::select! {
            result = self.gateway.fetch_chunk(&download) => result,
            _ = sender.closed() => {
                self.cancelled();
                return;
            }
        };

        match fetched {
            Ok(mut data) => {
                if data.len() as u64 > self.chunk_size {
                    data.truncate(self.chunk_size as usize);
                }
                self.events.record(ChunkEvent::DownloadSucceeded {
                    key: self.key.clone(),
                    bytes: data.len(),
                });

                let response = ChunkResponse {
                    source: ChunkSource::Network,
                    bytes: self.requested_slice(&data),
                };
                let delivered = sender.send(Ok(response)).await.is_ok();

                self.persist(&data).await;

                if !delivered {
                    self.cancelled();
                }
            }
            Err(e) => {
                self.events.record(ChunkEvent::DownloadFailed {
                    key: self.key.clone(),
                    error: e.to_string(),
                });
                if sender.send(Err(e)).await.is_err() {
                    self.cancelled();
                }
            }
        }
    }

    /// Part of the fetched window covering the caller's range, clipped to the data
    fn requested_slice(&self, data: &Bytes) -> Bytes {
        let len = data.len() as u64;
        let start = self.window.offset_in_window.min(len);
        let end = self
            .window
            .offset_in_window
            .saturating_add(self.request.size())
            .min(len);
        data.slice(start as usize..end as usize)
    }

    async fn persist(&self, data: &Bytes) {
        if data.is_empty() {
            return;
        }

        match self.store.store_chunk(&self.key, data).await {
            Ok(StoreOutcome::Stored(path)) => {
                self.events.record(ChunkEvent::ChunkStored {
                    key: self.key.clone(),
                    path,
                    bytes: data.len(),
                });
            }
            Ok(StoreOutcome::AlreadyCached(path)) => {
                self.events.record(ChunkEvent::ChunkAlreadyCached {
                    key: self.key.clone(),
                    path,
                });
            }
            Err(e) => {
                self.events.record(ChunkEvent::ChunkStoreFailed {
                    key: self.key.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn cancelled(&self) {
        self.events.record(ChunkEvent::RequestCancelled {
            key: self.key.clone(),
        });
    }
}
