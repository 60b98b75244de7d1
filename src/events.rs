//! Chunk Events Module
//!
//! The chunk manager does not log on its own. Everything worth observing on
//! the request path is reported as a [`ChunkEvent`] to a [`ChunkEventSink`]
//! supplied at construction. [`TracingEventSink`] turns events into `tracing`
//! records; [`CountingEventSink`] counts them and forwards to another sink.

use crate::chunk_types::ChunkKey;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Observable outcome of one step of a chunk request
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEvent {
    /// A cached chunk file satisfied the disk lookup
    DiskHit { key: ChunkKey, bytes: usize },
    /// The disk lookup failed; the request falls through to the network
    DiskMiss { key: ChunkKey, reason: String },
    /// The recency marker of a chunk file could not be updated
    TouchFailed { path: PathBuf, reason: String },
    /// The download gateway returned the chunk window
    DownloadSucceeded { key: ChunkKey, bytes: usize },
    /// The download gateway failed; the error is forwarded to the consumer
    DownloadFailed { key: ChunkKey, error: String },
    /// A new chunk file was written
    ChunkStored { key: ChunkKey, path: PathBuf, bytes: usize },
    /// A chunk file already existed, nothing was written
    ChunkAlreadyCached { key: ChunkKey, path: PathBuf },
    /// Persisting the chunk failed; the chunk stays uncached
    ChunkStoreFailed { key: ChunkKey, reason: String },
    /// The consumer abandoned the request before end-of-stream
    RequestCancelled { key: ChunkKey },
}

/// Receiver of chunk events
pub trait ChunkEventSink: Send + Sync {
    fn record(&self, event: ChunkEvent);
}

/// Writes chunk events as `tracing` records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl ChunkEventSink for TracingEventSink {
    fn record(&self, event: ChunkEvent) {
        match event {
            ChunkEvent::DiskHit { key, bytes } => {
                trace!("Chunk served from disk: key={}, bytes={}", key, bytes);
            }
            ChunkEvent::DiskMiss { key, reason } => {
                debug!("Chunk cache miss: key={}, reason={}", key, reason);
            }
            ChunkEvent::TouchFailed { path, reason } => {
                warn!(
                    "Could not update last modified time: path={:?}, error={}",
                    path, reason
                );
            }
            ChunkEvent::DownloadSucceeded { key, bytes } => {
                debug!("Chunk downloaded: key={}, bytes={}", key, bytes);
            }
            ChunkEvent::DownloadFailed { key, error } => {
                warn!("Chunk download failed: key={}, error={}", key, error);
            }
            ChunkEvent::ChunkStored { key, path, bytes } => {
                debug!(
                    "Chunk stored: key={}, path={:?}, bytes={}",
                    key, path, bytes
                );
            }
            ChunkEvent::ChunkAlreadyCached { key, path } => {
                trace!("Chunk already cached: key={}, path={:?}", key, path);
            }
            ChunkEvent::ChunkStoreFailed { key, reason } => {
                warn!("Could not store chunk: key={}, error={}", key, reason);
            }
            ChunkEvent::RequestCancelled { key } => {
                debug!("Chunk request cancelled by consumer: key={}", key);
            }
        }
    }
}

/// Point-in-time copy of [`CountingEventSink`] counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub disk_hits: u64,
    pub disk_misses: u64,
    pub touch_failures: u64,
    pub downloads_succeeded: u64,
    pub downloads_failed: u64,
    pub chunks_stored: u64,
    pub chunks_already_cached: u64,
    pub chunk_store_failures: u64,
    pub requests_cancelled: u64,
}

/// Counts events per kind and forwards each one to an inner sink
pub struct CountingEventSink {
    inner: Arc<dyn ChunkEventSink>,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    touch_failures: AtomicU64,
    downloads_succeeded: AtomicU64,
    downloads_failed: AtomicU64,
    chunks_stored: AtomicU64,
    chunks_already_cached: AtomicU64,
    chunk_store_failures: AtomicU64,
    requests_cancelled: AtomicU64,
}

impl CountingEventSink {
    pub fn new(inner: Arc<dyn ChunkEventSink>) -> Self {
        Self {
            inner,
            disk_hits: AtomicU64::new(0),
            disk_misses: AtomicU64::new(0),
            touch_failures: AtomicU64::new(0),
            downloads_succeeded: AtomicU64::new(0),
            downloads_failed: AtomicU64::new(0),
            chunks_stored: AtomicU64::new(0),
            chunks_already_cached: AtomicU64::new(0),
            chunk_store_failures: AtomicU64::new(0),
            requests_cancelled: AtomicU64::new(0),
        }
    }

    /// Snapshot of all counters
    pub fn counts(&self) -> EventCounts {
        EventCounts {
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            disk_misses: self.disk_misses.load(Ordering::Relaxed),
            touch_failures: self.touch_failures.load(Ordering::Relaxed),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            chunks_already_cached: self.chunks_already_cached.load(Ordering::Relaxed),
            chunk_store_failures: self.chunk_store_failures.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Default for CountingEventSink {
    fn default() -> Self {
        Self::new(Arc::new(TracingEventSink))
    }
}

impl ChunkEventSink for CountingEventSink {
    fn record(&self, event: ChunkEvent) {
        let counter = match &event {
            ChunkEvent::DiskHit { .. } => &self.disk_hits,
            ChunkEvent::DiskMiss { .. } => &self.disk_misses,
            ChunkEvent::TouchFailed { .. } => &self.touch_failures,
            ChunkEvent::DownloadSucceeded { .. } => &self.downloads_succeeded,
            ChunkEvent::DownloadFailed { .. } => &self.downloads_failed,
            ChunkEvent::ChunkStored { .. } => &self.chunks_stored,
            ChunkEvent::ChunkAlreadyCached { .. } => &self.chunks_already_cached,
            ChunkEvent::ChunkStoreFailed { .. } => &self.chunk_store_failures,
            ChunkEvent::RequestCancelled { .. } => &self.requests_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner.record(event);
    }
}
