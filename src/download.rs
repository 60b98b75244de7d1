//! Download Gateway Module
//!
//! Boundary between the chunk manager and whatever performs the network
//! fetch. A gateway receives a chunk-aligned window and returns its raw bytes.
//! Retry policy, if any, belongs to the gateway.

use crate::chunk_types::{ChunkRequest, ChunkWindow, RemoteObject};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Chunk-aligned fetch handed to a [`DownloadGateway`]
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub object: Arc<RemoteObject>,
    /// First byte of the window
    pub window_start: u64,
    /// Window length; the gateway may return fewer bytes at the object's end
    pub chunk_size: u64,
    /// Offset the caller originally asked for
    pub offset: u64,
    /// Size the caller originally asked for
    pub size: u64,
    pub preload: bool,
}

impl DownloadRequest {
    pub fn new(request: &ChunkRequest, window: &ChunkWindow, chunk_size: u64) -> Self {
        Self {
            object: Arc::clone(request.object()),
            window_start: window.start,
            chunk_size,
            offset: request.offset(),
            size: request.size(),
            preload: request.preload(),
        }
    }

    /// Last byte of the window, inclusive (HTTP range notation)
    pub fn window_end_inclusive(&self) -> u64 {
        self.window_start
            .saturating_add(self.chunk_size)
            .saturating_sub(1)
    }
}

/// Performs the network fetch of a chunk window
#[async_trait]
pub trait DownloadGateway: Send + Sync {
    /// Return the bytes of `[window_start, window_start + chunk_size)`,
    /// shorter only when the object ends inside the window.
    async fn fetch_chunk(&self, request: &DownloadRequest) -> Result<Bytes>;
}

#[async_trait]
impl<G: DownloadGateway + ?Sized> DownloadGateway for Arc<G> {
    async fn fetch_chunk(&self, request: &DownloadRequest) -> Result<Bytes> {
        (**self).fetch_chunk(request).await
    }
}
