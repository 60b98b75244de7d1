//! Chunk Types Module
//!
//! Provides the request/response types and the chunk alignment arithmetic
//! shared by the chunk manager, the disk chunk store and download gateways.

use crate::{ChunkCacheError, Result};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Smallest chunk size a manager accepts
pub const MIN_CHUNK_SIZE: u64 = 4096;

/// Chunk sizes must be a multiple of this value
pub const CHUNK_SIZE_ALIGNMENT: u64 = 1024;

/// Everything outside the RFC 3986 unreserved set
pub(crate) const NON_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a name for use as a URI path segment or a file name
pub(crate) fn encode_name(name: &str) -> String {
    utf8_percent_encode(name, NON_UNRESERVED).to_string()
}

/// Remote object being read through the cache.
///
/// Only `id` takes part in the default cache key. `size` is informational and
/// `version` (typically an ETag) is used by [`VersionPolicy::PerVersion`] and
/// by gateways that can send conditional requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
}

impl RemoteObject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            size: None,
            version: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// How remote object versions influence cache reuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Remote content for an (object id, window) pair never changes; the version is ignored
    #[default]
    Immutable,
    /// Chunks of versioned objects live in a per-version namespace
    PerVersion,
}

/// Fixed chunk geometry of a manager.
///
/// Invariant: `chunk_size >= MIN_CHUNK_SIZE` and `chunk_size % CHUNK_SIZE_ALIGNMENT == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_size: u64,
}

impl ChunkLayout {
    /// Validate a chunk size and build a layout from it
    pub fn new(chunk_size: u64) -> Result<Self> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(ChunkCacheError::ConfigError(format!(
                "Chunk size must not be < {}, got {}",
                MIN_CHUNK_SIZE, chunk_size
            )));
        }
        if chunk_size % CHUNK_SIZE_ALIGNMENT != 0 {
            return Err(ChunkCacheError::ConfigError(format!(
                "Chunk size must be a multiple of {}, got {}",
                CHUNK_SIZE_ALIGNMENT, chunk_size
            )));
        }
        Ok(Self { chunk_size })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Align an object offset to the chunk window containing it
    pub fn align(&self, offset: u64) -> ChunkWindow {
        let offset_in_window = offset % self.chunk_size;
        let start = offset - offset_in_window;
        ChunkWindow {
            start,
            end: start.saturating_add(self.chunk_size),
            offset_in_window,
        }
    }

    /// Split `[offset, offset + size)` into per-window spans, in object order
    pub fn split_range(&self, mut offset: u64, size: u64) -> Vec<ChunkSpan> {
        let mut remaining = size;
        let mut spans = Vec::new();

        while remaining > 0 {
            let window = self.align(offset);
            let capacity = self.chunk_size - window.offset_in_window;
            let take = capacity.min(remaining);
            spans.push(ChunkSpan {
                window_start: window.start,
                offset,
                size: take,
            });
            offset = match offset.checked_add(take) {
                Some(next) => next,
                None => break,
            };
            remaining -= take;
        }

        spans
    }
}

/// Chunk-aligned window `[start, end)` derived from a request offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkWindow {
    pub start: u64,
    pub end: u64,
    /// Position of the requested offset inside the window
    pub offset_in_window: u64,
}

/// Part of a byte range that falls within a single chunk window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub window_start: u64,
    pub offset: u64,
    pub size: u64,
}

/// Identity of one chunk file: (object id, window start), optionally scoped to a version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub object_id: String,
    pub window_start: u64,
    pub version: Option<String>,
}

impl ChunkKey {
    pub fn new(object_id: impl Into<String>, window_start: u64) -> Self {
        Self {
            object_id: object_id.into(),
            window_start,
            version: None,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{}:{}", self.object_id, version, self.window_start),
            None => write!(f, "{}:{}", self.object_id, self.window_start),
        }
    }
}

/// Input to a single chunk fetch
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    object: Arc<RemoteObject>,
    offset: u64,
    size: u64,
    preload: bool,
}

impl ChunkRequest {
    /// Build a request for `size` bytes at `offset`. `size` must be non-zero.
    pub fn new(object: Arc<RemoteObject>, offset: u64, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(ChunkCacheError::InvalidRequest(format!(
                "Request size must be > 0 (object={}, offset={})",
                object.id, offset
            )));
        }
        Ok(Self {
            object,
            offset,
            size,
            preload: false,
        })
    }

    /// Mark the request as speculative read-ahead
    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn object(&self) -> &Arc<RemoteObject> {
        &self.object
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn preload(&self) -> bool {
        self.preload
    }
}

/// Where a response's bytes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkSource {
    /// Served from a cached chunk file, not yet confirmed
    Disk,
    /// Confirmed by the download gateway
    Network,
}

/// One successful message of a chunk request's stream
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResponse {
    pub source: ChunkSource,
    /// The requested sub-range, possibly shorter at the object's end
    pub bytes: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_rejects_invalid_sizes() {
        for size in [0u64, 1000, 4095, 4097, 5000] {
            assert!(
                matches!(ChunkLayout::new(size), Err(ChunkCacheError::ConfigError(_))),
                "size {} should be rejected",
                size
            );
        }
        assert!(ChunkLayout::new(4096).is_ok());
        assert!(ChunkLayout::new(8192).is_ok());
        assert!(ChunkLayout::new(5120).is_ok());
    }

    #[test]
    fn test_align_example() {
        let layout = ChunkLayout::new(8192).unwrap();
        let window = layout.align(9000);
        assert_eq!(window.start, 8192);
        assert_eq!(window.end, 16384);
        assert_eq!(window.offset_in_window, 808);
    }

    #[test]
    fn test_align_on_boundary() {
        let layout = ChunkLayout::new(4096).unwrap();
        let window = layout.align(4096);
        assert_eq!(window.start, 4096);
        assert_eq!(window.offset_in_window, 0);
    }

    #[test]
    fn test_split_within_single_window() {
        let layout = ChunkLayout::new(4096).unwrap();
        let spans = layout.split_range(123, 1000);
        assert_eq!(
            spans,
            vec![ChunkSpan {
                window_start: 0,
                offset: 123,
                size: 1000
            }]
        );
    }

    #[test]
    fn test_split_across_windows() {
        let layout = ChunkLayout::new(4096).unwrap();
        let spans = layout.split_range(4086, 4106);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].window_start, 0);
        assert_eq!(spans[0].offset, 4086);
        assert_eq!(spans[0].size, 10);
        assert_eq!(spans[1].window_start, 4096);
        assert_eq!(spans[1].offset, 4096);
        assert_eq!(spans[1].size, 4096);
    }

    #[test]
    fn test_split_zero_len() {
        let layout = ChunkLayout::new(4096).unwrap();
        assert!(layout.split_range(10, 0).is_empty());
    }

    #[test]
    fn test_request_rejects_zero_size() {
        let object = Arc::new(RemoteObject::new("obj"));
        let err = ChunkRequest::new(object, 0, 0).unwrap_err();
        assert!(matches!(err, ChunkCacheError::InvalidRequest(_)));
    }

    #[test]
    fn test_encode_name() {
        assert_eq!(encode_name("abc-1_2.3~"), "abc-1_2.3~");
        assert_eq!(encode_name("\"v1\""), "%22v1%22");
        assert_eq!(encode_name("a/b\\c"), "a%2Fb%5Cc");
        assert_eq!(encode_name("é"), "%C3%A9");
    }

    #[test]
    fn test_chunk_key_display() {
        assert_eq!(ChunkKey::new("obj", 8192).to_string(), "obj:8192");
        assert_eq!(
            ChunkKey::new("obj", 0)
                .with_version(Some("v1".to_string()))
                .to_string(),
            "obj@v1:0"
        );
    }
}
