//! Chunk Cache - read-through disk cache for byte ranges of remote objects
//!
//! Remote objects are divided into fixed-size, aligned chunk windows. Reads are
//! answered from cached chunk files when possible, always confirmed through a
//! download gateway, and the fetched window is persisted for later reads.

pub mod chunk_manager;
pub mod chunk_stream;
pub mod chunk_types;
pub mod config;
pub mod disk_store;
pub mod download;
pub mod error;
pub mod events;
pub mod http_gateway;
pub mod logging;

pub use chunk_manager::ChunkManager;
pub use chunk_stream::{ChunkMessage, ChunkStream};
pub use chunk_types::{
    ChunkKey, ChunkLayout, ChunkRequest, ChunkResponse, ChunkSource, ChunkSpan, ChunkWindow,
    RemoteObject, VersionPolicy,
};
pub use download::{DownloadGateway, DownloadRequest};
pub use error::{ChunkCacheError, Result};
pub use events::{ChunkEvent, ChunkEventSink, CountingEventSink, EventCounts, TracingEventSink};
