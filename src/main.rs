use chunk_cache::{
    config::{parse_byte_size, Config},
    http_gateway::HttpDownloadGateway,
    logging::LoggerManager,
    ChunkCacheError, ChunkManager, CountingEventSink, RemoteObject, Result,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let matches = Config::build_cli().get_matches();
    let config = Config::from_matches(&matches)?;

    // Initialize logging
    let logger = LoggerManager::new(config.logging.clone());
    logger.initialize()?;

    info!("Starting chunk-cache v{}", env!("CARGO_PKG_VERSION"));

    let object_id = matches
        .get_one::<String>("object")
        .cloned()
        .ok_or_else(|| ChunkCacheError::InvalidRequest("--object is required".to_string()))?;
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let size = match matches.get_one::<String>("size") {
        Some(size) => parse_byte_size(size)?,
        None => {
            return Err(ChunkCacheError::InvalidRequest(
                "--size is required".to_string(),
            ))
        }
    };
    let preload = matches.get_flag("preload");

    let mut object = RemoteObject::new(object_id);
    if let Some(version) = matches.get_one::<String>("object-version") {
        object = object.with_version(version.clone());
    }
    let object = Arc::new(object);

    let gateway = HttpDownloadGateway::new(&config.download)?;
    let events = Arc::new(CountingEventSink::default());
    let manager = ChunkManager::from_config(&config.cache, gateway)?.with_event_sink(events.clone());

    info!(
        "Reading object={}, offset={}, size={}, preload={}",
        object.id, offset, size, preload
    );
    let started = Instant::now();

    // Dropping the read on Ctrl-C cancels its in-flight chunk streams
    let bytes = tokio::select! {
        result = manager.read_range(Arc::clone(&object), offset, size, preload) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning read of object {}", object.id);
            return Err(ChunkCacheError::Cancelled);
        }
    };

    match matches.get_one::<String>("output") {
        Some(path) => {
            tokio::fs::write(path, &bytes).await.map_err(|e| {
                ChunkCacheError::IoError(format!("Failed to write output file {}: {}", path, e))
            })?;
            info!("Wrote {} bytes to {}", bytes.len(), path);
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&bytes).await?;
            stdout.flush().await?;
        }
    }

    let counts = events.counts();
    info!(
        "Read complete: object={}, bytes={}, elapsed={:?}, disk_hits={}, disk_misses={}, downloads={}, download_failures={}, chunks_stored={}, store_failures={}",
        object.id,
        bytes.len(),
        started.elapsed(),
        counts.disk_hits,
        counts.disk_misses,
        counts.downloads_succeeded,
        counts.downloads_failed,
        counts.chunks_stored,
        counts.chunk_store_failures
    );

    Ok(())
}
