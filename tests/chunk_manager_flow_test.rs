//! Request flow tests for ChunkManager
//!
//! Covers the four message shapes (disk hit/miss x network ok/fail), chunk
//! persistence, write-once behavior, short final chunks and version namespaces.

use async_trait::async_trait;
use bytes::Bytes;
use chunk_cache::{
    ChunkCacheError, ChunkManager, ChunkMessage, ChunkRequest, ChunkSource, CountingEventSink,
    DownloadGateway, DownloadRequest, RemoteObject, Result, VersionPolicy,
};
use filetime::FileTime;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// In-memory remote object with a call counter and a failure switch
struct FakeGateway {
    data: Mutex<Vec<u8>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeGateway {
    fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn replace_data(&self, data: Vec<u8>) {
        *self.data.lock().unwrap() = data;
    }
}

#[async_trait]
impl DownloadGateway for FakeGateway {
    async fn fetch_chunk(&self, request: &DownloadRequest) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChunkCacheError::DownloadError(
                "remote unavailable".to_string(),
            ));
        }

        let data = self.data.lock().unwrap();
        let start = (request.window_start as usize).min(data.len());
        let end = (request.window_start + request.chunk_size) as usize;
        let end = end.min(data.len());
        Ok(Bytes::copy_from_slice(&data[start..end]))
    }
}

fn object_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| ((i % 251) as u8).wrapping_add(seed)).collect()
}

fn expect_ok(message: &ChunkMessage, source: ChunkSource) -> Bytes {
    match message {
        Ok(response) => {
            assert_eq!(response.source, source);
            response.bytes.clone()
        }
        Err(e) => panic!("expected {:?} bytes, got error {}", source, e),
    }
}

fn request(object: &Arc<RemoteObject>, offset: u64, size: u64) -> ChunkRequest {
    ChunkRequest::new(Arc::clone(object), offset, size).unwrap()
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().filter(|e| e.path().is_file()).count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_disk_miss_network_ok_creates_chunk_file() {
    let temp_dir = TempDir::new().unwrap();
    let data = object_bytes(20_000, 0);
    let gateway = FakeGateway::new(data.clone());
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    let messages = manager
        .request_chunk(request(&object, 100, 500))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 1);
    let bytes = expect_ok(&messages[0], ChunkSource::Network);
    assert_eq!(&bytes[..], &data[100..600]);
    assert_eq!(gateway.calls(), 1);

    let chunk_file = temp_dir.path().join("movie").join("0");
    assert_eq!(manager.chunk_path(&object, 0), Some(chunk_file.clone()));
    let stored = std::fs::read(&chunk_file).unwrap();
    assert_eq!(stored, &data[..8192]);
}

#[tokio::test]
async fn test_disk_hit_network_ok_yields_two_messages() {
    let temp_dir = TempDir::new().unwrap();
    let data = object_bytes(20_000, 0);
    let gateway = FakeGateway::new(data.clone());
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    manager
        .request_chunk(request(&object, 8192, 4096))
        .collect_responses()
        .await;

    let messages = manager
        .request_chunk(request(&object, 9000, 1000))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 2);
    let cached = expect_ok(&messages[0], ChunkSource::Disk);
    let confirmed = expect_ok(&messages[1], ChunkSource::Network);
    assert_eq!(&cached[..], &data[9000..10_000]);
    assert_eq!(cached, confirmed);
    assert_eq!(gateway.calls(), 2);
}

#[tokio::test]
async fn test_disk_miss_network_fail_yields_single_error() {
    let temp_dir = TempDir::new().unwrap();
    let gateway = FakeGateway::new(object_bytes(20_000, 0));
    gateway.set_failing(true);
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    let messages = manager
        .request_chunk(request(&object, 0, 100))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0],
        Err(ChunkCacheError::DownloadError("remote unavailable".to_string()))
    );
    assert!(!temp_dir.path().join("movie").join("0").exists());
}

#[tokio::test]
async fn test_disk_hit_network_fail_yields_success_then_error() {
    let temp_dir = TempDir::new().unwrap();
    let data = object_bytes(20_000, 0);
    let gateway = FakeGateway::new(data.clone());
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;
    gateway.set_failing(true);

    let messages = manager
        .request_chunk(request(&object, 10, 20))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 2);
    let cached = expect_ok(&messages[0], ChunkSource::Disk);
    assert_eq!(&cached[..], &data[10..30]);
    assert!(matches!(messages[1], Err(ChunkCacheError::DownloadError(_))));

    // An error anywhere invalidates the attempt
    let resolved = manager
        .request_chunk(request(&object, 10, 20))
        .into_authoritative()
        .await;
    assert!(matches!(resolved, Err(ChunkCacheError::DownloadError(_))));
}

#[tokio::test]
async fn test_write_once_keeps_first_content() {
    let temp_dir = TempDir::new().unwrap();
    let original = object_bytes(8192, 0);
    let gateway = FakeGateway::new(original.clone());
    let events = Arc::new(CountingEventSink::default());
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway))
        .unwrap()
        .with_event_sink(events.clone());
    let object = Arc::new(RemoteObject::new("movie"));

    manager
        .request_chunk(request(&object, 0, 8192))
        .collect_responses()
        .await;

    // Remote content changes; the cached chunk is not rewritten
    gateway.replace_data(object_bytes(8192, 7));
    let messages = manager
        .request_chunk(request(&object, 0, 8192))
        .collect_responses()
        .await;

    assert_eq!(gateway.calls(), 2);
    assert_eq!(messages.len(), 2);
    assert_eq!(&expect_ok(&messages[0], ChunkSource::Disk)[..], &original[..]);

    let object_dir = temp_dir.path().join("movie");
    assert_eq!(count_files(&object_dir), 1);
    assert_eq!(std::fs::read(object_dir.join("0")).unwrap(), original);

    let counts = events.counts();
    assert_eq!(counts.chunks_stored, 1);
    assert_eq!(counts.chunks_already_cached, 1);
}

#[tokio::test]
async fn test_final_short_chunk_network_and_disk() {
    let temp_dir = TempDir::new().unwrap();
    let data = object_bytes(10_000, 0);
    let gateway = FakeGateway::new(data.clone());
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    let messages = manager
        .request_chunk(request(&object, 9000, 2000))
        .collect_responses()
        .await;
    assert_eq!(messages.len(), 1);
    let network = expect_ok(&messages[0], ChunkSource::Network);
    assert_eq!(network.len(), 1000);
    assert_eq!(&network[..], &data[9000..10_000]);

    let chunk_file = temp_dir.path().join("movie").join("8192");
    assert_eq!(std::fs::metadata(&chunk_file).unwrap().len(), 1808);

    let messages = manager
        .request_chunk(request(&object, 9000, 2000))
        .collect_responses()
        .await;
    assert_eq!(messages.len(), 2);
    let disk = expect_ok(&messages[0], ChunkSource::Disk);
    assert_eq!(disk.len(), 1000);
    assert_eq!(&disk[..], &data[9000..10_000]);
    assert_eq!(expect_ok(&messages[1], ChunkSource::Network), disk);
}

#[tokio::test]
async fn test_request_past_object_end_is_empty_and_not_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let gateway = FakeGateway::new(object_bytes(1000, 0));
    let manager = ChunkManager::new(temp_dir.path(), 4096, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    let messages = manager
        .request_chunk(request(&object, 8192, 100))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 1);
    assert!(expect_ok(&messages[0], ChunkSource::Network).is_empty());
    assert!(!temp_dir.path().join("movie").join("8192").exists());
}

#[tokio::test]
async fn test_disk_hit_touches_chunk_file() {
    let temp_dir = TempDir::new().unwrap();
    let gateway = FakeGateway::new(object_bytes(8192, 0));
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();
    let object = Arc::new(RemoteObject::new("movie"));

    manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;

    let chunk_file = temp_dir.path().join("movie").join("0");
    let old = SystemTime::now() - Duration::from_secs(3600);
    filetime::set_file_mtime(&chunk_file, FileTime::from_system_time(old)).unwrap();

    manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;

    let modified = std::fs::metadata(&chunk_file).unwrap().modified().unwrap();
    assert!(modified > old + Duration::from_secs(60));
}

#[tokio::test]
async fn test_per_version_namespace() {
    let temp_dir = TempDir::new().unwrap();
    let gateway = FakeGateway::new(object_bytes(8192, 0));
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway))
        .unwrap()
        .with_version_policy(VersionPolicy::PerVersion);

    let v1 = Arc::new(RemoteObject::new("movie").with_version("v1"));
    let v2 = Arc::new(RemoteObject::new("movie").with_version("v2"));

    manager
        .request_chunk(request(&v1, 0, 10))
        .collect_responses()
        .await;
    assert!(temp_dir.path().join("movie").join("@v1").join("0").exists());

    // A new version does not reuse chunks of the old one
    let messages = manager
        .request_chunk(request(&v2, 0, 10))
        .collect_responses()
        .await;
    assert_eq!(messages.len(), 1);
    assert!(temp_dir.path().join("movie").join("@v2").join("0").exists());

    let messages = manager
        .request_chunk(request(&v1, 0, 10))
        .collect_responses()
        .await;
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn test_immutable_policy_ignores_version() {
    let temp_dir = TempDir::new().unwrap();
    let gateway = FakeGateway::new(object_bytes(8192, 0));
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap();

    let v1 = Arc::new(RemoteObject::new("movie").with_version("v1"));
    let v2 = Arc::new(RemoteObject::new("movie").with_version("v2"));

    manager
        .request_chunk(request(&v1, 0, 10))
        .collect_responses()
        .await;
    let messages = manager
        .request_chunk(request(&v2, 0, 10))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 2);
    assert!(temp_dir.path().join("movie").join("0").exists());
}

#[tokio::test]
async fn test_unsafe_object_id_skips_disk_but_succeeds() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("cache");
    let data = object_bytes(8192, 0);
    let gateway = FakeGateway::new(data.clone());
    let events = Arc::new(CountingEventSink::default());
    let manager = ChunkManager::new(&root, 8192, Arc::clone(&gateway))
        .unwrap()
        .with_event_sink(events.clone());
    let object = Arc::new(RemoteObject::new(".."));

    let messages = manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;

    assert_eq!(messages.len(), 1);
    assert_eq!(&expect_ok(&messages[0], ChunkSource::Network)[..], &data[..10]);
    assert_eq!(manager.chunk_path(&object, 0), None);
    assert_eq!(events.counts().chunk_store_failures, 1);
    assert_eq!(count_files(temp_dir.path()), 0);
}

#[tokio::test]
async fn test_event_counts_follow_request_flow() {
    let temp_dir = TempDir::new().unwrap();
    let gateway = FakeGateway::new(object_bytes(8192, 0));
    let events = Arc::new(CountingEventSink::default());
    let manager = ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway))
        .unwrap()
        .with_event_sink(events.clone());
    let object = Arc::new(RemoteObject::new("movie"));

    manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;
    manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;
    gateway.set_failing(true);
    manager
        .request_chunk(request(&object, 0, 10))
        .collect_responses()
        .await;

    let counts = events.counts();
    assert_eq!(counts.disk_misses, 1);
    assert_eq!(counts.disk_hits, 2);
    assert_eq!(counts.downloads_succeeded, 2);
    assert_eq!(counts.downloads_failed, 1);
    assert_eq!(counts.chunks_stored, 1);
    assert_eq!(counts.chunks_already_cached, 1);
    assert_eq!(counts.requests_cancelled, 0);
}

#[tokio::test]
async fn test_concurrent_requests_for_same_chunk() {
    let temp_dir = TempDir::new().unwrap();
    let data = object_bytes(16_384, 0);
    let gateway = FakeGateway::new(data.clone());
    let manager = Arc::new(ChunkManager::new(temp_dir.path(), 8192, Arc::clone(&gateway)).unwrap());
    let object = Arc::new(RemoteObject::new("movie"));

    let mut handles = Vec::new();
    for i in 0..8u64 {
        let manager = Arc::clone(&manager);
        let object = Arc::clone(&object);
        handles.push(tokio::spawn(async move {
            let request = ChunkRequest::new(object, i * 100, 100).unwrap();
            manager.request_chunk(request).into_authoritative().await
        }));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let bytes = handle.await.unwrap().unwrap();
        let start = i * 100;
        assert_eq!(&bytes[..], &data[start..start + 100]);
    }

    let object_dir = temp_dir.path().join("movie");
    assert_eq!(count_files(&object_dir), 1);
    assert_eq!(std::fs::read(object_dir.join("0")).unwrap(), &data[..8192]);
}

#[tokio::test]
async fn test_read_range_across_windows_uses_cache() {
    let temp_dir = TempDir::new().unwrap();
    let data = object_bytes(30_000, 3);
    let gateway = FakeGateway::new(data.clone());
    let events = Arc::new(CountingEventSink::default());
    let manager = ChunkManager::new(temp_dir.path(), 4096, Arc::clone(&gateway))
        .unwrap()
        .with_event_sink(events.clone());
    let object = Arc::new(RemoteObject::new("movie").with_size(30_000));

    let bytes = manager
        .read_range(Arc::clone(&object), 1000, 20_000, false)
        .await
        .unwrap();
    assert_eq!(&bytes[..], &data[1000..21_000]);
    // Windows 0..=20480 -> 6 chunk files
    assert_eq!(count_files(&temp_dir.path().join("movie")), 6);
    assert_eq!(events.counts().disk_misses, 6);

    let again = manager
        .read_range(Arc::clone(&object), 1000, 20_000, true)
        .await
        .unwrap();
    assert_eq!(again, bytes);
    assert_eq!(events.counts().disk_hits, 6);

    let err = manager.read_range(object, 0, 0, false).await.unwrap_err();
    assert!(matches!(err, ChunkCacheError::InvalidRequest(_)));
}
