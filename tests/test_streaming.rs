//! Integration tests for StreamingLinkPreparer and LinkStream

use async_trait::async_trait;
use debrid_stream::error::{DebridError, Result};
use debrid_stream::models::{CachedFile, ProviderId, RangeRequest};
use debrid_stream::streaming::{LinkRefresher, StreamingLinkPreparer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn preparer() -> StreamingLinkPreparer {
    StreamingLinkPreparer::new(Duration::from_secs(2), Duration::from_secs(5)).unwrap()
}

fn file(server: &MockServer, link_path: &str, size: u64) -> CachedFile {
    CachedFile::new(
        "movie.mkv",
        size,
        format!("{}{}", server.uri(), link_path),
        ProviderId::Premiumize,
    )
}

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Hands out a fixed replacement link and counts refreshes
struct FixedRefresher {
    link: String,
    refreshes: AtomicUsize,
}

impl FixedRefresher {
    fn new(link: String) -> Arc<Self> {
        Arc::new(FixedRefresher {
            link,
            refreshes: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LinkRefresher for FixedRefresher {
    async fn refresh(&self, dead: &CachedFile) -> Result<CachedFile> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let mut fresh = dead.clone();
        fresh.link = self.link.clone();
        Ok(fresh)
    }
}

struct NoRefresh;

#[async_trait]
impl LinkRefresher for NoRefresh {
    async fn refresh(&self, dead: &CachedFile) -> Result<CachedFile> {
        Err(DebridError::NoLiveLink {
            path: dead.path.clone(),
        })
    }
}

async fn read_all(stream: &mut debrid_stream::LinkStream) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = stream.next_chunk().await? {
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

#[tokio::test]
async fn test_full_request_sends_no_range_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header_exists("range"))
        .respond_with(ResponseTemplate::new(416))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/movie"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(1000)))
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/movie", 1000);
    let full = RangeRequest::new(Some(0), Some(999));
    let prepared = preparer.prepare_range(&file, Some(full)).unwrap();
    assert_eq!(prepared.range_header(), None);

    let mut stream = preparer.open(file, prepared, Arc::new(NoRefresh)).await.unwrap();
    assert_eq!(stream.status().as_u16(), 200);
    assert_eq!(read_all(&mut stream).await.unwrap(), body(1000));
}

#[tokio::test]
async fn test_partial_range_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/movie"))
        .and(header("range", "bytes=100-199"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 100-199/1000")
                .set_body_bytes(body(1000)[100..200].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/movie", 1000);
    let range = RangeRequest::from_header("bytes=100-199").unwrap();
    let prepared = preparer.prepare_range(&file, Some(range)).unwrap();
    assert_eq!(prepared.expected_len, 100);

    let mut stream = preparer.open(file, prepared, Arc::new(NoRefresh)).await.unwrap();
    assert_eq!(stream.status().as_u16(), 206);
    assert_eq!(read_all(&mut stream).await.unwrap(), body(1000)[100..200].to_vec());
}

#[tokio::test]
async fn test_suffix_range_maps_to_last_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=900-999"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 900-999/1000")
                .set_body_bytes(body(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/movie", 1000);
    let range = RangeRequest::from_header("bytes=-100").unwrap();
    let prepared = preparer.prepare_range(&file, Some(range)).unwrap();
    let mut stream = preparer.open(file, prepared, Arc::new(NoRefresh)).await.unwrap();
    assert_eq!(read_all(&mut stream).await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_ranged_request_answered_with_full_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(1000)))
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/movie", 1000);
    let range = RangeRequest::new(Some(10), Some(19));
    let prepared = preparer.prepare_range(&file, Some(range)).unwrap();
    let result = preparer.open(file, prepared, Arc::new(NoRefresh)).await;
    assert!(matches!(result, Err(DebridError::UnknownError { status: 200, .. })));
}

#[tokio::test]
async fn test_mismatched_content_range_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-99/1000")
                .set_body_bytes(body(100)),
        )
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/movie", 1000);
    let prepared = preparer
        .prepare_range(&file, Some(RangeRequest::new(Some(100), Some(199))))
        .unwrap();
    let result = preparer.open(file, prepared, Arc::new(NoRefresh)).await;
    assert!(matches!(result, Err(DebridError::ParseError(_))));
}

#[tokio::test]
async fn test_dead_link_status_is_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/gone", 1000);
    let prepared = preparer.prepare_range(&file, None).unwrap();
    let result = preparer.open(file, prepared, Arc::new(NoRefresh)).await;
    assert!(matches!(result, Err(DebridError::ClientError { status: 404, .. })));
}

#[tokio::test]
async fn test_is_link_alive() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/alive"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/dead"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/no-head"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/no-head"))
        .and(header("range", "bytes=0-0"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-0/1000")
                .set_body_bytes(vec![0u8]),
        )
        .expect(1)
        .mount(&server)
        .await;

    let preparer = preparer();
    assert!(preparer.is_link_alive(&file(&server, "/alive", 1000)).await);
    assert!(!preparer.is_link_alive(&file(&server, "/dead", 1000)).await);
    assert!(preparer.is_link_alive(&file(&server, "/no-head", 1000)).await);

    let unreachable = CachedFile::new("x.mkv", 1, "http://127.0.0.1:1/x", ProviderId::Easynews);
    assert!(!preparer.is_link_alive(&unreachable).await);
}

#[tokio::test]
async fn test_stream_resumes_once_after_early_close() {
    let server = MockServer::start().await;
    let full = body(1000);
    // The first link dies after 400 bytes
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(full[..400].to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .and(header("range", "bytes=400-999"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(full[400..].to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/old", 1000);
    let refresher = FixedRefresher::new(format!("{}/new", server.uri()));
    let prepared = preparer.prepare_range(&file, None).unwrap();
    let mut stream = preparer.open(file, prepared, refresher.clone()).await.unwrap();

    assert_eq!(read_all(&mut stream).await.unwrap(), full);
    assert_eq!(stream.offset(), 1000);
    assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 1);
    assert!(stream.file().link.ends_with("/new"));
}

#[tokio::test]
async fn test_stream_fails_after_second_death() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body(400)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 400-999/1000")
                .set_body_bytes(body(100)),
        )
        .mount(&server)
        .await;

    let preparer = preparer();
    let file = file(&server, "/old", 1000);
    let refresher = FixedRefresher::new(format!("{}/new", server.uri()));
    let prepared = preparer.prepare_range(&file, None).unwrap();
    let mut stream = preparer.open(file, prepared, refresher.clone()).await.unwrap();

    let result = read_all(&mut stream).await;
    assert!(matches!(result, Err(DebridError::NetworkError(_))));
    assert_eq!(refresher.refreshes.load(Ordering::SeqCst), 1);
}
