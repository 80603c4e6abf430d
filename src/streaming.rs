//! Range-aware upstream requests for provider links
//!
//! [`StreamingLinkPreparer`] maps a client byte range onto a request against
//! a provider link, probes links for liveness and opens [`LinkStream`]s
//! that survive one link death mid-transfer.

use crate::config::DebridConfig;
use crate::error::{DebridError, Result};
use crate::models::{ByteRange, CachedFile, RangeRequest};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An upstream request ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub url: String,
    /// Byte range to request; `None` means the whole file
    pub range: Option<ByteRange>,
    /// Bytes the response body is expected to carry
    pub expected_len: u64,
}

impl PreparedRequest {
    /// Value of the upstream `Range` header, if one is needed
    pub fn range_header(&self) -> Option<String> {
        self.range.map(|r| r.to_header())
    }
}

/// Source of a fresh link once the current one has died
#[async_trait]
pub trait LinkRefresher: Send + Sync {
    async fn refresh(&self, dead: &CachedFile) -> Result<CachedFile>;
}

/// Prepares and sends ranged requests against provider links
#[derive(Clone)]
pub struct StreamingLinkPreparer {
    http: Client,
}

impl StreamingLinkPreparer {
    /// Create a preparer whose requests have a connect timeout and a per-read
    /// timeout, but no overall deadline: media transfers legitimately run
    /// for hours
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                DebridError::InternalError(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(StreamingLinkPreparer { http })
    }

    pub fn from_config(config: &DebridConfig) -> Result<Self> {
        Self::new(config.connect_timeout(), config.stream_read_timeout())
    }

    /// Map a client range onto an upstream request for `file`
    ///
    /// A range covering the whole file, or no range at all, produces a plain
    /// request with no `Range` header.
    pub fn prepare_range(
        &self,
        file: &CachedFile,
        range: Option<RangeRequest>,
    ) -> Result<PreparedRequest> {
        match range {
            None => Ok(Self::full(file)),
            Some(request) => {
                let range = request.resolve(file.size)?;
                Ok(Self::prepare_byte_range(file, range))
            }
        }
    }

    fn full(file: &CachedFile) -> PreparedRequest {
        PreparedRequest {
            url: file.link.clone(),
            range: None,
            expected_len: file.size,
        }
    }

    fn prepare_byte_range(file: &CachedFile, range: ByteRange) -> PreparedRequest {
        if range.is_full(file.size) {
            return Self::full(file);
        }
        PreparedRequest {
            url: file.link.clone(),
            range: Some(range),
            expected_len: range.size(),
        }
    }

    /// Probe `file`'s link with a HEAD request, falling back to a one-byte
    /// ranged GET for providers that refuse HEAD
    pub async fn is_link_alive(&self, file: &CachedFile) -> bool {
        let head = match self.http.head(&file.link).send().await {
            Ok(response) => response.status(),
            Err(e) => {
                debug!("Link probe failed: link={}, error={}", file.link, e);
                return false;
            }
        };

        let status = if head == StatusCode::METHOD_NOT_ALLOWED || head == StatusCode::NOT_IMPLEMENTED {
            match self
                .http
                .get(&file.link)
                .header(http::header::RANGE, "bytes=0-0")
                .send()
                .await
            {
                Ok(response) => response.status(),
                Err(e) => {
                    debug!("Ranged link probe failed: link={}, error={}", file.link, e);
                    return false;
                }
            }
        } else {
            head
        };

        let alive = status.is_success();
        if !alive {
            info!(
                "Link is dead: provider={}, path={}, status={}",
                file.provider, file.path, status
            );
        }
        alive
    }

    /// Send a prepared request and validate the response shape
    pub async fn send(&self, prepared: &PreparedRequest) -> Result<Response> {
        let mut request = self.http.get(&prepared.url);
        if let Some(header) = prepared.range_header() {
            request = request.header(http::header::RANGE, header);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DebridError::from_http_status(
                status.as_u16(),
                prepared.url.clone(),
                body,
            ));
        }

        if let Some(range) = prepared.range {
            if status != StatusCode::PARTIAL_CONTENT {
                return Err(DebridError::UnknownError {
                    status: status.as_u16(),
                    endpoint: prepared.url.clone(),
                    body: format!("expected 206 for range {}", range.to_header()),
                });
            }
            if let Some(content_range) = response
                .headers()
                .get(http::header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
            {
                if !validate_content_range(content_range, &range)? {
                    return Err(DebridError::ParseError(format!(
                        "Content-Range mismatch: expected {}-{}, got {}",
                        range.start, range.end, content_range
                    )));
                }
            }
        }
        Ok(response)
    }

    /// Send `prepared` and wrap the response in a stream that resumes once
    /// through `refresher` if the link dies mid-transfer
    pub async fn open(
        &self,
        file: CachedFile,
        prepared: PreparedRequest,
        refresher: Arc<dyn LinkRefresher>,
    ) -> Result<LinkStream> {
        let response = self.send(&prepared).await?;
        Ok(LinkStream {
            preparer: self.clone(),
            file,
            range: prepared.range,
            expected_len: prepared.expected_len,
            offset: 0,
            response,
            refresher,
            refreshed: false,
        })
    }
}

/// Validate that a Content-Range header value matches the requested range
///
/// Expected format: "bytes start-end/total"
fn validate_content_range(content_range: &str, expected: &ByteRange) -> Result<bool> {
    let range_part = content_range.trim().strip_prefix("bytes ").ok_or_else(|| {
        DebridError::ParseError(format!(
            "Content-Range must start with 'bytes ', got: {}",
            content_range
        ))
    })?;

    let (span, _total) = range_part.split_once('/').ok_or_else(|| {
        DebridError::ParseError(format!(
            "Invalid Content-Range format, expected 'start-end/total', got: {}",
            range_part
        ))
    })?;
    let (start, end) = span.split_once('-').ok_or_else(|| {
        DebridError::ParseError(format!("Invalid range format in Content-Range: {}", span))
    })?;

    let start = start
        .trim()
        .parse::<u64>()
        .map_err(|e| DebridError::ParseError(format!("Invalid start value: {}", e)))?;
    let end = end
        .trim()
        .parse::<u64>()
        .map_err(|e| DebridError::ParseError(format!("Invalid end value: {}", e)))?;

    Ok(start == expected.start && end == expected.end)
}

/// Body of an upstream media response that tolerates one link death
pub struct LinkStream {
    preparer: StreamingLinkPreparer,
    file: CachedFile,
    range: Option<ByteRange>,
    expected_len: u64,
    offset: u64,
    response: Response,
    refresher: Arc<dyn LinkRefresher>,
    refreshed: bool,
}

impl LinkStream {
    /// The file currently being streamed (its link changes after a refresh)
    pub fn file(&self) -> &CachedFile {
        &self.file
    }

    /// Bytes delivered so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total bytes this stream delivers
    pub fn expected_len(&self) -> u64 {
        self.expected_len
    }

    /// HTTP status of the current upstream response
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Next chunk of the body, or `None` once all expected bytes arrived
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let failure = match self.response.chunk().await {
                Ok(Some(chunk)) => {
                    self.offset += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Ok(None) if self.offset >= self.expected_len => return Ok(None),
                Ok(None) => DebridError::NetworkError(format!(
                    "upstream closed after {} of {} bytes",
                    self.offset, self.expected_len
                )),
                Err(e) => DebridError::from(e),
            };

            if self.refreshed {
                warn!(
                    "Stream failed again after refresh: path={}, offset={}, error={}",
                    self.file.path, self.offset, failure
                );
                return Err(failure);
            }
            self.resume(failure).await?;
        }
    }

    /// Re-resolve the link and continue from the current offset
    async fn resume(&mut self, failure: DebridError) -> Result<()> {
        self.refreshed = true;
        warn!(
            "Stream failed mid-transfer, refreshing link: provider={}, path={}, offset={}, error={}",
            self.file.provider, self.file.path, self.offset, failure
        );

        let fresh = self.refresher.refresh(&self.file).await?;
        let start = self.range.map_or(0, |r| r.start) + self.offset;
        let end = self
            .range
            .map_or(fresh.size.saturating_sub(1), |r| r.end);
        let remaining = ByteRange::new(start, end)?;
        let prepared = StreamingLinkPreparer::prepare_byte_range(&fresh, remaining);

        self.response = self.preparer.send(&prepared).await?;
        self.file = fresh;
        Ok(())
    }
}
