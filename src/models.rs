//! Core data models for debrid resolution

use crate::error::{DebridError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

/// Represents a byte range for HTTP Range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    /// Starting byte position (inclusive)
    pub start: u64,
    /// Ending byte position (inclusive)
    pub end: u64,
}

impl ByteRange {
    /// Create a new ByteRange
    ///
    /// # Returns
    /// * `Ok(ByteRange)` if the range is valid
    /// * `Err(DebridError)` if start > end
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(DebridError::InvalidRange(format!(
                "start ({}) must be <= end ({})",
                start, end
            )));
        }
        Ok(ByteRange { start, end })
    }

    /// Get the size of this byte range in bytes
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Whether this range covers an entire file of `file_size` bytes
    pub fn is_full(&self, file_size: u64) -> bool {
        file_size > 0 && self.start == 0 && self.end == file_size - 1
    }

    /// Convert this ByteRange to an HTTP Range header value
    ///
    /// # Returns
    /// A string in the format "bytes=start-end"
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// A client byte range as sent in a `Range` header, either bound optional
///
/// `start: None, end: Some(n)` is a suffix range: the last `n` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeRequest {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl RangeRequest {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        RangeRequest { start, end }
    }

    /// Parse an HTTP Range header value
    ///
    /// Supports `bytes=a-b`, `bytes=a-` and `bytes=-n`. Multi-range
    /// requests are rejected.
    pub fn from_header(header: &str) -> Result<Self> {
        let header = header.trim();
        let range_part = header.strip_prefix("bytes=").ok_or_else(|| {
            DebridError::ParseError(format!(
                "Range header must start with 'bytes=', got: {}",
                header
            ))
        })?;

        if range_part.contains(',') {
            return Err(DebridError::ParseError(format!(
                "Multiple ranges are not supported: {}",
                range_part
            )));
        }

        let (start, end) = range_part.split_once('-').ok_or_else(|| {
            DebridError::ParseError(format!(
                "Invalid range format, expected 'start-end', got: {}",
                range_part
            ))
        })?;

        let parse = |value: &str, what: &str| -> Result<Option<u64>> {
            let value = value.trim();
            if value.is_empty() {
                return Ok(None);
            }
            value
                .parse::<u64>()
                .map(Some)
                .map_err(|e| DebridError::ParseError(format!("Invalid {} value: {}", what, e)))
        };

        let request = RangeRequest {
            start: parse(start, "start")?,
            end: parse(end, "end")?,
        };
        if request.start.is_none() && request.end.is_none() {
            return Err(DebridError::ParseError(
                "Range header has neither start nor end".to_string(),
            ));
        }
        Ok(request)
    }

    /// Resolve this request against a file of `file_size` bytes
    pub fn resolve(&self, file_size: u64) -> Result<ByteRange> {
        if file_size == 0 {
            return Err(DebridError::InvalidRange(
                "cannot take a range of an empty file".to_string(),
            ));
        }
        let last = file_size - 1;
        let (start, end) = match (self.start, self.end) {
            (None, Some(suffix)) => {
                if suffix == 0 {
                    return Err(DebridError::InvalidRange(
                        "suffix range length must be positive".to_string(),
                    ));
                }
                (file_size.saturating_sub(suffix), last)
            }
            (start, end) => (start.unwrap_or(0), end.map_or(last, |e| e.min(last))),
        };
        if start > last {
            return Err(DebridError::InvalidRange(format!(
                "start {} is beyond end of file ({} bytes)",
                start, file_size
            )));
        }
        ByteRange::new(start, end)
    }
}

/// Debrid providers this crate can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Premiumize,
    Easynews,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Premiumize => "premiumize",
            ProviderId::Easynews => "easynews",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file confirmed available through a provider
///
/// Identity is `(path, size, provider)`. The link is provider-issued and
/// may change between checks without the file being considered changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFile {
    /// Path of the file inside the content, as reported by the provider
    pub path: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub link: String,
    pub provider: ProviderId,
    pub last_checked: SystemTime,
    /// Provider-specific values needed to rebuild or refresh the link
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl CachedFile {
    pub fn new(
        path: impl Into<String>,
        size: u64,
        link: impl Into<String>,
        provider: ProviderId,
    ) -> Self {
        CachedFile {
            path: path.into(),
            size,
            mime_type: None,
            link: link.into(),
            provider,
            last_checked: SystemTime::now(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

impl PartialEq for CachedFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.size == other.size && self.provider == other.provider
    }
}

impl Eq for CachedFile {}

impl Hash for CachedFile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.size.hash(state);
        self.provider.hash(state);
    }
}

/// Result of asking one provider about one content key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Cached { files: Vec<CachedFile> },
    NotCached,
    ClientError,
    NetworkError,
    ProviderError,
}

impl ProviderOutcome {
    /// Fold a provider call failure into an outcome
    pub fn from_error(err: &DebridError) -> Self {
        match err {
            DebridError::ClientError { .. } => ProviderOutcome::ClientError,
            DebridError::NetworkError(_) => ProviderOutcome::NetworkError,
            // Bodies the provider sent but we could not understand are the
            // provider's fault, same as unexpected statuses
            _ => ProviderOutcome::ProviderError,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ProviderOutcome::Cached { .. })
    }

    pub fn files(&self) -> &[CachedFile] {
        match self {
            ProviderOutcome::Cached { files } => files,
            _ => &[],
        }
    }

    /// What this outcome means for one file the provider was asked about
    pub fn for_file(&self, remote_path: &str) -> FileOutcome {
        match self {
            ProviderOutcome::Cached { files } => files
                .iter()
                .find(|f| f.path == remote_path)
                .cloned()
                .map(FileOutcome::Cached)
                .unwrap_or(FileOutcome::Missing),
            ProviderOutcome::NotCached => FileOutcome::Missing,
            ProviderOutcome::ClientError => FileOutcome::ClientError,
            ProviderOutcome::NetworkError => FileOutcome::NetworkError,
            ProviderOutcome::ProviderError => FileOutcome::ProviderError,
        }
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ProviderOutcome::Cached { .. } => "cached",
            ProviderOutcome::NotCached => "not_cached",
            ProviderOutcome::ClientError => "client_error",
            ProviderOutcome::NetworkError => "network_error",
            ProviderOutcome::ProviderError => "provider_error",
        }
    }
}

/// Outcome tagged with the provider it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResolution {
    pub provider: ProviderId,
    pub outcome: ProviderOutcome,
}

/// Persisted state of a (file, provider) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Cached,
    Missing,
    ProviderError,
    ClientError,
    NetworkError,
}

/// A single file's outcome, ready to be written to the state store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Cached(CachedFile),
    Missing,
    ProviderError,
    ClientError,
    NetworkError,
}

impl FileOutcome {
    pub fn state(&self) -> FileState {
        match self {
            FileOutcome::Cached(_) => FileState::Cached,
            FileOutcome::Missing => FileState::Missing,
            FileOutcome::ProviderError => FileState::ProviderError,
            FileOutcome::ClientError => FileState::ClientError,
            FileOutcome::NetworkError => FileState::NetworkError,
        }
    }
}

/// One persisted row per (virtual file, provider)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProviderRecord {
    pub provider: ProviderId,
    pub state: FileState,
    pub last_checked: SystemTime,
    pub link: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    /// Path of the file inside the provider's content listing
    pub remote_path: Option<String>,
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,
}

impl FileProviderRecord {
    /// Build a record for an outcome observed at `checked_at`
    ///
    /// Non-cached outcomes keep the previous size and remote path, if any, so
    /// a later revalidation can still match the file.
    pub fn from_outcome(
        provider: ProviderId,
        outcome: &FileOutcome,
        checked_at: SystemTime,
        previous: Option<&FileProviderRecord>,
    ) -> Self {
        match outcome {
            FileOutcome::Cached(file) => FileProviderRecord {
                provider,
                state: FileState::Cached,
                last_checked: checked_at,
                link: Some(file.link.clone()),
                size: Some(file.size),
                mime_type: file.mime_type.clone(),
                remote_path: Some(file.path.clone()),
                extra_params: file.params.clone(),
            },
            other => FileProviderRecord {
                provider,
                state: other.state(),
                last_checked: checked_at,
                link: None,
                size: previous.and_then(|p| p.size),
                mime_type: previous.and_then(|p| p.mime_type.clone()),
                remote_path: previous.and_then(|p| p.remote_path.clone()),
                extra_params: previous
                    .map(|p| p.extra_params.clone())
                    .unwrap_or_default(),
            },
        }
    }

    /// Rebuild the cached file this record points at
    ///
    /// Returns `None` unless the record is `Cached`.
    pub fn to_cached_file(&self) -> Option<CachedFile> {
        if self.state != FileState::Cached {
            return None;
        }
        Some(CachedFile {
            path: self.remote_path.clone().unwrap_or_default(),
            size: self.size?,
            mime_type: self.mime_type.clone(),
            link: self.link.clone()?,
            provider: self.provider,
            last_checked: self.last_checked,
            params: self.extra_params.clone(),
        })
    }

    /// Whether this record satisfies the `Cached` invariant
    pub fn is_consistent(&self) -> bool {
        self.state != FileState::Cached || (self.link.is_some() && self.size.is_some())
    }
}
