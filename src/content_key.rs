//! Identifiers for content requested from debrid providers

use crate::error::{DebridError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport family a piece of content belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Torrent,
    Usenet,
}

/// Identifies requested content
///
/// Equality and hashing use the variant and its identifying field only: two
/// magnets with the same info hash but different trackers are the same key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentKey {
    TorrentMagnet { hash: String, raw_magnet: String },
    UsenetRelease { release_name: String },
}

impl ContentKey {
    /// Build a torrent key from a magnet URI
    ///
    /// Accepts hex (40 chars) and base32 (32 chars) `btih` hashes. The hash
    /// is normalized to lowercase.
    pub fn from_magnet(raw_magnet: impl Into<String>) -> Result<Self> {
        let raw_magnet = raw_magnet.into();
        let hash = extract_btih(&raw_magnet)?;
        Ok(ContentKey::TorrentMagnet { hash, raw_magnet })
    }

    /// Build a usenet key from a release name
    pub fn usenet(release_name: impl Into<String>) -> Result<Self> {
        let release_name = release_name.into();
        if release_name.trim().is_empty() {
            return Err(DebridError::ParseError(
                "usenet release name must not be empty".to_string(),
            ));
        }
        Ok(ContentKey::UsenetRelease { release_name })
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            ContentKey::TorrentMagnet { .. } => ContentKind::Torrent,
            ContentKey::UsenetRelease { .. } => ContentKind::Usenet,
        }
    }

    /// The identifying field of this key
    pub fn id(&self) -> &str {
        match self {
            ContentKey::TorrentMagnet { hash, .. } => hash,
            ContentKey::UsenetRelease { release_name } => release_name,
        }
    }
}

impl PartialEq for ContentKey {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.id() == other.id()
    }
}

impl Eq for ContentKey {}

impl std::hash::Hash for ContentKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.id().hash(state);
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKey::TorrentMagnet { hash, .. } => write!(f, "magnet:{}", hash),
            ContentKey::UsenetRelease { release_name } => write!(f, "usenet:{}", release_name),
        }
    }
}

fn extract_btih(magnet: &str) -> Result<String> {
    let query = magnet
        .trim()
        .strip_prefix("magnet:?")
        .ok_or_else(|| DebridError::ParseError(format!("not a magnet URI: {}", magnet)))?;

    let hash = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| *name == "xt")
        .find_map(|(_, value)| {
            let lower = value.to_ascii_lowercase();
            lower.strip_prefix("urn:btih:").map(str::to_string)
        })
        .ok_or_else(|| {
            DebridError::ParseError(format!("magnet has no urn:btih topic: {}", magnet))
        })?;

    let valid = match hash.len() {
        40 => hash.chars().all(|c| c.is_ascii_hexdigit()),
        32 => hash
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)),
        _ => false,
    };
    if !valid {
        return Err(DebridError::ParseError(format!(
            "invalid info hash '{}'",
            hash
        )));
    }
    Ok(hash)
}
