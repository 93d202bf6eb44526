//! Documents and chunks
//!
//! A `Document` is a canonical wiki page; a `Chunk` is the retrieval unit
//! cut from it. Documents are immutable once indexed and replaced whole
//! when their content hash changes; chunks are replaced atomically with
//! their parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Where a document came from. Authority scoring keys off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Wiki,
    Confluence,
    Sharepoint,
    Github,
    Other,
}

impl SourceKind {
    /// Default authority score for this source kind.
    ///
    /// Deployments may override these through configuration, but the
    /// defaults are fixed.
    pub fn default_authority(&self) -> f32 {
        match self {
            SourceKind::Wiki => 0.9,
            SourceKind::Confluence => 0.8,
            SourceKind::Sharepoint => 0.7,
            SourceKind::Github => 0.7,
            SourceKind::Other => 0.5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Wiki => "wiki",
            SourceKind::Confluence => "confluence",
            SourceKind::Sharepoint => "sharepoint",
            SourceKind::Github => "github",
            SourceKind::Other => "other",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "wiki" => Ok(SourceKind::Wiki),
            "confluence" => Ok(SourceKind::Confluence),
            "sharepoint" => Ok(SourceKind::Sharepoint),
            "github" => Ok(SourceKind::Github),
            "other" => Ok(SourceKind::Other),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A canonical wiki page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Opaque stable id
    pub id: String,
    /// Absolute URL of the page
    pub source_url: String,
    pub source_kind: SourceKind,
    pub title: String,
    pub text: String,
    pub last_modified: DateTime<Utc>,
    /// SHA-256 of the text; replacement is gated on this changing
    pub content_hash: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Document {
    /// Compute the content hash for a document body
    pub fn hash_content(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex_string(&hasher.finalize())
    }
}

/// A retrieval-unit sub-region of a document carrying its own embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Derived from `(document_id, ordinal)`; see [`chunk_point_id`]
    pub id: Uuid,
    pub document_id: String,
    /// Position within the parent document
    pub ordinal: u32,
    pub text: String,
    /// Heading trail leading to this chunk
    #[serde(default)]
    pub section_path: Vec<String>,
    pub token_count: u32,
    /// Alias terms observed in this chunk, used for retrieval boosts
    #[serde(default)]
    pub semantic_tags: Vec<String>,
}

/// Deterministic vector-point id for a chunk.
///
/// Re-embedding the same document therefore upserts the same points, which
/// keeps ingest idempotent.
pub fn chunk_point_id(document_id: &str, ordinal: u32) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(ordinal.to_be_bytes());
    let digest = hasher.finalize();
    // UUIDs want 16 bytes; the front of the digest is as good as any slice.
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

fn hex_string(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_point_id_is_deterministic() {
        let a = chunk_point_id("doc-1", 0);
        let b = chunk_point_id("doc-1", 0);
        assert_eq!(a, b);
        assert_ne!(a, chunk_point_id("doc-1", 1));
        assert_ne!(a, chunk_point_id("doc-2", 0));
    }

    #[test]
    fn content_hash_changes_with_text() {
        let h1 = Document::hash_content("hello");
        let h2 = Document::hash_content("hello");
        let h3 = Document::hash_content("hello world");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn source_kind_round_trips() {
        for kind in [
            SourceKind::Wiki,
            SourceKind::Confluence,
            SourceKind::Sharepoint,
            SourceKind::Github,
            SourceKind::Other,
        ] {
            let parsed: SourceKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn authority_defaults_match_policy() {
        assert_eq!(SourceKind::Wiki.default_authority(), 0.9);
        assert_eq!(SourceKind::Other.default_authority(), 0.5);
    }
}
