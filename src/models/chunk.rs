//! Represents a single stored chunk of an upload session.

use crate::errors::{UploadError, UploadResult};
use serde::Serialize;

const MAX_CHUNK_ID_LEN: usize = 255;

/// A chunk blob inside a session directory.
///
/// The identifier has the form `<contentIdOfChunk>-<ordinal>` and is used verbatim
/// as the blob's file name. The ordinal is parsed once when the record is built,
/// so nothing downstream needs to split strings to recover ordering.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Client-supplied chunk identifier (also the on-disk blob name).
    pub identifier: String,

    /// Zero-based position of the chunk within the original file.
    pub ordinal: u64,
}

impl ChunkRecord {
    /// Parse a chunk identifier into a record.
    ///
    /// The ordinal is the decimal suffix after the last `-`, so content ids
    /// that themselves contain dashes are fine.
    pub fn parse(identifier: &str) -> UploadResult<Self> {
        ensure_identifier_safe(identifier)?;

        let (_, suffix) = identifier.rsplit_once('-').ok_or_else(|| {
            UploadError::MalformedRequest(format!(
                "chunk identifier `{}` has no `-<ordinal>` suffix",
                identifier
            ))
        })?;

        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(UploadError::MalformedRequest(format!(
                "chunk identifier `{}` has a non-numeric ordinal",
                identifier
            )));
        }

        let ordinal = suffix.parse::<u64>().map_err(|_| {
            UploadError::MalformedRequest(format!(
                "chunk identifier `{}` has an out-of-range ordinal",
                identifier
            ))
        })?;

        Ok(Self {
            identifier: identifier.to_string(),
            ordinal,
        })
    }

    /// Byte offset of this chunk in the final file.
    ///
    /// Returns `None` when `ordinal * chunk_size` overflows.
    pub fn offset(&self, chunk_size: u64) -> Option<u64> {
        self.ordinal.checked_mul(chunk_size)
    }
}

/// Reject identifiers that could escape the session directory or collide with
/// the dot-prefixed temp files the store writes next to chunks.
fn ensure_identifier_safe(identifier: &str) -> UploadResult<()> {
    if identifier.is_empty() || identifier.len() > MAX_CHUNK_ID_LEN {
        return Err(UploadError::MalformedRequest(
            "chunk identifier must be 1-255 bytes".into(),
        ));
    }
    if identifier.starts_with('.') || identifier.contains("..") {
        return Err(UploadError::MalformedRequest(format!(
            "chunk identifier `{}` is not allowed",
            identifier
        )));
    }
    if identifier
        .bytes()
        .any(|b| b == b'/' || b == b'\\' || b == b'\0' || b.is_ascii_control())
    {
        return Err(UploadError::MalformedRequest(format!(
            "chunk identifier `{}` contains path separators or control characters",
            identifier
        )));
    }
    Ok(())
}
