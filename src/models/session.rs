//! Represents an upload session: one file being assembled from chunks.

use crate::errors::{UploadError, UploadResult};
use serde::Serialize;

const MAX_FILE_HASH_LEN: usize = 128;

/// An upload session in the chunk store.
///
/// Sessions are never registered explicitly: the first chunk for a `file_hash`
/// creates the session directory, and a finished merge (or the reaper) removes it.
/// The `extension` is only used to name the final file.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Content identifier of the whole file; doubles as the session directory name.
    pub file_hash: String,

    /// Extension of the original filename including the leading dot, or empty.
    pub extension: String,
}

impl UploadSession {
    /// Build a session from the client-supplied `fileHash` and `filename`.
    pub fn new(file_hash: &str, filename: &str) -> UploadResult<Self> {
        ensure_file_hash_safe(file_hash)?;
        Ok(Self {
            file_hash: file_hash.to_string(),
            extension: extract_extension(filename),
        })
    }

    /// Name of the merged file under the storage root.
    pub fn final_name(&self) -> String {
        format!("{}{}", self.file_hash, self.extension)
    }
}

/// Validate a file hash so it can be used verbatim as a directory name.
///
/// Accepts ASCII letters, digits, `-` and `_` only.
fn ensure_file_hash_safe(file_hash: &str) -> UploadResult<()> {
    if file_hash.is_empty() {
        return Err(UploadError::MalformedRequest("fileHash must not be empty".into()));
    }
    if file_hash.len() > MAX_FILE_HASH_LEN {
        return Err(UploadError::MalformedRequest(format!(
            "fileHash longer than {} bytes",
            MAX_FILE_HASH_LEN
        )));
    }
    if !file_hash
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(UploadError::MalformedRequest(format!(
            "fileHash `{}` contains unsupported characters",
            file_hash
        )));
    }
    Ok(())
}

/// Extract the extension (with its dot) from the last path component of `filename`.
///
/// `archive.tar.gz` yields `.gz`; names without a dot yield an empty string.
pub fn extract_extension(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match base.rfind('.') {
        Some(idx) => {
            let ext = &base[idx..];
            if ext.bytes().any(|b| b == b'\0' || b.is_ascii_control()) {
                String::new()
            } else {
                ext.to_string()
            }
        }
        None => String::new(),
    }
}
