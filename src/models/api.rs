//! Request and response bodies for the verify and merge endpoints.

use serde::{Deserialize, Serialize};

/// Body of `POST /verify`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub file_hash: String,
    pub filename: String,
}

/// Answer to a resume query.
///
/// `uploaded_list` is omitted entirely once the final file exists.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub should_upload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_list: Option<Vec<String>>,
}

/// Body of `POST /merge`. `size` is the chunk size the client split with.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_hash: String,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MergeResponse {
    pub code: u16,
    pub message: String,
}
