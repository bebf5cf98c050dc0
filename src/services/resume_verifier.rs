//! ResumeVerifier: read-only "what do you already have?" query.

use crate::{
    errors::UploadResult,
    models::{api::VerifyResponse, session::UploadSession},
    services::session_directory::SessionDirectory,
};

#[derive(Clone, Debug)]
pub struct ResumeVerifier {
    dirs: SessionDirectory,
}

impl ResumeVerifier {
    pub fn new(dirs: SessionDirectory) -> Self {
        Self { dirs }
    }

    /// Report whether the client still needs to upload, and which chunks are stored.
    ///
    /// The list is sorted by ordinal for stable output; clients should treat
    /// it as a set.
    pub async fn verify(&self, session: &UploadSession) -> UploadResult<VerifyResponse> {
        if self.dirs.final_exists(session).await? {
            return Ok(VerifyResponse {
                should_upload: false,
                uploaded_list: None,
            });
        }

        let mut chunks = self.dirs.list(session).await?.unwrap_or_default();
        chunks.sort_by_key(|c| c.record.ordinal);

        Ok(VerifyResponse {
            should_upload: true,
            uploaded_list: Some(chunks.into_iter().map(|c| c.record.identifier).collect()),
        })
    }
}
