//! HTTP handlers for the resumable upload flow:
//! upload chunks, ask what is already stored, then merge.

use crate::{
    errors::{AppError, UploadError, UploadResult},
    handlers::chunk_form::ChunkForm,
    models::{
        api::{MergeRequest, MergeResponse, VerifyRequest, VerifyResponse},
        session::UploadSession,
    },
    services::{chunk_receiver::Ack, merge_engine::MergeOutcome, upload_service::UploadService},
};
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::io;
use tracing::{debug, warn};

/// `POST /upload` — store one chunk sent as multipart form data.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    multipart: Multipart,
) -> Result<&'static str, AppError> {
    let (upload, ack) =
        ChunkForm::receive(multipart, &service.receiver, &service.dirs.spool_dir()).await?;
    debug!(
        file_hash = %upload.session.file_hash,
        chunk = %upload.record.identifier,
        status = ack.status(),
        "chunk upload handled"
    );

    Ok(match ack {
        Ack::Exists => "file exist",
        Ack::Received => "received file chunk",
    })
}

/// `POST /verify` — tell the client whether to upload and which chunks to skip.
///
/// The body is parsed as JSON whatever the `Content-Type` says.
pub async fn verify_upload(
    State(service): State<UploadService>,
    body: Bytes,
) -> Result<Json<VerifyResponse>, AppError> {
    let req: VerifyRequest = parse_json(&body)?;
    let session = UploadSession::new(&req.file_hash, &req.filename)?;
    Ok(Json(service.verifier.verify(&session).await?))
}

/// `POST /merge` — assemble the stored chunks into the final file.
///
/// Always answers with `{code, message}`; `code` mirrors the HTTP status.
pub async fn merge_chunks(State(service): State<UploadService>, body: Bytes) -> Response {
    match run_merge(&service, &body).await {
        Ok(outcome) => {
            if let MergeOutcome::Merged {
                path,
                size_bytes,
                chunks,
            } = outcome
            {
                debug!(size_bytes, chunks, "merge produced {}", path.display());
            }
            (
                StatusCode::OK,
                Json(MergeResponse {
                    code: StatusCode::OK.as_u16(),
                    message: "file merged success".into(),
                }),
            )
                .into_response()
        }
        Err(err) => {
            let status = err.status();
            warn!("merge failed: {}", err);
            (
                status,
                Json(MergeResponse {
                    code: status.as_u16(),
                    message: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn run_merge(service: &UploadService, body: &[u8]) -> UploadResult<MergeOutcome> {
    let req: MergeRequest = parse_json(body)?;
    let session = UploadSession::new(&req.file_hash, &req.filename)?;

    // Detached so a client disconnect cannot abandon a merge halfway;
    // shutdown still cancels it through the child token.
    let merger = service.merger.clone();
    let cancel = service.shutdown.child_token();
    tokio::spawn(async move { merger.merge(&session, req.size, &cancel).await })
        .await
        .map_err(|err| UploadError::Io(io::Error::other(err)))?
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> UploadResult<T> {
    serde_json::from_slice(body)
        .map_err(|err| UploadError::MalformedRequest(format!("invalid JSON body: {}", err)))
}
