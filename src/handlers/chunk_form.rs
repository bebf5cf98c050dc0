//! Decoding of the chunk upload form.
//!
//! When the text fields precede the binary `chunk` part, the part is streamed
//! straight into the session. Browsers usually append `chunk` first, though,
//! so otherwise the payload is spooled to disk until the metadata is known.
//! The spool lives under the storage root so handing it over is a rename.

use crate::{
    errors::{UploadError, UploadResult},
    services::{
        chunk_receiver::{Ack, ChunkReceiver, ChunkUpload},
        session_directory::discard,
    },
};
use axum::extract::{
    Multipart,
    multipart::{Field, MultipartError},
};
use futures::TryStreamExt;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

/// Fields of one `POST /upload` request.
#[derive(Debug, Default)]
pub struct ChunkForm {
    pub chunk_id: Option<String>,
    pub file_hash: Option<String>,
    pub filename: Option<String>,
    /// Chunk bytes written to the spool, pending the metadata.
    pub spooled: Option<PathBuf>,
}

impl ChunkForm {
    /// Read the whole multipart body and hand the chunk to `receiver`.
    pub async fn receive(
        multipart: Multipart,
        receiver: &ChunkReceiver,
        spool_dir: &Path,
    ) -> UploadResult<(ChunkUpload, Ack)> {
        let mut form = ChunkForm::default();
        match form.read_fields(multipart, receiver, spool_dir).await {
            Ok(Some(done)) => {
                form.discard().await;
                Ok(done)
            }
            Ok(None) => {
                let (upload, spooled) = form.into_upload().await?;
                let ack = receiver.receive_spooled(&upload, &spooled).await?;
                Ok((upload, ack))
            }
            Err(err) => {
                form.discard().await;
                Err(err)
            }
        }
    }

    /// Returns `Some` when the chunk was already streamed into its session.
    async fn read_fields(
        &mut self,
        mut multipart: Multipart,
        receiver: &ChunkReceiver,
        spool_dir: &Path,
    ) -> UploadResult<Option<(ChunkUpload, Ack)>> {
        let mut stored = None;
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            if stored.is_some() {
                continue;
            }
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("chunk") => {
                    if self.has_metadata() {
                        let upload = self.validate()?;
                        let ack = receiver.receive_stream(&upload, field_stream(field)).await?;
                        stored = Some((upload, ack));
                    } else {
                        // A repeated part replaces the earlier one.
                        self.discard().await;
                        self.spooled = Some(spool_field(field, spool_dir).await?);
                    }
                }
                Some("hash") => self.chunk_id = Some(field.text().await.map_err(malformed)?),
                Some("fileHash") => self.file_hash = Some(field.text().await.map_err(malformed)?),
                Some("filename") => self.filename = Some(field.text().await.map_err(malformed)?),
                _ => {}
            }
        }
        Ok(stored)
    }

    /// Validate the fields and hand back the upload plus its spooled payload.
    ///
    /// The spool file is removed when validation fails.
    async fn into_upload(mut self) -> UploadResult<(ChunkUpload, PathBuf)> {
        match self.validate() {
            Ok(upload) => match self.spooled.take() {
                Some(path) => Ok((upload, path)),
                None => Err(UploadError::MalformedRequest("missing field `chunk`".into())),
            },
            Err(err) => {
                self.discard().await;
                Err(err)
            }
        }
    }

    fn has_metadata(&self) -> bool {
        self.chunk_id.is_some() && self.file_hash.is_some() && self.filename.is_some()
    }

    fn validate(&self) -> UploadResult<ChunkUpload> {
        let chunk_id = required(&self.chunk_id, "hash")?;
        let file_hash = required(&self.file_hash, "fileHash")?;
        let filename = required(&self.filename, "filename")?;
        ChunkUpload::new(file_hash, filename, chunk_id)
    }

    async fn discard(&mut self) {
        if let Some(path) = self.spooled.take() {
            discard(&path).await;
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> UploadResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| UploadError::MalformedRequest(format!("missing field `{}`", name)))
}

fn malformed(err: MultipartError) -> UploadError {
    UploadError::MalformedRequest(err.body_text())
}

fn field_stream(
    field: Field<'_>,
) -> impl futures::Stream<Item = io::Result<bytes::Bytes>> + Send + '_ {
    field.map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.body_text()))
}

async fn spool_field(mut field: Field<'_>, spool_dir: &Path) -> UploadResult<PathBuf> {
    fs::create_dir_all(spool_dir).await?;
    let path = spool_dir.join(Uuid::new_v4().to_string());
    let mut file = File::create(&path).await?;

    let written: UploadResult<()> = async {
        while let Some(bytes) = field.chunk().await.map_err(malformed)? {
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = written {
        drop(file);
        discard(&path).await;
        return Err(err);
    }
    Ok(path)
}
