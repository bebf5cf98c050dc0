//! ChunkReceiver: persists individual chunks into their session directory.
//!
//! Blobs are always staged under a dot-prefixed name inside the session
//! directory and renamed into place, so a listing never exposes a half-written
//! chunk and a re-uploaded chunk simply replaces the previous blob.

use crate::{
    errors::UploadResult,
    models::{chunk::ChunkRecord, session::UploadSession},
    services::{
        session_directory::{SessionDirectory, discard},
        session_locks::SessionLocks,
    },
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;

/// Outcome of a chunk upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The merged file already exists; nothing was written.
    Exists,
    /// The chunk is stored under its identifier.
    Received,
}

impl Ack {
    pub fn status(&self) -> &'static str {
        match self {
            Ack::Exists => "exists",
            Ack::Received => "received",
        }
    }
}

/// Metadata describing one chunk upload.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session: UploadSession,
    pub record: ChunkRecord,
}

impl ChunkUpload {
    pub fn new(file_hash: &str, filename: &str, chunk_id: &str) -> UploadResult<Self> {
        Ok(Self {
            session: UploadSession::new(file_hash, filename)?,
            record: ChunkRecord::parse(chunk_id)?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ChunkReceiver {
    dirs: SessionDirectory,
    locks: SessionLocks,
}

impl ChunkReceiver {
    pub fn new(dirs: SessionDirectory, locks: SessionLocks) -> Self {
        Self { dirs, locks }
    }

    /// Store a chunk whose bytes arrive as a stream.
    pub async fn receive_stream<S>(&self, upload: &ChunkUpload, stream: S) -> UploadResult<Ack>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let file_hash = &upload.session.file_hash;
        let guard = self.locks.read(file_hash).await;
        let result = self.store_stream(upload, stream).await;
        drop(guard);
        self.locks.release(file_hash).await;
        result
    }

    /// Store a chunk the multipart decoder already spooled to `spooled`.
    ///
    /// The spool file is consumed on every path: moved into the session or removed.
    pub async fn receive_spooled(&self, upload: &ChunkUpload, spooled: &Path) -> UploadResult<Ack> {
        let file_hash = &upload.session.file_hash;
        let guard = self.locks.read(file_hash).await;
        let result = self.store_spooled(upload, spooled).await;
        drop(guard);
        self.locks.release(file_hash).await;
        result
    }

    // Callers hold the session's read lock, so a merge cannot publish the
    // final file between the check and the write.
    async fn store_stream<S>(&self, upload: &ChunkUpload, stream: S) -> UploadResult<Ack>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if self.dirs.final_exists(&upload.session).await? {
            debug!(file_hash = %upload.session.file_hash, "final file exists, ignoring chunk");
            return Ok(Ack::Exists);
        }
        self.dirs.ensure(&upload.session).await?;

        let staging = self.dirs.staging_path(&upload.session);
        if let Err(err) = write_stream(&staging, stream).await {
            discard(&staging).await;
            return Err(err.into());
        }

        self.publish(upload, &staging).await?;
        Ok(Ack::Received)
    }

    async fn store_spooled(&self, upload: &ChunkUpload, spooled: &Path) -> UploadResult<Ack> {
        let exists = match self.dirs.final_exists(&upload.session).await {
            Ok(exists) => exists,
            Err(err) => {
                discard(spooled).await;
                return Err(err.into());
            }
        };
        if exists {
            debug!(file_hash = %upload.session.file_hash, "final file exists, discarding spooled chunk");
            discard(spooled).await;
            return Ok(Ack::Exists);
        }

        if let Err(err) = self.dirs.ensure(&upload.session).await {
            discard(spooled).await;
            return Err(err.into());
        }

        let staging = self.dirs.staging_path(&upload.session);
        match fs::rename(spooled, &staging).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::CrossesDevices => {
                let copied = fs::copy(spooled, &staging).await;
                discard(spooled).await;
                if let Err(err) = copied {
                    discard(&staging).await;
                    return Err(err.into());
                }
            }
            Err(err) => {
                discard(spooled).await;
                return Err(err.into());
            }
        }

        self.publish(upload, &staging).await?;
        Ok(Ack::Received)
    }

    /// Rename a staged blob over the chunk's final name.
    async fn publish(&self, upload: &ChunkUpload, staging: &Path) -> UploadResult<()> {
        let target = self.dirs.chunk_path(&upload.session, &upload.record);
        if let Err(err) = fs::rename(staging, &target).await {
            discard(staging).await;
            return Err(err.into());
        }
        debug!(
            file_hash = %upload.session.file_hash,
            chunk = %upload.record.identifier,
            ordinal = upload.record.ordinal,
            "stored chunk"
        );
        Ok(())
    }
}

async fn write_stream<S>(path: &Path, stream: S) -> io::Result<()>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut file = File::create(path).await?;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    file.sync_all().await
}
