//! MergeEngine: rebuilds the original file from its chunks.
//!
//! Each chunk lands at `ordinal * chunk_size`, so copies are independent of
//! one another and run concurrently. Everything is written into a temp file
//! next to the final path and renamed into place only once every copy has
//! succeeded; chunks are deleted only after that rename.
//!
//! One semaphore caps chunk copies across every merge the engine runs.

use crate::{
    errors::{UploadError, UploadResult},
    models::{chunk::ChunkRecord, session::UploadSession},
    services::{
        session_directory::{SessionDirectory, StoredChunk, discard},
        session_locks::SessionLocks,
    },
};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncSeekExt, AsyncWriteExt},
    sync::Semaphore,
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The final file was assembled by this call.
    Merged {
        path: PathBuf,
        size_bytes: u64,
        chunks: usize,
    },
    /// Another merge finished first; nothing was touched.
    AlreadyMerged,
}

/// One chunk copy: where to read from and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CopySlot {
    record: ChunkRecord,
    offset: u64,
    len: u64,
}

#[derive(Debug)]
struct MergePlan {
    slots: Vec<CopySlot>,
    total_len: u64,
}

#[derive(Clone, Debug)]
pub struct MergeEngine {
    dirs: SessionDirectory,
    locks: SessionLocks,
    /// One permit per concurrently open chunk copy.
    permits: Arc<Semaphore>,
}

impl MergeEngine {
    pub fn new(dirs: SessionDirectory, locks: SessionLocks, parallelism: usize) -> Self {
        Self {
            dirs,
            locks,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
        }
    }

    /// Merge every chunk of `session` into `{file_hash}{ext}`.
    ///
    /// Concurrent calls for the same session queue on the session lock; the
    /// later ones observe the finished file and return `AlreadyMerged`.
    pub async fn merge(
        &self,
        session: &UploadSession,
        chunk_size: u64,
        cancel: &CancellationToken,
    ) -> UploadResult<MergeOutcome> {
        if chunk_size == 0 {
            return Err(UploadError::MalformedRequest(
                "chunk size must be greater than zero".into(),
            ));
        }

        let guard = tokio::select! {
            guard = self.locks.write(&session.file_hash) => Some(guard),
            _ = cancel.cancelled() => None,
        };
        let result = match guard {
            Some(guard) => {
                let result = self.merge_locked(session, chunk_size, cancel).await;
                drop(guard);
                result
            }
            None => {
                warn!(file_hash = %session.file_hash, "merge cancelled while waiting for the session");
                Err(UploadError::Cancelled)
            }
        };
        self.locks.release(&session.file_hash).await;
        result
    }

    async fn merge_locked(
        &self,
        session: &UploadSession,
        chunk_size: u64,
        cancel: &CancellationToken,
    ) -> UploadResult<MergeOutcome> {
        if self.dirs.final_exists(session).await? {
            debug!(file_hash = %session.file_hash, "final file already present, skipping merge");
            return Ok(MergeOutcome::AlreadyMerged);
        }
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let chunks = self
            .dirs
            .list(session)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(session.file_hash.clone()))?;
        let plan = plan_merge(session, chunks, chunk_size)?;

        let tmp_path = self.dirs.merge_tmp_path(session);
        if let Err(err) = self.assemble(session, &plan, &tmp_path, cancel).await {
            discard(&tmp_path).await;
            return Err(err);
        }

        let final_path = self.dirs.final_path(session);
        if final_path == self.dirs.path_for(session) {
            self.replace_session_dir(session, &tmp_path).await?;
        } else {
            publish(&tmp_path, &final_path).await?;
            if let Err(err) = self.remove_chunks(session, &plan).await {
                warn!(
                    file_hash = %session.file_hash,
                    "merged file is in place but chunk cleanup failed: {}", err
                );
            }
        }

        info!(
            file_hash = %session.file_hash,
            chunks = plan.slots.len(),
            size_bytes = plan.total_len,
            "merged upload into {}",
            final_path.display()
        );

        Ok(MergeOutcome::Merged {
            path: final_path,
            size_bytes: plan.total_len,
            chunks: plan.slots.len(),
        })
    }

    /// Copy every slot into `tmp_path` concurrently.
    ///
    /// All spawned copies are drained before returning, even after a failure
    /// or cancellation, so no writer outlives the temp file.
    async fn assemble(
        &self,
        session: &UploadSession,
        plan: &MergePlan,
        tmp_path: &Path,
        cancel: &CancellationToken,
    ) -> UploadResult<()> {
        let target = File::create(tmp_path).await?;
        target.set_len(plan.total_len).await?;

        let mut copies = JoinSet::new();
        for slot in &plan.slots {
            let src = self.dirs.chunk_path(session, &slot.record);
            let dst = tmp_path.to_path_buf();
            let slot = slot.clone();
            let permits = self.permits.clone();
            copies.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| io::Error::other("merge semaphore closed"))?;
                copy_chunk(&src, &dst, &slot).await
            });
        }

        let mut first_err: Option<UploadError> = None;
        let mut cancelled = false;
        while !copies.is_empty() {
            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    copies.abort_all();
                }
                joined = copies.join_next() => match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(err))) => {
                        if first_err.is_none() {
                            first_err = Some(err.into());
                        }
                    }
                    Some(Err(err)) if err.is_cancelled() => {}
                    Some(Err(err)) => {
                        if first_err.is_none() {
                            first_err = Some(UploadError::Io(io::Error::other(err)));
                        }
                    }
                    None => break,
                },
            }
        }

        if cancelled {
            warn!(file_hash = %session.file_hash, "merge cancelled");
            return Err(UploadError::Cancelled);
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        target.sync_all().await?;
        Ok(())
    }

    /// Publish an extensionless upload, whose final name is the session
    /// directory itself.
    ///
    /// The directory is moved aside under a merge temp name first and only
    /// removed once the rename succeeded; on failure it is moved back.
    async fn replace_session_dir(&self, session: &UploadSession, tmp_path: &Path) -> UploadResult<()> {
        let session_dir = self.dirs.path_for(session);
        let aside = self.dirs.merge_tmp_path(session);
        if let Err(err) = fs::rename(&session_dir, &aside).await {
            discard(tmp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(tmp_path, &session_dir).await {
            match fs::rename(&aside, &session_dir).await {
                Ok(()) => discard(tmp_path).await,
                // Both stay behind under merge temp names for the reaper.
                Err(restore) => warn!(
                    file_hash = %session.file_hash,
                    "could not move chunks back from {}: {}",
                    aside.display(),
                    restore
                ),
            }
            return Err(err.into());
        }

        if let Err(err) = fs::remove_dir_all(&aside).await {
            warn!(
                file_hash = %session.file_hash,
                "merged file is in place but chunk cleanup failed: {}", err
            );
        }
        Ok(())
    }

    async fn remove_chunks(&self, session: &UploadSession, plan: &MergePlan) -> io::Result<()> {
        for slot in &plan.slots {
            self.dirs.remove_chunk(session, &slot.record).await?;
        }
        match self.dirs.remove(session).await {
            // staging leftovers of interrupted uploads
            Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => {
                self.dirs.remove_all(session).await
            }
            other => other,
        }
    }
}

/// Sort chunks by ordinal and check they describe exactly one file.
///
/// Ordinals must be `0..N-1` without gaps or duplicates; every chunk but the
/// last must be exactly `chunk_size` long and the last one non-empty and no
/// longer than `chunk_size`.
fn plan_merge(
    session: &UploadSession,
    mut chunks: Vec<StoredChunk>,
    chunk_size: u64,
) -> UploadResult<MergePlan> {
    let inconsistent = |reason: String| UploadError::InconsistentSession {
        file_hash: session.file_hash.clone(),
        reason,
    };

    if chunks.is_empty() {
        return Err(inconsistent("no chunks uploaded".into()));
    }

    chunks.sort_by_key(|c| c.record.ordinal);
    let last = chunks.len() - 1;

    let mut slots = Vec::with_capacity(chunks.len());
    let mut total_len: u64 = 0;
    for (expected, chunk) in chunks.into_iter().enumerate() {
        let expected = expected as u64;
        if chunk.record.ordinal < expected {
            return Err(inconsistent(format!(
                "duplicate ordinal {} (chunk `{}`)",
                chunk.record.ordinal, chunk.record.identifier
            )));
        }
        if chunk.record.ordinal > expected {
            return Err(inconsistent(format!("missing chunk with ordinal {}", expected)));
        }

        let is_last = expected as usize == last;
        if (!is_last && chunk.len != chunk_size)
            || (is_last && (chunk.len == 0 || chunk.len > chunk_size))
        {
            return Err(inconsistent(format!(
                "chunk `{}` is {} bytes, expected {}{}",
                chunk.record.identifier,
                chunk.len,
                if is_last { "at most " } else { "" },
                chunk_size
            )));
        }

        let offset = chunk
            .record
            .offset(chunk_size)
            .ok_or_else(|| inconsistent("byte offset overflows".into()))?;
        total_len = offset
            .checked_add(chunk.len)
            .ok_or_else(|| inconsistent("file size overflows".into()))?;
        slots.push(CopySlot {
            record: chunk.record,
            offset,
            len: chunk.len,
        });
    }

    Ok(MergePlan { slots, total_len })
}

/// Copy one chunk into the merge target at its offset.
async fn copy_chunk(src: &Path, dst: &Path, slot: &CopySlot) -> io::Result<()> {
    let mut reader = File::open(src).await?;
    let mut writer = OpenOptions::new().write(true).open(dst).await?;
    writer.seek(SeekFrom::Start(slot.offset)).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.flush().await?;
    if copied != slot.len {
        return Err(io::Error::new(
            ErrorKind::UnexpectedEof,
            format!(
                "chunk `{}` changed during merge: copied {} of {} bytes",
                slot.record.identifier, copied, slot.len
            ),
        ));
    }
    Ok(())
}

/// Atomically move the assembled temp file to its final name.
async fn publish(tmp_path: &Path, final_path: &Path) -> UploadResult<()> {
    if let Err(err) = fs::rename(tmp_path, final_path).await {
        discard(tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}
