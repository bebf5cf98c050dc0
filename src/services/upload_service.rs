//! UploadService: shared state handed to every handler.
//!
//! Bundles the chunk store components around a single storage root and a
//! single lock table, so uploads, merges and the reaper coordinate on the
//! same per-session locks.

use crate::services::{
    chunk_receiver::ChunkReceiver,
    merge_engine::MergeEngine,
    reaper::SessionReaper,
    resume_verifier::ResumeVerifier,
    session_directory::SessionDirectory,
    session_locks::SessionLocks,
};
use std::{path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct UploadService {
    pub dirs: SessionDirectory,
    pub receiver: ChunkReceiver,
    pub verifier: ResumeVerifier,
    pub merger: MergeEngine,
    locks: SessionLocks,

    /// Cancelled on shutdown; merges run under child tokens of it.
    pub shutdown: CancellationToken,
}

impl UploadService {
    pub fn new(
        base_path: impl Into<PathBuf>,
        merge_parallelism: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let dirs = SessionDirectory::new(base_path);
        let locks = SessionLocks::new();
        Self {
            receiver: ChunkReceiver::new(dirs.clone(), locks.clone()),
            verifier: ResumeVerifier::new(dirs.clone()),
            merger: MergeEngine::new(dirs.clone(), locks.clone(), merge_parallelism),
            dirs,
            locks,
            shutdown,
        }
    }

    /// A reaper sharing this service's storage root and lock table.
    pub fn reaper(&self, ttl: Duration) -> SessionReaper {
        SessionReaper::new(self.dirs.clone(), self.locks.clone(), ttl)
    }
}
