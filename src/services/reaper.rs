//! SessionReaper: removes uploads that were abandoned before merge.
//!
//! A session directory's mtime changes whenever a chunk is added, so it is
//! used as the session's last-activity timestamp. Merge temp files and spool
//! files only survive a crash; they are reaped with the same TTL.

use crate::{
    models::session::UploadSession,
    services::{
        session_directory::{MERGE_TMP_PREFIX, MERGE_TMP_SUFFIX, SessionDirectory},
        session_locks::SessionLocks,
    },
};
use chrono::{DateTime, Utc};
use std::{
    fs::Metadata,
    io::{self, ErrorKind},
    path::Path,
    time::{Duration, SystemTime},
};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub sessions: usize,
    pub temp_files: usize,
}

#[derive(Clone, Debug)]
pub struct SessionReaper {
    dirs: SessionDirectory,
    locks: SessionLocks,
    ttl: Duration,
}

impl SessionReaper {
    pub fn new(dirs: SessionDirectory, locks: SessionLocks, ttl: Duration) -> Self {
        Self { dirs, locks, ttl }
    }

    /// Reap every `interval` until `shutdown` fires.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("session reaper stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.reap_once(SystemTime::now()).await {
                        Ok(report) if report != ReapReport::default() => {
                            let tracked = self.tracked_sessions().await;
                            info!(
                                sessions = report.sessions,
                                temp_files = report.temp_files,
                                tracked,
                                "reaped expired uploads"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!("session reaper pass failed: {}", err),
                    }
                }
            }
        }
    }

    /// One pass over the storage root, treating `now` as the current time.
    pub async fn reap_once(&self, now: SystemTime) -> io::Result<ReapReport> {
        let mut report = ReapReport::default();
        let Some(cutoff) = now.checked_sub(self.ttl) else {
            return Ok(report);
        };

        let mut entries = match fs::read_dir(self.dirs.base_path()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(report),
            Err(err) => return Err(err),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Merges rename their temp files away while we scan.
            let Some(meta) = metadata_of(&entry).await? else { continue };
            let modified = meta.modified()?;
            if modified >= cutoff {
                continue;
            }

            if meta.is_dir() && !name.starts_with('.') {
                if self.reap_session(name, modified).await? {
                    report.sessions += 1;
                }
            } else if name.starts_with(MERGE_TMP_PREFIX) && name.ends_with(MERGE_TMP_SUFFIX) {
                if meta.is_dir() {
                    remove_stale_dir(&entry.path()).await?;
                } else {
                    remove_stale_file(&entry.path()).await?;
                }
                report.temp_files += 1;
            }
        }

        report.temp_files += self.reap_spool(cutoff).await?;
        self.locks.prune().await;
        Ok(report)
    }

    async fn reap_session(&self, file_hash: &str, modified: SystemTime) -> io::Result<bool> {
        // Directory names that are not valid hashes were not created by us.
        let Ok(session) = UploadSession::new(file_hash, "") else {
            return Ok(false);
        };
        let Some(_guard) = self.locks.try_write(file_hash).await else {
            debug!(file_hash, "session busy, not reaping");
            return Ok(false);
        };
        self.dirs.remove_all(&session).await?;
        info!(
            file_hash,
            last_activity = %DateTime::<Utc>::from(modified),
            "removed expired upload session"
        );
        Ok(true)
    }

    async fn reap_spool(&self, cutoff: SystemTime) -> io::Result<usize> {
        let mut entries = match fs::read_dir(self.dirs.spool_dir()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let Some(meta) = metadata_of(&entry).await? else { continue };
            if meta.is_file() && meta.modified()? < cutoff {
                remove_stale_file(&entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn tracked_sessions(&self) -> usize {
        self.locks.len().await
    }
}

/// `None` when the entry vanished after it was listed.
async fn metadata_of(entry: &fs::DirEntry) -> io::Result<Option<Metadata>> {
    match entry.metadata().await {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

async fn remove_stale_dir(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => {
            debug!("removed stale merge directory {}", path.display());
            Ok(())
        }
    }
}

async fn remove_stale_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => {
            debug!("removed stale temp file {}", path.display());
            Ok(())
        }
    }
}
