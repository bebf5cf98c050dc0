//! src/services/session_directory.rs
//!
//! SessionDirectory: owns the on-disk layout of the chunk store:
//!
//! ```text
//! {root}/{file_hash}/{chunk_id}   chunk blobs of an in-progress upload
//! {root}/{file_hash}{ext}         merged files
//! {root}/.incoming/               multipart spool
//! {root}/.merge-*.part            merges in progress
//! ```
//!
//! Every entry whose name starts with `.` belongs to the store itself and is
//! never reported as a chunk.

use crate::models::{chunk::ChunkRecord, session::UploadSession};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

const SPOOL_DIR: &str = ".incoming";
pub const MERGE_TMP_PREFIX: &str = ".merge-";
pub const MERGE_TMP_SUFFIX: &str = ".part";

/// A chunk found on disk together with its current byte length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub record: ChunkRecord,
    pub len: u64,
}

#[derive(Clone, Debug)]
pub struct SessionDirectory {
    /// Storage root; every path handed out lives beneath it.
    base_path: PathBuf,
}

impl SessionDirectory {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Directory holding the chunks of `session`. Does not check existence.
    pub fn path_for(&self, session: &UploadSession) -> PathBuf {
        self.base_path.join(&session.file_hash)
    }

    pub fn chunk_path(&self, session: &UploadSession, record: &ChunkRecord) -> PathBuf {
        self.path_for(session).join(&record.identifier)
    }

    pub fn final_path(&self, session: &UploadSession) -> PathBuf {
        self.base_path.join(session.final_name())
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.base_path.join(SPOOL_DIR)
    }

    /// Fresh merge temp path for `session`, unique per call.
    ///
    /// Holds the file being assembled, or the chunk directory of an
    /// extensionless upload while its final file is renamed in.
    pub fn merge_tmp_path(&self, session: &UploadSession) -> PathBuf {
        self.base_path.join(format!(
            "{}{}-{}{}",
            MERGE_TMP_PREFIX,
            session.file_hash,
            Uuid::new_v4(),
            MERGE_TMP_SUFFIX
        ))
    }

    /// Fresh dot-prefixed path inside the session directory for staging a blob.
    pub fn staging_path(&self, session: &UploadSession) -> PathBuf {
        self.path_for(session)
            .join(format!(".tmp-{}", Uuid::new_v4()))
    }

    /// Whether the merged file for `session` is already in place.
    ///
    /// Only regular files count: for extensionless uploads the final path and
    /// the session directory share a name.
    pub async fn final_exists(&self, session: &UploadSession) -> io::Result<bool> {
        match fs::metadata(self.final_path(session)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Create the session directory; an existing directory is fine.
    pub async fn ensure(&self, session: &UploadSession) -> io::Result<PathBuf> {
        let dir = self.path_for(session);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// List the chunks currently stored for `session`.
    ///
    /// Returns `Ok(None)` when the session directory does not exist. Entries
    /// with unparsable names are logged and skipped. No ordering is applied.
    pub async fn list(&self, session: &UploadSession) -> io::Result<Option<Vec<StoredChunk>>> {
        let dir = self.path_for(session);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let mut chunks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(dir = %dir.display(), "skipping non UTF-8 entry in session directory");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let record = match ChunkRecord::parse(name) {
                Ok(record) => record,
                Err(err) => {
                    warn!(dir = %dir.display(), entry = name, "skipping unrecognised entry: {}", err);
                    continue;
                }
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            chunks.push(StoredChunk {
                record,
                len: meta.len(),
            });
        }
        Ok(Some(chunks))
    }

    /// Delete one chunk blob; a blob that is already gone is not an error.
    pub async fn remove_chunk(&self, session: &UploadSession, record: &ChunkRecord) -> io::Result<()> {
        let path = self.chunk_path(session, record);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("chunk {} already removed", path.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Remove the (empty) session directory; a missing directory is not an error.
    pub async fn remove(&self, session: &UploadSession) -> io::Result<()> {
        let dir = self.path_for(session);
        match fs::remove_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("session directory {} already removed", dir.display());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Recursively remove the session directory and whatever is left in it.
    pub async fn remove_all(&self, session: &UploadSession) -> io::Result<()> {
        match fs::remove_dir_all(self.path_for(session)).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Best-effort removal of a temp file.
pub async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!("failed to remove temp file {}: {}", path.display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn session() -> UploadSession {
        UploadSession::new("feedbeef", "clip.mp4").unwrap()
    }

    #[tokio::test]
    async fn list_missing_directory_is_none() {
        let tmp = TempDir::new().unwrap();
        let dirs = SessionDirectory::new(tmp.path());
        assert_eq!(dirs.list(&session()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let dirs = SessionDirectory::new(tmp.path());
        let first = dirs.ensure(&session()).await.unwrap();
        let second = dirs.ensure(&session()).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[tokio::test]
    async fn list_skips_dotfiles_and_garbage() {
        let tmp = TempDir::new().unwrap();
        let dirs = SessionDirectory::new(tmp.path());
        let dir = dirs.ensure(&session()).await.unwrap();
        std::fs::write(dir.join("c-0"), b"abcd").unwrap();
        std::fs::write(dir.join("c-1"), b"ef").unwrap();
        std::fs::write(dir.join(".tmp-123"), b"partial").unwrap();
        std::fs::write(dir.join("notes.txt"), b"??").unwrap();

        let mut chunks = dirs.list(&session()).await.unwrap().unwrap();
        chunks.sort_by_key(|c| c.record.ordinal);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].record.identifier, "c-0");
        assert_eq!(chunks[0].len, 4);
        assert_eq!(chunks[1].len, 2);
    }

    #[tokio::test]
    async fn session_directory_is_not_a_final_file() {
        let tmp = TempDir::new().unwrap();
        let dirs = SessionDirectory::new(tmp.path());
        let bare = UploadSession::new("feedbeef", "Makefile").unwrap();
        dirs.ensure(&bare).await.unwrap();
        assert_eq!(dirs.final_path(&bare), dirs.path_for(&bare));
        assert!(!dirs.final_exists(&bare).await.unwrap());
    }

    #[tokio::test]
    async fn removals_tolerate_missing_targets() {
        let tmp = TempDir::new().unwrap();
        let dirs = SessionDirectory::new(tmp.path());
        let record = ChunkRecord::parse("c-0").unwrap();
        dirs.remove_chunk(&session(), &record).await.unwrap();
        dirs.remove(&session()).await.unwrap();
        dirs.remove_all(&session()).await.unwrap();
    }

    #[tokio::test]
    async fn paths_follow_layout() {
        let dirs = SessionDirectory::new("/srv/uploads");
        let s = session();
        assert_eq!(dirs.path_for(&s), PathBuf::from("/srv/uploads/feedbeef"));
        assert_eq!(dirs.final_path(&s), PathBuf::from("/srv/uploads/feedbeef.mp4"));
        let tmp = dirs.merge_tmp_path(&s);
        let name = tmp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".merge-feedbeef-"));
        assert!(name.ends_with(".part"));
    }
}
