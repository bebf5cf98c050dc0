//! Core services of the chunk store.
//!
//! Everything here works on the local filesystem only and knows nothing
//! about HTTP; handlers translate requests into calls on these types.

pub mod chunk_receiver;
pub mod merge_engine;
pub mod reaper;
pub mod resume_verifier;
pub mod session_directory;
pub mod session_locks;
pub mod upload_service;
