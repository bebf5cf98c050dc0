//! Core data models for the resumable chunk store.
//!
//! `UploadSession` and `ChunkRecord` describe what lives on disk; `api` holds
//! the JSON request/response bodies exchanged with upload clients.

pub mod api;
pub mod chunk;
pub mod session;
