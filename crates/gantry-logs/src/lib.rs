//! Gantry Log/Artifact Sink
//!
//! In-memory implementation of the core `LogSink` port: per-job append-only
//! log channels with offset-restartable tailing, plus an artifact metadata
//! registry. Binary artifact storage is an external collaborator.

pub mod artifacts;
pub mod sink;

pub use sink::MemoryLogSink;
