//! Log and artifact types.

use crate::ids::{ArtifactId, JobId};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An append-only log fragment. Chunks for a job are totally ordered by
/// `seq` and immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LogChunk {
    pub job_id: JobId,
    pub seq: u64,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Artifact {
    pub id: ArtifactId,
    pub job_id: JobId,
    pub name: String,
    pub size_bytes: u64,
    /// Opaque handle into the external blob store.
    pub storage_handle: String,
    pub registered_at: DateTime<Utc>,
}

/// Metadata supplied when registering an artifact; binary storage is an
/// external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub storage_handle: String,
}
