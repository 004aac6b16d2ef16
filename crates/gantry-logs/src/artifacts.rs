//! Artifact metadata registry.

use chrono::Utc;
use gantry_core::ids::{ArtifactId, JobId};
use gantry_core::logs::{Artifact, ArtifactDescriptor};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Per-job artifact metadata. The storage handle is opaque; bytes live in
/// an external blob store.
#[derive(Default)]
pub struct ArtifactRegistry {
    entries: RwLock<HashMap<JobId, Vec<Artifact>>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, job_id: JobId, descriptor: ArtifactDescriptor) -> Artifact {
        let artifact = Artifact {
            id: ArtifactId::new(),
            job_id,
            name: descriptor.name,
            size_bytes: descriptor.size_bytes,
            storage_handle: descriptor.storage_handle,
            registered_at: Utc::now(),
        };
        self.entries
            .write()
            .await
            .entry(job_id)
            .or_default()
            .push(artifact.clone());
        artifact
    }

    pub async fn list(&self, job_id: JobId) -> Vec<Artifact> {
        self.entries
            .read()
            .await
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ArtifactRegistry::new();
        let job_id = JobId::new();

        let artifact = registry
            .register(
                job_id,
                ArtifactDescriptor {
                    name: "app.tar.gz".into(),
                    size_bytes: 1024,
                    storage_handle: "blob://builds/app.tar.gz".into(),
                },
            )
            .await;

        assert_eq!(artifact.job_id, job_id);

        let listed = registry.list(job_id).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "app.tar.gz");
    }

    #[tokio::test]
    async fn test_list_unknown_job_is_empty() {
        let registry = ArtifactRegistry::new();
        assert!(registry.list(JobId::new()).await.is_empty());
    }
}
