//! Versioned pipeline definition store.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::ids::{PipelineId, RepositoryId};
use gantry_core::pipeline::{DefinitionSnapshot, Pipeline, PipelineDefinition};
use gantry_core::ports::DefinitionStore;
use gantry_core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

struct Record {
    pipeline: Pipeline,
    /// While held, `resolve` is rejected so a run never binds a version
    /// mid-edit.
    locked: bool,
}

/// In-memory definition store.
#[derive(Default)]
pub struct MemoryDefinitionStore {
    records: RwLock<HashMap<PipelineId, Record>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a YAML-authored definition and store it.
    pub async fn create_from_yaml(
        &self,
        repository_id: RepositoryId,
        yaml: &str,
        created_by: Option<String>,
    ) -> Result<Pipeline> {
        let definition: PipelineDefinition = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.create(repository_id, definition, created_by).await
    }

    fn validate(definition: &PipelineDefinition) -> Result<()> {
        if definition.stages.is_empty() {
            return Err(Error::EmptyPipeline(definition.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn create(
        &self,
        repository_id: RepositoryId,
        definition: PipelineDefinition,
        created_by: Option<String>,
    ) -> Result<Pipeline> {
        Self::validate(&definition)?;

        let now = Utc::now();
        let pipeline = Pipeline {
            id: PipelineId::new(),
            repository_id,
            version: 1,
            definition,
            created_by,
            created_at: now,
            updated_at: now,
        };

        info!(pipeline_id = %pipeline.id, name = %pipeline.definition.name, "Pipeline created");
        self.records.write().await.insert(
            pipeline.id,
            Record {
                pipeline: pipeline.clone(),
                locked: false,
            },
        );
        Ok(pipeline)
    }

    async fn get(&self, id: PipelineId) -> Result<Option<Pipeline>> {
        Ok(self.records.read().await.get(&id).map(|r| r.pipeline.clone()))
    }

    async fn list(&self, repository_id: RepositoryId) -> Result<Vec<Pipeline>> {
        let records = self.records.read().await;
        let mut pipelines: Vec<_> = records
            .values()
            .filter(|r| r.pipeline.repository_id == repository_id)
            .map(|r| r.pipeline.clone())
            .collect();
        pipelines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pipelines)
    }

    async fn update(
        &self,
        id: PipelineId,
        definition: PipelineDefinition,
        updated_by: Option<String>,
    ) -> Result<Pipeline> {
        Self::validate(&definition)?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;

        record.pipeline.version += 1;
        record.pipeline.definition = definition;
        record.pipeline.updated_at = Utc::now();
        if updated_by.is_some() {
            record.pipeline.created_by = updated_by;
        }

        info!(pipeline_id = %id, version = record.pipeline.version, "Pipeline updated");
        Ok(record.pipeline.clone())
    }

    async fn resolve(&self, id: PipelineId) -> Result<DefinitionSnapshot> {
        let records = self.records.read().await;
        let record = records
            .get(&id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;

        if record.locked {
            return Err(Error::DefinitionLocked(id.to_string()));
        }

        Ok(DefinitionSnapshot {
            pipeline_id: id,
            version: record.pipeline.version,
            definition: record.pipeline.definition.clone(),
            resolved_at: Utc::now(),
        })
    }

    async fn lock(&self, id: PipelineId) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;
        record.locked = true;
        Ok(())
    }

    async fn unlock(&self, id: PipelineId) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| Error::DefinitionNotFound(id.to_string()))?;
        record.locked = false;
        Ok(())
    }
}
