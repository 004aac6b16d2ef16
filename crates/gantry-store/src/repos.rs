//! Repository/branch directory.

use async_trait::async_trait;
use chrono::Utc;
use gantry_core::ids::{BranchId, RepositoryId};
use gantry_core::ports::RepositoryDirectory;
use gantry_core::repo::{Branch, Repository};
use gantry_core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Default)]
struct Directory {
    repositories: HashMap<RepositoryId, Repository>,
    branches: HashMap<BranchId, Branch>,
}

/// In-memory repository/branch directory.
#[derive(Default)]
pub struct MemoryRepositoryDirectory {
    inner: RwLock<Directory>,
}

impl MemoryRepositoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryDirectory for MemoryRepositoryDirectory {
    async fn create_repository(&self, name: &str) -> Result<Repository> {
        let mut dir = self.inner.write().await;

        if dir.repositories.values().any(|r| r.name == name) {
            return Err(Error::RepositoryExists(name.to_string()));
        }

        let repository = Repository {
            id: RepositoryId::new(),
            name: name.to_string(),
            branches: vec![],
            created_at: Utc::now(),
        };
        info!(repository_id = %repository.id, name, "Repository created");
        dir.repositories.insert(repository.id, repository.clone());
        Ok(repository)
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let dir = self.inner.read().await;
        let mut repositories: Vec<_> = dir.repositories.values().cloned().collect();
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }

    async fn create_branch(&self, repository_id: RepositoryId, name: &str) -> Result<Branch> {
        let mut dir = self.inner.write().await;

        if !dir.repositories.contains_key(&repository_id) {
            return Err(Error::RepositoryNotFound(repository_id.to_string()));
        }
        let duplicate = dir
            .branches
            .values()
            .any(|b| b.repository_id == repository_id && b.name == name);
        if duplicate {
            return Err(Error::BranchExists {
                repository: repository_id.to_string(),
                name: name.to_string(),
            });
        }

        let branch = Branch {
            id: BranchId::new(),
            repository_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        dir.branches.insert(branch.id, branch.clone());
        if let Some(repository) = dir.repositories.get_mut(&repository_id) {
            repository.branches.push(branch.id);
        }
        Ok(branch)
    }

    async fn list_branches(&self, repository_id: RepositoryId) -> Result<Vec<Branch>> {
        let dir = self.inner.read().await;

        if !dir.repositories.contains_key(&repository_id) {
            return Err(Error::RepositoryNotFound(repository_id.to_string()));
        }

        let mut branches: Vec<_> = dir
            .branches
            .values()
            .filter(|b| b.repository_id == repository_id)
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_repository_and_branch_crud() {
        let directory = MemoryRepositoryDirectory::new();

        let repo = directory.create_repository("web-app").await.unwrap();
        let branch = directory.create_branch(repo.id, "main").await.unwrap();
        assert_eq!(branch.repository_id, repo.id);

        let repositories = directory.list_repositories().await.unwrap();
        assert_eq!(repositories.len(), 1);
        assert_eq!(repositories[0].branches, vec![branch.id]);

        let branches = directory.list_branches(repo.id).await.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "main");
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let directory = MemoryRepositoryDirectory::new();

        let repo = directory.create_repository("web-app").await.unwrap();
        directory.create_branch(repo.id, "main").await.unwrap();

        let err = directory.create_repository("web-app").await.unwrap_err();
        assert!(matches!(err, Error::RepositoryExists(_)));

        let err = directory.create_branch(repo.id, "main").await.unwrap_err();
        assert!(matches!(err, Error::BranchExists { .. }));
    }

    #[tokio::test]
    async fn test_branches_of_unknown_repository() {
        let directory = MemoryRepositoryDirectory::new();
        let err = directory
            .list_branches(RepositoryId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RepositoryNotFound(_)));
    }
}
