//! Repository and branch directory entries.

use crate::ids::{BranchId, RepositoryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    pub branches: Vec<BranchId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    /// Back-reference only; a branch never owns its repository.
    pub repository_id: RepositoryId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
