//! Gantry Store
//!
//! In-memory adapters for the persistence ports: the versioned pipeline
//! definition store and the repository/branch directory. Durable backends
//! live behind the same traits outside this workspace.

pub mod definitions;
pub mod repos;

pub use definitions::MemoryDefinitionStore;
pub use repos::MemoryRepositoryDirectory;
