//! Gantry Core
//!
//! Core domain types, traits, and error handling for the Gantry
//! orchestration engine. This crate has minimal dependencies and defines
//! the shared vocabulary used across all other crates.

pub mod agent;
pub mod error;
pub mod events;
pub mod ids;
pub mod logs;
pub mod pipeline;
pub mod ports;
pub mod repo;
pub mod run;

pub use error::{Error, Result};
pub use ids::*;
