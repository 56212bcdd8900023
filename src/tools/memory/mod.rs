//! Memory tools for knowledge graph management.
//!
//! Provides tools for creating and querying entities, relations and
//! observations in a knowledge graph persisted to a single JSON file.

pub mod config;
pub mod error;
pub mod graph;
pub mod manager;
pub mod storage;

pub use config::MemoryConfig;
pub use error::MemoryError;
pub use graph::{Entity, ObservationInput, RelationInput};
pub use manager::KnowledgeGraphManager;
