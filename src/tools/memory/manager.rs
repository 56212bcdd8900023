//! Shared, persistent handle to the knowledge graph.
//!
//! Each mutating call runs validate, mutate and save under one write lock, so
//! two callers can never interleave between the in-memory change and the
//! full-file rewrite that follows it.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::config::{MemoryConfig, SavePolicy};
use super::error::MemoryError;
use super::graph::{
    Entity, GraphSnapshot, GraphSummary, KnowledgeGraph, ObservationInput, ObservationResult,
    Relation, RelationInput, SearchResult,
};
use super::storage::JsonStorage;

/// An empty key is treated as a missing field. Any other string is a valid
/// name, whitespace and control characters included.
fn require_non_empty(value: &str, field: &'static str) -> Result<(), MemoryError> {
    if value.is_empty() {
        return Err(MemoryError::invalid(field, "is required and cannot be empty"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct KnowledgeGraphManager {
    graph: Arc<RwLock<KnowledgeGraph>>,
    storage: Arc<JsonStorage>,
    save_policy: SavePolicy,
}

impl KnowledgeGraphManager {
    /// Load the graph from the configured file. A load failure is logged and
    /// the manager starts with an empty graph.
    pub async fn open(config: &MemoryConfig) -> Self {
        let storage = JsonStorage::new(config.storage_path.clone());
        let graph = match storage.load().await {
            Ok(graph) => {
                let summary = graph.summary();
                info!(
                    "Loaded memory graph from {} ({} entities, {} relations)",
                    storage.path().display(),
                    summary.total_entities,
                    summary.total_relations
                );
                graph
            }
            Err(err) => {
                warn!("Failed to load memory graph, starting empty: {:#}", err);
                KnowledgeGraph::default()
            }
        };

        Self {
            graph: Arc::new(RwLock::new(graph)),
            storage: Arc::new(storage),
            save_policy: config.save_policy,
        }
    }

    pub fn storage_path(&self) -> &Path {
        self.storage.path()
    }

    pub async fn create_entities(&self, entities: Vec<Entity>) -> Result<Vec<String>, MemoryError> {
        for entity in &entities {
            require_non_empty(&entity.name, "Entity name")?;
        }

        let mut graph = self.graph.write().await;
        let created = graph.create_entities(entities);
        debug!("Created {} entities", created.len());
        self.persist(&graph).await?;
        Ok(created)
    }

    pub async fn create_relations(
        &self,
        relations: Vec<RelationInput>,
    ) -> Result<Vec<String>, MemoryError> {
        for rel in &relations {
            require_non_empty(&rel.from, "Relation 'from'")?;
            require_non_empty(&rel.to, "Relation 'to'")?;
            require_non_empty(&rel.relation_type, "Relation type")?;
        }

        let mut graph = self.graph.write().await;
        let created = graph.create_relations(relations.into_iter().map(Relation::from).collect());
        debug!("Created {} relations", created.len());
        self.persist(&graph).await?;
        Ok(created)
    }

    pub async fn add_observations(
        &self,
        inputs: Vec<ObservationInput>,
    ) -> Result<Vec<ObservationResult>, MemoryError> {
        let mut graph = self.graph.write().await;
        let results = graph.add_observations(inputs);
        self.persist(&graph).await?;
        Ok(results)
    }

    pub async fn search_nodes(&self, query: &str) -> SearchResult {
        self.graph.read().await.search_nodes(query)
    }

    pub async fn read_graph(&self) -> GraphSnapshot {
        self.graph.read().await.read_graph()
    }

    pub async fn summary(&self) -> GraphSummary {
        self.graph.read().await.summary()
    }

    async fn persist(&self, graph: &KnowledgeGraph) -> Result<(), MemoryError> {
        let Err(err) = self.storage.save(graph).await else {
            return Ok(());
        };
        match self.save_policy {
            SavePolicy::Lossy => {
                error!("Memory graph not persisted, keeping in-memory change: {:#}", err);
                Ok(())
            }
            SavePolicy::Strict => Err(MemoryError::Persistence {
                path: self.storage.path().to_path_buf(),
                source: err,
            }),
        }
    }
}
