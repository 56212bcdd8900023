//! In-memory knowledge graph: entities keyed by name plus an append-only
//! relation list.
//!
//! Relation endpoints are plain names. Nothing checks that they refer to an
//! existing entity, so every read path has to cope with dangling references.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A named node with a free-form type label and ordered observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Entity {
    /// Unique, case-sensitive entity name
    pub name: String,
    /// Free-form category label (person, company, concept, ...)
    #[serde(rename = "entityType")]
    pub entity_type: String,
    /// Facts about the entity, in insertion order
    #[serde(default)]
    pub observations: Vec<String>,
}

/// A directed, typed edge between two entity names.
///
/// On disk the endpoints are stored as `from_entity` / `to_entity`; the short
/// names are accepted when reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    #[serde(rename = "from_entity", alias = "from")]
    pub from: String,
    #[serde(rename = "to_entity", alias = "to")]
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} -> {}", self.from, self.relation_type, self.to)
    }
}

/// Relation as supplied by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelationInput {
    /// Source entity name
    pub from: String,
    /// Target entity name
    pub to: String,
    /// Relation label in active voice (works_at, knows, ...)
    pub relation_type: String,
}

impl From<RelationInput> for Relation {
    fn from(input: RelationInput) -> Self {
        Self {
            from: input.from,
            to: input.to,
            relation_type: input.relation_type,
        }
    }
}

/// Observations to append to one entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationInput {
    /// Name of an existing entity
    pub entity_name: String,
    /// Observation strings to append
    pub contents: Vec<String>,
}

/// Per-entity outcome of an `add_observations` batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObservationOutcome {
    /// Entity exists; lists the strings that were actually appended.
    Added { observations: Vec<String> },
    EntityNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationResult {
    pub entity_name: String,
    #[serde(flatten)]
    pub outcome: ObservationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub matched_entities: Vec<Entity>,
    pub related_relations: Vec<Relation>,
    pub total_matches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub total_entities: usize,
    pub total_relations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub summary: GraphSummary,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeGraph {
    entities: Vec<Entity>,
    // name -> position in `entities`
    index: HashMap<String, usize>,
    relations: Vec<Relation>,
}

impl KnowledgeGraph {
    /// Rebuild a graph from persisted records. A name that occurs more than
    /// once keeps its first position and takes the later record's content.
    pub fn from_parts(entities: Vec<Entity>, relations: Vec<Relation>) -> Self {
        let mut graph = Self {
            relations,
            ..Self::default()
        };
        for entity in entities {
            match graph.index.get(&entity.name) {
                Some(&pos) => graph.entities[pos] = entity,
                None => graph.insert(entity),
            }
        }
        graph
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    #[cfg(test)]
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.index.get(name).map(|&pos| &self.entities[pos])
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            total_entities: self.entities.len(),
            total_relations: self.relations.len(),
        }
    }

    /// Insert every entity whose name is not taken yet. Returns the names that
    /// were created, in input order.
    pub fn create_entities(&mut self, items: Vec<Entity>) -> Vec<String> {
        let mut created = Vec::new();
        for mut entity in items {
            if self.index.contains_key(&entity.name) {
                continue;
            }
            entity.observations = dedup_preserving_order(entity.observations);
            created.push(entity.name.clone());
            self.insert(entity);
        }
        created
    }

    /// Append relations that are not already present (exact triple match,
    /// including ones appended earlier in the same batch).
    pub fn create_relations(&mut self, items: Vec<Relation>) -> Vec<String> {
        let mut created = Vec::new();
        for relation in items {
            if self.relations.contains(&relation) {
                continue;
            }
            created.push(relation.to_string());
            self.relations.push(relation);
        }
        created
    }

    pub fn add_observations(&mut self, items: Vec<ObservationInput>) -> Vec<ObservationResult> {
        let mut results: Vec<ObservationResult> = Vec::new();
        for item in items {
            let outcome = match self.index.get(&item.entity_name) {
                Some(&pos) => {
                    let observations = &mut self.entities[pos].observations;
                    let mut added = Vec::new();
                    for content in item.contents {
                        if !observations.contains(&content) {
                            observations.push(content.clone());
                            added.push(content);
                        }
                    }
                    ObservationOutcome::Added { observations: added }
                }
                None => ObservationOutcome::EntityNotFound,
            };

            // Keyed by entity name: a repeated name overwrites its earlier slot.
            match results.iter_mut().find(|r| r.entity_name == item.entity_name) {
                Some(existing) => existing.outcome = outcome,
                None => results.push(ObservationResult {
                    entity_name: item.entity_name,
                    outcome,
                }),
            }
        }
        results
    }

    /// Case-insensitive substring search over entity name, type and
    /// observations. Relations are only reported through a matched entity.
    pub fn search_nodes(&self, query: &str) -> SearchResult {
        let needle = query.to_lowercase();
        let mut matched_entities = Vec::new();
        let mut related_relations: Vec<Relation> = Vec::new();

        for entity in self.entities.iter().filter(|e| entity_matches(e, &needle)) {
            matched_entities.push(entity.clone());
            for relation in &self.relations {
                let touches = relation.from == entity.name || relation.to == entity.name;
                if touches && !related_relations.contains(relation) {
                    related_relations.push(relation.clone());
                }
            }
        }

        SearchResult {
            query: query.to_string(),
            total_matches: matched_entities.len(),
            matched_entities,
            related_relations,
        }
    }

    pub fn read_graph(&self) -> GraphSnapshot {
        GraphSnapshot {
            entities: self.entities.clone(),
            relations: self.relations.clone(),
            summary: self.summary(),
        }
    }

    fn insert(&mut self, entity: Entity) {
        self.index.insert(entity.name.clone(), self.entities.len());
        self.entities.push(entity);
    }
}

fn entity_matches(entity: &Entity, needle: &str) -> bool {
    entity.name.to_lowercase().contains(needle)
        || entity.entity_type.to_lowercase().contains(needle)
        || entity
            .observations
            .iter()
            .any(|obs| obs.to_lowercase().contains(needle))
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
