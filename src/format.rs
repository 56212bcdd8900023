//! Plain-text rendering of memory operation results for tool responses.

use std::path::Path;

use crate::tools::memory::graph::{
    GraphSnapshot, GraphSummary, ObservationOutcome, ObservationResult, SearchResult,
};

pub fn created_entities(created: &[String]) -> String {
    if created.is_empty() {
        return "No new entities created (all names already exist)".to_string();
    }
    format!("✓ Created entities: {}", created.join(", "))
}

pub fn created_relations(created: &[String]) -> String {
    if created.is_empty() {
        return "No new relations created (all relations already exist)".to_string();
    }
    format!("✓ Created relations:\n{}", created.join("\n"))
}

pub fn added_observations(results: &[ObservationResult]) -> String {
    let mut lines = vec!["Added observations:".to_string()];
    for result in results {
        match &result.outcome {
            ObservationOutcome::Added { observations } if observations.is_empty() => {
                lines.push(format!("- {}: nothing new", result.entity_name));
            }
            ObservationOutcome::Added { observations } => {
                lines.push(format!("- {}: {}", result.entity_name, observations.join(", ")));
            }
            ObservationOutcome::EntityNotFound => {
                lines.push(format!("❌ {}: entity not found", result.entity_name));
            }
        }
    }
    lines.join("\n")
}

pub fn search_result(result: &SearchResult) -> String {
    if result.total_matches == 0 {
        return format!("No results for '{}'", result.query);
    }

    let mut out = format!("Results for '{}' ({}):\n\n", result.query, result.total_matches);
    for entity in &result.matched_entities {
        out.push_str(&format!("{} ({})\n", entity.name, entity.entity_type));
        out.push_str(&format!("   observations: {}\n\n", entity.observations.join(", ")));
    }

    if !result.related_relations.is_empty() {
        out.push_str("Related relations:\n");
        for relation in &result.related_relations {
            out.push_str(&format!("   {}\n", relation));
        }
    }
    out
}

pub fn graph_snapshot(snapshot: &GraphSnapshot) -> String {
    let mut out = format!(
        "Memory graph ({} entities, {} relations)\n",
        snapshot.summary.total_entities, snapshot.summary.total_relations
    );

    if !snapshot.entities.is_empty() {
        out.push_str("\nEntities:\n");
        for entity in &snapshot.entities {
            out.push_str(&format!("  • {} ({})\n", entity.name, entity.entity_type));
            if !entity.observations.is_empty() {
                out.push_str(&format!("    observations: {}\n", entity.observations.join(", ")));
            }
        }
    }

    if !snapshot.relations.is_empty() {
        out.push_str("\nRelations:\n");
        for relation in &snapshot.relations {
            out.push_str(&format!("  • {}\n", relation));
        }
    }
    out
}

pub fn status(summary: &GraphSummary, storage_path: &Path, now: &str) -> String {
    format!(
        "Current time: {}\nStored entities: {}\nStored relations: {}\nMemory file: {}\n",
        now,
        summary.total_entities,
        summary.total_relations,
        storage_path.display()
    )
}
