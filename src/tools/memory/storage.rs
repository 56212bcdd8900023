//! JSON file storage backend for the knowledge graph.
//!
//! The whole graph is one document. Every save rewrites it completely, going
//! through a sibling temp file so readers never observe a truncated file.

use super::graph::{Entity, KnowledgeGraph, Relation};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const DEFAULT_STORAGE_FILE: &str = "memory.json";

#[derive(Deserialize)]
struct GraphFile {
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    relations: Vec<Relation>,
}

#[derive(Serialize)]
struct GraphFileRef<'a> {
    entities: &'a [Entity],
    relations: &'a [Relation],
}

pub struct JsonStorage {
    path: PathBuf,
}

impl JsonStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the graph. A missing file is an empty graph; anything unreadable
    /// or malformed is an error for the caller to decide on.
    pub async fn load(&self) -> Result<KnowledgeGraph> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(KnowledgeGraph::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let file: GraphFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(KnowledgeGraph::from_parts(file.entities, file.relations))
    }

    pub async fn save(&self, graph: &KnowledgeGraph) -> Result<()> {
        let doc = GraphFileRef {
            entities: graph.entities(),
            relations: graph.relations(),
        };
        // serde_json leaves non-ASCII characters unescaped
        let mut json = serde_json::to_string_pretty(&doc).context("Failed to serialize graph")?;
        json.push('\n');

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp_path = temp_path(&self.path);
        fs::write(&tmp_path, json.as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err)
                .with_context(|| format!("Failed to move temp file into {}", self.path.display()));
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
