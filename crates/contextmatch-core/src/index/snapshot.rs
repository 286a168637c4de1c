//! Taxonomy Snapshot
//!
//! Reads taxonomy snapshot files: a JSON array of category entries from
//! one or more ad-taxonomy sources. Entries carry text only; embeddings
//! and keyword sets are computed at load time by the pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{IndexError, Result};

/// One category entry as it appears in a taxonomy snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxonomyEntry {
    /// Category id; generated when the snapshot omits it
    #[serde(default)]
    pub id: String,
    /// Category name
    pub name: String,
    /// Category description
    #[serde(default)]
    pub description: String,
    /// Taxonomy source tag (e.g. "iab", "google")
    #[serde(default)]
    pub source: String,
    /// Curated keywords for the category
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Parent category id
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Depth in the taxonomy tree
    #[serde(default)]
    pub level: u32,
}

/// Read and validate a taxonomy snapshot file.
/// Entries without an id get a generated one.
pub fn read_taxonomy_snapshot(path: &Path) -> Result<Vec<TaxonomyEntry>> {
    let data = std::fs::read_to_string(path)?;
    let mut entries: Vec<TaxonomyEntry> = serde_json::from_str(&data)
        .map_err(|e| IndexError::Snapshot(format!("{}: {e}", path.display())))?;

    for entry in &mut entries {
        if entry.name.trim().is_empty() {
            return Err(IndexError::Snapshot(format!(
                "{}: entry with empty name",
                path.display()
            )));
        }
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
    }
    Ok(entries)
}

/// The text document embedded for a category: name, description, and
/// curated keywords, in that order
pub fn category_document(entry: &TaxonomyEntry) -> String {
    let mut doc = entry.name.clone();
    if !entry.description.is_empty() {
        doc.push(' ');
        doc.push_str(&entry.description);
    }
    for keyword in &entry.keywords {
        doc.push(' ');
        doc.push_str(keyword);
    }
    doc
}
