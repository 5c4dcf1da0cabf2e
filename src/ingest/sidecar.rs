use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub subcategory: String,
}

impl Classification {
    pub fn new(category: impl Into<String>, subcategory: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sidecar {
    Present(Classification),
    /// No sidecar file; the caller applies its default classification.
    Absent,
    Malformed(String),
}

#[derive(Deserialize)]
struct RawSidecar {
    category: Option<String>,
    subcategory: Option<String>,
}

pub fn sidecar_path(asset: &Path) -> PathBuf {
    asset.with_extension("json")
}

pub fn read_sidecar(asset: &Path) -> Sidecar {
    match std::fs::read_to_string(sidecar_path(asset)) {
        Ok(text) => parse_sidecar(&text),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Sidecar::Absent,
        Err(e) => Sidecar::Malformed(format!("unreadable sidecar: {}", e)),
    }
}

pub fn parse_sidecar(text: &str) -> Sidecar {
    let raw: RawSidecar = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(e) => return Sidecar::Malformed(format!("invalid JSON: {}", e)),
    };
    match (non_empty(raw.category), non_empty(raw.subcategory)) {
        (Some(category), Some(subcategory)) => Sidecar::Present(Classification {
            category,
            subcategory,
        }),
        (None, _) => Sidecar::Malformed("missing category".to_string()),
        (_, None) => Sidecar::Malformed("missing subcategory".to_string()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
