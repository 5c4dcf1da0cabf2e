use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("invalid input: {0}")]
    Validation(String),

    /// Insert-then-reread found no row. The store invariant is broken and the
    /// enclosing transaction must abort.
    #[error("taxonomy resolution failed: {0}")]
    TaxonomyResolution(String),

    #[error("asset source {path:?} unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("asset '{name}': {reason}")]
    Asset { name: String, reason: String },

    #[error("asset file missing at {path:?}")]
    AssetMissing { path: PathBuf },

    #[error("transaction for '{name}' exceeded its time budget")]
    Timeout { name: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Internal,
}

impl ErrorKind {
    /// Process exit status for a command that failed with this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::NotFound => 2,
            ErrorKind::Validation => 3,
            ErrorKind::Internal => 1,
        }
    }
}

/// Structured error handed to callers. Internal failures never carry the
/// underlying cause; it goes to the log instead.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub error: String,
}

impl ErrorBody {
    pub fn from_error(err: &CatalogError) -> Self {
        match err {
            CatalogError::NotFound { entity, .. } => Self {
                kind: ErrorKind::NotFound,
                error: format!("{} not found", capitalize(entity)),
            },
            CatalogError::AssetMissing { path } => {
                error!("File not found at path: {:?}. DB might be out of sync.", path);
                Self {
                    kind: ErrorKind::NotFound,
                    error: "File not found on server".to_string(),
                }
            }
            CatalogError::Validation(msg) => Self {
                kind: ErrorKind::Validation,
                error: msg.clone(),
            },
            other => {
                error!("Catalog operation failed: {:?}", other);
                Self {
                    kind: ErrorKind::Internal,
                    error: "An internal server error occurred".to_string(),
                }
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
