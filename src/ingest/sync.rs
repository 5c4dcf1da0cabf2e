use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::database::query::ModelSummary;
use crate::database::repo::{self, Catalog, NewModel};
use crate::error::CatalogResult;
use crate::ingest::scanner;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// The directory holds no asset files at all.
    NoAssets,
    AlreadyInSync,
    Synced {
        created: usize,
        models: Vec<ModelSummary>,
    },
}

impl SyncOutcome {
    pub fn message(&self, extension: &str) -> String {
        match self {
            SyncOutcome::NoAssets => format!("No .{} files found", extension),
            SyncOutcome::AlreadyInSync => "All models are already in sync with the database.".to_string(),
            SyncOutcome::Synced { created, .. } => format!("Successfully synced {} new models.", created),
        }
    }
}

pub fn sync_from_assets(
    catalog: &mut Catalog,
    root: &Path,
    extension: &str,
    budget: Duration,
) -> CatalogResult<SyncOutcome> {
    let assets = scanner::list_assets(root, extension)?;
    if assets.is_empty() {
        return Ok(SyncOutcome::NoAssets);
    }

    let existing = catalog.existing_urls()?;
    let fresh: Vec<NewModel> = assets
        .into_iter()
        .filter(|asset| !existing.contains(&asset.url))
        .map(|asset| NewModel {
            name: asset.name,
            url: asset.url,
        })
        .collect();

    if fresh.is_empty() {
        return Ok(SyncOutcome::AlreadyInSync);
    }

    let inserted = catalog.with_transaction("sync", budget, |tx| {
        fresh
            .iter()
            .map(|model| repo::insert_model(tx, model))
            .collect::<CatalogResult<Vec<_>>>()
    })?;
    info!("Synced {} new models from {:?}", inserted.len(), root);

    let models: Vec<ModelSummary> = inserted
        .into_iter()
        .map(|m| ModelSummary {
            id: m.id,
            name: m.name,
            url: m.url,
            categories: Vec::new(),
            subcategories: Vec::new(),
        })
        .collect();
    Ok(SyncOutcome::Synced {
        created: models.len(),
        models,
    })
}
