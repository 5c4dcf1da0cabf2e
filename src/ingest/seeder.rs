use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam::channel::bounded;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::database::repo::{self, Catalog, NewModel};
use crate::database::taxonomy;
use crate::error::{CatalogError, CatalogResult};
use crate::ingest::scanner::{self, AssetFile};
use crate::ingest::sidecar::{self, Classification, Sidecar};

const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub extension: String,
    /// Used when an asset has no sidecar.
    pub default_classification: Classification,
    pub transaction_timeout: Duration,
    pub show_progress: bool,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            extension: "glb".to_string(),
            default_classification: Classification::new("Otros", "Otros"),
            transaction_timeout: Duration::from_secs(5),
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AssetStatus {
    #[serde(rename_all = "camelCase")]
    Ingested {
        model_id: i64,
        category: String,
        subcategory: String,
        category_id: i64,
        subcategory_id: i64,
    },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetOutcome {
    pub name: String,
    pub url: String,
    #[serde(flatten)]
    pub status: AssetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<AssetOutcome>,
}

impl IngestReport {
    fn record(&mut self, outcome: AssetOutcome) {
        match outcome.status {
            AssetStatus::Ingested { .. } => self.ingested += 1,
            AssetStatus::Skipped { .. } => self.skipped += 1,
            AssetStatus::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}

struct Candidate {
    asset: AssetFile,
    sidecar: Sidecar,
}

/// Ingests every asset under `root`. Only an unusable `root` fails the run.
///
/// Scanner thread and sidecar loader thread feed the writer on the caller's
/// thread over bounded channels. Each asset commits or rolls back on its own.
pub fn seed(catalog: &mut Catalog, root: &Path, opts: &SeedOptions) -> CatalogResult<IngestReport> {
    scanner::ensure_source(root)?;
    info!("Scanning {:?} for .{} files", root, opts.extension);

    let progress = if opts.show_progress {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };

    let (asset_tx, asset_rx) = bounded::<AssetFile>(QUEUE_DEPTH);
    let (candidate_tx, candidate_rx) = bounded::<Candidate>(QUEUE_DEPTH);
    let mut report = IngestReport::default();

    thread::scope(|s| {
        s.spawn(move || match scanner::scan_directory(root, &opts.extension, asset_tx) {
            Ok(n) => info!("Scanner found {} assets", n),
            Err(e) => error!("Scanner failed: {}", e),
        });

        s.spawn(move || {
            for asset in asset_rx {
                let sidecar = sidecar::read_sidecar(&asset.path);
                if candidate_tx.send(Candidate { asset, sidecar }).is_err() {
                    break;
                }
            }
        });

        for candidate in candidate_rx {
            progress.set_message(candidate.asset.name.clone());
            let outcome = ingest_one(catalog, candidate, opts);
            report.record(outcome);
            progress.inc(1);
        }
    });
    progress.finish_and_clear();

    if report.outcomes.is_empty() {
        info!("No .{} files found in {:?}", opts.extension, root);
    }
    info!(
        "Seeding finished: {} ingested, {} skipped, {} failed",
        report.ingested, report.skipped, report.failed
    );
    Ok(report)
}

fn ingest_one(catalog: &mut Catalog, candidate: Candidate, opts: &SeedOptions) -> AssetOutcome {
    let Candidate { asset, sidecar } = candidate;

    let classification = match sidecar {
        Sidecar::Present(c) => c,
        Sidecar::Absent => {
            info!(
                "No sidecar for '{}', using {} > {}",
                asset.name,
                opts.default_classification.category,
                opts.default_classification.subcategory
            );
            opts.default_classification.clone()
        }
        Sidecar::Malformed(reason) => {
            let err = CatalogError::Asset {
                name: asset.name.clone(),
                reason,
            };
            warn!("Skipping: {}", err);
            return outcome(asset, AssetStatus::Skipped { reason: err.to_string() });
        }
    };

    let result = catalog.with_transaction(&asset.name, opts.transaction_timeout, |tx| {
        if repo::find_model_by_url(tx, &asset.url)?.is_some() {
            return Ok(None);
        }
        let model = repo::insert_model(
            tx,
            &NewModel {
                name: asset.name.clone(),
                url: asset.url.clone(),
            },
        )?;
        let ids = taxonomy::resolve(tx, &classification.category, &classification.subcategory)?;
        repo::link_category(tx, model.id, ids.category_id)?;
        repo::link_subcategory(tx, model.id, ids.subcategory_id)?;
        Ok(Some((model.id, ids)))
    });

    match result {
        Ok(Some((model_id, ids))) => {
            info!(
                "Model '{}' [{} > {}] inserted",
                asset.name, classification.category, classification.subcategory
            );
            outcome(
                asset,
                AssetStatus::Ingested {
                    model_id,
                    category: classification.category,
                    subcategory: classification.subcategory,
                    category_id: ids.category_id,
                    subcategory_id: ids.subcategory_id,
                },
            )
        }
        Ok(None) => {
            info!("Model '{}' already cataloged at {}", asset.name, asset.url);
            outcome(
                asset,
                AssetStatus::Skipped {
                    reason: "already cataloged".to_string(),
                },
            )
        }
        Err(e) => {
            error!("Transaction failed for model '{}': {}", asset.name, e);
            outcome(asset, AssetStatus::Failed { reason: e.to_string() })
        }
    }
}

fn outcome(asset: AssetFile, status: AssetStatus) -> AssetOutcome {
    AssetOutcome {
        name: asset.name,
        url: asset.url,
        status,
    }
}
