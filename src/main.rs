mod database;
mod error;
mod ingest;
mod utils;

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use crate::database::query::{parse_model_id, ModelDetail, ModelQuery, ModelSummary};
use crate::database::repo::Catalog;
use crate::error::{CatalogError, CatalogResult, ErrorBody};
use crate::ingest::{seeder, sync};
use crate::utils::config::{self, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Catalog of 3D model assets", long_about = None)]
struct Args {
    /// key=value settings file
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    #[arg(short, long)]
    db_path: Option<PathBuf>,

    #[arg(short, long)]
    assets_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest assets with their sidecar classification
    Seed {
        #[arg(long)]
        no_progress: bool,
    },
    /// Add bare models for asset files not yet cataloged
    Sync,
    /// List models, optionally filtered
    List(ListArgs),
    /// Show a single model
    Show {
        id: String,
        #[arg(long)]
        expand: bool,
    },
    /// Write a model's binary payload to stdout or a file
    Fetch {
        id: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List categories
    Categories,
    /// Show a single category
    Category { id: i64 },
    /// List the subcategories of a category
    Subcategories { category_id: i64 },
    /// Print effective settings
    Config {
        /// Persist them to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[derive(ClapArgs, Debug)]
struct ListArgs {
    #[arg(long)]
    page: Option<String>,
    #[arg(long)]
    page_size: Option<String>,
    /// Comma-separated category ids
    #[arg(long)]
    categories: Option<String>,
    /// Comma-separated subcategory ids; takes precedence over --categories
    #[arg(long)]
    subcategories: Option<String>,
    /// Resolve category and subcategory ids to full rows
    #[arg(long)]
    expand: bool,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();
    let args = Args::parse();

    let mut settings = config::load_settings(&args.env_file)?;
    if let Some(db_path) = args.db_path {
        settings.database = db_path;
    }
    if let Some(assets_dir) = args.assets_dir {
        settings.assets_dir = assets_dir;
    }

    match args.command {
        Command::Config { save } => {
            if save {
                config::save_to_env(&args.env_file, &settings)?;
                info!("Saved settings to {:?}", args.env_file);
            }
            print_json(&settings)
        }
        command => run(command, &settings),
    }
}

/// The catalog is dropped here, before the exit status reaches `main`.
fn run(command: Command, settings: &Settings) -> Result<ExitCode> {
    let mut catalog = Catalog::open(&settings.database)
        .with_context(|| format!("Failed to open catalog {:?}", settings.database))?;

    match command {
        Command::Seed { no_progress } => {
            info!("Seeding from {:?} into {:?}", settings.assets_dir, settings.database);
            let report = seeder::seed(
                &mut catalog,
                &settings.assets_dir,
                &settings.seed_options(!no_progress),
            )
            .context("Seeding aborted")?;
            print_json(&report)
        }
        Command::Sync => {
            let outcome = sync::sync_from_assets(
                &mut catalog,
                &settings.assets_dir,
                &settings.extension,
                settings.transaction_timeout(),
            )
            .context("Sync aborted")?;
            info!("{}", outcome.message(&settings.extension));
            print_json(&outcome)
        }
        Command::List(list) => {
            let query = ModelQuery::from_raw(
                list.page.as_deref(),
                list.page_size.as_deref(),
                list.categories.as_deref(),
                list.subcategories.as_deref(),
            );
            if list.expand {
                respond(catalog.list_models_expanded(&query))
            } else {
                respond(catalog.list_models(&query))
            }
        }
        Command::Show { id, expand } => respond(parse_model_id(&id).and_then(|id| {
            if expand {
                catalog.get_model_expanded(id).map(ModelView::Detail)
            } else {
                catalog.get_model(id).map(ModelView::Summary)
            }
        })),
        Command::Fetch { id, out } => {
            let root = std::env::current_dir()?;
            let handle = match parse_model_id(&id).and_then(|id| catalog.resolve_asset(id, &root)) {
                Ok(handle) => handle,
                Err(e) => return fail(&e),
            };
            info!(
                "Serving model {} ({}) as {}",
                handle.model_id, handle.file_name, handle.content_type
            );

            let mut source = File::open(&handle.path)
                .with_context(|| format!("Failed to open {:?}", handle.path))?;
            let copied = match out {
                Some(path) => io::copy(&mut source, &mut File::create(&path)?)?,
                None => {
                    let stdout = io::stdout();
                    let mut lock = stdout.lock();
                    let n = io::copy(&mut source, &mut lock)?;
                    lock.flush()?;
                    n
                }
            };
            info!("Wrote {} bytes", copied);
            Ok(ExitCode::SUCCESS)
        }
        Command::Categories => respond(catalog.list_categories()),
        Command::Category { id } => respond(catalog.category(id)),
        Command::Subcategories { category_id } => respond(catalog.list_subcategories(category_id)),
        Command::Config { .. } => print_json(settings),
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum ModelView {
    Summary(ModelSummary),
    Detail(ModelDetail),
}

fn print_json<T: Serialize>(value: &T) -> Result<ExitCode> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(ExitCode::SUCCESS)
}

fn respond<T: Serialize>(result: CatalogResult<T>) -> Result<ExitCode> {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => fail(&e),
    }
}

/// Prints the structured error; the exit status depends on its kind.
fn fail(err: &CatalogError) -> Result<ExitCode> {
    let body = ErrorBody::from_error(err);
    print_json(&body)?;
    Ok(ExitCode::from(body.kind.exit_code()))
}
