use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::ingest::seeder::SeedOptions;
use crate::ingest::sidecar::Classification;

const KEY_DB: &str = "MODELSHELF_DB";
const KEY_ASSETS: &str = "MODELSHELF_ASSETS";
const KEY_EXTENSION: &str = "MODELSHELF_EXTENSION";
const KEY_DEFAULT_CATEGORY: &str = "MODELSHELF_DEFAULT_CATEGORY";
const KEY_DEFAULT_SUBCATEGORY: &str = "MODELSHELF_DEFAULT_SUBCATEGORY";
const KEY_TX_TIMEOUT_MS: &str = "MODELSHELF_TX_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub database: PathBuf,
    pub assets_dir: PathBuf,
    pub extension: String,
    pub default_category: String,
    pub default_subcategory: String,
    pub transaction_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("catalog.db"),
            assets_dir: PathBuf::from("static"),
            extension: "glb".to_string(),
            default_category: "Otros".to_string(),
            default_subcategory: "Otros".to_string(),
            transaction_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn seed_options(&self, show_progress: bool) -> SeedOptions {
        SeedOptions {
            extension: self.extension.clone(),
            default_classification: Classification::new(
                self.default_category.clone(),
                self.default_subcategory.clone(),
            ),
            transaction_timeout: self.transaction_timeout(),
            show_progress,
        }
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key.trim() {
            KEY_DB => self.database = PathBuf::from(value),
            KEY_ASSETS => self.assets_dir = PathBuf::from(value),
            KEY_EXTENSION => self.extension = value.trim_start_matches('.').to_string(),
            KEY_DEFAULT_CATEGORY => self.default_category = value.to_string(),
            KEY_DEFAULT_SUBCATEGORY => self.default_subcategory = value.to_string(),
            KEY_TX_TIMEOUT_MS => {
                self.transaction_timeout_ms = value
                    .parse()
                    .with_context(|| format!("Invalid {}: '{}'", KEY_TX_TIMEOUT_MS, value))?
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_all<I, K, V>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in pairs {
            self.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(())
    }
}

/// Defaults, then the `.env` file at `env_path` if present, then process
/// environment variables.
pub fn load_settings(env_path: &Path) -> Result<Settings> {
    let mut settings = Settings::default();

    if env_path.exists() {
        let pairs = load_from_env(env_path)?;
        settings.apply_all(pairs)?;
        info!("Loaded settings from {:?}", env_path);
    }

    settings.apply_all(std::env::vars().filter(|(k, _)| k.starts_with("MODELSHELF_")))?;
    Ok(settings)
}

fn load_from_env(path: &Path) -> Result<Vec<(String, String)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader = BufReader::new(file);

    let mut pairs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(pairs)
}

pub fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).context("Failed to create .env file")?;
    writeln!(file, "{}={}", KEY_DB, settings.database.display())?;
    writeln!(file, "{}={}", KEY_ASSETS, settings.assets_dir.display())?;
    writeln!(file, "{}={}", KEY_EXTENSION, settings.extension)?;
    writeln!(file, "{}={}", KEY_DEFAULT_CATEGORY, settings.default_category)?;
    writeln!(file, "{}={}", KEY_DEFAULT_SUBCATEGORY, settings.default_subcategory)?;
    writeln!(file, "{}={}", KEY_TX_TIMEOUT_MS, settings.transaction_timeout_ms)?;
    Ok(())
}
