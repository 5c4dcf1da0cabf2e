use std::io;
use std::path::{Component, Path, PathBuf};

use crossbeam::channel::Sender;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::{CatalogError, CatalogResult};

/// A candidate asset file found in the source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFile {
    /// File stem, used as the model name.
    pub name: String,
    pub path: PathBuf,
    /// Forward-slash locator stored in `models.url`.
    pub url: String,
}

impl AssetFile {
    pub fn from_path(path: &Path, cwd: &Path) -> Option<Self> {
        let name = path.file_stem()?.to_str()?.to_string();
        Some(Self {
            name,
            path: path.to_path_buf(),
            url: catalog_url(path, cwd),
        })
    }
}

/// The same file always maps to the same url however the root was spelled:
/// `.` components are dropped and paths under `cwd` become relative to it,
/// which is where payloads are resolved from.
pub fn catalog_url(path: &Path, cwd: &Path) -> String {
    let path = path.strip_prefix(cwd).unwrap_or(path);
    let mut url = String::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Prefix(prefix) => url.push_str(&prefix.as_os_str().to_string_lossy()),
            Component::RootDir => url.push('/'),
            Component::ParentDir => push_segment(&mut url, ".."),
            Component::Normal(segment) => push_segment(&mut url, &segment.to_string_lossy()),
        }
    }
    url
}

fn push_segment(url: &mut String, segment: &str) {
    if !url.is_empty() && !url.ends_with('/') {
        url.push('/');
    }
    url.push_str(segment);
}

/// Fails with [`CatalogError::SourceUnavailable`] unless `root` is a readable
/// directory.
pub fn ensure_source(root: &Path) -> CatalogResult<()> {
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CatalogError::SourceUnavailable {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, "not a directory"),
        }),
        Err(source) => Err(CatalogError::SourceUnavailable {
            path: root.to_path_buf(),
            source,
        }),
    }
}

/// Asset files directly under `root` whose extension matches `extension`
/// (case-insensitive), sorted by file name.
pub fn list_assets(root: &Path, extension: &str) -> CatalogResult<Vec<AssetFile>> {
    ensure_source(root)?;
    Ok(walk(root, extension).collect())
}

/// Streams assets into `tx`. Stops early if the receiver hangs up.
pub fn scan_directory(root: &Path, extension: &str, tx: Sender<AssetFile>) -> CatalogResult<usize> {
    ensure_source(root)?;
    let mut sent = 0;
    for asset in walk(root, extension) {
        if tx.send(asset).is_err() {
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

fn walk<'a>(root: &Path, extension: &'a str) -> impl Iterator<Item = AssetFile> + 'a {
    let cwd = std::env::current_dir().unwrap_or_default();
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(move |entry| entry.file_type().is_file() && has_extension(entry.path(), extension))
        .filter_map(move |entry| AssetFile::from_path(entry.path(), &cwd))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}
