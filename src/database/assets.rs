use std::path::{Path, PathBuf};

use crate::database::repo::Catalog;
use crate::error::{CatalogError, CatalogResult};

pub const GLB_CONTENT_TYPE: &str = "model/gltf-binary";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetHandle {
    pub model_id: i64,
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("glb") => GLB_CONTENT_TYPE,
        Some("gltf") => "model/gltf+json",
        _ => "application/octet-stream",
    }
}

impl Catalog {
    /// Locates the payload of model `id`, with `url` taken relative to `root`.
    pub fn resolve_asset(&self, id: i64, root: &Path) -> CatalogResult<AssetHandle> {
        let model = self.model(id)?;
        let path = root.join(&model.url);
        if !path.is_file() {
            return Err(CatalogError::AssetMissing { path });
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model.name.clone());
        Ok(AssetHandle {
            model_id: model.id,
            content_type: content_type_for(&path),
            path,
            file_name,
        })
    }
}
