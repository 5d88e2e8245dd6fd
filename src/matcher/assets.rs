use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{GridSize, IconAssets, IconItem};
use image::RgbaImage;

/// Optional `item.json` next to the variant templates.
#[derive(Debug, Default, Deserialize)]
struct ItemManifest {
    #[serde(default)]
    grid: GridSize,
}

/// Icon library on disk.
///
/// Layout: `<root>/<program>/<item>/*.png`, one file per variant in file-name order.
/// An `item.json` of the form `{ "grid": { "width": 2, "height": 1 } }` may declare
/// how many cells the item covers; it defaults to one cell.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn item_dir(&self, program: &str, item: &str) -> PathBuf {
        self.root.join(program).join(item)
    }

    fn variant_files(dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect();
        files.sort();
        files
    }

    fn manifest(dir: &Path) -> ItemManifest {
        let path = dir.join("item.json");
        let Ok(text) = fs::read_to_string(&path) else {
            return ItemManifest::default();
        };
        serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!(target: "macrotree::assets", path = %path.display(), error = %e, "ignoring malformed item manifest");
            ItemManifest::default()
        })
    }
}

impl IconAssets for DirectoryAssets {
    fn item(&self, program: &str, item: &str) -> Option<IconItem> {
        let dir = self.item_dir(program, item);
        if !dir.is_dir() {
            debug!(target: "macrotree::assets", dir = %dir.display(), "item directory missing");
            return None;
        }
        Some(IconItem {
            grid: Self::manifest(&dir).grid,
            variants: Self::variant_files(&dir).len(),
        })
    }

    fn template(&self, program: &str, item: &str, variant: usize) -> Option<RgbaImage> {
        let files = Self::variant_files(&self.item_dir(program, item));
        let path = files.get(variant)?;
        match image::open(path) {
            Ok(img) => Some(img.to_rgba8()),
            Err(e) => {
                warn!(target: "macrotree::assets", path = %path.display(), error = %e, "failed to decode template");
                None
            }
        }
    }
}
