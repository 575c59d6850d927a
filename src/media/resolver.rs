//! Resolves the image references of a row to local files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::models::Record;

/// Maximum number of images attached to one request.
pub const MAX_IMAGES: usize = 3;

/// Directory names that mark a platform data tree inside the project.
const PLATFORM_DIRS: &[&str] = &["tiktok", "twitter"];

/// Directory holding merged cross-platform tables.
const ANALYSIS_DIR: &str = "analysis";

/// How to cut a list of images down to the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Keep the first N (key frames are already ordered to be representative).
    Prefix,
    /// Uniform sample without replacement, original order preserved.
    Sample,
}

/// A source column holding image references and how to select from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageColumn {
    pub name: &'static str,
    pub selection: Selection,
}

impl ImageColumn {
    pub const KEY_FRAMES: ImageColumn = ImageColumn {
        name: "key_frames",
        selection: Selection::Prefix,
    };

    pub const ALL_IMAGES: ImageColumn = ImageColumn {
        name: "all_images",
        selection: Selection::Sample,
    };
}

/// Images selected for one row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// Existing files, at most the resolver's cap.
    pub paths: Vec<PathBuf>,
    /// How many distinct references the row declared.
    pub declared: usize,
}

impl ResolvedMedia {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether some declared images were not attached.
    pub fn is_truncated(&self) -> bool {
        self.declared > self.paths.len()
    }
}

/// Maps row image references onto files under a project root.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    project_root: PathBuf,
    max_images: usize,
    seed: u64,
}

impl MediaResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            max_images: MAX_IMAGES,
            seed: 0,
        }
    }

    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images;
        self
    }

    /// Seed for `Selection::Sample`; combined with the row index.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Resolve the images of `record` from `columns`, in column order.
    ///
    /// References are deduplicated first-seen-first-kept, missing files are
    /// skipped, then the cap is applied using the selection mode of the first
    /// column that contributed a reference.
    pub fn resolve(&self, record: &Record<'_>, columns: &[ImageColumn]) -> ResolvedMedia {
        let mut seen = HashSet::new();
        let mut existing = Vec::new();
        let mut declared = 0;
        let mut selection = None;

        for column in columns {
            let Some(raw) = record.text(column.name) else {
                continue;
            };
            for reference in parse_image_refs(raw) {
                if !seen.insert(reference.clone()) {
                    continue;
                }
                declared += 1;
                selection.get_or_insert(column.selection);

                let path = self.project_root.join(&reference);
                if path.is_file() {
                    existing.push(path);
                } else {
                    debug!("Row {}: image not found: {}", record.index(), path.display());
                }
            }
        }

        let paths = match selection {
            Some(Selection::Sample) if existing.len() > self.max_images => {
                self.sample(existing, record.index())
            }
            _ => {
                existing.truncate(self.max_images);
                existing
            }
        };

        ResolvedMedia { paths, declared }
    }

    fn sample(&self, paths: Vec<PathBuf>, row: usize) -> Vec<PathBuf> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ (row as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut picked = rand::seq::index::sample(&mut rng, paths.len(), self.max_images).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| paths[i].clone()).collect()
    }
}

/// Parse an image-reference cell: a JSON list of paths, or one bare path.
pub fn parse_image_refs(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    if raw.starts_with('[') {
        return match serde_json::from_str::<Vec<serde_json::Value>>(raw) {
            Ok(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    serde_json::Value::String(s) if !s.trim().is_empty() => {
                        Some(s.trim().to_string())
                    }
                    _ => None,
                })
                .collect(),
            Err(e) => {
                debug!("Unparseable image list {:?}: {}", raw, e);
                Vec::new()
            }
        };
    }

    vec![raw.to_string()]
}

/// Find the directory that image paths in `csv_path` are relative to.
///
/// Platform tables live under `<root>/tiktok/...` or `<root>/twitter/...`;
/// merged tables live in `<root>/analysis/`. Anything else resolves against
/// the working directory.
pub fn detect_project_root(csv_path: &Path) -> PathBuf {
    let absolute = csv_path
        .canonicalize()
        .unwrap_or_else(|_| csv_path.to_path_buf());

    for ancestor in absolute.ancestors().skip(1) {
        let Some(name) = ancestor.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if PLATFORM_DIRS.contains(&name) || name == ANALYSIS_DIR {
            if let Some(parent) = ancestor.parent() {
                return parent.to_path_buf();
            }
        }
    }

    std::env::current_dir().unwrap_or_else(|_| {
        absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    })
}
