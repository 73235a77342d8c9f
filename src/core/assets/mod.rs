pub mod tree;

use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;
use tracing::{debug, warn};

pub use tree::{AssetTree, EntryKind, MemoryTree, OsTree, TreeEntry};

/// How many directories (the discovery root itself included) the ancestor walk
/// may visit while looking for the marker.
pub const MAX_ANCESTOR_WALK: usize = 10;

/// Finds an image for an idol. Read-only apart from `provision`.
pub trait AssetLocator: Send + Sync {
    fn locate(&self, canonical: &str, nicknames: &[String]) -> Option<PathBuf>;

    /// Best-effort creation of a conventional image folder for a new idol.
    fn provision(&self, _name: &str) {}
}

#[derive(Debug, Clone)]
pub struct LocatorSettings {
    /// Ordered roots. `roots[0]` is the discovery root when `discovery_root` is set.
    pub roots: Vec<PathBuf>,
    pub discovery_root: bool,
    /// Two-level relative path produced by the external content pipeline.
    pub marker: PathBuf,
    /// Probed inside a discovered idol folder; the first existing one is used.
    pub discovery_subdirs: Vec<String>,
    /// Probed under `root/key/` on fallback roots.
    pub fallback_subdirs: Vec<String>,
    pub extensions: Vec<String>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        LocatorSettings {
            roots: Vec::new(),
            discovery_root: false,
            marker: PathBuf::from("content").join("idols"),
            discovery_subdirs: vec![
                "images".to_string(),
                "imgs".to_string(),
                "photos".to_string(),
                ".".to_string(),
            ],
            fallback_subdirs: vec![".".to_string(), "images".to_string()],
            extensions: [".png", ".jpg", ".jpeg", ".gif", ".bmp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Keys an idol's folder may be named after: the canonical name, every
/// nickname, and the part after the last hyphen of the canonical name.
pub fn candidate_keys(canonical: &str, nicknames: &[String]) -> Vec<String> {
    let suffix = canonical.rsplit_once('-').map(|(_, tail)| tail);
    let mut keys: Vec<String> = Vec::new();

    for key in std::iter::once(canonical)
        .chain(nicknames.iter().map(String::as_str))
        .chain(suffix)
    {
        let key = key.trim();
        if !key.is_empty() && !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// A key is only joined onto a root when it is a single plain path segment.
fn is_plain_segment(key: &str) -> bool {
    key != "." && key != ".." && !key.contains(['/', '\\'])
}

fn join_sub(base: &Path, sub: &str) -> PathBuf {
    if sub.is_empty() || sub == "." {
        base.to_path_buf()
    } else {
        base.join(sub)
    }
}

/// Tiered image lookup over an [`AssetTree`].
pub struct FsAssetLocator<T = OsTree> {
    tree: T,
    settings: LocatorSettings,
}

impl FsAssetLocator<OsTree> {
    pub fn os(settings: LocatorSettings) -> Self {
        FsAssetLocator::new(OsTree, settings)
    }
}

impl<T: AssetTree> FsAssetLocator<T> {
    pub fn new(tree: T, settings: LocatorSettings) -> Self {
        FsAssetLocator { tree, settings }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    pub fn settings(&self) -> &LocatorSettings {
        &self.settings
    }

    fn fallback_roots(&self) -> &[PathBuf] {
        if self.settings.discovery_root {
            self.settings.roots.get(1..).unwrap_or(&[])
        } else {
            &self.settings.roots
        }
    }

    /// Directory holding per-idol folders from the external pipeline, if any.
    pub fn discovery_base(&self) -> Option<PathBuf> {
        if !self.settings.discovery_root {
            return None;
        }
        let root = self.settings.roots.first()?;
        let marker = &self.settings.marker;

        let leaf_matches = marker
            .file_name()
            .is_some_and(|leaf| root.file_name() == Some(leaf));
        if leaf_matches || root.ends_with(marker) {
            return Some(root.clone());
        }

        root.ancestors()
            .take(MAX_ANCESTOR_WALK)
            .map(|dir| dir.join(marker))
            .find(|candidate| self.tree.is_dir(candidate))
    }

    fn locate_discovered(&self, keys: &[String]) -> Option<PathBuf> {
        let base = self.discovery_base()?;
        let entries = self.list(&base)?;

        // first folder in listing order wins, regardless of which key matched
        let folder = entries
            .into_iter()
            .filter(TreeEntry::is_dir)
            .find(|entry| keys.iter().any(|key| entry.name.contains(key.as_str())))?;
        let folder = base.join(&folder.name);

        let collection = self
            .settings
            .discovery_subdirs
            .iter()
            .map(|sub| join_sub(&folder, sub))
            .find(|dir| self.tree.is_dir(dir))?;

        debug!(dir = %collection.display(), "using discovered image folder");
        self.pick_image(&collection)
    }

    fn locate_fallback(&self, keys: &[String]) -> Option<PathBuf> {
        for root in self.fallback_roots() {
            for key in keys.iter().filter(|k| is_plain_segment(k)) {
                let idol_dir = root.join(key);
                for pattern in &self.settings.fallback_subdirs {
                    let dir = join_sub(&idol_dir, pattern);
                    if !self.tree.is_dir(&dir) {
                        continue;
                    }
                    if let Some(image) = self.pick_image(&dir) {
                        return Some(image);
                    }
                }
            }
        }
        None
    }

    fn list(&self, dir: &Path) -> Option<Vec<TreeEntry>> {
        match self.tree.read_dir(dir) {
            Ok(entries) => Some(entries),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "failed to read image directory");
                None
            }
        }
    }

    fn is_image(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.settings
            .extensions
            .iter()
            .any(|ext| name.ends_with(&ext.to_lowercase()))
    }

    /// Uniformly random qualifying file among the immediate entries of `dir`.
    fn pick_image(&self, dir: &Path) -> Option<PathBuf> {
        let images: Vec<TreeEntry> = self
            .list(dir)?
            .into_iter()
            .filter(|entry| entry.is_file() && self.is_image(&entry.name))
            .collect();

        images
            .choose(&mut rand::rng())
            .map(|entry| dir.join(&entry.name))
    }
}

impl<T: AssetTree> AssetLocator for FsAssetLocator<T> {
    fn locate(&self, canonical: &str, nicknames: &[String]) -> Option<PathBuf> {
        let keys = candidate_keys(canonical, nicknames);
        if keys.is_empty() {
            return None;
        }
        self.locate_discovered(&keys)
            .or_else(|| self.locate_fallback(&keys))
    }

    fn provision(&self, name: &str) {
        if !is_plain_segment(name) {
            return;
        }
        for root in self.fallback_roots() {
            let dir = root.join(name);
            match self.tree.create_dir_all(&dir) {
                Ok(()) => {
                    debug!(dir = %dir.display(), "provisioned image folder");
                    return;
                }
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "root refused image folder, trying next");
                }
            }
        }
    }
}
