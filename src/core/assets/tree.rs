use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use indexmap::IndexMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Other,
}

/// One immediate child of a listed directory.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Directory access used by the asset locator.
///
/// Listings are returned in the backend's own order; callers must not assume
/// they are sorted.
pub trait AssetTree: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<TreeEntry>>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsTree;

impl AssetTree for OsTree {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();
        for entry in readable_entries(path, fs::read_dir(path)?) {
            // metadata() follows symlinks so linked image folders still count
            let kind = match fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => EntryKind::Dir,
                Ok(meta) if meta.is_file() => EntryKind::File,
                _ => EntryKind::Other,
            };
            entries.push(TreeEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            });
        }
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

/// Entries that failed to read are logged and dropped; the rest of the listing stands.
fn readable_entries<E>(
    dir: &Path,
    entries: impl IntoIterator<Item = io::Result<E>>,
) -> impl Iterator<Item = E> {
    let dir = dir.display().to_string();
    entries.into_iter().filter_map(move |entry| match entry {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(dir = %dir, error = %e, "skipping unreadable entry");
            None
        }
    })
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Dir { readable: bool, writable: bool },
    File,
}

/// An in-memory directory tree for exercising the locator without real I/O.
///
/// Listing order is insertion order, which lets tests pin down "first match in
/// listing order" behaviour. Directories can be marked unreadable or read-only
/// to simulate permission errors.
#[derive(Debug, Default)]
pub struct MemoryTree {
    nodes: RwLock<IndexMap<PathBuf, Node>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, path: impl AsRef<Path>) -> Self {
        self.insert(path.as_ref(), Node::Dir { readable: true, writable: true });
        self
    }

    pub fn with_file(self, path: impl AsRef<Path>) -> Self {
        self.insert(path.as_ref(), Node::File);
        self
    }

    pub fn with_unreadable(self, path: impl AsRef<Path>) -> Self {
        self.insert(path.as_ref(), Node::Dir { readable: false, writable: true });
        self
    }

    pub fn with_read_only(self, path: impl AsRef<Path>) -> Self {
        self.insert(path.as_ref(), Node::Dir { readable: true, writable: false });
        self
    }

    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.is_dir(path.as_ref())
    }

    fn insert(&self, path: &Path, node: Node) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut ancestors: Vec<&Path> = path
            .ancestors()
            .skip(1)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        ancestors.reverse();
        for ancestor in ancestors {
            nodes
                .entry(ancestor.to_path_buf())
                .or_insert(Node::Dir { readable: true, writable: true });
        }
        nodes.insert(path.to_path_buf(), node);
    }
}

impl AssetTree for MemoryTree {
    fn is_dir(&self, path: &Path) -> bool {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        matches!(nodes.get(path), Some(Node::Dir { .. }))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<TreeEntry>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(path) {
            Some(Node::Dir { readable: true, .. }) => {}
            Some(Node::Dir { readable: false, .. }) => {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"));
            }
            Some(Node::File) => {
                return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
            }
            None => {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such directory"));
            }
        }

        let entries = nodes
            .iter()
            .filter(|(child, _)| child.parent() == Some(path))
            .filter_map(|(child, node)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                let kind = match node {
                    Node::Dir { .. } => EntryKind::Dir,
                    Node::File => EntryKind::File,
                };
                Some(TreeEntry { name, kind })
            })
            .collect();
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

        let mut missing = Vec::new();
        for ancestor in path.ancestors().filter(|p| !p.as_os_str().is_empty()) {
            match nodes.get(ancestor) {
                None => missing.push(ancestor.to_path_buf()),
                Some(Node::File) => {
                    return Err(io::Error::new(io::ErrorKind::AlreadyExists, "file in the way"));
                }
                Some(Node::Dir { writable, .. }) => {
                    if !missing.is_empty() && !writable {
                        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only directory"));
                    }
                    break;
                }
            }
        }

        for dir in missing.into_iter().rev() {
            nodes.insert(dir, Node::Dir { readable: true, writable: true });
        }
        Ok(())
    }
}
