//! Arena-backed directory tree mirroring the download root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::paths::{ARCHIVE_EXTENSION, METADATA_FILE, SEGMENTS_DIR, sanitize_file_name};

/// Index of a node inside a [`DirectoryTree`] arena
pub(crate) type NodeId = usize;

/// The root node always lives at index 0
pub(crate) const ROOT: NodeId = 0;

#[derive(Debug)]
struct Node {
    path: PathBuf,
    children: HashMap<String, NodeId>,
}

/// Recursive directory index stored as a flat arena.
///
/// Removed subtrees return their slots to a free list, so repeated add/remove cycles
/// do not grow the arena. Keys must already be sanitized by the caller.
#[derive(Debug)]
pub(crate) struct DirectoryTree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl DirectoryTree {
    /// An empty tree rooted at `root`
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            nodes: vec![Some(Node {
                path: root,
                children: HashMap::new(),
            })],
            free: Vec::new(),
        }
    }

    /// Build a tree from a three-level scan (source, series, chapter) of `root`.
    ///
    /// Unreadable directories contribute no children; a missing root yields an
    /// empty tree. Chapter entries are directories or `.cbz` archives (keyed by
    /// file stem). Other loose files are ignored, and so are episode directories
    /// still holding their segment downloads.
    pub(crate) fn scan(root: &Path) -> Self {
        let mut tree = Self::new(root.to_path_buf());

        for (source_key, source_path) in read_child_dirs(root) {
            let source = tree.ensure(ROOT, source_key, source_path.clone());
            for (series_key, series_path) in read_child_dirs(&source_path) {
                let series = tree.ensure(source, series_key, series_path.clone());
                for (chapter_key, chapter_path) in read_chapter_entries(&series_path) {
                    tree.ensure(series, chapter_key, chapter_path);
                }
            }
        }

        tree
    }

    /// Child of `parent` stored under `key`
    pub(crate) fn child(&self, parent: NodeId, key: &str) -> Option<NodeId> {
        self.node(parent)?.children.get(key).copied()
    }

    /// Follow `keys` from the root
    pub(crate) fn lookup(&self, keys: &[&str]) -> Option<NodeId> {
        keys.iter()
            .try_fold(ROOT, |node, key| self.child(node, key))
    }

    /// Filesystem path recorded for a node
    pub(crate) fn path(&self, id: NodeId) -> Option<&Path> {
        self.node(id).map(|n| n.path.as_path())
    }

    /// Keys of a node's children
    pub(crate) fn child_keys(&self, id: NodeId) -> Vec<&str> {
        self.node(id)
            .map(|n| n.children.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Get the child under `key`, creating it with `path` if absent
    pub(crate) fn ensure(&mut self, parent: NodeId, key: String, path: PathBuf) -> NodeId {
        if let Some(existing) = self.child(parent, &key) {
            return existing;
        }
        self.attach(parent, key, path)
    }

    /// Insert a fresh child under `key`, replacing any existing subtree
    pub(crate) fn replace(&mut self, parent: NodeId, key: String, path: PathBuf) -> NodeId {
        self.remove(parent, &key);
        self.attach(parent, key, path)
    }

    /// Detach and free the subtree under `key`. Returns whether anything was removed.
    pub(crate) fn remove(&mut self, parent: NodeId, key: &str) -> bool {
        let Some(removed) = self
            .nodes
            .get_mut(parent)
            .and_then(Option::as_mut)
            .and_then(|n| n.children.remove(key))
        else {
            return false;
        };

        let mut stack = vec![removed];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(id).and_then(Option::take) {
                stack.extend(node.children.into_values());
                self.free.push(id);
            }
        }
        true
    }

    /// Number of live nodes, root included
    pub(crate) fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    fn attach(&mut self, parent: NodeId, key: String, path: PathBuf) -> NodeId {
        let node = Node {
            path,
            children: HashMap::new(),
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        if let Some(parent_node) = self.nodes.get_mut(parent).and_then(Option::as_mut) {
            parent_node.children.insert(key, id);
        }
        id
    }
}

/// Subdirectories of `dir` as (sanitized key, path) pairs
fn read_child_dirs(dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = ?dir, error = %e, "failed to scan download directory");
            }
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            Some((sanitize_file_name(&name), entry.path()))
        })
        .collect()
}

/// Chapter directories and chapter archives inside a series directory
fn read_chapter_entries(series_dir: &Path) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(series_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = ?series_dir, error = %e, "failed to scan series directory");
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_type = entry.file_type().ok()?;
            let path = entry.path();
            if file_type.is_dir() {
                if is_unfinished_episode(&path) {
                    return None;
                }
                let name = entry.file_name().to_str()?.to_string();
                return Some((sanitize_file_name(&name), path));
            }
            let is_archive = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION));
            if !is_archive {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            Some((sanitize_file_name(&stem), path))
        })
        .collect()
}

/// An episode directory whose segments are still being fetched or merged
fn is_unfinished_episode(dir: &Path) -> bool {
    dir.join(SEGMENTS_DIR).is_dir() && !dir.join(METADATA_FILE).exists()
}
