//! In-memory index of downloaded content.
//!
//! [`DownloadCache`] mirrors the download root as a three-level tree
//! (source → series → chapter/episode) so "is this downloaded?" is a map lookup
//! instead of a directory scan. The tree is built lazily by a full rescan on first
//! use and then kept current by the task's finalize and remove paths. Losing the
//! tree is harmless: the next query rescans.

mod tree;


use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use crate::error::Result;
use crate::paths::{DirectoryLayout, is_temp_name, sanitize_file_name};
use crate::types::{ChapterId, SeriesId};

use tree::{DirectoryTree, ROOT};

/// Tree index over the download root
pub struct DownloadCache {
    layout: DirectoryLayout,
    /// `None` until the first load, or after [`DownloadCache::invalidate`]
    tree: RwLock<Option<DirectoryTree>>,
}

impl DownloadCache {
    /// Create an unloaded cache for `layout`
    pub fn new(layout: DirectoryLayout) -> Self {
        Self {
            layout,
            tree: RwLock::new(None),
        }
    }

    /// Directory layout used for fallbacks
    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Whether a scan has populated the tree
    pub fn is_loaded(&self) -> bool {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Rescan the download root and replace the whole tree.
    ///
    /// The new tree is built before the lock is taken, so readers see either the old
    /// tree or the new one, never a partial rebuild.
    pub fn load(&self) {
        let started = std::time::Instant::now();
        let fresh = DirectoryTree::scan(self.layout.root());
        let nodes = fresh.len();
        *self.tree.write().unwrap_or_else(PoisonError::into_inner) = Some(fresh);
        tracing::debug!(
            root = ?self.layout.root(),
            nodes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "download cache loaded"
        );
    }

    /// Drop the tree; the next query triggers a rescan
    pub fn invalidate(&self) {
        *self.tree.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Register a chapter, creating missing source and series nodes.
    ///
    /// `path` overrides the chapter path recorded in the tree; otherwise the layout's
    /// chapter directory is used. Re-adding overwrites the previous node.
    pub fn add(&self, id: &ChapterId, path: Option<PathBuf>) {
        let series = id.series();
        let source_path = self.layout.source_directory(&id.source_key);
        let series_path = self.layout.series_directory(&series);
        let chapter_path = path.unwrap_or_else(|| self.layout.chapter_directory(id));

        self.with_tree_mut(|tree| {
            let source = tree.ensure(ROOT, sanitize_file_name(&id.source_key), source_path);
            let series_node =
                tree.ensure(source, sanitize_file_name(&id.series_key), series_path);
            tree.replace(series_node, sanitize_file_name(&id.chapter_key), chapter_path);
        });
    }

    /// Forget a series and everything below it
    pub fn remove_series(&self, series: &SeriesId) {
        let source_key = sanitize_file_name(&series.source_key);
        let series_key = sanitize_file_name(&series.series_key);
        self.with_tree_mut(|tree| {
            if let Some(source) = tree.child(ROOT, &source_key) {
                tree.remove(source, &series_key);
            }
        });
    }

    /// Forget one chapter
    pub fn remove_chapter(&self, id: &ChapterId) {
        let keys = chapter_keys(id);
        self.with_tree_mut(|tree| {
            if let Some(series) = tree.lookup(&[keys[0].as_str(), keys[1].as_str()]) {
                tree.remove(series, &keys[2]);
            }
        });
    }

    /// Delete the whole download root from disk and resynchronize to the empty state
    pub fn remove_all(&self) -> Result<()> {
        let root = self.layout.root();
        match std::fs::remove_dir_all(root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(root = ?root, error = %e, "failed to delete download root");
                self.load();
                return Err(e.into());
            }
        }
        self.load();
        Ok(())
    }

    /// Whether a chapter is present in the index
    pub fn is_chapter_downloaded(&self, id: &ChapterId) -> bool {
        let keys = chapter_keys(id);
        self.with_tree(|tree| {
            tree.lookup(&[keys[0].as_str(), keys[1].as_str(), keys[2].as_str()])
                .is_some()
        })
    }

    /// Whether a series has at least one finished chapter (scratch directories excluded)
    pub fn has_downloaded_series_content(&self, series: &SeriesId) -> bool {
        let source_key = sanitize_file_name(&series.source_key);
        let series_key = sanitize_file_name(&series.series_key);
        self.with_tree(|tree| {
            tree.lookup(&[source_key.as_str(), series_key.as_str()])
                .is_some_and(|node| tree.child_keys(node).iter().any(|k| !is_temp_name(k)))
        })
    }

    /// Sanitized keys of the finished chapters of a series, sorted
    pub fn downloaded_chapter_keys(&self, series: &SeriesId) -> Vec<String> {
        let source_key = sanitize_file_name(&series.source_key);
        let series_key = sanitize_file_name(&series.series_key);
        let mut keys = self.with_tree(|tree| {
            tree.lookup(&[source_key.as_str(), series_key.as_str()])
                .map(|node| {
                    tree.child_keys(node)
                        .into_iter()
                        .filter(|k| !is_temp_name(k))
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        });
        keys.sort();
        keys
    }

    /// Cached source directory, falling back to the layout path
    pub fn source_directory(&self, source_key: &str) -> PathBuf {
        let key = sanitize_file_name(source_key);
        self.cached_path(&[key.as_str()])
            .unwrap_or_else(|| self.layout.source_directory(source_key))
    }

    /// Cached series directory, falling back to the layout path
    pub fn series_directory(&self, series: &SeriesId) -> PathBuf {
        let source_key = sanitize_file_name(&series.source_key);
        let series_key = sanitize_file_name(&series.series_key);
        self.cached_path(&[source_key.as_str(), series_key.as_str()])
            .unwrap_or_else(|| self.layout.series_directory(series))
    }

    /// Cached chapter path (directory or archive), falling back to the layout directory
    pub fn chapter_directory(&self, id: &ChapterId) -> PathBuf {
        let keys = chapter_keys(id);
        self.cached_path(&[keys[0].as_str(), keys[1].as_str(), keys[2].as_str()])
            .unwrap_or_else(|| self.layout.chapter_directory(id))
    }

    fn cached_path(&self, keys: &[&str]) -> Option<PathBuf> {
        self.with_tree(|tree| {
            tree.lookup(keys)
                .and_then(|node| tree.path(node))
                .map(|p| p.to_path_buf())
        })
    }

    fn with_tree<R>(&self, f: impl FnOnce(&DirectoryTree) -> R) -> R {
        {
            let guard = self.tree.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(tree) = guard.as_ref() {
                return f(tree);
            }
        }
        self.with_tree_mut(|tree| f(tree))
    }

    fn with_tree_mut<R>(&self, f: impl FnOnce(&mut DirectoryTree) -> R) -> R {
        let mut guard = self.tree.write().unwrap_or_else(PoisonError::into_inner);
        let tree = guard.get_or_insert_with(|| {
            tracing::debug!(root = ?self.layout.root(), "download cache cold, scanning");
            DirectoryTree::scan(self.layout.root())
        });
        f(tree)
    }
}

fn chapter_keys(id: &ChapterId) -> [String; 3] {
    [
        sanitize_file_name(&id.source_key),
        sanitize_file_name(&id.series_key),
        sanitize_file_name(&id.chapter_key),
    ]
}
