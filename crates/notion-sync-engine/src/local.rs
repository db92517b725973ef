//! The local document tree.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notion_sync_core::{Block, DocumentConverter, LinkMap, PageIndex, SyncError};
use tracing::debug;

use crate::tracker::ChangeTracker;

/// Deferred content of a file, invoked only once the file is known to have
/// changed and every page address is resolved.
pub type ContentFn = Box<dyn Fn(&LinkMap) -> Result<Vec<Block>, SyncError> + Send + Sync>;

pub struct LocalFile {
    /// File name without extension; the title of its page.
    pub name: String,
    pub path: PathBuf,
    /// Path relative to the sync root with `/` separators; the change
    /// tracker key.
    pub rel_path: String,
    pub changed: bool,
    content: ContentFn,
}

impl LocalFile {
    pub fn new(
        name: impl Into<String>,
        path: PathBuf,
        rel_path: impl Into<String>,
        changed: bool,
        content: ContentFn,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            rel_path: rel_path.into(),
            changed,
            content,
        }
    }

    pub fn produce_blocks(&self, links: &LinkMap) -> Result<Vec<Block>, SyncError> {
        (self.content)(links)
    }
}

impl fmt::Debug for LocalFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFile")
            .field("name", &self.name)
            .field("rel_path", &self.rel_path)
            .field("changed", &self.changed)
            .finish_non_exhaustive()
    }
}

/// A folder: its files, then its subfolders, each sorted by name.
#[derive(Debug, Default)]
pub struct LocalNode {
    pub name: String,
    pub files: Vec<LocalFile>,
    pub folders: Vec<LocalNode>,
}

impl LocalNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_file(mut self, file: LocalFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_folder(mut self, folder: LocalNode) -> Self {
        self.folders.push(folder);
        self
    }

    /// Number of files in this subtree.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.iter().map(LocalNode::file_count).sum::<usize>()
    }
}

/// Build the tree under `root`, reading each matching file once and asking
/// `tracker` whether it changed.
///
/// Hidden entries are skipped, and so are files whose extension is not in
/// `extensions` (compared case-insensitively).
pub fn scan(
    root: &Path,
    tracker: &mut ChangeTracker,
    converter: Arc<dyn DocumentConverter>,
    extensions: &[String],
) -> Result<LocalNode, SyncError> {
    if !root.is_dir() {
        return Err(SyncError::Io(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| PageIndex::ROOT_PATH.to_string());

    let mut scanner = Scanner {
        tracker,
        converter,
        extensions,
    };
    let node = scanner.scan_dir(root, name, "", PageIndex::ROOT_PATH)?;
    debug!("Scanned {} files under {}", node.file_count(), root.display());
    Ok(node)
}

struct Scanner<'a> {
    tracker: &'a mut ChangeTracker,
    converter: Arc<dyn DocumentConverter>,
    extensions: &'a [String],
}

impl Scanner<'_> {
    /// `rel_dir` is relative to the root (`""` for the root), `key` is the
    /// folder's page index path.
    fn scan_dir(
        &mut self,
        dir: &Path,
        name: String,
        rel_dir: &str,
        key: &str,
    ) -> Result<LocalNode, SyncError> {
        let read_dir = std::fs::read_dir(dir).map_err(|e| {
            SyncError::Io(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;

        let mut entries: Vec<(String, PathBuf, bool)> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                SyncError::Io(format!("Failed to read directory {}: {}", dir.display(), e))
            })?;
            let file_name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden files
            if file_name.starts_with('.') {
                continue;
            }

            let path = entry.path();
            let is_dir = path.is_dir();
            if !is_dir && !self.wanted(&path) {
                continue;
            }
            entries.push((file_name, path, is_dir));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut node = LocalNode::new(name);
        for (file_name, path, is_dir) in entries {
            let rel_path = if rel_dir.is_empty() {
                file_name.clone()
            } else {
                format!("{}/{}", rel_dir, file_name)
            };

            if is_dir {
                let child_key = PageIndex::key(key, &file_name);
                node.folders
                    .push(self.scan_dir(&path, file_name, &rel_path, &child_key)?);
            } else {
                node.files.push(self.load_file(path, rel_path, key)?);
            }
        }

        Ok(node)
    }

    fn wanted(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }

    fn load_file(
        &mut self,
        path: PathBuf,
        rel_path: String,
        key: &str,
    ) -> Result<LocalFile, SyncError> {
        let bytes = std::fs::read(&path)
            .map_err(|e| SyncError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        let changed = self.tracker.changed(&rel_path, &bytes);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let converter = self.converter.clone();
        let source_dir = key.to_string();
        let source_path = path.clone();
        let content: ContentFn = Box::new(move |links: &LinkMap| {
            converter.produce_blocks(&raw, links, &source_dir, &source_path)
        });

        Ok(LocalFile::new(name, path, rel_path, changed, content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::LineConverter;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn md() -> Vec<String> {
        vec!["md".to_string()]
    }

    #[tokio::test]
    async fn test_scan_builds_sorted_tree() {
        let docs = TempDir::new().unwrap();
        write(docs.path(), "b.md", "bee");
        write(docs.path(), "a.md", "ay");
        write(docs.path(), "notes.txt", "ignored");
        write(docs.path(), ".hidden.md", "ignored");
        write(docs.path(), ".git/config.md", "ignored");
        write(docs.path(), "guide/setup.md", "setup");
        write(docs.path(), "guide/intro.MD", "intro");

        let state = TempDir::new().unwrap();
        let mut tracker = ChangeTracker::load(state.path().join("s.json")).await;
        let root = scan(docs.path(), &mut tracker, Arc::new(LineConverter), &md()).unwrap();

        let files: Vec<&str> = root.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(files, vec!["a", "b"]);
        assert_eq!(root.folders.len(), 1);

        let guide = &root.folders[0];
        assert_eq!(guide.name, "guide");
        let rel: Vec<&str> = guide.files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rel, vec!["guide/intro.MD", "guide/setup.md"]);
        assert_eq!(root.file_count(), 4);
        assert!(tracker.is_pending("guide/setup.md"));
    }

    #[tokio::test]
    async fn test_unchanged_files_are_flagged() {
        let docs = TempDir::new().unwrap();
        write(docs.path(), "a.md", "same");
        write(docs.path(), "b.md", "old");

        let state = TempDir::new().unwrap();
        let state_file = state.path().join("s.json");
        let mut tracker = ChangeTracker::load(&state_file).await;
        scan(docs.path(), &mut tracker, Arc::new(LineConverter), &md()).unwrap();
        tracker.flush_all().await;

        write(docs.path(), "b.md", "new");
        let mut tracker = ChangeTracker::load(&state_file).await;
        let root = scan(docs.path(), &mut tracker, Arc::new(LineConverter), &md()).unwrap();

        assert!(!root.files[0].changed);
        assert!(root.files[1].changed);
    }

    #[tokio::test]
    async fn test_content_is_produced_on_demand_with_links() {
        let docs = TempDir::new().unwrap();
        write(docs.path(), "guide/setup.md", "Install\nlink: ../readme.md");

        let state = TempDir::new().unwrap();
        let mut tracker = ChangeTracker::load(state.path().join("s.json")).await;
        let root = scan(docs.path(), &mut tracker, Arc::new(LineConverter), &md()).unwrap();

        let mut links = LinkMap::new();
        links.insert("./readme", "https://notion.test/readme");
        let blocks = root.folders[0].files[0].produce_blocks(&links).unwrap();

        let texts: Vec<String> = blocks.iter().map(Block::plain_text).collect();
        assert_eq!(texts, vec!["Install", "https://notion.test/readme"]);
    }

    #[test]
    fn test_scan_rejects_missing_root() {
        let mut tracker = ChangeTracker::empty("unused.json");
        let err = scan(
            Path::new("/definitely/not/here"),
            &mut tracker,
            Arc::new(LineConverter),
            &md(),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }
}
