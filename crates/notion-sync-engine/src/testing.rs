//! In-memory `RemoteStore` and helpers for engine tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use notion_sync_core::{
    Block, ChildrenPage, DocumentConverter, LinkMap, PageMetadata, RemotePageRef, RemoteStore,
    SyncError,
};
use serde_json::json;

use crate::local::LocalFile;

/// Deepest subtree (in levels) accepted by a single append.
const MAX_APPEND_HEIGHT: usize = 3;
const MAX_APPEND_BATCH: usize = 100;

#[derive(Debug, Clone)]
struct Node {
    block: Block,
    /// `Some` for pages; `Some(None)` for a page without a title property.
    title: Option<Option<String>>,
    parent: Option<String>,
    children: Vec<String>,
    archived: bool,
}

/// Call counters, copied out by [`MemoryStore::calls`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calls {
    pub create: usize,
    pub retrieve: usize,
    pub list: usize,
    pub append: usize,
    pub delete: usize,
    pub archive: usize,
    /// Blocks sent through append calls, nested children included.
    pub appended_blocks: usize,
}

impl Calls {
    pub fn writes(&self) -> usize {
        self.create + self.append + self.delete + self.archive
    }
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<String, Node>,
    next_id: usize,
    calls: Calls,
    archived: Vec<String>,
    deleted: Vec<String>,
    fail_next: usize,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn live(&self, id: &str) -> Result<&Node, SyncError> {
        match self.nodes.get(id) {
            Some(node) if !node.archived && !self.has_archived_ancestor(id) => Ok(node),
            _ => Err(SyncError::Remote(format!("object_not_found: {}", id))),
        }
    }

    fn has_archived_ancestor(&self, id: &str) -> bool {
        let mut current = self.nodes.get(id).and_then(|n| n.parent.clone());
        while let Some(parent) = current {
            match self.nodes.get(&parent) {
                Some(node) if node.archived => return true,
                Some(node) => current = node.parent.clone(),
                None => return false,
            }
        }
        false
    }

    fn live_children(&self, id: &str) -> Vec<&Node> {
        self.nodes
            .get(id)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|c| self.nodes.get(c))
                    .filter(|c| !c.archived)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn insert_block(&mut self, parent: &str, block: &Block, position: usize) -> String {
        let id = match &block.id {
            Some(id) => id.clone(),
            None => self.fresh_id("block"),
        };
        let mut stored = block.clone();
        stored.id = Some(id.clone());
        stored.children = Vec::new();

        self.nodes.insert(
            id.clone(),
            Node {
                block: stored,
                title: None,
                parent: Some(parent.to_string()),
                children: Vec::new(),
                archived: false,
            },
        );
        if let Some(p) = self.nodes.get_mut(parent) {
            let position = position.min(p.children.len());
            p.children.insert(position, id.clone());
        }
        for (i, child) in block.children.iter().enumerate() {
            self.insert_block(&id, child, i);
        }
        id
    }

    fn insert_page(&mut self, parent: Option<&str>, id: &str, title: Option<&str>) {
        let block = Block::new("child_page", json!({ "title": title.unwrap_or_default() }))
            .with_id(id);
        self.nodes.insert(
            id.to_string(),
            Node {
                block,
                title: Some(title.map(str::to_string)),
                parent: parent.map(str::to_string),
                children: Vec::new(),
                archived: false,
            },
        );
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
            p.children.push(id.to_string());
        }
    }

    fn snapshot(&self, id: &str) -> Block {
        let mut block = self.nodes[id].block.clone();
        block.has_children = !self.live_children(id).is_empty();
        block
    }

    fn tree(&self, id: &str) -> Vec<Block> {
        self.live_children(id)
            .into_iter()
            .filter(|n| n.title.is_none())
            .map(|n| {
                let id = n.block.id.clone().unwrap_or_default();
                let mut block = n.block.clone();
                block.children = self.tree(&id);
                block.has_children = !block.children.is_empty();
                block
            })
            .collect()
    }
}

/// A page/block store held in memory that records every call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    latency: Option<Duration>,
    page_size: Option<usize>,
    retrieving: AtomicUsize,
    peak_retrieving: AtomicUsize,
}

pub fn page_url(id: &str) -> String {
    format!("https://notion.test/{}", id)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Children listings return at most `size` items per call.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn add_root(&self, id: &str, title: &str) {
        self.lock().insert_page(None, id, Some(title));
    }

    pub fn add_page(&self, parent: &str, id: &str, title: &str) {
        self.lock().insert_page(Some(parent), id, Some(title));
    }

    pub fn add_untitled_page(&self, parent: &str, id: &str) {
        self.lock().insert_page(Some(parent), id, None);
    }

    /// Add a content block (with its children) at the end of `parent`.
    pub fn add_block(&self, parent: &str, block: Block) -> String {
        let mut state = self.lock();
        state.insert_block(parent, &block, usize::MAX)
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.lock().fail_next = n;
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls.clone()
    }

    pub fn archived(&self) -> Vec<String> {
        self.lock().archived.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn peak_retrieving(&self) -> usize {
        self.peak_retrieving.load(Ordering::SeqCst)
    }

    /// Plain text of the live content blocks directly under `parent`.
    pub fn texts(&self, parent: &str) -> Vec<String> {
        self.tree(parent).iter().map(Block::plain_text).collect()
    }

    /// Live content blocks under `parent`, nested, child pages excluded.
    pub fn tree(&self, parent: &str) -> Vec<Block> {
        self.lock().tree(parent)
    }

    /// `(id, title)` of the live pages directly under `parent`.
    pub fn child_pages(&self, parent: &str) -> Vec<(String, String)> {
        let state = self.lock();
        state
            .live_children(parent)
            .into_iter()
            .filter_map(|n| {
                let title = n.title.clone()?.unwrap_or_default();
                Some((n.block.id.clone().unwrap_or_default(), title))
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    async fn enter(&self) -> Result<(), SyncError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SyncError::Transient("rate_limited".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_page(&self, parent_id: &str, title: &str) -> Result<RemotePageRef, SyncError> {
        self.enter().await?;
        let mut state = self.lock();
        state.calls.create += 1;
        state.live(parent_id)?;
        let id = state.fresh_id("page");
        state.insert_page(Some(parent_id), &id, Some(title));
        Ok(RemotePageRef {
            url: page_url(&id),
            id,
        })
    }

    async fn retrieve_page(&self, page_id: &str) -> Result<PageMetadata, SyncError> {
        let now = self.retrieving.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_retrieving.fetch_max(now, Ordering::SeqCst);
        let entered = self.enter().await;
        self.retrieving.fetch_sub(1, Ordering::SeqCst);
        entered?;

        let mut state = self.lock();
        state.calls.retrieve += 1;
        let node = state.live(page_id)?;
        let Some(title) = node.title.clone() else {
            return Err(SyncError::Remote(format!("{} is a block, not a page", page_id)));
        };
        let properties = match title {
            Some(title) => json!({
                "title": {"id": "title", "type": "title", "title": [
                    {"type": "text", "text": {"content": title}, "plain_text": title}
                ]}
            }),
            None => json!({}),
        };
        Ok(PageMetadata {
            id: page_id.to_string(),
            url: page_url(page_id),
            properties,
        })
    }

    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<ChildrenPage, SyncError> {
        self.enter().await?;
        let mut state = self.lock();
        state.calls.list += 1;
        state.live(block_id)?;

        let ids: Vec<String> = state
            .live_children(block_id)
            .iter()
            .filter_map(|n| n.block.id.clone())
            .collect();
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = self
            .page_size
            .map_or(ids.len(), |size| (offset + size).min(ids.len()));
        let items = ids[offset.min(end)..end]
            .iter()
            .map(|id| state.snapshot(id))
            .collect();

        Ok(ChildrenPage {
            items,
            has_more: end < ids.len(),
            next_cursor: (end < ids.len()).then(|| end.to_string()),
        })
    }

    async fn append_children(
        &self,
        block_id: &str,
        blocks: &[Block],
        after: Option<&str>,
    ) -> Result<Vec<Block>, SyncError> {
        self.enter().await?;
        let mut state = self.lock();
        state.calls.append += 1;
        state.live(block_id)?;

        if blocks.len() > MAX_APPEND_BATCH {
            return Err(SyncError::Remote(format!(
                "validation_error: {} blocks in one append",
                blocks.len()
            )));
        }
        if let Some(deep) = blocks.iter().find(|b| b.height() > MAX_APPEND_HEIGHT) {
            return Err(SyncError::Remote(format!(
                "validation_error: block nested {} levels deep",
                deep.height()
            )));
        }

        let mut position = match after {
            None => usize::MAX,
            Some(anchor) => {
                let siblings = &state.nodes[block_id].children;
                match siblings.iter().position(|c| c == anchor) {
                    Some(i) if !state.nodes[anchor].archived => i + 1,
                    _ => {
                        return Err(SyncError::Remote(format!(
                            "validation_error: {} is not a child of {}",
                            anchor, block_id
                        )))
                    }
                }
            }
        };

        let mut created = Vec::with_capacity(blocks.len());
        for block in blocks {
            let id = state.insert_block(block_id, block, position);
            position = position.saturating_add(1);
            state.calls.appended_blocks += count(block);
            created.push(state.snapshot(&id));
        }
        Ok(created)
    }

    async fn delete_block(&self, block_id: &str) -> Result<(), SyncError> {
        self.enter().await?;
        let mut state = self.lock();
        state.calls.delete += 1;
        state.live(block_id)?;
        if let Some(node) = state.nodes.get_mut(block_id) {
            node.archived = true;
        }
        state.deleted.push(block_id.to_string());
        Ok(())
    }

    async fn archive_page(&self, page_id: &str) -> Result<(), SyncError> {
        self.enter().await?;
        let mut state = self.lock();
        state.calls.archive += 1;
        if state.live(page_id)?.title.is_none() {
            return Err(SyncError::Remote(format!("{} is not a page", page_id)));
        }
        if let Some(node) = state.nodes.get_mut(page_id) {
            node.archived = true;
        }
        state.archived.push(page_id.to_string());
        Ok(())
    }
}

fn count(block: &Block) -> usize {
    1 + block.children.iter().map(count).sum::<usize>()
}

/// One paragraph per non-empty line. A line `link: <href>` becomes the
/// resolved address of `<href>` (or `unresolved`).
#[derive(Debug, Default)]
pub struct LineConverter;

impl DocumentConverter for LineConverter {
    fn produce_blocks(
        &self,
        raw: &str,
        links: &LinkMap,
        source_dir: &str,
        _source_path: &Path,
    ) -> Result<Vec<Block>, SyncError> {
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| match line.strip_prefix("link: ") {
                Some(href) => {
                    Block::paragraph(links.resolve(source_dir, href).unwrap_or("unresolved"))
                }
                None => Block::paragraph(line),
            })
            .collect())
    }
}

/// A local file whose content is `text`, converted by [`LineConverter`].
pub fn local_file(
    name: &str,
    rel_path: &str,
    source_dir: &str,
    text: &str,
    changed: bool,
) -> LocalFile {
    let text = text.to_string();
    let source_dir = source_dir.to_string();
    let path = Path::new(rel_path).to_path_buf();
    LocalFile::new(
        name,
        path.clone(),
        rel_path,
        changed,
        Box::new(move |links: &LinkMap| {
            LineConverter.produce_blocks(&text, links, &source_dir, &path)
        }),
    )
}
