//! Mapping the local tree onto remote pages and syncing file content.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use notion_sync_core::{LinkMap, PageIndex, RemotePageRef, RemoteStore, SyncError, SyncOptions};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::blocks::{apply, fetch_tree, ApplyStats};
use crate::local::{LocalFile, LocalNode};
use crate::merge::merge;
use crate::resilient::{retry, RetryPolicy};
use crate::tracker::ChangeTracker;

/// What a sync run did.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub pages_created: usize,
    pub pages_reused: usize,
    pub files_synced: usize,
    pub files_skipped: usize,
    pub blocks_appended: usize,
    pub blocks_deleted: usize,
    pub pages_archived: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            pages_created: 0,
            pages_reused: 0,
            files_synced: 0,
            files_skipped: 0,
            blocks_appended: 0,
            blocks_deleted: 0,
            pages_archived: 0,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// A file and the page its content goes to.
struct Target<'a> {
    file: &'a LocalFile,
    page_id: String,
}

struct Frame<'a> {
    node: &'a LocalNode,
    /// `(path, page id)` of the parent folder; `None` for the root.
    parent: Option<(String, String)>,
}

pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    options: SyncOptions,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, options: SyncOptions) -> Self {
        Self { store, options }
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_options(&self.options)
    }

    /// Mirror `root` under `root_page_id`.
    ///
    /// Page identities are resolved for the whole tree first, then changed
    /// files are merged one at a time, each committed to `tracker` once its
    /// edits are applied. With `delete_orphans`, indexed pages not touched by
    /// this run are archived last, shallowest first.
    #[instrument(skip_all, fields(root_page = %root_page_id), level = "debug")]
    pub async fn sync(
        &self,
        root: &LocalNode,
        root_page_id: &str,
        index: &mut PageIndex,
        tracker: &mut ChangeTracker,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::start();
        let mut touched = HashSet::from([root_page_id.to_string()]);

        let targets = self
            .resolve_pages(root, root_page_id, index, &mut touched, &mut report)
            .await?;
        debug!("Resolved {} file pages", targets.len());

        let links = index.link_map();
        for target in &targets {
            let file = target.file;
            if !file.changed {
                debug!("Skipping unchanged {}", file.rel_path);
                report.files_skipped += 1;
                continue;
            }

            let stats = self
                .sync_file(target, &links)
                .await
                .map_err(|e| e.context(format!("syncing {}", file.rel_path)))?;
            tracker.commit(&file.rel_path).await;

            info!(
                "Synced {} (+{} / -{} blocks)",
                file.rel_path, stats.appended, stats.deleted
            );
            report.files_synced += 1;
            report.blocks_appended += stats.appended;
            report.blocks_deleted += stats.deleted;
        }
        tracker.flush_all().await;

        if self.options.delete_orphans {
            report.pages_archived = self.archive_orphans(index, &touched, root_page_id).await?;
        }

        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Create or reuse a page for every folder and file, pre-order.
    async fn resolve_pages<'a>(
        &self,
        root: &'a LocalNode,
        root_page_id: &str,
        index: &mut PageIndex,
        touched: &mut HashSet<String>,
        report: &mut SyncReport,
    ) -> Result<Vec<Target<'a>>, SyncError> {
        let mut targets = Vec::new();
        let mut stack = vec![Frame {
            node: root,
            parent: None,
        }];

        while let Some(Frame { node, parent }) = stack.pop() {
            let (path, page_id) = match parent {
                None => (PageIndex::ROOT_PATH.to_string(), root_page_id.to_string()),
                Some((parent_path, parent_id)) => {
                    let key = PageIndex::key(&parent_path, &node.name);
                    let page = self
                        .page_for(index, report, &parent_path, &parent_id, &node.name)
                        .await?;
                    touched.insert(page.id.clone());
                    (key, page.id)
                }
            };

            for file in &node.files {
                let page = self
                    .page_for(index, report, &path, &page_id, &file.name)
                    .await?;
                touched.insert(page.id.clone());
                targets.push(Target {
                    file,
                    page_id: page.id,
                });
            }

            for folder in node.folders.iter().rev() {
                stack.push(Frame {
                    node: folder,
                    parent: Some((path.clone(), page_id.clone())),
                });
            }
        }

        Ok(targets)
    }

    async fn page_for(
        &self,
        index: &mut PageIndex,
        report: &mut SyncReport,
        parent_path: &str,
        parent_id: &str,
        title: &str,
    ) -> Result<RemotePageRef, SyncError> {
        let key = PageIndex::key(parent_path, title);
        if let Some(page) = index.get(&key) {
            debug!("Reusing page {} for {}", page.id, key);
            report.pages_reused += 1;
            return Ok(page.clone());
        }

        let page = retry("create_page", self.policy(), || {
            self.store.create_page(parent_id, title)
        })
        .await
        .map_err(|e| e.context(format!("creating page {}", key)))?;

        info!("Created page {} for {}", page.id, key);
        index.register(parent_path, title, page.clone());
        report.pages_created += 1;
        Ok(page)
    }

    async fn sync_file(
        &self,
        target: &Target<'_>,
        links: &LinkMap,
    ) -> Result<ApplyStats, SyncError> {
        let desired = target.file.produce_blocks(links)?;
        let existing = fetch_tree(self.store.as_ref(), &target.page_id, &self.options).await?;

        let script = merge(&target.page_id, &existing, &desired);
        if script.is_empty() {
            debug!("{} is already up to date", target.file.rel_path);
            return Ok(ApplyStats::default());
        }
        apply(self.store.as_ref(), &script, self.policy()).await
    }

    /// Archive indexed pages this run did not touch. Returns how many pages
    /// were archived.
    async fn archive_orphans(
        &self,
        index: &PageIndex,
        touched: &HashSet<String>,
        root_page_id: &str,
    ) -> Result<usize, SyncError> {
        let mut candidates: Vec<(&String, &RemotePageRef)> = index
            .iter()
            .filter(|(_, page)| page.id != root_page_id && !touched.contains(&page.id))
            .collect();
        // A child's key extends its parent's, so ancestors sort first.
        candidates.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

        let mut archived_keys: Vec<&str> = Vec::new();
        let mut archived_ids: HashSet<&str> = HashSet::new();

        for (key, page) in candidates {
            let archived_ancestor = archived_keys
                .iter()
                .find(|ancestor| index.is_descendant(key, ancestor));
            if let Some(ancestor) = archived_ancestor {
                debug!("Skipping {}: {} is already archived", key, ancestor);
                continue;
            }
            if !archived_ids.insert(page.id.as_str()) {
                continue;
            }

            retry("archive_page", self.policy(), || {
                self.store.archive_page(&page.id)
            })
            .await
            .map_err(|e| e.context(format!("archiving {}", key)))?;

            info!("Archived orphaned page {} ({})", key, page.id);
            archived_keys.push(key);
        }

        Ok(archived_ids.len())
    }
}
