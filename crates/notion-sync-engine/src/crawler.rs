//! Breadth-first crawl of the remote page tree into a [`PageIndex`].

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use notion_sync_core::{Block, PageIndex, RemotePageRef, RemoteStore, SyncError, SyncOptions};
use tokio::time::sleep_until;
use tracing::{debug, info, instrument, warn};

use crate::blocks::list_all_children;
use crate::resilient::{retry, Pacer, RetryPolicy};

/// Observer for crawl progress: `(processed, total_known)`.
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Builds the index of pages already present under a root page.
pub struct IndexBuilder {
    store: Arc<dyn RemoteStore>,
    options: SyncOptions,
    progress: Option<ProgressFn>,
}

/// A page waiting to be visited.
#[derive(Debug)]
struct Visit {
    page_id: String,
    /// Path of the parent page; `None` for the root.
    parent_path: Option<String>,
    depth: usize,
}

struct CrawledPage {
    page: RemotePageRef,
    title: String,
    children: Vec<Block>,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn RemoteStore>, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            progress: None,
        }
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Crawl every page reachable from `root_id` within `max_depth` levels.
    ///
    /// The root itself is not registered; its children are keyed `./<title>`.
    /// At most `parallel_limit` pages are visited at once. The first failure
    /// stops new visits, lets in-flight ones settle and is returned.
    #[instrument(skip(self), level = "debug")]
    pub async fn build(&self, root_id: &str) -> Result<PageIndex, SyncError> {
        let policy = RetryPolicy::from_options(&self.options);
        let limit = self.options.parallel_limit.max(1);

        let mut index = PageIndex::new();
        let mut queue = VecDeque::from([Visit {
            page_id: root_id.to_string(),
            parent_path: None,
            depth: 0,
        }]);
        let mut visited = HashSet::from([root_id.to_string()]);
        let mut in_flight = FuturesUnordered::new();
        let mut pacer = Pacer::new(self.options.request_delay);
        let mut failure: Option<SyncError> = None;
        let mut discovered = 1;
        let mut processed = 0;

        loop {
            while failure.is_none() && in_flight.len() < limit {
                let Some(visit) = queue.pop_front() else {
                    break;
                };
                let start = pacer.next_slot(!in_flight.is_empty());
                let store = self.store.clone();
                in_flight.push(async move {
                    sleep_until(start).await;
                    let result = crawl_page(store.as_ref(), &visit.page_id, policy).await;
                    (visit, result)
                });
            }

            let Some((visit, result)) = in_flight.next().await else {
                break;
            };
            processed += 1;

            match result {
                Ok(_) if failure.is_some() => {}
                Ok(crawled) => {
                    let page_id = crawled.page.id.clone();
                    let registered =
                        self.register(&mut index, &visit, crawled.page, &crawled.title);
                    if let Some(path) = registered {
                        debug!("Crawled page {} ({})", page_id, path);
                        if visit.depth < self.options.max_depth {
                            for child_id in crawled.children.iter().filter_map(child_page_id) {
                                if !visited.insert(child_id.to_string()) {
                                    continue;
                                }
                                discovered += 1;
                                queue.push_back(Visit {
                                    page_id: child_id.to_string(),
                                    parent_path: Some(path.clone()),
                                    depth: visit.depth + 1,
                                });
                            }
                        } else {
                            debug!("Depth limit reached at {}, not descending", path);
                        }
                    }
                }
                Err(err) => {
                    let err = err.context(format!("crawling page {}", visit.page_id));
                    match failure {
                        None => failure = Some(err),
                        Some(_) => debug!(error = %err, "Additional failure while draining crawl"),
                    }
                }
            }

            if let Some(progress) = &self.progress {
                progress(processed, discovered.max(processed));
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }

        info!("Indexed {} remote pages under {}", index.len(), root_id);
        Ok(index)
    }

    /// Register a crawled page and return its own path, or `None` when its
    /// subtree must not be descended.
    fn register(
        &self,
        index: &mut PageIndex,
        visit: &Visit,
        page: RemotePageRef,
        title: &str,
    ) -> Option<String> {
        let Some(parent_path) = &visit.parent_path else {
            return Some(PageIndex::ROOT_PATH.to_string());
        };

        let id = page.id.clone();
        if let Some(key) = index.register(parent_path, title, page) {
            return Some(key);
        }

        warn!(
            "Duplicate page title {:?} under {}: keeping the first, ignoring {} and its subpages",
            title, parent_path, id
        );
        None
    }
}

fn child_page_id(block: &Block) -> Option<&str> {
    match block.kind.as_str() {
        "child_page" => block.id.as_deref(),
        _ => None,
    }
}

async fn crawl_page(
    store: &dyn RemoteStore,
    page_id: &str,
    policy: RetryPolicy,
) -> Result<CrawledPage, SyncError> {
    let (meta, children) = tokio::try_join!(
        retry("retrieve_page", policy, || store.retrieve_page(page_id)),
        list_all_children(store, page_id, policy),
    )?;
    let title = meta.title()?;

    Ok(CrawledPage {
        page: RemotePageRef {
            id: meta.id,
            url: meta.url,
        },
        title,
        children,
    })
}
