//! Reading a page's block tree and executing an [`EditScript`] against it.

use notion_sync_core::{Block, RemoteStore, SyncError, SyncOptions};
use tracing::{debug, instrument};

use crate::merge::EditScript;
use crate::resilient::{parallel, retry, RetryPolicy};

/// Most blocks the transport accepts in one append call.
pub const APPEND_BATCH_LIMIT: usize = 100;

/// Tallest subtree (in levels, the block itself included) sent inline.
/// Anything deeper is appended without children, which follow in a second
/// call targeting the created block.
pub const INLINE_NESTING_LIMIT: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Blocks created, nested children included.
    pub appended: usize,
    pub deleted: usize,
}

/// All direct children of `block_id`, following pagination cursors.
pub async fn list_all_children(
    store: &dyn RemoteStore,
    block_id: &str,
    policy: RetryPolicy,
) -> Result<Vec<Block>, SyncError> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = retry("list_children", policy, || {
            store.list_children(block_id, cursor.as_deref())
        })
        .await?;
        items.extend(page.items);

        match page.next_cursor {
            Some(next) if page.has_more => cursor = Some(next),
            _ => break,
        }
    }

    Ok(items)
}

/// Fetch the content tree of `page_id`, level by level, at most
/// `options.max_depth` levels deep.
///
/// Children of one level are listed concurrently under the shared
/// concurrency cap. Blocks below the depth ceiling keep `has_children`
/// with empty `children`; child pages are never expanded.
#[instrument(skip(store, options), level = "debug")]
pub async fn fetch_tree(
    store: &dyn RemoteStore,
    page_id: &str,
    options: &SyncOptions,
) -> Result<Vec<Block>, SyncError> {
    let policy = RetryPolicy::from_options(options);
    let mut tree = list_all_children(store, page_id, policy).await?;

    let mut frontier = expandable(&tree, &[]);
    let mut depth = 1;

    while !frontier.is_empty() && depth < options.max_depth {
        let ids: Vec<String> = frontier.iter().map(|(_, id)| id.clone()).collect();
        debug!("Fetching children of {} blocks at depth {}", ids.len(), depth);

        let fetched = parallel(
            ids,
            options.parallel_limit,
            options.request_delay,
            |id| async move {
                list_all_children(store, &id, policy)
                    .await
                    .map_err(|e| e.context(format!("block {}", id)))
            },
        )
        .await?;

        let mut next = Vec::new();
        for ((path, _), children) in frontier.into_iter().zip(fetched) {
            next.extend(expandable(&children, &path));
            if let Some(block) = block_at_mut(&mut tree, &path) {
                block.children = children;
            }
        }
        frontier = next;
        depth += 1;
    }

    Ok(tree)
}

/// Index paths and ids of blocks whose children still need listing.
fn expandable(blocks: &[Block], parent_path: &[usize]) -> Vec<(Vec<usize>, String)> {
    blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| b.has_children && !b.is_page())
        .filter_map(|(i, b)| {
            let mut path = parent_path.to_vec();
            path.push(i);
            Some((path, b.id.clone()?))
        })
        .collect()
}

fn block_at_mut<'a>(mut blocks: &'a mut Vec<Block>, path: &[usize]) -> Option<&'a mut Block> {
    let (last, parents) = path.split_last()?;
    for &i in parents {
        blocks = &mut blocks.get_mut(i)?.children;
    }
    blocks.get_mut(*last)
}

/// Issue the appends of `script` in order, then its deletions.
#[instrument(skip(store, script), level = "debug")]
pub async fn apply(
    store: &dyn RemoteStore,
    script: &EditScript,
    policy: RetryPolicy,
) -> Result<ApplyStats, SyncError> {
    let mut stats = ApplyStats::default();

    for append in &script.appends {
        stats.appended += append_blocks(
            store,
            &append.parent_id,
            append.after.clone(),
            &append.blocks,
            policy,
        )
        .await?;
    }

    for id in &script.deletions {
        retry("delete_block", policy, || store.delete_block(id))
            .await
            .map_err(|e| e.context(format!("deleting block {}", id)))?;
        stats.deleted += 1;
    }

    debug!(
        "Applied {} appends ({} blocks) and {} deletions",
        script.appends.len(),
        stats.appended,
        stats.deleted
    );
    Ok(stats)
}

struct PendingAppend {
    parent_id: String,
    after: Option<String>,
    blocks: Vec<Block>,
}

/// Append `blocks` under `parent_id` in batches, deferring subtrees too deep
/// to send inline.
async fn append_blocks(
    store: &dyn RemoteStore,
    parent_id: &str,
    after: Option<String>,
    blocks: &[Block],
    policy: RetryPolicy,
) -> Result<usize, SyncError> {
    let mut work = vec![PendingAppend {
        parent_id: parent_id.to_string(),
        after,
        blocks: blocks.to_vec(),
    }];
    let mut appended = 0;

    while let Some(PendingAppend {
        parent_id,
        mut after,
        blocks,
    }) = work.pop()
    {
        let mut deferred = Vec::new();

        for chunk in blocks.chunks(APPEND_BATCH_LIMIT) {
            let request: Vec<Block> = chunk.iter().map(inline_form).collect();
            let created = retry("append_children", policy, || {
                store.append_children(&parent_id, &request, after.as_deref())
            })
            .await
            .map_err(|e| e.context(format!("appending to {}", parent_id)))?;

            if created.len() != request.len() {
                return Err(SyncError::Response(format!(
                    "append to {} created {} blocks, expected {}",
                    parent_id,
                    created.len(),
                    request.len()
                )));
            }
            appended += request.iter().map(count).sum::<usize>();

            for (block, made) in chunk.iter().zip(&created) {
                if block.height() <= INLINE_NESTING_LIMIT {
                    continue;
                }
                let id = made.id.clone().ok_or_else(|| {
                    SyncError::Response(format!(
                        "append to {} returned a block without id",
                        parent_id
                    ))
                })?;
                debug!("Deferring {} nested blocks under {}", block.children.len(), id);
                deferred.push(PendingAppend {
                    parent_id: id,
                    after: None,
                    blocks: block.children.clone(),
                });
            }

            after = created.last().and_then(|b| b.id.clone());
        }

        // Stack: push in reverse so deferred subtrees are appended in order.
        work.extend(deferred.into_iter().rev());
    }

    Ok(appended)
}

fn inline_form(block: &Block) -> Block {
    if block.height() <= INLINE_NESTING_LIMIT {
        return block.clone();
    }
    Block {
        id: None,
        kind: block.kind.clone(),
        content: block.content.clone(),
        has_children: false,
        children: Vec::new(),
    }
}

fn count(block: &Block) -> usize {
    1 + block.children.iter().map(count).sum::<usize>()
}
