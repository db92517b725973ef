use async_trait::async_trait;

use crate::block::Block;
use crate::error::SyncError;
use crate::page::{PageMetadata, RemotePageRef};

/// One page of a paginated children listing.
#[derive(Debug, Clone, Default)]
pub struct ChildrenPage {
    pub items: Vec<Block>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Remote page/block store.
///
/// Any call may fail with `SyncError::Transient` when the remote is
/// rate-limited or overloaded; callers decide whether to retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a page titled `title` under `parent_id`.
    async fn create_page(&self, parent_id: &str, title: &str)
        -> Result<RemotePageRef, SyncError>;

    /// Retrieve page metadata (properties and address).
    async fn retrieve_page(&self, page_id: &str) -> Result<PageMetadata, SyncError>;

    /// List one page of the direct children of a block or page.
    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<ChildrenPage, SyncError>;

    /// Append `blocks` under `block_id`, after the child `after` when given
    /// (otherwise at the end).
    ///
    /// # Returns
    /// The created top-level blocks, in request order, carrying their new ids.
    async fn append_children(
        &self,
        block_id: &str,
        blocks: &[Block],
        after: Option<&str>,
    ) -> Result<Vec<Block>, SyncError>;

    /// Delete a single block.
    async fn delete_block(&self, block_id: &str) -> Result<(), SyncError>;

    /// Archive a page together with everything beneath it.
    async fn archive_page(&self, page_id: &str) -> Result<(), SyncError>;
}
