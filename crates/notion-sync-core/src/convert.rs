use std::path::Path;

use crate::block::Block;
use crate::error::SyncError;
use crate::page::LinkMap;

/// Turns the raw text of a source document into remote content blocks.
pub trait DocumentConverter: Send + Sync {
    /// # Arguments
    /// * `raw` - Document text
    /// * `links` - Addresses of already-known pages, for rewriting relative links
    /// * `source_dir` - Page index key of the folder holding the document (e.g. `./docs`)
    /// * `source_path` - Local path of the document, for error messages
    fn produce_blocks(
        &self,
        raw: &str,
        links: &LinkMap,
        source_dir: &str,
        source_path: &Path,
    ) -> Result<Vec<Block>, SyncError>;
}
