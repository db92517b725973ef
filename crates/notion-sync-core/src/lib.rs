//! Core traits and types for mirroring a local document tree onto Notion.
//!
//! This crate defines the pieces shared by the sync engine and the transport:
//! - `RemoteStore`: page and block operations against the remote
//! - `DocumentConverter`: source text to content blocks
//! - `Block`, `PageIndex`, `LinkMap`: the data model
//! - `SyncError`: the error taxonomy

mod block;
mod convert;
mod error;
mod options;
mod page;
mod remote;

pub use block::Block;
pub use convert::DocumentConverter;
pub use error::{Result, SyncError};
pub use options::SyncOptions;
pub use page::{LinkMap, PageIndex, PageMetadata, RemotePageRef};
pub use remote::{ChildrenPage, RemoteStore};
