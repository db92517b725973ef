//! Sync engine: mirrors a local document tree onto a remote page hierarchy.
//!
//! A run goes through these stages:
//! 1. [`local::scan`] reads the local tree and flags changed files through
//!    the [`ChangeTracker`].
//! 2. [`IndexBuilder`] crawls the remote pages under the root.
//! 3. [`Reconciler`] creates or reuses one page per folder and file, merges
//!    the content of changed files block by block and optionally archives
//!    orphaned pages.
//!
//! Every remote call goes through the retry and concurrency helpers in
//! [`resilient`].

pub mod blocks;
pub mod crawler;
pub mod local;
pub mod merge;
pub mod reconcile;
pub mod resilient;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use blocks::{apply, fetch_tree, ApplyStats};
pub use crawler::IndexBuilder;
pub use local::{scan, LocalFile, LocalNode};
pub use merge::{merge, Append, EditScript};
pub use reconcile::{Reconciler, SyncReport};
pub use resilient::{parallel, retry, retry_if, RetryPolicy};
pub use tracker::ChangeTracker;
