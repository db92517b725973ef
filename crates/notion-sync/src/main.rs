mod config;
mod markdown;
mod notion;

use std::sync::Arc;

use clap::Parser;
use notion_sync_core::{DocumentConverter, RemoteStore};
use notion_sync_engine::{local, ChangeTracker, IndexBuilder, Reconciler};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use markdown::MarkdownConverter;
use notion::NotionClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let options = config.sync_options();
    let state_path = config.state_path();

    info!("Starting notion-sync");
    info!("  Local root: {}", config.dir.display());
    info!("  Root page: {}", config.root_page);
    info!("  State file: {}", state_path.display());
    info!(
        "  Parallel limit: {}, request delay: {:?}, max depth: {}",
        options.parallel_limit, options.request_delay, options.max_depth
    );

    let mut tracker = if config.force {
        info!("  Force mode: ignoring stored fingerprints");
        ChangeTracker::empty(state_path)
    } else {
        ChangeTracker::load(state_path).await
    };

    let converter: Arc<dyn DocumentConverter> = Arc::new(MarkdownConverter);
    let root = local::scan(&config.dir, &mut tracker, converter, &config.extensions)?;
    info!("Found {} local documents", root.file_count());

    let store: Arc<dyn RemoteStore> = Arc::new(NotionClient::new(&config.api_url, &config.token));

    let mut index = IndexBuilder::new(store.clone(), options.clone())
        .with_progress(|processed, total| info!("Indexing remote pages: {}/{}", processed, total))
        .build(&config.root_page)
        .await?;
    info!("Remote index has {} pages", index.len());

    let report = Reconciler::new(store, options)
        .sync(&root, &config.root_page, &mut index, &mut tracker)
        .await?;

    info!(
        "Sync finished in {}s: {} pages created, {} reused, {} files synced, {} unchanged, \
         +{} / -{} blocks, {} pages archived",
        report.elapsed().num_seconds(),
        report.pages_created,
        report.pages_reused,
        report.files_synced,
        report.files_skipped,
        report.blocks_appended,
        report.blocks_deleted,
        report.pages_archived
    );

    Ok(())
}
