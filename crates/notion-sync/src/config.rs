use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use notion_sync_core::SyncOptions;

/// Configuration for the notion-sync command.
#[derive(Parser, Debug, Clone)]
#[command(name = "notion-sync")]
#[command(about = "Mirror a local Markdown tree onto a Notion page hierarchy")]
pub struct Config {
    /// Local document root
    #[arg(long, env = "NOTION_SYNC_DIR")]
    pub dir: PathBuf,

    /// Notion page the tree is mirrored under
    #[arg(long, env = "NOTION_ROOT_PAGE")]
    pub root_page: String,

    /// Notion integration token
    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Notion API base URL
    #[arg(long, default_value = "https://api.notion.com/v1", env = "NOTION_API_URL")]
    pub api_url: String,

    /// Fingerprint store (default: <cache dir>/notion-sync/<root page>.json)
    #[arg(long, env = "NOTION_SYNC_STATE")]
    pub state_file: Option<PathBuf>,

    /// Maximum concurrent remote calls while crawling and fetching
    #[arg(long, default_value = "3", env = "NOTION_SYNC_PARALLEL")]
    pub parallel_limit: usize,

    /// Spacing between dispatched remote calls (milliseconds)
    #[arg(long, default_value = "340", env = "NOTION_SYNC_REQUEST_DELAY_MS")]
    pub request_delay_ms: u64,

    /// Attempts per remote call before giving up
    #[arg(long, default_value = "5", env = "NOTION_SYNC_MAX_RETRIES")]
    pub max_retries: u32,

    /// Backoff before the first retry (milliseconds), doubled on each retry
    #[arg(long, default_value = "1000", env = "NOTION_SYNC_RETRY_DELAY_MS")]
    pub retry_delay_ms: u64,

    /// Depth ceiling for the page crawl and nested block fetch
    #[arg(long, default_value = "8", env = "NOTION_SYNC_MAX_DEPTH")]
    pub max_depth: usize,

    /// Archive remote pages with no local counterpart
    #[arg(long, env = "NOTION_SYNC_DELETE_ORPHANS")]
    pub delete_orphans: bool,

    /// Ignore stored fingerprints and re-merge every file
    #[arg(long, env = "NOTION_SYNC_FORCE")]
    pub force: bool,

    /// File extensions to sync (repeatable)
    #[arg(long = "extension", default_value = "md")]
    pub extensions: Vec<String>,
}

impl Config {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            parallel_limit: self.parallel_limit,
            request_delay: Duration::from_millis(self.request_delay_ms),
            max_retry_attempts: self.max_retries,
            retry_initial_delay: Duration::from_millis(self.retry_delay_ms),
            max_depth: self.max_depth,
            delete_orphans: self.delete_orphans,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("notion-sync")
                .join(format!("{}.json", self.root_page))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec![
            "notion-sync",
            "--dir",
            "docs",
            "--root-page",
            "abc",
            "--token",
            "secret",
        ];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        let options = config.sync_options();
        assert_eq!(options.parallel_limit, 3);
        assert_eq!(options.request_delay, Duration::from_millis(340));
        assert_eq!(options.max_retry_attempts, 5);
        assert_eq!(options.retry_initial_delay, Duration::from_secs(1));
        assert_eq!(options.max_depth, 8);
        assert!(!options.delete_orphans);
        assert_eq!(config.extensions, vec!["md"]);
        assert!(config.state_path().ends_with("notion-sync/abc.json"));
    }

    #[test]
    fn test_overrides() {
        let config = parse(&[
            "--delete-orphans",
            "--extension",
            "md",
            "--extension",
            "markdown",
            "--state-file",
            "/tmp/state.json",
            "--parallel-limit",
            "1",
        ]);
        assert!(config.sync_options().delete_orphans);
        assert_eq!(config.sync_options().parallel_limit, 1);
        assert_eq!(config.extensions, vec!["md", "markdown"]);
        assert_eq!(config.state_path(), PathBuf::from("/tmp/state.json"));
    }
}
