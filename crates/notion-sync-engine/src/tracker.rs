//! Content fingerprints per local path, persisted between runs.
//!
//! State file layout (flat JSON object):
//! ```text
//! { "docs/setup.md": "<sha256 hex>", ... }
//! ```
//! Read and write failures never abort a run: an unreadable state file is
//! treated as empty, so every file is considered changed.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ChangeTracker {
    path: PathBuf,
    committed: BTreeMap<String, String>,
    /// Fingerprints of changed files not yet fully synchronized.
    pending: HashMap<String, String>,
}

impl ChangeTracker {
    /// Load the state file at `path`, falling back to an empty state.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let committed = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(map) => {
                    debug!("Loaded {} fingerprints from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    warn!(
                        "Ignoring unreadable sync state {}: {}; treating all files as changed",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No sync state at {}, starting fresh", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!(
                    "Failed to read sync state {}: {}; treating all files as changed",
                    path.display(),
                    e
                );
                BTreeMap::new()
            }
        };

        Self {
            path,
            committed,
            pending: HashMap::new(),
        }
    }

    /// A tracker that ignores any stored state (every file is changed).
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            committed: BTreeMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Whether `content` differs from the last known fingerprint for `key`.
    /// A changed file is recorded as pending until [`commit`](Self::commit).
    pub fn changed(&mut self, key: &str, content: &[u8]) -> bool {
        let fingerprint = Self::fingerprint(content);
        let known = self.pending.get(key).or_else(|| self.committed.get(key));
        if known == Some(&fingerprint) {
            return false;
        }
        self.pending.insert(key.to_string(), fingerprint);
        true
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Persist the pending fingerprint for `key`. Unchanged keys cost no I/O.
    pub async fn commit(&mut self, key: &str) {
        let Some(fingerprint) = self.pending.remove(key) else {
            return;
        };
        self.committed.insert(key.to_string(), fingerprint);
        self.persist().await;
    }

    /// Persist every remaining pending fingerprint.
    pub async fn flush_all(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        self.committed.extend(self.pending.drain());
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.write().await {
            warn!("Failed to write sync state {}: {}", self.path.display(), e);
        }
    }

    async fn write(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_vec_pretty(&self.committed)?;

        // Write atomically via temp file
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(
            "Wrote {} fingerprints to {}",
            self.committed.len(),
            self.path.display()
        );
        Ok(())
    }
}
