use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// Identity and human address of a remote page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePageRef {
    pub id: String,
    /// Browser URL of the page; used as the target of rewritten links.
    pub url: String,
}

/// Page metadata as returned by a retrieve call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageMetadata {
    pub id: String,
    pub url: String,
    /// Raw property map; exactly one property is expected to be of type `title`.
    pub properties: Value,
}

impl PageMetadata {
    /// Extract the page title from its title-type property.
    ///
    /// A page without a title property is malformed; we never guess a title
    /// because the title is part of the page's identity key.
    pub fn title(&self) -> Result<String> {
        let property = self
            .properties
            .as_object()
            .and_then(|props| {
                props
                    .values()
                    .find(|p| p.get("type").and_then(Value::as_str) == Some("title"))
            })
            .ok_or_else(|| {
                SyncError::Malformed(format!("page {} has no title property", self.id))
            })?;

        let segments = property
            .get("title")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SyncError::Malformed(format!("page {} title property has no segments", self.id))
            })?;

        Ok(segments
            .iter()
            .filter_map(|s| {
                s.get("plain_text")
                    .or_else(|| s.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect())
    }
}

/// Run-scoped map from `parentPath + "/" + title` to remote page identity.
///
/// Each key has a single writer: the crawl seeds a key once per discovered
/// page, the reconciler creates a key once per local path. A second
/// registration of the same key is refused rather than overwritten.
///
/// Titles may contain `/`, so a key's parent is recorded at registration
/// instead of being recovered from the key text.
#[derive(Debug, Clone, Default)]
pub struct PageIndex {
    entries: HashMap<String, RemotePageRef>,
    parents: HashMap<String, String>,
}

impl PageIndex {
    /// Path of the sync root; its children are keyed `./<title>`.
    pub const ROOT_PATH: &'static str = ".";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(parent_path: &str, title: &str) -> String {
        format!("{}/{}", parent_path, title)
    }

    pub fn get(&self, key: &str) -> Option<&RemotePageRef> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Register the page titled `title` under `parent_path`.
    ///
    /// Returns its key, or `None` if the key was already taken.
    pub fn register(
        &mut self,
        parent_path: &str,
        title: &str,
        page: RemotePageRef,
    ) -> Option<String> {
        let key = Self::key(parent_path, title);
        if self.entries.contains_key(&key) {
            return None;
        }
        self.entries.insert(key.clone(), page);
        self.parents.insert(key.clone(), parent_path.to_string());
        Some(key)
    }

    /// Path of the parent the page at `key` was registered under.
    pub fn parent_of(&self, key: &str) -> Option<&str> {
        self.parents.get(key).map(String::as_str)
    }

    /// Whether `ancestor` is a registered parent, grandparent, ... of `key`.
    pub fn is_descendant(&self, key: &str, ancestor: &str) -> bool {
        let mut current = self.parent_of(key);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RemotePageRef)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of `key -> address` used to rewrite links between documents.
    pub fn link_map(&self) -> LinkMap {
        LinkMap {
            addresses: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.url.clone()))
                .collect(),
        }
    }
}

/// Maps page index keys to remote addresses for link rewriting.
#[derive(Debug, Clone, Default)]
pub struct LinkMap {
    addresses: HashMap<String, String>,
}

impl LinkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, url: impl Into<String>) {
        self.addresses.insert(key.into(), url.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.addresses.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Resolve a document-relative link found in a file whose folder key is
    /// `source_dir` (e.g. `./docs`). Absolute URLs and pure fragments are
    /// not ours to rewrite.
    pub fn resolve(&self, source_dir: &str, href: &str) -> Option<&str> {
        self.get(&Self::target_key(source_dir, href)?)
    }

    fn target_key(source_dir: &str, href: &str) -> Option<String> {
        if href.is_empty()
            || href.starts_with('#')
            || href.contains("://")
            || href.starts_with("mailto:")
        {
            return None;
        }

        let path = href.split(['#', '?']).next().unwrap_or_default();
        let decoded = path.replace("%20", " ");
        let path = strip_document_suffix(&decoded).trim_end_matches('/');

        let (base, rel) = match path.strip_prefix('/') {
            Some(rest) => (PageIndex::ROOT_PATH, rest),
            None => (source_dir, path),
        };

        let mut segments: Vec<&str> = base
            .split('/')
            .filter(|s| !s.is_empty() && *s != PageIndex::ROOT_PATH)
            .collect();
        for segment in rel.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return None;
        }

        Some(
            std::iter::once(PageIndex::ROOT_PATH)
                .chain(segments)
                .collect::<Vec<_>>()
                .join("/"),
        )
    }
}

/// `path` without a trailing `.md` / `.markdown`, in any letter case.
fn strip_document_suffix(path: &str) -> &str {
    for suffix in [".md", ".markdown"] {
        let Some(split) = path.len().checked_sub(suffix.len()) else {
            continue;
        };
        if let Some(tail) = path.get(split..) {
            if tail.eq_ignore_ascii_case(suffix) {
                return &path[..split];
            }
        }
    }
    path
}
