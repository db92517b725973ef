use serde_json::{Map, Value};

use crate::error::{Result, SyncError};

/// Fields generated by the remote store that never take part in content equality.
const GENERATED_KEYS: &[&str] = &[
    "id",
    "object",
    "created_time",
    "last_edited_time",
    "created_by",
    "last_edited_by",
    "has_children",
    "archived",
    "in_trash",
    "parent",
    "plain_text",
    "href",
    "children",
    "request_id",
];

/// Block kinds that represent pages living under a page rather than content.
const PAGE_KINDS: &[&str] = &["child_page", "child_database"];

/// A typed content block, possibly with nested children.
///
/// `content` is the type-specific payload (the object stored under the
/// block's `type` key in the API), without its `children`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Remote identity; `None` for blocks that only exist locally.
    pub id: Option<String>,
    pub kind: String,
    pub content: Value,
    /// Reported by the remote; may be true while `children` is still empty
    /// when the tree was fetched with a depth limit.
    pub has_children: bool,
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            content,
            has_children: false,
            children: Vec::new(),
        }
    }

    /// A block whose payload is a single plain `rich_text` segment.
    pub fn text(kind: impl Into<String>, text: &str) -> Self {
        Self::new(
            kind,
            serde_json::json!({
                "rich_text": [{ "type": "text", "text": { "content": text } }]
            }),
        )
    }

    pub fn paragraph(text: &str) -> Self {
        Self::text("paragraph", text)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }

    /// Parse a block object as returned by the API.
    pub fn from_api(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SyncError::Response(format!("block is not an object: {}", value)))?;

        let id = obj.get("id").and_then(Value::as_str).map(str::to_string);
        let kind = obj.get("type").and_then(Value::as_str).ok_or_else(|| {
            SyncError::Malformed(format!(
                "block {} has no type",
                id.as_deref().unwrap_or("<new>")
            ))
        })?;

        let mut content = obj
            .get(kind)
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let children = match content.as_object_mut().and_then(|m| m.remove("children")) {
            Some(Value::Array(items)) => items
                .iter()
                .map(Block::from_api)
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let has_children = obj
            .get("has_children")
            .and_then(Value::as_bool)
            .unwrap_or(!children.is_empty());

        Ok(Self {
            id,
            kind: kind.to_string(),
            content,
            has_children,
            children,
        })
    }

    /// Serialize for an append request. Identity is never sent.
    pub fn to_api(&self) -> Value {
        let mut content = match &self.content {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if !self.children.is_empty() {
            content.insert(
                "children".to_string(),
                Value::Array(self.children.iter().map(Block::to_api).collect()),
            );
        }

        let mut obj = Map::new();
        obj.insert("object".to_string(), Value::from("block"));
        obj.insert("type".to_string(), Value::from(self.kind.as_str()));
        obj.insert(self.kind.clone(), Value::Object(content));
        Value::Object(obj)
    }

    /// Type + payload equality, ignoring identity, generated fields,
    /// default annotations and nested children.
    pub fn content_eq(&self, other: &Block) -> bool {
        self.kind == other.kind && normalize(&self.content) == normalize(&other.content)
    }

    /// `child_page` / `child_database` blocks are pages, not content.
    pub fn is_page(&self) -> bool {
        PAGE_KINDS.contains(&self.kind.as_str())
    }

    pub fn child_page_title(&self) -> Option<&str> {
        if self.kind != "child_page" {
            return None;
        }
        self.content.get("title").and_then(Value::as_str)
    }

    /// Deep copy with all remote identities cleared, ready to be re-inserted.
    pub fn without_identity(&self) -> Block {
        Block {
            id: None,
            kind: self.kind.clone(),
            content: self.content.clone(),
            has_children: !self.children.is_empty(),
            children: self.children.iter().map(Block::without_identity).collect(),
        }
    }

    /// Number of levels in this block's subtree (a leaf has height 1).
    pub fn height(&self) -> usize {
        1 + self.children.iter().map(Block::height).max().unwrap_or(0)
    }

    /// Children were reported by the remote but not fetched.
    pub fn children_unknown(&self) -> bool {
        self.has_children && self.children.is_empty()
    }

    /// Concatenated `rich_text` content, mostly useful for logging.
    pub fn plain_text(&self) -> String {
        self.content
            .get("rich_text")
            .and_then(Value::as_array)
            .map(|segments| {
                segments
                    .iter()
                    .filter_map(|s| {
                        s.get("plain_text")
                            .or_else(|| s.get("text").and_then(|t| t.get("content")))
                            .and_then(Value::as_str)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Canonical form of a payload: generated keys, nulls, `false` flags,
/// `"default"` colors and empty containers are dropped.
fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, v) in map {
                if GENERATED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if key == "color" && v.as_str() == Some("default") {
                    continue;
                }
                let v = normalize(v);
                if is_empty_value(&v) {
                    continue;
                }
                out.insert(key.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
