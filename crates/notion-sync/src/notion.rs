//! Notion public API client implementing [`RemoteStore`].
//!
//! Rate limiting (429), conflicts (409) and gateway/overload statuses are
//! reported as `SyncError::Transient`; retries are the engine's business.

use std::time::Duration;

use async_trait::async_trait;
use notion_sync_core::{Block, ChildrenPage, PageMetadata, RemotePageRef, RemoteStore, SyncError};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: &str = "100";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct CreatedPage {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct BlockList {
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Notion API client (one integration token per process).
pub struct NotionClient {
    http: Client,
    base_url: String,
    token: String,
}

impl NotionClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .timeout(REQUEST_TIMEOUT)
    }

    /// Send `request` and decode a successful JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, SyncError> {
        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SyncError::Transient(format!("{}: {}", what, e))
            } else {
                SyncError::Remote(format!("{}: {}", what, e))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<ApiError>(&body) {
                Ok(err) if !err.code.is_empty() => format!("{}: {}", err.code, err.message),
                _ => body,
            };
            let message = format!("{} failed with {}: {}", what, status, detail);
            return Err(if is_retryable_status(status) {
                SyncError::Transient(message)
            } else {
                SyncError::Remote(message)
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| SyncError::Response(format!("{}: {}", what, e)))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::CONFLICT
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn parse_blocks(results: &[Value]) -> Result<Vec<Block>, SyncError> {
    results.iter().map(Block::from_api).collect()
}

#[async_trait]
impl RemoteStore for NotionClient {
    #[instrument(skip(self), level = "debug")]
    async fn create_page(&self, parent_id: &str, title: &str) -> Result<RemotePageRef, SyncError> {
        let body = json!({
            "parent": { "page_id": parent_id },
            "properties": {
                "title": { "title": [{ "type": "text", "text": { "content": title } }] }
            }
        });
        let page: CreatedPage = self
            .send(self.request(Method::POST, "pages").json(&body), "create page")
            .await?;

        debug!("Created page {} under {}", page.id, parent_id);
        Ok(RemotePageRef {
            id: page.id,
            url: page.url,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn retrieve_page(&self, page_id: &str) -> Result<PageMetadata, SyncError> {
        self.send(
            self.request(Method::GET, &format!("pages/{}", page_id)),
            "retrieve page",
        )
        .await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_children(
        &self,
        block_id: &str,
        cursor: Option<&str>,
    ) -> Result<ChildrenPage, SyncError> {
        let mut request = self
            .request(Method::GET, &format!("blocks/{}/children", block_id))
            .query(&[("page_size", PAGE_SIZE)]);
        if let Some(cursor) = cursor {
            request = request.query(&[("start_cursor", cursor)]);
        }

        let list: BlockList = self.send(request, "list children").await?;
        let items = parse_blocks(&list.results)?;
        debug!("Listed {} children of {} (has_more: {})", items.len(), block_id, list.has_more);

        Ok(ChildrenPage {
            items,
            has_more: list.has_more,
            next_cursor: list.next_cursor,
        })
    }

    #[instrument(skip(self, blocks), level = "debug", fields(count = blocks.len()))]
    async fn append_children(
        &self,
        block_id: &str,
        blocks: &[Block],
        after: Option<&str>,
    ) -> Result<Vec<Block>, SyncError> {
        let mut body = json!({
            "children": blocks.iter().map(Block::to_api).collect::<Vec<_>>()
        });
        if let Some(after) = after {
            body["after"] = Value::from(after);
        }

        let list: BlockList = self
            .send(
                self.request(Method::PATCH, &format!("blocks/{}/children", block_id))
                    .json(&body),
                "append children",
            )
            .await?;

        // Without `after` the results are the created blocks. With it, Notion
        // returns the parent's children from the insertion point on, created
        // blocks first.
        let created = parse_blocks(list.results.get(..blocks.len()).unwrap_or(&list.results))?;
        debug!("Appended {} blocks to {}", created.len(), block_id);
        Ok(created)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_block(&self, block_id: &str) -> Result<(), SyncError> {
        let _: Value = self
            .send(
                self.request(Method::DELETE, &format!("blocks/{}", block_id)),
                "delete block",
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn archive_page(&self, page_id: &str) -> Result<(), SyncError> {
        let _: Value = self
            .send(
                self.request(Method::PATCH, &format!("pages/{}", page_id))
                    .json(&json!({ "archived": true })),
                "archive page",
            )
            .await?;
        Ok(())
    }
}
