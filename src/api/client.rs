use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{ApiEnvelope, LevelPage, VoteRequest};
use super::StoryDataSource;
use crate::config::{ApiConfig, PaginationConfig, RequestConfig};
use crate::error::{LoadError, LoadResult};
use crate::model::{Cursor, DuplicateReply, Node, VoteDirection};

/// Client for the story service HTTP API
#[derive(Clone)]
pub struct StoryApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    request_config: RequestConfig,
    page_size: u32,
}

impl StoryApiClient {
    /// Create a new story service client
    pub fn new(config: &ApiConfig, request_config: RequestConfig) -> LoadResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
            page_size: PaginationConfig::default().page_size,
        })
    }

    /// Set how many levels each page requests
    pub fn with_pagination(mut self, pagination: &PaginationConfig) -> Self {
        self.page_size = pagination.page_size;
        self
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    /// Send a request with retries, returning the envelope payload.
    ///
    /// `Ok(None)` means the service answered 404.
    async fn send_with_retry<F>(&self, operation: &str, build: F) -> LoadResult<Option<serde_json::Value>>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    operation = %operation,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying story service request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(operation, self.authorized(build())).await {
                Ok(payload) => {
                    info!(
                        operation = %operation,
                        latency_ms = start.elapsed().as_millis(),
                        "Story service request succeeded"
                    );
                    return Ok(payload);
                }
                Err(e) => {
                    error!(
                        operation = %operation,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Story service request failed"
                    );
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(LoadError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> LoadResult<Option<serde_json::Value>> {
        debug!(operation = %operation, "Calling story service");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LoadError::Timeout {
                    timeout_ms: self.request_config.timeout_ms,
                }
            } else {
                LoadError::from(e)
            }
        })?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LoadError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let envelope: ApiEnvelope = response.json().await.map_err(|e| LoadError::Malformed {
            message: format!("Failed to parse response: {}", e),
        })?;

        envelope.into_payload(status.as_u16()).map(Some)
    }
}

#[async_trait]
impl StoryDataSource for StoryApiClient {
    async fn fetch_levels(&self, root_id: &str, cursor: &Cursor) -> LoadResult<LevelPage> {
        let url = format!("{}/api/posts/{}/levels", self.base_url, root_id);
        let limit = self.page_size.to_string();

        let payload = self
            .send_with_retry("fetch_levels", || {
                self.client
                    .get(&url)
                    .query(&[("cursor", cursor.as_str()), ("limit", limit.as_str())])
            })
            .await?
            .ok_or_else(|| LoadError::Api {
                status: 404,
                message: format!("Story not found: {}", root_id),
            })?;

        let page = LevelPage::from_value(payload)?;
        debug!(
            root_id = %root_id,
            cursor = %cursor,
            levels = page.items.len(),
            has_more = page.pagination.has_more,
            "Fetched level page"
        );
        Ok(page)
    }

    async fn fetch_node(&self, id: &str) -> LoadResult<Option<Node>> {
        let url = format!("{}/api/nodes/{}", self.base_url, id);

        match self
            .send_with_retry("fetch_node", || self.client.get(&url))
            .await?
        {
            Some(payload) => serde_json::from_value(payload)
                .map(Some)
                .map_err(|e| LoadError::Malformed {
                    message: format!("Failed to parse node: {}", e),
                }),
            None => Ok(None),
        }
    }

    async fn fetch_duplicate_candidates(
        &self,
        original_reply_id: &str,
    ) -> LoadResult<Vec<DuplicateReply>> {
        let url = format!("{}/api/replies/{}/duplicates", self.base_url, original_reply_id);

        let payload = match self
            .send_with_retry("fetch_duplicate_candidates", || self.client.get(&url))
            .await?
        {
            Some(payload) => payload,
            None => return Ok(Vec::new()),
        };

        if !payload.is_array() {
            return Err(LoadError::Malformed {
                message: "duplicate candidates are not a list".to_string(),
            });
        }

        serde_json::from_value(payload).map_err(|e| LoadError::Malformed {
            message: format!("Failed to parse duplicate candidates: {}", e),
        })
    }

    async fn submit_vote(
        &self,
        reply_id: &str,
        user_id: &str,
        direction: VoteDirection,
    ) -> LoadResult<()> {
        let url = format!("{}/api/replies/{}/votes", self.base_url, reply_id);
        let body = VoteRequest {
            user_id: user_id.to_string(),
            direction,
        };

        self.send_with_retry("submit_vote", || self.client.post(&url).json(&body))
            .await?
            .ok_or_else(|| LoadError::Api {
                status: 404,
                message: format!("Reply not found: {}", reply_id),
            })?;

        info!(reply_id = %reply_id, direction = %direction, "Vote submitted");
        Ok(())
    }
}
