use serde::{Deserialize, Serialize};

use crate::error::{LoadError, LoadResult};
use crate::model::{Cursor, Level, LevelContinuation, Node, Quote, VoteDirection};

/// Response envelope used by every story service endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl ApiEnvelope {
    /// Take the payload out, treating `success: false` as failure.
    ///
    /// A missing payload comes back as `Null`; callers that need data
    /// reject it while parsing.
    pub fn into_payload(self, status: u16) -> LoadResult<serde_json::Value> {
        if !self.success {
            return Err(LoadError::Api {
                status,
                message: self
                    .error
                    .unwrap_or_else(|| "request reported failure".to_string()),
            });
        }
        Ok(self.data.unwrap_or(serde_json::Value::Null))
    }
}

/// One level as returned by the story service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPayload {
    pub level_number: u32,
    pub focused_node: Node,
    pub siblings: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<Quote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination_cursor: Option<Cursor>,
}

impl LevelPayload {
    /// Create a payload focused on `focused_node`.
    pub fn new(level_number: u32, focused_node: Node, siblings: Vec<Node>) -> Self {
        Self {
            level_number,
            focused_node,
            siblings,
            quote: None,
            pagination_cursor: None,
        }
    }

    /// Set the quote the focused node is anchored to.
    pub fn with_quote(mut self, quote: Quote) -> Self {
        self.quote = Some(quote);
        self
    }

    /// Set the cursor for the levels after this one.
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.pagination_cursor = Some(cursor);
        self
    }

    /// Convert into a validated level with the given continuation.
    pub fn into_level(self, continuation: LevelContinuation) -> LoadResult<Level> {
        Level::new(
            self.level_number,
            self.focused_node,
            self.siblings,
            self.quote,
            continuation,
        )
    }
}

/// Pagination metadata for a page of levels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<Cursor>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub matching_replies_count: u64,
}

impl PageInfo {
    /// Cursor for the following page, `None` once the story has ended.
    pub fn effective_next_cursor(&self) -> Option<&Cursor> {
        if self.has_more {
            self.next_cursor.as_ref()
        } else {
            None
        }
    }
}

/// A page of levels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelPage {
    pub items: Vec<LevelPayload>,
    #[serde(default)]
    pub pagination: PageInfo,
}

impl LevelPage {
    /// Parse a page payload, reporting a missing or non-list `items` as malformed.
    pub fn from_value(value: serde_json::Value) -> LoadResult<Self> {
        match value.get("items") {
            Some(serde_json::Value::Array(_)) => {}
            Some(_) => {
                return Err(LoadError::Malformed {
                    message: "items is not a list".to_string(),
                })
            }
            None => {
                return Err(LoadError::Malformed {
                    message: "missing items array".to_string(),
                })
            }
        }
        serde_json::from_value(value).map_err(|e| LoadError::Malformed {
            message: format!("Failed to parse level page: {}", e),
        })
    }
}

/// Body of a vote submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub user_id: String,
    pub direction: VoteDirection,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_json(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "text": "body",
            "authorId": "a",
            "createdAt": "2024-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_envelope_failure_maps_to_api_error() {
        let env: ApiEnvelope =
            serde_json::from_value(json!({"success": false, "error": "nope"})).unwrap();
        assert_eq!(
            env.into_payload(200),
            Err(LoadError::Api {
                status: 200,
                message: "nope".to_string()
            })
        );
    }

    #[test]
    fn test_envelope_missing_data_is_null() {
        let env: ApiEnvelope = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(env.into_payload(200), Ok(serde_json::Value::Null));
        assert!(LevelPage::from_value(serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_level_page_missing_items() {
        let err = LevelPage::from_value(json!({"pagination": {}})).unwrap_err();
        assert_eq!(
            err,
            LoadError::Malformed {
                message: "missing items array".to_string()
            }
        );
    }

    #[test]
    fn test_level_page_non_list_items() {
        let err = LevelPage::from_value(json!({"items": {"a": 1}})).unwrap_err();
        assert!(err.to_string().contains("not a list"));
    }

    #[test]
    fn test_level_page_parses() {
        let page = LevelPage::from_value(json!({
            "items": [{
                "levelNumber": 1,
                "focusedNode": node_json("n1"),
                "siblings": [node_json("n1"), node_json("n2")],
                "paginationCursor": "c-2"
            }],
            "pagination": {"nextCursor": "c-2", "hasMore": true, "matchingRepliesCount": 4}
        }))
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].siblings.len(), 2);
        assert_eq!(
            page.pagination.effective_next_cursor(),
            Some(&Cursor::new("c-2"))
        );
        assert_eq!(page.pagination.matching_replies_count, 4);
    }

    #[test]
    fn test_page_info_without_more_has_no_cursor() {
        let info = PageInfo {
            next_cursor: Some(Cursor::new("stale")),
            has_more: false,
            ..Default::default()
        };
        assert!(info.effective_next_cursor().is_none());
    }

    #[test]
    fn test_vote_request_shape() {
        let body = VoteRequest {
            user_id: "u1".to_string(),
            direction: VoteDirection::Down,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"userId": "u1", "direction": "down"})
        );
    }
}
