//! Story service access.
//!
//! [`StoryDataSource`] is the seam between the navigation core and the
//! external data service; [`StoryApiClient`] implements it over HTTP.

mod client;
mod types;

pub use client::StoryApiClient;
pub use types::*;

use async_trait::async_trait;

use crate::error::LoadResult;
use crate::model::{Cursor, DuplicateReply, Node, VoteDirection};

/// Data the navigation core consumes from the story service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoryDataSource: Send + Sync {
    /// Fetch the page of levels under `root_id` starting at `cursor`.
    async fn fetch_levels(&self, root_id: &str, cursor: &Cursor) -> LoadResult<LevelPage>;

    /// Fetch a single node, `None` when the id is unknown.
    async fn fetch_node(&self, id: &str) -> LoadResult<Option<Node>>;

    /// Fetch replies the classifier considers duplicates of `original_reply_id`.
    async fn fetch_duplicate_candidates(
        &self,
        original_reply_id: &str,
    ) -> LoadResult<Vec<DuplicateReply>>;

    /// Forward a vote to the authority that enforces one vote per user.
    async fn submit_vote(
        &self,
        reply_id: &str,
        user_id: &str,
        direction: VoteDirection,
    ) -> LoadResult<()>;
}
