//! # Story Tree Navigation
//!
//! Client-side core for reading branching stories: a root post with
//! replies, each reply anchored to a quote of its parent, forming a tree
//! that is read one level at a time.
//!
//! ## Features
//!
//! - **Level store**: the chain of levels a reader is looking at, with
//!   the focused node and its alternatives at each depth
//! - **Pagination loader**: cursor-driven fetching of deeper levels, with
//!   concurrent requests for the same page sharing one fetch
//! - **Sibling navigation**: switching focus at any level drops the
//!   deeper levels and discards loads that were in flight for them
//! - **Quote anchors**: selections over rendered or plain text resolved
//!   to stable character offsets
//! - **Duplicate groups**: similar replies ranked by score, with vote
//!   tallies kept consistent
//!
//! ## Architecture
//!
//! ```text
//! StorySession ──► LevelStore (snapshots)
//!      │
//!      ▼
//! StoryDataSource ──► StoryApiClient (HTTP)
//!      ▲
//!      │
//! DuplicateAggregator
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use story_tree_nav::{Config, StoryApiClient, StorySession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let client = StoryApiClient::new(&config.api, config.request.clone())?
//!         .with_pagination(&config.pagination);
//!     let session = StorySession::open(Arc::new(client), "post-1").await?;
//!     session.load_until(3).await?;
//!     for level in session.levels().await {
//!         println!("{}: {}", level.level_number(), level.focused().text);
//!     }
//!     Ok(())
//! }
//! ```

/// Story service data source trait and HTTP client.
pub mod api;
/// Configuration loaded from the environment.
pub mod config;
/// Duplicate reply grouping and vote aggregation.
pub mod duplicates;
/// Error types and result aliases.
pub mod error;
/// Nodes, levels, quotes, replies and duplicate groups.
pub mod model;
/// Level store, pagination and sibling navigation.
pub mod navigation;
/// Quote anchor resolution over node text.
pub mod quote;

pub use api::{StoryApiClient, StoryDataSource};
pub use config::Config;
pub use duplicates::{DuplicateAggregator, RankedGroup};
pub use error::{AppError, AppResult, LoadError, LoadResult};
pub use navigation::{LevelStore, LoadOutcome, LoadState, NavigationOutcome, StorySession};
