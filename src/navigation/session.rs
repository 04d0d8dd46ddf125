//! Story sessions: pagination loading and sibling navigation over a
//! shared [`LevelStore`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

use super::store::{LevelStore, LoadState};
use crate::api::{LevelPage, StoryDataSource};
use crate::error::{AppError, AppResult, LoadResult, NavigationError};
use crate::model::{Cursor, Level, Node};

type PageCell = Arc<OnceCell<LoadResult<LevelPage>>>;

/// In-flight fetches, keyed by cursor and the generation that started them.
type InFlight = HashMap<(Cursor, u64), PageCell>;

/// Levels appended by one page load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelBatch {
    /// Newly appended levels, in order.
    pub levels: Vec<Level>,
    /// Whether the story ended with this page.
    pub terminal: bool,
    /// Generation the page was applied under.
    pub generation: u64,
}

/// What a `request_next` call achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// The page was appended by this call.
    Appended(LevelBatch),
    /// This call shared a fetch that another caller already applied.
    AlreadyApplied,
    /// Navigation or reset happened while the fetch was in flight.
    Stale,
    /// The story has ended; nothing was requested.
    Terminal,
}

/// What a `select_sibling` call achieved.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationOutcome {
    /// Already focused, or nothing else to focus.
    Unchanged,
    /// Focus moved; `load` is the follow-up fetch under the new focus.
    Refocused { load: LoadResult<LoadOutcome> },
}

/// One reader's traversal of a story.
///
/// Owns the level store behind a single lock: appends, truncations and
/// resets are applied whole, and readers only ever see complete snapshots.
/// Clones share the same session.
#[derive(Clone)]
pub struct StorySession {
    source: Arc<dyn StoryDataSource>,
    store: Arc<RwLock<LevelStore>>,
    in_flight: Arc<Mutex<InFlight>>,
}

impl StorySession {
    /// Start a session at an already fetched root node.
    pub fn new(source: Arc<dyn StoryDataSource>, root: Node) -> Self {
        info!(root_id = %root.id, "Story session started");
        Self {
            source,
            store: Arc::new(RwLock::new(LevelStore::new(root))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Fetch `root_id` and start a session at it.
    pub async fn open(source: Arc<dyn StoryDataSource>, root_id: &str) -> AppResult<Self> {
        let root = fetch_root(source.as_ref(), root_id).await?;
        Ok(Self::new(source, root))
    }

    /// Copy of the current store.
    pub async fn snapshot(&self) -> LevelStore {
        self.store.read().await.clone()
    }

    /// Copy of the current levels.
    pub async fn levels(&self) -> Vec<Level> {
        self.store.read().await.levels().to_vec()
    }

    pub async fn state(&self) -> LoadState {
        self.store.read().await.state()
    }

    pub async fn generation(&self) -> u64 {
        self.store.read().await.generation()
    }

    /// Fetch and append the next page of levels.
    ///
    /// Concurrent calls for the same cursor and generation share one fetch.
    /// A result that arrives after the generation moved on is dropped, and
    /// later generations never join a fetch started under an earlier one.
    pub async fn request_next(&self) -> LoadResult<LoadOutcome> {
        let (root_id, cursor, generation) = {
            let mut store = self.store.write().await;
            let root_id = store.root().id.clone();
            match store.begin_load() {
                Some((cursor, generation)) => (root_id, cursor, generation),
                None => {
                    debug!(root_id = %root_id, "Story already terminal, nothing to load");
                    return Ok(LoadOutcome::Terminal);
                }
            }
        };

        let key = (cursor.clone(), generation);
        let cell = {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.entry(key.clone()).or_default().clone()
        };

        let result = cell
            .get_or_init(|| async {
                debug!(root_id = %root_id, cursor = %cursor, generation, "Fetching levels");
                self.source.fetch_levels(&root_id, &cursor).await
            })
            .await
            .clone();

        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &cell))
            {
                in_flight.remove(&key);
            }
        }

        let mut store = self.store.write().await;

        if store.generation() != generation {
            debug!(
                cursor = %cursor,
                requested = generation,
                current = store.generation(),
                "Discarding stale level page"
            );
            return Ok(LoadOutcome::Stale);
        }
        if store.cursor() != Some(&cursor) {
            return Ok(LoadOutcome::AlreadyApplied);
        }

        let applied = result.and_then(|page| store.apply_page(page));
        match applied {
            Ok(next) => {
                let before = store.len();
                *store = next;
                let batch = LevelBatch {
                    levels: store.levels()[before..].to_vec(),
                    terminal: store.is_terminal(),
                    generation,
                };
                info!(
                    cursor = %cursor,
                    appended = batch.levels.len(),
                    total = store.len(),
                    terminal = batch.terminal,
                    "Appended levels"
                );
                Ok(LoadOutcome::Appended(batch))
            }
            Err(e) => {
                store.fail_load();
                warn!(cursor = %cursor, error = %e, "Level load failed");
                Err(e)
            }
        }
    }

    /// Keep loading until level `level_number` exists or the story ends.
    ///
    /// Returns whether the level is loaded. Stops early if navigation
    /// supersedes the load.
    pub async fn load_until(&self, level_number: u32) -> LoadResult<bool> {
        loop {
            let (len, cursor) = {
                let store = self.store.read().await;
                (store.len(), store.cursor().cloned())
            };
            if len >= level_number as usize {
                return Ok(true);
            }

            match self.request_next().await? {
                LoadOutcome::Terminal | LoadOutcome::Stale => break,
                LoadOutcome::Appended(_) | LoadOutcome::AlreadyApplied => {
                    let store = self.store.read().await;
                    if store.len() == len && store.cursor() == cursor.as_ref() {
                        break;
                    }
                }
            }
        }
        Ok(self.store.read().await.len() >= level_number as usize)
    }

    /// Move focus at `level_index` to `node_id` and drop every deeper level.
    ///
    /// Does not fetch; see [`StorySession::select_sibling`]. Returns whether
    /// the focus changed.
    pub async fn focus_sibling(
        &self,
        level_index: usize,
        node_id: &str,
    ) -> Result<bool, NavigationError> {
        let mut store = self.store.write().await;
        match store.select_sibling(level_index, node_id)? {
            Some(next) => {
                info!(
                    level_number = level_index + 1,
                    node_id = %node_id,
                    dropped = store.len() - next.len(),
                    generation = next.generation(),
                    "Sibling selected"
                );
                *store = next;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Focus `node_id` at `level_index`, then load the levels under it.
    pub async fn select_sibling(
        &self,
        level_index: usize,
        node_id: &str,
    ) -> Result<NavigationOutcome, NavigationError> {
        if !self.focus_sibling(level_index, node_id).await? {
            return Ok(NavigationOutcome::Unchanged);
        }
        let load = self.request_next().await;
        Ok(NavigationOutcome::Refocused { load })
    }

    /// Discard every level and start over at a new root.
    pub async fn reset(&self, root: Node) {
        let mut store = self.store.write().await;
        info!(
            old_root = %store.root().id,
            new_root = %root.id,
            "Story session reset"
        );
        *store = store.reset(root);
    }

    /// Fetch `root_id` and reset to it. The session is untouched if the fetch fails.
    pub async fn reset_to(&self, root_id: &str) -> AppResult<()> {
        let root = fetch_root(self.source.as_ref(), root_id).await?;
        self.reset(root).await;
        Ok(())
    }
}

async fn fetch_root(source: &dyn StoryDataSource, root_id: &str) -> AppResult<Node> {
    source
        .fetch_node(root_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            resource: "Node".to_string(),
            id: root_id.to_string(),
        })
}
