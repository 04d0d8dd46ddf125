//! Level store: the ordered chain of levels for one story session.
//!
//! Every transition here is a pure function from one snapshot to the
//! next. [`super::StorySession`] serializes them behind its lock; tests
//! drive them directly.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::api::LevelPage;
use crate::error::{LoadError, LoadResult, NavigationError};
use crate::model::{Cursor, Level, LevelContinuation, Node};

/// Pagination state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// Nothing requested since the session (or its last navigation) began.
    #[default]
    Idle,
    /// A page request is outstanding.
    Loading,
    /// The last page was appended and more can be requested.
    Loaded,
    /// The last request failed; retrying uses the same cursor.
    Error,
    /// The story has ended. Only a reset leaves this state.
    Terminal,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Idle => "idle",
            LoadState::Loading => "loading",
            LoadState::Loaded => "loaded",
            LoadState::Error => "error",
            LoadState::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LoadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(LoadState::Idle),
            "loading" => Ok(LoadState::Loading),
            "loaded" => Ok(LoadState::Loaded),
            "error" => Ok(LoadState::Error),
            "terminal" => Ok(LoadState::Terminal),
            _ => Err(format!("Unknown load state: {}", s)),
        }
    }
}

/// Snapshot of a session's levels, cursor and generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelStore {
    root: Node,
    levels: Vec<Level>,
    /// Where the next page starts; `None` once terminal.
    cursor: Option<Cursor>,
    prev_cursor: Option<Cursor>,
    generation: u64,
    state: LoadState,
    matching_replies_count: u64,
}

impl LevelStore {
    /// Fresh store for a story rooted at `root`.
    pub fn new(root: Node) -> Self {
        Self {
            cursor: Some(Cursor::children_of(&root.id, 1)),
            root,
            levels: Vec::new(),
            prev_cursor: None,
            generation: 0,
            state: LoadState::Idle,
            matching_replies_count: 0,
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&Level> {
        self.levels.get(index)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Cursor the next request will use.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn prev_cursor(&self) -> Option<&Cursor> {
        self.prev_cursor.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state == LoadState::Terminal
    }

    /// Replies matching the current chain, as last reported by the service.
    pub fn matching_replies_count(&self) -> u64 {
        self.matching_replies_count
    }

    /// Total number of levels once the story is known to have ended.
    pub fn logical_size(&self) -> Option<u32> {
        if self.is_terminal() {
            Some(self.levels.last().map(Level::level_number).unwrap_or(0))
        } else {
            None
        }
    }

    /// Mark a request as outstanding, returning its cursor and generation.
    ///
    /// `None` when the story is terminal and there is nothing to request.
    pub fn begin_load(&mut self) -> Option<(Cursor, u64)> {
        let cursor = self.cursor.clone()?;
        self.state = LoadState::Loading;
        Some((cursor, self.generation))
    }

    /// Record a failed request. Levels and cursor are left untouched.
    pub fn fail_load(&mut self) {
        if self.state != LoadState::Terminal {
            self.state = LoadState::Error;
        }
    }

    /// Snapshot with `page` appended.
    ///
    /// The page is validated in full before anything is built, so a
    /// malformed page leaves no trace.
    pub fn apply_page(&self, page: LevelPage) -> LoadResult<LevelStore> {
        let next_cursor = page.pagination.effective_next_cursor().cloned();
        let first_number = self.levels.len() as u32 + 1;

        let mut focused: HashSet<String> =
            self.levels.iter().map(|l| l.focused().id.clone()).collect();
        let count = page.items.len();
        let mut appended = Vec::with_capacity(count);

        for (i, item) in page.items.into_iter().enumerate() {
            let expected = first_number + i as u32;
            if item.level_number != expected {
                return Err(LoadError::Malformed {
                    message: format!(
                        "expected level {} but received level {}",
                        expected, item.level_number
                    ),
                });
            }
            if !focused.insert(item.focused_node.id.clone()) {
                return Err(LoadError::Malformed {
                    message: format!(
                        "node {} is already focused at another level",
                        item.focused_node.id
                    ),
                });
            }

            let continuation = if i + 1 == count {
                LevelContinuation::from_cursor(next_cursor.clone())
            } else {
                let cursor = item.pagination_cursor.clone().unwrap_or_else(|| {
                    Cursor::children_of(&item.focused_node.id, expected + 1)
                });
                LevelContinuation::Normal { cursor }
            };
            appended.push(item.into_level(continuation)?);
        }

        let mut next = self.clone();
        if appended.is_empty() {
            if let Some(last) = next.levels.pop() {
                next.levels
                    .push(last.with_continuation(LevelContinuation::from_cursor(next_cursor.clone())));
            }
        }
        next.levels.extend(appended);
        next.state = if next_cursor.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Terminal
        };
        next.cursor = next_cursor;
        next.prev_cursor = page.pagination.prev_cursor;
        next.matching_replies_count = page.pagination.matching_replies_count;
        Ok(next)
    }

    /// Snapshot with `node_id` focused at `level_index` and everything deeper dropped.
    ///
    /// `Ok(None)` when nothing changes: the node is already focused, or the
    /// level has no alternatives. The returned snapshot has a bumped
    /// generation and a cursor under the new focus's children.
    pub fn select_sibling(
        &self,
        level_index: usize,
        node_id: &str,
    ) -> Result<Option<LevelStore>, NavigationError> {
        let level = self
            .levels
            .get(level_index)
            .ok_or(NavigationError::LevelOutOfRange {
                index: level_index,
                len: self.levels.len(),
            })?;

        let not_a_sibling = || NavigationError::SiblingNotFound {
            level_number: level.level_number(),
            node_id: node_id.to_string(),
        };
        if level.sibling(node_id).is_none() {
            return Err(not_a_sibling());
        }
        if level.focused().id == node_id || !level.has_alternatives() {
            return Ok(None);
        }

        if let Some(other) = self.levels[..level_index]
            .iter()
            .find(|l| l.focused().id == node_id)
        {
            return Err(NavigationError::AlreadyFocused {
                node_id: node_id.to_string(),
                level_number: other.level_number(),
            });
        }

        let refocused = level.refocused(node_id).ok_or_else(not_a_sibling)?;

        let mut levels = self.levels[..level_index].to_vec();
        let cursor = refocused.cursor().cloned();
        levels.push(refocused);

        Ok(Some(LevelStore {
            root: self.root.clone(),
            levels,
            cursor,
            prev_cursor: None,
            generation: self.generation + 1,
            state: LoadState::Idle,
            matching_replies_count: self.matching_replies_count,
        }))
    }

    /// Fresh snapshot for a new root, keeping the generation moving forward.
    pub fn reset(&self, root: Node) -> LevelStore {
        LevelStore {
            generation: self.generation + 1,
            ..LevelStore::new(root)
        }
    }

    /// Check the structural invariants of the chain.
    pub fn is_consistent(&self) -> bool {
        let numbered = self
            .levels
            .iter()
            .enumerate()
            .all(|(i, l)| l.level_number() as usize == i + 1);
        let terminal_only_last = self
            .levels
            .iter()
            .rev()
            .skip(1)
            .all(|l| !l.is_terminal());
        let mut seen = HashSet::new();
        let unique_focus = self.levels.iter().all(|l| seen.insert(l.focused().id.as_str()));
        numbered && terminal_only_last && unique_focus
    }
}
