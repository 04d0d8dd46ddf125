//! Domain model for branching stories.
//!
//! Nodes, levels, quotes, replies and duplicate groups as they travel
//! between the story service and the navigation core. All offsets into
//! node text count Unicode scalar values, not bytes.

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LoadError, QuoteError};

/// A post or reply in the story tree.
///
/// Fetched nodes are never edited in place; levels hold their own clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node identifier.
    pub id: String,
    /// Normalized plain text of the node.
    pub text: String,
    /// Author user identifier.
    pub author_id: String,
    /// When the node was created.
    pub created_at: DateTime<Utc>,
    /// Optional service-defined metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Node {
    /// Create a node stamped with the current time.
    pub fn new(id: impl Into<String>, text: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            author_id: author_id.into(),
            created_at: Utc::now(),
            metadata: None,
        }
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Quote this node anchors to, when its metadata carries a valid one.
    pub fn quote(&self) -> Option<Quote> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("quote"))
            .and_then(|q| serde_json::from_value::<Quote>(q.clone()).ok())
    }
}

/// Opaque pagination token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a service-issued token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Continuation token for the children of `node_id`, starting at
    /// `level_number`.
    pub fn children_of(node_id: &str, level_number: u32) -> Self {
        Self(format!("children:{}:{}", node_id, level_number))
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of Unicode scalar values in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Slice `text` by scalar-value offsets. Offsets past the end clamp to it.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    let byte_at = |offset: usize| {
        text.char_indices()
            .nth(offset)
            .map(|(i, _)| i)
            .unwrap_or(text.len())
    };
    let start_byte = byte_at(start);
    let end_byte = byte_at(end).max(start_byte);
    &text[start_byte..end_byte]
}

/// An immutable contiguous span of a node's text that a reply is anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "QuoteFields")]
pub struct Quote {
    text: String,
    start_offset: usize,
    end_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_post_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteFields {
    text: String,
    start_offset: usize,
    end_offset: usize,
    #[serde(default)]
    source_post_id: Option<String>,
}

impl TryFrom<QuoteFields> for Quote {
    type Error = QuoteError;

    fn try_from(fields: QuoteFields) -> Result<Self, Self::Error> {
        let span = fields.end_offset.checked_sub(fields.start_offset);
        if span != Some(char_len(&fields.text)) {
            return Err(QuoteError::InvalidRange {
                start: fields.start_offset,
                end: fields.end_offset,
                len: char_len(&fields.text),
            });
        }
        Ok(Self {
            text: fields.text,
            start_offset: fields.start_offset,
            end_offset: fields.end_offset,
            source_post_id: fields.source_post_id,
        })
    }
}

impl Quote {
    /// Cut a quote out of `source` at `start..end`.
    ///
    /// Fails unless `0 <= start <= end <= len(source)`. An empty span is
    /// allowed here; selection-level emptiness is rejected by the resolver.
    pub fn from_source(
        source: &str,
        start: usize,
        end: usize,
        source_post_id: Option<String>,
    ) -> Result<Self, QuoteError> {
        let len = char_len(source);
        if start > end || end > len {
            return Err(QuoteError::InvalidRange { start, end, len });
        }
        Ok(Self {
            text: slice_chars(source, start, end).to_string(),
            start_offset: start,
            end_offset: end,
            source_post_id,
        })
    }

    /// The quoted text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Start offset into the source text.
    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    /// End offset (exclusive) into the source text.
    pub fn end_offset(&self) -> usize {
        self.end_offset
    }

    /// Node the quote was taken from, if recorded.
    pub fn source_post_id(&self) -> Option<&str> {
        self.source_post_id.as_deref()
    }

    /// Whether the quote still matches `source` at its offsets.
    pub fn matches(&self, source: &str) -> bool {
        self.end_offset <= char_len(source)
            && slice_chars(source, self.start_offset, self.end_offset) == self.text
    }
}

/// What follows a level: more levels behind a cursor, or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LevelContinuation {
    /// More levels can be requested with this cursor.
    Normal { cursor: Cursor },
    /// Last level of the story.
    Terminal,
}

impl LevelContinuation {
    /// Continuation for an optional next cursor.
    pub fn from_cursor(cursor: Option<Cursor>) -> Self {
        match cursor {
            Some(cursor) => LevelContinuation::Normal { cursor },
            None => LevelContinuation::Terminal,
        }
    }
}

/// One position in the reply chain: a focused node and its competing siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    level_number: u32,
    focused: Node,
    siblings: Vec<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quote: Option<Quote>,
    continuation: LevelContinuation,
}

impl Level {
    /// Build a level, checking that `siblings` holds `focused` and has unique ids.
    pub fn new(
        level_number: u32,
        focused: Node,
        siblings: Vec<Node>,
        quote: Option<Quote>,
        continuation: LevelContinuation,
    ) -> Result<Self, LoadError> {
        if level_number == 0 {
            return Err(LoadError::Malformed {
                message: "level numbers start at 1".to_string(),
            });
        }
        let mut seen = HashSet::with_capacity(siblings.len());
        if let Some(dup) = siblings.iter().find(|n| !seen.insert(n.id.as_str())) {
            return Err(LoadError::Malformed {
                message: format!("duplicate sibling {} at level {}", dup.id, level_number),
            });
        }
        if !seen.contains(focused.id.as_str()) {
            return Err(LoadError::Malformed {
                message: format!(
                    "focused node {} missing from siblings at level {}",
                    focused.id, level_number
                ),
            });
        }
        Ok(Self {
            level_number,
            focused,
            siblings,
            quote,
            continuation,
        })
    }

    /// 1-based position in the chain.
    pub fn level_number(&self) -> u32 {
        self.level_number
    }

    /// The node currently shown at this level.
    pub fn focused(&self) -> &Node {
        &self.focused
    }

    /// All nodes competing for this position, focused node included.
    pub fn siblings(&self) -> &[Node] {
        &self.siblings
    }

    /// Quote the focused node is anchored to, if any.
    pub fn quote(&self) -> Option<&Quote> {
        self.quote.as_ref()
    }

    /// What follows this level.
    pub fn continuation(&self) -> &LevelContinuation {
        &self.continuation
    }

    /// Cursor for the next page, `None` when terminal.
    pub fn cursor(&self) -> Option<&Cursor> {
        match &self.continuation {
            LevelContinuation::Normal { cursor } => Some(cursor),
            LevelContinuation::Terminal => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.continuation, LevelContinuation::Terminal)
    }

    /// Look up a sibling by id.
    pub fn sibling(&self, node_id: &str) -> Option<&Node> {
        self.siblings.iter().find(|n| n.id == node_id)
    }

    /// Whether there is anything to switch to.
    pub fn has_alternatives(&self) -> bool {
        self.siblings.len() > 1
    }

    pub(crate) fn with_continuation(mut self, continuation: LevelContinuation) -> Self {
        self.continuation = continuation;
        self
    }

    /// Copy of this level focused on `node_id`, continuing under its children.
    ///
    /// Returns `None` if `node_id` is not a sibling. The quote belongs to
    /// the focused reply, so it is taken from the new focus's metadata when
    /// present and dropped otherwise.
    pub(crate) fn refocused(&self, node_id: &str) -> Option<Self> {
        let node = self.sibling(node_id)?.clone();
        let quote = node.quote();
        Some(Self {
            level_number: self.level_number,
            continuation: LevelContinuation::Normal {
                cursor: Cursor::children_of(&node.id, self.level_number + 1),
            },
            focused: node,
            siblings: self.siblings.clone(),
            quote,
        })
    }
}

/// Direction of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            VoteDirection::Up => VoteDirection::Down,
            VoteDirection::Down => VoteDirection::Up,
        }
    }
}

impl std::fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for VoteDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" | "upvote" => Ok(VoteDirection::Up),
            "down" | "downvote" => Ok(VoteDirection::Down),
            _ => Err(format!("Unknown vote direction: {}", s)),
        }
    }
}

/// Effect of recording a vote on a tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChange {
    /// The user had not voted before.
    Added,
    /// The user's earlier vote moved to the other direction.
    Flipped,
    /// The user had already voted this way.
    Unchanged,
}

/// Votes cast on a duplicate reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTally {
    #[serde(default)]
    pub upvotes: BTreeSet<String>,
    #[serde(default)]
    pub downvotes: BTreeSet<String>,
    /// Always `|upvotes| - |downvotes|` once recomputed.
    #[serde(default)]
    pub total_score: i64,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `user_id`'s vote, moving an opposite vote instead of double counting.
    pub fn apply(&mut self, user_id: &str, direction: VoteDirection) -> VoteChange {
        if self.vote_of(user_id) == Some(direction) {
            return VoteChange::Unchanged;
        }
        let flipped = self.side_mut(direction.opposite()).remove(user_id);
        self.side_mut(direction).insert(user_id.to_string());
        self.recompute();
        if flipped {
            VoteChange::Flipped
        } else {
            VoteChange::Added
        }
    }

    fn side_mut(&mut self, direction: VoteDirection) -> &mut BTreeSet<String> {
        match direction {
            VoteDirection::Up => &mut self.upvotes,
            VoteDirection::Down => &mut self.downvotes,
        }
    }

    /// Restore the derived score and drop users recorded in both sets.
    ///
    /// A user found on both sides keeps only the downvote; the authority
    /// resolves the real state on the next reconcile.
    pub fn recompute(&mut self) {
        let conflicted: Vec<String> = self
            .upvotes
            .intersection(&self.downvotes)
            .cloned()
            .collect();
        for user in conflicted {
            self.upvotes.remove(&user);
        }
        self.total_score = self.upvotes.len() as i64 - self.downvotes.len() as i64;
    }

    /// Replace the local tally with one confirmed by the vote authority.
    pub fn reconcile(&mut self, confirmed: VoteTally) {
        *self = confirmed;
        self.recompute();
    }

    pub fn total_votes(&self) -> usize {
        self.upvotes.len() + self.downvotes.len()
    }

    /// Share of upvotes in percent; 0 when nobody has voted.
    pub fn upvote_percentage(&self) -> f64 {
        let total = self.total_votes();
        if total == 0 {
            0.0
        } else {
            self.upvotes.len() as f64 / total as f64 * 100.0
        }
    }

    /// Direction `user_id` voted, if any.
    pub fn vote_of(&self, user_id: &str) -> Option<VoteDirection> {
        if self.upvotes.contains(user_id) {
            Some(VoteDirection::Up)
        } else if self.downvotes.contains(user_id) {
            Some(VoteDirection::Down)
        } else {
            None
        }
    }
}

/// A reply anchored to a quote of its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: String,
    pub author_id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub quote: Quote,
}

impl Reply {
    /// Create a reply stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
        quote: Quote,
    ) -> Self {
        Self {
            id: id.into(),
            author_id: author_id.into(),
            created_at: Utc::now(),
            text: text.into(),
            quote,
        }
    }

    /// Set the creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Reply view of a fetched node. `None` unless the node carries a quote.
    pub fn from_node(node: &Node) -> Option<Self> {
        let quote = node.quote()?;
        Some(Self {
            id: node.id.clone(),
            author_id: node.author_id.clone(),
            created_at: node.created_at,
            text: node.text.clone(),
            quote,
        })
    }
}

/// A reply the classifier judged similar to a group's original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReply {
    #[serde(flatten)]
    pub reply: Reply,
    /// Classifier similarity to the original (0.0-1.0).
    pub similarity_score: f64,
    #[serde(default)]
    pub votes: VoteTally,
}

impl DuplicateReply {
    pub fn new(reply: Reply, similarity_score: f64) -> Self {
        Self {
            reply,
            similarity_score,
            votes: VoteTally::new(),
        }
    }

    /// Attach an existing tally.
    pub fn with_votes(mut self, votes: VoteTally) -> Self {
        self.votes = votes;
        self
    }

    pub fn id(&self) -> &str {
        &self.reply.id
    }
}

/// A cluster of near-identical replies, ranked for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Minimum similarity for membership (0.0-1.0).
    pub threshold: f64,
    pub original_reply: Reply,
    /// Members in display order.
    pub duplicates: Vec<DuplicateReply>,
    /// Discussions this group is linked from.
    #[serde(default)]
    pub parent_connections: BTreeSet<String>,
}

impl DuplicateGroup {
    /// Create an empty group for `original_reply`.
    pub fn new(original_reply: Reply, threshold: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            threshold,
            original_reply,
            duplicates: Vec::new(),
            parent_connections: BTreeSet::new(),
        }
    }

    /// Link the group to a discussion.
    pub fn with_parent_connection(mut self, discussion_id: impl Into<String>) -> Self {
        self.parent_connections.insert(discussion_id.into());
        self
    }

    /// Find a member by reply id.
    pub fn duplicate(&self, reply_id: &str) -> Option<&DuplicateReply> {
        self.duplicates.iter().find(|d| d.id() == reply_id)
    }

    pub(crate) fn duplicate_mut(&mut self, reply_id: &str) -> Option<&mut DuplicateReply> {
        self.duplicates.iter_mut().find(|d| d.id() == reply_id)
    }

    /// Display rows in current order.
    pub fn view(&self) -> Vec<DuplicateView> {
        self.duplicates
            .iter()
            .enumerate()
            .map(|(i, d)| DuplicateView {
                rank: i + 1,
                reply_id: d.reply.id.clone(),
                author_id: d.reply.author_id.clone(),
                similarity_score: d.similarity_score,
                upvotes: d.votes.upvotes.len(),
                downvotes: d.votes.downvotes.len(),
                total_score: d.votes.total_score,
                upvote_percentage: d.votes.upvote_percentage(),
            })
            .collect()
    }
}

/// One display row of a ranked duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateView {
    /// 1-based display position.
    pub rank: usize,
    pub reply_id: String,
    pub author_id: String,
    pub similarity_score: f64,
    pub upvotes: usize,
    pub downvotes: usize,
    pub total_score: i64,
    pub upvote_percentage: f64,
}
