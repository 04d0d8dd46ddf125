//! Unit tests for model types and their constructors.
//!
//! Covers level validation, cursor helpers, quote invariants,
//! vote tally arithmetic and duplicate group views.

use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

fn node(id: &str) -> Node {
    Node::new(id, format!("text of {}", id), "author")
}

// ============================================================================
// Node & Cursor tests
// ============================================================================

#[test]
fn test_node_builders() {
    let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let n = Node::new("n1", "hello", "alice")
        .with_created_at(ts)
        .with_metadata(json!({"tag": "x"}));
    assert_eq!(n.created_at, ts);
    assert_eq!(n.metadata, Some(json!({"tag": "x"})));
}

#[test]
fn test_node_deserializes_camel_case() {
    let n: Node = serde_json::from_value(json!({
        "id": "n1",
        "text": "hi",
        "authorId": "bob",
        "createdAt": "2024-03-01T12:00:00Z"
    }))
    .unwrap();
    assert_eq!(n.author_id, "bob");
    assert!(n.metadata.is_none());
}

#[test]
fn test_cursor_children_of() {
    let c = Cursor::children_of("node-7", 3);
    assert_eq!(c.as_str(), "children:node-7:3");
    assert_eq!(c.to_string(), "children:node-7:3");
    assert_eq!(serde_json::to_value(&c).unwrap(), json!("children:node-7:3"));
}

// ============================================================================
// Text helper tests
// ============================================================================

#[test]
fn test_slice_chars_multibyte() {
    let text = "héllo wörld";
    assert_eq!(char_len(text), 11);
    assert_eq!(slice_chars(text, 1, 5), "éllo");
    assert_eq!(slice_chars(text, 6, 11), "wörld");
    assert_eq!(slice_chars(text, 4, 4), "");
    assert_eq!(slice_chars(text, 9, 50), "ld");
}

// ============================================================================
// Quote tests
// ============================================================================

#[test]
fn test_quote_from_source() {
    let q = Quote::from_source("the quick fox", 4, 9, Some("p1".to_string())).unwrap();
    assert_eq!(q.text(), "quick");
    assert_eq!(q.start_offset(), 4);
    assert_eq!(q.end_offset(), 9);
    assert_eq!(q.source_post_id(), Some("p1"));
    assert!(q.matches("the quick fox"));
    assert!(!q.matches("the slow fox"));
}

#[test]
fn test_quote_from_source_rejects_bad_ranges() {
    assert_eq!(
        Quote::from_source("abc", 2, 1, None),
        Err(QuoteError::InvalidRange {
            start: 2,
            end: 1,
            len: 3
        })
    );
    assert!(Quote::from_source("abc", 0, 4, None).is_err());
}

#[test]
fn test_quote_deserialize_validates_span() {
    let ok: Result<Quote, _> = serde_json::from_value(json!({
        "text": "abc", "startOffset": 2, "endOffset": 5
    }));
    assert!(ok.is_ok());

    let bad: Result<Quote, _> = serde_json::from_value(json!({
        "text": "abc", "startOffset": 5, "endOffset": 2
    }));
    assert!(bad.is_err());

    let wrong_len: Result<Quote, _> = serde_json::from_value(json!({
        "text": "abc", "startOffset": 0, "endOffset": 10
    }));
    assert!(wrong_len.is_err());
}

#[test]
fn test_quote_serialize_round_shape() {
    let q = Quote::from_source("abcdef", 1, 3, None).unwrap();
    assert_eq!(
        serde_json::to_value(&q).unwrap(),
        json!({"text": "bc", "startOffset": 1, "endOffset": 3})
    );
}

// ============================================================================
// Level tests
// ============================================================================

#[test]
fn test_level_new_valid() {
    let level = Level::new(
        1,
        node("a"),
        vec![node("a"), node("b")],
        None,
        LevelContinuation::Normal {
            cursor: Cursor::new("c1"),
        },
    )
    .unwrap();
    assert_eq!(level.level_number(), 1);
    assert_eq!(level.focused().id, "a");
    assert_eq!(level.cursor(), Some(&Cursor::new("c1")));
    assert!(!level.is_terminal());
    assert!(level.has_alternatives());
}

#[test]
fn test_level_requires_focused_in_siblings() {
    let err = Level::new(
        2,
        node("x"),
        vec![node("a")],
        None,
        LevelContinuation::Terminal,
    )
    .unwrap_err();
    assert!(matches!(err, LoadError::Malformed { .. }));
}

#[test]
fn test_level_rejects_duplicate_siblings() {
    let err = Level::new(
        1,
        node("a"),
        vec![node("a"), node("a")],
        None,
        LevelContinuation::Terminal,
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate sibling a"));
}

#[test]
fn test_level_rejects_level_zero() {
    assert!(Level::new(0, node("a"), vec![node("a")], None, LevelContinuation::Terminal).is_err());
}

#[test]
fn test_level_refocused_moves_cursor_to_children() {
    let level = Level::new(
        4,
        node("a"),
        vec![node("a"), node("b")],
        None,
        LevelContinuation::Terminal,
    )
    .unwrap();
    let next = level.refocused("b").unwrap();
    assert_eq!(next.focused().id, "b");
    assert_eq!(next.siblings().len(), 2);
    assert_eq!(next.cursor(), Some(&Cursor::children_of("b", 5)));
    assert!(level.refocused("zzz").is_none());
}

#[test]
fn test_level_refocused_reads_quote_from_metadata() {
    let b = node("b").with_metadata(json!({
        "quote": {"text": "of", "startOffset": 5, "endOffset": 7}
    }));
    let level = Level::new(
        2,
        node("a"),
        vec![node("a"), b],
        None,
        LevelContinuation::Terminal,
    )
    .unwrap();
    let next = level.refocused("b").unwrap();
    assert_eq!(next.quote().map(|q| q.text()), Some("of"));
}

#[test]
fn test_level_continuation_tagged_serialization() {
    assert_eq!(
        serde_json::to_value(LevelContinuation::Terminal).unwrap(),
        json!({"kind": "terminal"})
    );
    assert_eq!(
        serde_json::to_value(LevelContinuation::Normal {
            cursor: Cursor::new("abc")
        })
        .unwrap(),
        json!({"kind": "normal", "cursor": "abc"})
    );
}

// ============================================================================
// Vote tests
// ============================================================================

#[test]
fn test_vote_direction_parse() {
    assert_eq!("UP".parse::<VoteDirection>(), Ok(VoteDirection::Up));
    assert_eq!("downvote".parse::<VoteDirection>(), Ok(VoteDirection::Down));
    assert!("sideways".parse::<VoteDirection>().is_err());
    assert_eq!(VoteDirection::Up.opposite(), VoteDirection::Down);
}

#[test]
fn test_vote_tally_empty_percentage_is_zero() {
    let tally = VoteTally::new();
    assert_eq!(tally.total_votes(), 0);
    assert_eq!(tally.upvote_percentage(), 0.0);
}

#[test]
fn test_vote_tally_three_up_one_down() {
    let mut tally = VoteTally::new();
    for user in ["u1", "u2", "u3"] {
        tally.apply(user, VoteDirection::Up);
    }
    tally.apply("u4", VoteDirection::Down);
    assert_eq!(tally.total_score, 2);
    assert_eq!(tally.upvote_percentage(), 75.0);
}

#[test]
fn test_vote_tally_flip_and_idempotence() {
    let mut tally = VoteTally::new();
    assert_eq!(tally.apply("u1", VoteDirection::Up), VoteChange::Added);
    assert_eq!(tally.apply("u1", VoteDirection::Up), VoteChange::Unchanged);
    assert_eq!(tally.apply("u1", VoteDirection::Down), VoteChange::Flipped);
    assert_eq!(tally.total_votes(), 1);
    assert_eq!(tally.vote_of("u1"), Some(VoteDirection::Down));
    assert_eq!(tally.total_score, -1);
}

#[test]
fn test_vote_tally_reconcile_recomputes_score() {
    let mut tally = VoteTally::new();
    tally.apply("u1", VoteDirection::Up);

    let confirmed = VoteTally {
        upvotes: ["a", "b"].iter().map(|s| s.to_string()).collect(),
        downvotes: ["b", "c", "d"].iter().map(|s| s.to_string()).collect(),
        total_score: 99,
    };
    tally.reconcile(confirmed);
    assert_eq!(tally.vote_of("u1"), None);
    assert_eq!(tally.vote_of("b"), Some(VoteDirection::Down));
    assert_eq!(tally.total_score, 1 - 3);
}

// ============================================================================
// Duplicate group tests
// ============================================================================

#[test]
fn test_duplicate_reply_flattened_json() {
    let quote = Quote::from_source("parent text", 0, 6, None).unwrap();
    let json = json!({
        "id": "r2",
        "authorId": "u",
        "createdAt": "2024-01-01T00:00:00Z",
        "text": "same idea",
        "quote": {"text": "parent", "startOffset": 0, "endOffset": 6},
        "similarityScore": 0.91
    });
    let dup: DuplicateReply = serde_json::from_value(json).unwrap();
    assert_eq!(dup.id(), "r2");
    assert_eq!(dup.reply.quote, quote);
    assert_eq!(dup.votes, VoteTally::default());
}

#[test]
fn test_duplicate_group_view() {
    let quote = Quote::from_source("parent", 0, 6, None).unwrap();
    let original = Reply::new("r1", "alice", "idea", quote.clone());
    let mut votes = VoteTally::new();
    votes.apply("u1", VoteDirection::Up);
    votes.apply("u2", VoteDirection::Down);

    let mut group = DuplicateGroup::new(original, 0.8).with_parent_connection("disc-1");
    group
        .duplicates
        .push(DuplicateReply::new(Reply::new("r2", "bob", "idea!", quote), 0.9).with_votes(votes));

    let view = group.view();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].rank, 1);
    assert_eq!(view[0].reply_id, "r2");
    assert_eq!(view[0].upvote_percentage, 50.0);
    assert_eq!(view[0].total_score, 0);
    assert!(group.parent_connections.contains("disc-1"));
    assert!(group.duplicate("r2").is_some());
    assert!(group.duplicate("r9").is_none());
}

#[test]
fn test_reply_from_node_requires_quote() {
    let plain = node("r1");
    assert!(Reply::from_node(&plain).is_none());

    let quoting = node("r2").with_metadata(json!({
        "quote": {"text": "of", "startOffset": 5, "endOffset": 7, "sourcePostId": "p1"}
    }));
    let reply = Reply::from_node(&quoting).unwrap();
    assert_eq!(reply.id, "r2");
    assert_eq!(reply.text, "text of r2");
    assert_eq!(reply.quote.source_post_id(), Some("p1"));
}
