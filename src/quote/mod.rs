//! Quote anchor resolution.
//!
//! Maps a reader's selection on a node to an immutable [`Quote`] over the
//! node's normalized text. Selections arrive either as a plain-text range
//! or as offsets into the rendered markup; the latter are translated by
//! walking the markup left to right, where tags do not advance the
//! plain-text counter and a character entity advances it by one.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::QuoteError;
use crate::model::{char_len, Node, Quote};

/// A reader's selection before it is anchored to plain text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RawSelection {
    /// Quote the whole node.
    All,
    /// Scalar-value range into the normalized text.
    Plain { start: usize, end: usize },
    /// Scalar-value range into the rendered markup of the node.
    Rendered {
        markup: String,
        start: usize,
        end: usize,
    },
}

/// Plain text of `markup` with tags stripped and entities decoded.
pub fn normalize_markup(markup: &str) -> String {
    MarkupWalk::new(markup).plain
}

/// Resolve `selection` against `text` into a quote.
pub fn resolve(
    text: &str,
    selection: &RawSelection,
    source_post_id: Option<&str>,
) -> Result<Quote, QuoteError> {
    let (start, end) = match selection {
        RawSelection::All => (0, char_len(text)),
        RawSelection::Plain { start, end } => {
            check_range(*start, *end, char_len(text))?;
            (*start, *end)
        }
        RawSelection::Rendered { markup, start, end } => {
            let walk = MarkupWalk::new(markup);
            if walk.plain != text {
                return Err(QuoteError::MarkupMismatch);
            }
            check_range(*start, *end, walk.markup_len())?;
            (walk.plain_offset(*start), walk.plain_offset(*end))
        }
    };

    if start == end {
        return Err(QuoteError::EmptySelection);
    }

    let quote = Quote::from_source(text, start, end, source_post_id.map(str::to_string))?;
    debug!(
        start = quote.start_offset(),
        end = quote.end_offset(),
        source = ?quote.source_post_id(),
        "Resolved quote"
    );
    Ok(quote)
}

/// Resolve a selection on `node`, recording the node as the quote source.
pub fn resolve_on_node(node: &Node, selection: &RawSelection) -> Result<Quote, QuoteError> {
    resolve(&node.text, selection, Some(&node.id))
}

fn check_range(start: usize, end: usize, len: usize) -> Result<(), QuoteError> {
    if start > end || end > len {
        return Err(QuoteError::InvalidRange { start, end, len });
    }
    Ok(())
}

/// Result of a single left-to-right pass over markup.
struct MarkupWalk {
    plain: String,
    /// `offsets[i]` is the plain-text offset at markup offset `i`;
    /// one entry per markup char plus the end position.
    offsets: Vec<usize>,
}

impl MarkupWalk {
    fn new(markup: &str) -> Self {
        let chars: Vec<char> = markup.chars().collect();
        let mut plain = String::with_capacity(markup.len());
        let mut offsets = Vec::with_capacity(chars.len() + 1);
        let mut counter = 0;
        let mut i = 0;

        while i < chars.len() {
            let marker = match chars[i] {
                '<' => chars[i + 1..]
                    .iter()
                    .position(|c| *c == '>')
                    .map(|close| (close + 2, None)),
                '&' => decode_entity(&chars[i..]).map(|(ch, width)| (width, Some(ch))),
                _ => None,
            };

            match marker {
                Some((width, decoded)) => {
                    offsets.extend(std::iter::repeat(counter).take(width));
                    if let Some(ch) = decoded {
                        plain.push(ch);
                        counter += 1;
                    }
                    i += width;
                }
                None => {
                    offsets.push(counter);
                    plain.push(chars[i]);
                    counter += 1;
                    i += 1;
                }
            }
        }
        offsets.push(counter);

        Self { plain, offsets }
    }

    fn markup_len(&self) -> usize {
        self.offsets.len() - 1
    }

    fn plain_offset(&self, markup_offset: usize) -> usize {
        self.offsets[markup_offset]
    }
}

/// Decode an entity at the start of `chars`, returning the char and its width.
fn decode_entity(chars: &[char]) -> Option<(char, usize)> {
    // Longest supported form is a numeric entity like "&#x10FFFF;".
    let semi = chars.iter().take(10).position(|c| *c == ';')?;
    let name: String = chars[1..semi].iter().collect();
    let decoded = match name.as_str() {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)?
        }
    };
    Some((decoded, semi + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rendered(markup: &str, selected: &str) -> RawSelection {
        let byte_start = markup.find(selected).unwrap();
        let start = markup[..byte_start].chars().count();
        RawSelection::Rendered {
            markup: markup.to_string(),
            start,
            end: start + selected.chars().count(),
        }
    }

    #[test]
    fn test_select_all() {
        let q = resolve("whole text", &RawSelection::All, None).unwrap();
        assert_eq!(q.start_offset(), 0);
        assert_eq!(q.end_offset(), 10);
        assert_eq!(q.text(), "whole text");
    }

    #[test]
    fn test_select_all_on_empty_text_is_empty_selection() {
        assert_eq!(
            resolve("", &RawSelection::All, None),
            Err(QuoteError::EmptySelection)
        );
    }

    #[test]
    fn test_plain_round_trip_every_range() {
        for text in ["abc", "héllo wörld", "日本語のテキスト", "a\nb"] {
            let len = char_len(text);
            for s in 0..=len {
                for e in s..=len {
                    let result = resolve(text, &RawSelection::Plain { start: s, end: e }, None);
                    if s == e {
                        assert_eq!(result, Err(QuoteError::EmptySelection));
                        continue;
                    }
                    let q = result.unwrap();
                    assert_eq!(q.start_offset(), s);
                    assert_eq!(q.end_offset(), e);
                    let expected: String = text.chars().skip(s).take(e - s).collect();
                    assert_eq!(q.text(), expected);
                }
            }
        }
    }

    #[test]
    fn test_plain_invalid_range() {
        assert_eq!(
            resolve("abc", &RawSelection::Plain { start: 2, end: 1 }, None),
            Err(QuoteError::InvalidRange {
                start: 2,
                end: 1,
                len: 3
            })
        );
        assert_eq!(
            resolve("abc", &RawSelection::Plain { start: 0, end: 4 }, None),
            Err(QuoteError::InvalidRange {
                start: 0,
                end: 4,
                len: 3
            })
        );
    }

    #[test]
    fn test_normalize_markup() {
        assert_eq!(
            normalize_markup("<p>Fish &amp; <em>chips</em></p>"),
            "Fish & chips"
        );
        assert_eq!(normalize_markup("a &lt; b &#62; c &#x41;"), "a < b > c A");
        assert_eq!(normalize_markup("no markup"), "no markup");
        assert_eq!(normalize_markup("dangling < bracket"), "dangling < bracket");
        assert_eq!(normalize_markup("lonely & sign"), "lonely & sign");
    }

    #[test]
    fn test_rendered_selection_inside_tag() {
        let markup = "<p>Hello <b>brave</b> world</p>";
        let text = normalize_markup(markup);
        let q = resolve(&text, &rendered(markup, "brave"), Some("n1")).unwrap();
        assert_eq!(q.text(), "brave");
        assert_eq!(q.start_offset(), 6);
        assert_eq!(q.end_offset(), 11);
        assert_eq!(q.source_post_id(), Some("n1"));
    }

    #[test]
    fn test_rendered_selection_spanning_tags() {
        let markup = "<p>Hello <b>brave</b> world</p>";
        let text = normalize_markup(markup);
        let q = resolve(&text, &rendered(markup, "brave</b> wor"), None).unwrap();
        assert_eq!(q.text(), "brave wor");
    }

    #[test]
    fn test_rendered_offsets_stable_across_markup_density() {
        let sparse = "one two three";
        let dense = "<div><p><i>one</i> <u><s>two</s></u> <b>three</b></p></div>";
        assert_eq!(normalize_markup(dense), sparse);

        let a = resolve(sparse, &rendered(sparse, "two"), None).unwrap();
        let b = resolve(sparse, &rendered(dense, "two"), None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rendered_entity_counts_once() {
        let markup = "salt &amp; pepper";
        let text = normalize_markup(markup);
        let q = resolve(&text, &rendered(markup, "&amp; pep"), None).unwrap();
        assert_eq!(q.text(), "& pep");
        assert_eq!(q.start_offset(), 5);
    }

    #[test]
    fn test_rendered_selection_covering_only_tags_is_empty() {
        let markup = "a<br/>b";
        let text = normalize_markup(markup);
        assert_eq!(
            resolve(&text, &rendered(markup, "<br/>"), None),
            Err(QuoteError::EmptySelection)
        );
    }

    #[test]
    fn test_rendered_markup_mismatch() {
        let selection = RawSelection::Rendered {
            markup: "<p>other</p>".to_string(),
            start: 3,
            end: 5,
        };
        assert_eq!(
            resolve("text", &selection, None),
            Err(QuoteError::MarkupMismatch)
        );
    }

    #[test]
    fn test_rendered_out_of_range() {
        let selection = RawSelection::Rendered {
            markup: "<i>ab</i>".to_string(),
            start: 0,
            end: 20,
        };
        assert!(matches!(
            resolve("ab", &selection, None),
            Err(QuoteError::InvalidRange { len: 9, .. })
        ));
    }

    #[test]
    fn test_resolve_on_node_records_source() {
        let node = Node::new("post-42", "Once upon a time", "author");
        let q = resolve_on_node(&node, &RawSelection::Plain { start: 5, end: 9 }).unwrap();
        assert_eq!(q.text(), "upon");
        assert_eq!(q.source_post_id(), Some("post-42"));
    }

    #[test]
    fn test_quote_unaffected_by_later_source_edit() {
        let mut node = Node::new("p", "original words", "a");
        let q = resolve_on_node(&node, &RawSelection::Plain { start: 0, end: 8 }).unwrap();
        node.text = "edited words here".to_string();
        assert_eq!(q.text(), "original");
        assert!(!q.matches(&node.text));
    }

    #[test]
    fn test_raw_selection_serde_tag() {
        let json = serde_json::json!({"mode": "plain", "start": 1, "end": 3});
        let selection: RawSelection = serde_json::from_value(json).unwrap();
        assert_eq!(selection, RawSelection::Plain { start: 1, end: 3 });
    }
}
