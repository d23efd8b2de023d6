//! Opaque cursors and page types
//!
//! A cursor is a reversible pointer into an ordered result sequence: the
//! `(order value, tiebreak id)` of the last or first item a client saw. It is
//! stateless: it references no cache entry and outlives any cached page.
//! Result sequences are ordered descending by `(order_value, id)`; the stable
//! numeric tiebreak is what keeps paging sane when several items share an
//! order value.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Reversible pointer into an ordered result sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Primary ordering value of the referenced item
    #[serde(rename = "o")]
    pub order_value: i64,
    /// Stable tiebreak id of the referenced item
    #[serde(rename = "i")]
    pub id: u64,
}

impl Cursor {
    /// Build a cursor from an item's sort key.
    pub fn new(order_value: i64, id: u64) -> Self {
        Cursor { order_value, id }
    }

    /// Encode to an opaque token. `decode(encode(c)) == c` for every cursor.
    pub fn encode(&self) -> String {
        let raw = serde_json::to_vec(self).expect("cursor payload serializes");
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Decode an opaque token.
    ///
    /// Malformed tokens yield `None`; callers treat that as "no cursor" and
    /// page from the beginning rather than failing the request.
    pub fn decode(token: &str) -> Option<Cursor> {
        let raw = URL_SAFE_NO_PAD.decode(token).ok()?;
        serde_json::from_slice(&raw).ok()
    }
}

/// Paging direction relative to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageDirection {
    /// Items strictly after the cursor in reading order (`(order, id)` below
    /// the cursor, descending).
    Next,
    /// Items strictly before the cursor (`(order, id)` above the cursor).
    Prev,
}

/// One page request: an optional opaque cursor, a page size, and a direction.
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Opaque cursor token from a previous page, if any
    pub cursor: Option<String>,
    /// Page size
    pub limit: usize,
    /// Which side of the cursor to read
    pub direction: PageDirection,
}

impl PageRequest {
    /// First page, reading forward.
    pub fn first(limit: usize) -> Self {
        PageRequest {
            cursor: None,
            limit,
            direction: PageDirection::Next,
        }
    }

    /// A page relative to a cursor token.
    pub fn after(cursor: impl Into<String>, limit: usize, direction: PageDirection) -> Self {
        PageRequest {
            cursor: Some(cursor.into()),
            limit,
            direction,
        }
    }
}

/// Inequality bound handed to the data source: return items whose
/// `(order_value, id)` compares against `(bound.order_value, bound.id)` per
/// the direction, in canonical descending order, capped at the page size.
#[derive(Debug, Clone, Copy)]
pub struct PageBound {
    pub order_value: i64,
    pub id: u64,
    pub direction: PageDirection,
}

impl PageBound {
    /// Whether an item with this sort key belongs in the page.
    pub fn admits(&self, order_value: i64, id: u64) -> bool {
        match self.direction {
            PageDirection::Next => (order_value, id) < (self.order_value, self.id),
            PageDirection::Prev => (order_value, id) > (self.order_value, self.id),
        }
    }
}

/// Items that can anchor a cursor.
pub trait PageItem {
    /// Primary ordering value (descending).
    fn order_value(&self) -> i64;
    /// Stable tiebreak id (descending within equal order values).
    fn tiebreak_id(&self) -> u64;
}

/// One page of results with fresh edge cursors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Page items in canonical descending order
    pub items: Vec<T>,
    /// Whether the page was full, so a following page may exist
    pub has_next: bool,
    /// Whether this page was reached through a cursor
    pub has_previous: bool,
    /// Token for the page after the last item, when the page is non-empty
    pub next_cursor: Option<String>,
    /// Token for the page before the first item, when the page is non-empty
    pub prev_cursor: Option<String>,
}

impl<T: PageItem> Page<T> {
    /// Assemble a page from source items, deriving edge cursors.
    pub(crate) fn assemble(items: Vec<T>, limit: usize, has_previous: bool) -> Self {
        let has_next = items.len() == limit && limit > 0;
        let next_cursor = items
            .last()
            .map(|item| Cursor::new(item.order_value(), item.tiebreak_id()).encode());
        let prev_cursor = items
            .first()
            .map(|item| Cursor::new(item.order_value(), item.tiebreak_id()).encode());
        Page {
            items,
            has_next,
            has_previous,
            next_cursor,
            prev_cursor,
        }
    }
}
