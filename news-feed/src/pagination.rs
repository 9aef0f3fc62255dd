//! Value-cursor pagination over a user's feed.
//!
//! A cursor is the `(created_at, id)` pair of the last entry a client has
//! seen. Pages are cut by comparing against that value rather than by
//! counting rows, so entries inserted at the head while a client is paging
//! never shift the boundary: they are invisible to "older than" fetches and
//! show up in the next "newer than" poll.
//!
//! On the wire the cursor is `<unix-micros>.<entry-id>`. Clients are expected
//! to treat it as opaque.

use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    model::{EntryId, FeedEntry, UserId},
    store::{FeedEntryStore, StoreError},
};

/// Position in a feed. Orders by timestamp first and entry id second, which
/// gives a strict total order even when timestamps collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cursor {
    created_at: DateTime<Utc>,
    id: EntryId,
}

impl Cursor {
    pub fn new(created_at: DateTime<Utc>, id: EntryId) -> Self {
        Self { created_at, id }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn id(&self) -> EntryId {
        self.id
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is empty")]
    Empty,

    #[error("cursor `{0}` is not of the form <micros>.<id>")]
    Malformed(String),

    #[error("cursor timestamp {0} is out of range")]
    OutOfRange(i64),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.created_at.timestamp_micros(), self.id)
    }
}

impl FromStr for Cursor {
    type Err = CursorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CursorError::Empty);
        }

        let malformed = || CursorError::Malformed(raw.to_string());
        let (micros, id) = raw.split_once('.').ok_or_else(malformed)?;
        let micros: i64 = micros.parse().map_err(|_| malformed())?;
        let id: EntryId = id.parse().map_err(|_| malformed())?;
        let created_at =
            DateTime::from_timestamp_micros(micros).ok_or(CursorError::OutOfRange(micros))?;

        Ok(Self { created_at, id })
    }
}

impl TryFrom<String> for Cursor {
    type Error = CursorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cursor> for String {
    fn from(cursor: Cursor) -> Self {
        cursor.to_string()
    }
}

/// One page of a feed, newest entry first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub results: Vec<FeedEntry>,
    pub has_next_page: bool,
}

impl Page {
    /// Cursor to pass as `older_than` to continue paging down.
    pub fn next_cursor(&self) -> Option<Cursor> {
        self.results.last().map(FeedEntry::cursor)
    }

    /// Cursor to pass as `newer_than` to poll for entries above this page.
    pub fn newest_cursor(&self) -> Option<Cursor> {
        self.results.first().map(FeedEntry::cursor)
    }
}

/// Read side of the feed. Holds no per-client state.
#[derive(Clone)]
pub struct CursorPaginator {
    store: Arc<dyn FeedEntryStore>,
}

impl CursorPaginator {
    pub fn new(store: Arc<dyn FeedEntryStore>) -> Self {
        Self { store }
    }

    /// Fetches a page of `user_id`'s feed.
    ///
    /// - no cursor: the `limit` most recent entries
    /// - `older_than`: up to `limit` entries strictly older than the cursor
    /// - `newer_than`: every entry strictly newer than the cursor, ignoring
    ///   `limit`; `has_next_page` is always false in this mode
    ///
    /// When both cursors are given `newer_than` wins.
    pub fn page(
        &self,
        user_id: UserId,
        newer_than: Option<Cursor>,
        older_than: Option<Cursor>,
        limit: usize,
    ) -> Result<Page, StoreError> {
        if let Some(newer_than) = newer_than {
            if older_than.is_some() {
                debug!(user_id, "both cursors supplied, using newer_than");
            }
            let results = self.store.page_for(user_id, Some(newer_than), None, None)?;
            return Ok(Page {
                results,
                has_next_page: false,
            });
        }

        // One extra row tells us whether anything lies beyond this page.
        let mut results =
            self.store
                .page_for(user_id, None, older_than, Some(limit.saturating_add(1)))?;
        let has_next_page = results.len() > limit;
        results.truncate(limit);

        Ok(Page {
            results,
            has_next_page,
        })
    }
}
