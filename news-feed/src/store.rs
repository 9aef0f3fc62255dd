//! Per-user feed inboxes.
//!
//! The store owns every [`FeedEntry`]. Fanout only appends, the paginator
//! only reads. Uniqueness of `(user_id, tweet_id)` is checked and claimed in
//! the same critical section as the insert, so concurrent fanouts for the same
//! tweet race to a single surviving row instead of check-then-insert races.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    ops::Bound,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;

use crate::{
    model::{EntryId, FeedEntry, TweetId, UserId},
    pagination::Cursor,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("feed store lock poisoned")]
    Poisoned,

    #[error("feed store unavailable: {0}")]
    Unavailable(String),
}

/// Storage contract for feed inboxes.
pub trait FeedEntryStore: Send + Sync {
    /// Inserts an entry unless one already exists for `(user_id, tweet_id)`.
    ///
    /// Returns the stored entry and whether this call created it. A conflict
    /// is not an error: the existing entry comes back with `false`.
    fn append_if_absent(
        &self,
        user_id: UserId,
        tweet_id: TweetId,
        created_at: DateTime<Utc>,
    ) -> Result<(FeedEntry, bool), StoreError>;

    /// Entries of `user_id`'s feed strictly newer than `after` and strictly
    /// older than `before`, newest first, at most `limit` of them.
    fn page_for(
        &self,
        user_id: UserId,
        after: Option<Cursor>,
        before: Option<Cursor>,
        limit: Option<usize>,
    ) -> Result<Vec<FeedEntry>, StoreError>;

    /// Removes every entry that references `tweet_id`. Returns the number removed.
    fn delete_all_for_tweet(&self, tweet_id: TweetId) -> Result<usize, StoreError>;

    /// Nulls the tweet reference of every entry pointing at `tweet_id`.
    fn detach_tweet(&self, tweet_id: TweetId) -> Result<usize, StoreError>;

    /// Nulls the owner of every entry in `user_id`'s feed, taking them out of
    /// every feed.
    fn detach_user(&self, user_id: UserId) -> Result<usize, StoreError>;
}

/// In-memory [`FeedEntryStore`].
///
/// Rows live in one map keyed by id, with three indexes next to them:
/// each owner's inbox as an ordered set of cursors, the unique
/// `(owner, tweet)` index, and a reverse index from tweet to rows.
#[derive(Default)]
pub struct InMemoryFeedStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    next_id: EntryId,
    rows: HashMap<EntryId, FeedEntry>,
    inboxes: HashMap<UserId, BTreeSet<Cursor>>,
    unique: HashMap<(UserId, TweetId), EntryId>,
    by_tweet: HashMap<TweetId, HashSet<EntryId>>,
}

impl InMemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of rows, detached ones included.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl FeedEntryStore for InMemoryFeedStore {
    fn append_if_absent(
        &self,
        user_id: UserId,
        tweet_id: TweetId,
        created_at: DateTime<Utc>,
    ) -> Result<(FeedEntry, bool), StoreError> {
        // Cursors carry microseconds, so stored timestamps must not be finer.
        let created_at = created_at.trunc_subsecs(6);
        let mut state = self.lock()?;

        if let Some(existing) = state
            .unique
            .get(&(user_id, tweet_id))
            .and_then(|id| state.rows.get(id))
        {
            return Ok((existing.clone(), false));
        }

        state.next_id += 1;
        let entry = FeedEntry {
            id: state.next_id,
            user_id: Some(user_id),
            tweet_id: Some(tweet_id),
            created_at,
        };

        state.unique.insert((user_id, tweet_id), entry.id);
        state.by_tweet.entry(tweet_id).or_default().insert(entry.id);
        state
            .inboxes
            .entry(user_id)
            .or_default()
            .insert(entry.cursor());
        state.rows.insert(entry.id, entry.clone());

        Ok((entry, true))
    }

    fn page_for(
        &self,
        user_id: UserId,
        after: Option<Cursor>,
        before: Option<Cursor>,
        limit: Option<usize>,
    ) -> Result<Vec<FeedEntry>, StoreError> {
        let state = self.lock()?;
        let Some(inbox) = state.inboxes.get(&user_id) else {
            return Ok(Vec::new());
        };

        // BTreeSet::range panics on an inverted or empty exclusive range.
        if let (Some(after), Some(before)) = (after, before) {
            if after >= before {
                return Ok(Vec::new());
            }
        }

        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        let upper = before.map_or(Bound::Unbounded, Bound::Excluded);

        Ok(inbox
            .range((lower, upper))
            .rev()
            .filter_map(|cursor| state.rows.get(&cursor.id()).cloned())
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn delete_all_for_tweet(&self, tweet_id: TweetId) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let StoreState {
            rows,
            inboxes,
            unique,
            by_tweet,
            ..
        } = &mut *state;

        let Some(ids) = by_tweet.remove(&tweet_id) else {
            return Ok(0);
        };

        let mut removed = 0;
        for id in ids {
            let Some(entry) = rows.remove(&id) else {
                continue;
            };
            if let Some(owner) = entry.user_id {
                unique.remove(&(owner, tweet_id));
                if let Some(inbox) = inboxes.get_mut(&owner) {
                    inbox.remove(&entry.cursor());
                }
            }
            removed += 1;
        }

        Ok(removed)
    }

    fn detach_tweet(&self, tweet_id: TweetId) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let StoreState {
            rows,
            unique,
            by_tweet,
            ..
        } = &mut *state;

        let Some(ids) = by_tweet.remove(&tweet_id) else {
            return Ok(0);
        };

        let mut detached = 0;
        for id in ids {
            let Some(entry) = rows.get_mut(&id) else {
                continue;
            };
            entry.tweet_id = None;
            if let Some(owner) = entry.user_id {
                unique.remove(&(owner, tweet_id));
            }
            detached += 1;
        }

        Ok(detached)
    }

    fn detach_user(&self, user_id: UserId) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let StoreState {
            rows,
            inboxes,
            unique,
            ..
        } = &mut *state;

        let Some(inbox) = inboxes.remove(&user_id) else {
            return Ok(0);
        };

        let mut detached = 0;
        for cursor in inbox {
            let Some(entry) = rows.get_mut(&cursor.id()) else {
                continue;
            };
            entry.user_id = None;
            if let Some(tweet_id) = entry.tweet_id {
                unique.remove(&(user_id, tweet_id));
            }
            detached += 1;
        }

        Ok(detached)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use chrono::TimeZone;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
    }

    #[test]
    fn append_is_idempotent_per_user_and_tweet() {
        let store = InMemoryFeedStore::new();

        let (first, inserted) = store.append_if_absent(1, 10, at(100)).expect("append");
        assert!(inserted);

        let (second, inserted) = store.append_if_absent(1, 10, at(500)).expect("append");
        assert!(!inserted);
        assert_eq!(first, second, "conflict returns the original row");
        assert_eq!(store.len().expect("len"), 1);

        let (_, inserted) = store.append_if_absent(2, 10, at(100)).expect("append");
        assert!(inserted, "same tweet in another inbox is a distinct slot");
    }

    #[test]
    fn concurrent_appends_leave_one_row() {
        let store = Arc::new(InMemoryFeedStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .append_if_absent(7, 99, at(100))
                        .expect("append")
                        .1
                })
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|inserted| *inserted)
            .count();

        assert_eq!(inserted, 1);
        assert_eq!(store.len().expect("len"), 1);
    }

    #[test]
    fn pages_are_newest_first_with_id_tiebreak() {
        let store = InMemoryFeedStore::new();
        store.append_if_absent(1, 1, at(100)).expect("append");
        store.append_if_absent(1, 2, at(300)).expect("append");
        store.append_if_absent(1, 3, at(300)).expect("append");
        store.append_if_absent(1, 4, at(200)).expect("append");

        let tweets: Vec<_> = store
            .page_for(1, None, None, None)
            .expect("page")
            .into_iter()
            .map(|entry| entry.tweet_id)
            .collect();

        assert_eq!(tweets, vec![Some(3), Some(2), Some(4), Some(1)]);
    }

    #[test]
    fn page_bounds_are_exclusive() {
        let store = InMemoryFeedStore::new();
        let entries: Vec<_> = (1..=5)
            .map(|n| store.append_if_absent(1, n, at(n as i64)).expect("append").0)
            .collect();

        let middle = store
            .page_for(1, Some(entries[0].cursor()), Some(entries[4].cursor()), None)
            .expect("page");
        let ids: Vec<_> = middle.iter().map(|entry| entry.id).collect();
        assert_eq!(ids, vec![entries[3].id, entries[2].id, entries[1].id]);

        let limited = store
            .page_for(1, None, Some(entries[4].cursor()), Some(2))
            .expect("page");
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, entries[3].id);
    }

    #[test]
    fn inverted_bounds_return_nothing() {
        let store = InMemoryFeedStore::new();
        let (entry, _) = store.append_if_absent(1, 1, at(1)).expect("append");

        let page = store
            .page_for(1, Some(entry.cursor()), Some(entry.cursor()), None)
            .expect("page");
        assert!(page.is_empty());
    }

    #[test]
    fn unknown_user_has_empty_feed() {
        let store = InMemoryFeedStore::new();
        assert!(store.page_for(42, None, None, Some(10)).expect("page").is_empty());
    }

    #[test]
    fn timestamps_are_truncated_to_micros() {
        let store = InMemoryFeedStore::new();
        let precise = at(100) + chrono::Duration::nanoseconds(1_500);

        let (entry, _) = store.append_if_absent(1, 1, precise).expect("append");
        assert_eq!(entry.created_at, at(100) + chrono::Duration::microseconds(1));

        let reparsed: Cursor = entry.cursor().to_string().parse().expect("cursor");
        assert_eq!(reparsed, entry.cursor());
    }

    #[test]
    fn detach_tweet_keeps_rows_and_frees_the_slot() {
        let store = InMemoryFeedStore::new();
        store.append_if_absent(1, 10, at(100)).expect("append");
        store.append_if_absent(2, 10, at(100)).expect("append");
        store.append_if_absent(1, 11, at(200)).expect("append");

        assert_eq!(store.detach_tweet(10).expect("detach"), 2);
        assert_eq!(store.len().expect("len"), 3);

        let feed = store.page_for(1, None, None, None).expect("page");
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[1].tweet_id, None);

        assert_eq!(store.detach_tweet(10).expect("detach"), 0);
    }

    #[test]
    fn detach_user_removes_the_inbox() {
        let store = InMemoryFeedStore::new();
        store.append_if_absent(1, 10, at(100)).expect("append");
        store.append_if_absent(1, 11, at(200)).expect("append");
        store.append_if_absent(2, 10, at(100)).expect("append");

        assert_eq!(store.detach_user(1).expect("detach"), 2);
        assert!(store.page_for(1, None, None, None).expect("page").is_empty());
        assert_eq!(store.page_for(2, None, None, None).expect("page").len(), 1);
        assert_eq!(store.len().expect("len"), 3);
    }

    #[test]
    fn delete_all_for_tweet_removes_rows() {
        let store = InMemoryFeedStore::new();
        store.append_if_absent(1, 10, at(100)).expect("append");
        store.append_if_absent(2, 10, at(100)).expect("append");
        store.append_if_absent(2, 11, at(200)).expect("append");

        assert_eq!(store.delete_all_for_tweet(10).expect("delete"), 2);
        assert_eq!(store.len().expect("len"), 1);
        assert!(store.page_for(1, None, None, None).expect("page").is_empty());

        let (_, inserted) = store.append_if_absent(1, 10, at(100)).expect("append");
        assert!(inserted, "slot is free again after a hard delete");
    }
}
