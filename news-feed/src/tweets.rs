//! In-memory tweet table.
//!
//! Stands in for the tweet collaborator: it assigns ids and timestamps and
//! produces the [`TweetCreated`] event that drives fanout.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::{TweetCreated, TweetId, UserId};

pub const MAX_TWEET_CHARS: usize = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TweetError {
    #[error("tweet content cannot be empty")]
    EmptyContent,

    #[error("tweet content is {0} characters, the limit is {max}", max = MAX_TWEET_CHARS)]
    TooLong(usize),

    #[error("tweet {0} not found")]
    NotFound(TweetId),

    #[error("user {user_id} is not the author of tweet {tweet_id}")]
    NotAuthor { user_id: UserId, tweet_id: TweetId },

    #[error("tweet store lock poisoned")]
    Poisoned,
}

/// Existence check used by fanout to avoid feeding deleted tweets.
pub trait TweetLookup: Send + Sync {
    fn tweet_exists(&self, tweet_id: TweetId) -> Result<bool, TweetError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tweet {
    pub id: TweetId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Tweet {
    pub fn created_event(&self) -> TweetCreated {
        TweetCreated {
            id: self.id,
            author_id: self.author_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
pub struct TweetStore {
    state: Mutex<TweetState>,
}

#[derive(Default)]
struct TweetState {
    next_id: TweetId,
    tweets: BTreeMap<TweetId, Tweet>,
}

impl TweetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, author_id: UserId, content: &str) -> Result<Tweet, TweetError> {
        self.create_at(author_id, content, Utc::now())
    }

    pub fn create_at(
        &self,
        author_id: UserId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Tweet, TweetError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(TweetError::EmptyContent);
        }
        let chars = content.chars().count();
        if chars > MAX_TWEET_CHARS {
            return Err(TweetError::TooLong(chars));
        }

        let mut state = self.lock()?;
        state.next_id += 1;
        let tweet = Tweet {
            id: state.next_id,
            author_id,
            content: content.to_string(),
            created_at: created_at.trunc_subsecs(6),
        };
        state.tweets.insert(tweet.id, tweet.clone());

        Ok(tweet)
    }

    pub fn get(&self, tweet_id: TweetId) -> Result<Tweet, TweetError> {
        self.lock()?
            .tweets
            .get(&tweet_id)
            .cloned()
            .ok_or(TweetError::NotFound(tweet_id))
    }

    /// Deletes a tweet on behalf of `requester`, who must be its author.
    pub fn delete(&self, tweet_id: TweetId, requester: UserId) -> Result<Tweet, TweetError> {
        let mut state = self.lock()?;
        let author_id = state
            .tweets
            .get(&tweet_id)
            .map(|tweet| tweet.author_id)
            .ok_or(TweetError::NotFound(tweet_id))?;
        if author_id != requester {
            return Err(TweetError::NotAuthor {
                user_id: requester,
                tweet_id,
            });
        }

        state
            .tweets
            .remove(&tweet_id)
            .ok_or(TweetError::NotFound(tweet_id))
    }

    /// Tweets by `author_id`, newest first.
    pub fn list_by_author(&self, author_id: UserId) -> Result<Vec<Tweet>, TweetError> {
        let state = self.lock()?;
        let mut tweets: Vec<_> = state
            .tweets
            .values()
            .filter(|tweet| tweet.author_id == author_id)
            .cloned()
            .collect();
        tweets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tweets)
    }

    fn lock(&self) -> Result<MutexGuard<'_, TweetState>, TweetError> {
        self.state.lock().map_err(|_| TweetError::Poisoned)
    }
}

impl TweetLookup for TweetStore {
    fn tweet_exists(&self, tweet_id: TweetId) -> Result<bool, TweetError> {
        Ok(self.lock()?.tweets.contains_key(&tweet_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_validates_content() {
        let tweets = TweetStore::new();
        assert_eq!(tweets.create(1, "   "), Err(TweetError::EmptyContent));
        assert_eq!(
            tweets.create(1, &"x".repeat(256)),
            Err(TweetError::TooLong(256))
        );
        assert!(tweets.create(1, &"x".repeat(255)).is_ok());
    }

    #[test]
    fn ids_increase_and_events_match() {
        let tweets = TweetStore::new();
        let first = tweets.create(1, "hello").expect("create");
        let second = tweets.create(2, "world").expect("create");

        assert!(second.id > first.id);
        let event = second.created_event();
        assert_eq!(event.id, second.id);
        assert_eq!(event.author_id, 2);
        assert_eq!(event.created_at, second.created_at);
    }

    #[test]
    fn only_the_author_can_delete() {
        let tweets = TweetStore::new();
        let tweet = tweets.create(1, "mine").expect("create");

        assert_eq!(
            tweets.delete(tweet.id, 2),
            Err(TweetError::NotAuthor {
                user_id: 2,
                tweet_id: tweet.id
            })
        );
        assert_eq!(tweets.tweet_exists(tweet.id), Ok(true));
        assert_eq!(tweets.delete(tweet.id, 1), Ok(tweet.clone()));
        assert_eq!(tweets.get(tweet.id), Err(TweetError::NotFound(tweet.id)));
        assert_eq!(tweets.tweet_exists(tweet.id), Ok(false));
    }

    #[test]
    fn list_by_author_is_newest_first() {
        let tweets = TweetStore::new();
        let base = Utc::now();
        let older = tweets.create_at(1, "older", base).expect("create");
        tweets.create_at(2, "other", base).expect("create");
        let newer = tweets
            .create_at(1, "newer", base + chrono::Duration::seconds(1))
            .expect("create");

        let ids: Vec<_> = tweets
            .list_by_author(1)
            .expect("list")
            .into_iter()
            .map(|tweet| tweet.id)
            .collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
