//! Fanout-on-write.
//!
//! A new tweet is copied into the inbox of its author and of every follower.
//! Each copy is an independent idempotent append: there is no transaction over
//! the whole fanout, a failed recipient does not stop the others, and
//! re-running fanout for the same tweet only fills in what is missing.
//!
//! When a [`TweetLookup`] is attached, a tweet deleted before its fanout runs
//! is skipped, and one deleted while its fanout was writing gets the fresh
//! entries detached afterwards.

use std::{collections::BTreeSet, sync::Arc};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    graph::{FollowerGraph, GraphError},
    model::{TweetCreated, TweetId, UserId},
    store::{FeedEntryStore, StoreError},
    tweets::{TweetError, TweetLookup},
};

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("failed to read followers of user {author_id}: {source}")]
    Followers {
        author_id: UserId,
        #[source]
        source: GraphError,
    },

    #[error("failed to look up tweet {tweet_id}: {source}")]
    Tweet {
        tweet_id: TweetId,
        #[source]
        source: TweetError,
    },

    #[error("failed to detach entries of deleted tweet {tweet_id}: {source}")]
    Detach {
        tweet_id: TweetId,
        #[source]
        source: StoreError,
    },
}

/// Outcome of one fanout run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub tweet_id: TweetId,
    pub recipients: usize,
    /// Entries created by this run.
    pub written: usize,
    /// Recipients that already had the entry.
    pub existing: usize,
    /// Recipients whose write failed; a later re-run will pick them up.
    pub failed: Vec<UserId>,
    /// The tweet was gone before or after the writes.
    pub withdrawn: bool,
    /// Entries of a withdrawn tweet whose reference was nulled by this run.
    pub detached: usize,
}

impl FanoutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct FanoutService {
    graph: Arc<dyn FollowerGraph>,
    store: Arc<dyn FeedEntryStore>,
    tweets: Option<Arc<dyn TweetLookup>>,
    parallel_threshold: usize,
}

impl FanoutService {
    /// `parallel_threshold` is the recipient count from which writes are
    /// spread over the rayon pool instead of issued one by one.
    pub fn new(
        graph: Arc<dyn FollowerGraph>,
        store: Arc<dyn FeedEntryStore>,
        parallel_threshold: usize,
    ) -> Self {
        Self {
            graph,
            store,
            tweets: None,
            parallel_threshold,
        }
    }

    /// Checks tweets against `tweets` before and after writing.
    pub fn with_tweet_lookup(mut self, tweets: Arc<dyn TweetLookup>) -> Self {
        self.tweets = Some(tweets);
        self
    }

    /// The author plus every follower, each exactly once.
    pub fn recipients(&self, tweet: &TweetCreated) -> Result<Vec<UserId>, FanoutError> {
        let followers =
            self.graph
                .followers_of(tweet.author_id)
                .map_err(|source| FanoutError::Followers {
                    author_id: tweet.author_id,
                    source,
                })?;

        let mut recipients: BTreeSet<UserId> = followers.into_iter().collect();
        recipients.insert(tweet.author_id);
        Ok(recipients.into_iter().collect())
    }

    /// Writes `tweet` into every recipient's feed.
    ///
    /// Only fails if the follower list cannot be read. Per-recipient write
    /// failures are logged and listed in [`FanoutReport::failed`].
    pub fn fanout(&self, tweet: &TweetCreated) -> Result<FanoutReport, FanoutError> {
        if !self.is_live(tweet.id)? {
            debug!(tweet_id = tweet.id, "tweet deleted before fanout, skipping");
            return Ok(FanoutReport {
                tweet_id: tweet.id,
                withdrawn: true,
                ..FanoutReport::default()
            });
        }

        let recipients = self.recipients(tweet)?;

        let outcomes: Vec<(UserId, Result<bool, StoreError>)> =
            if recipients.len() >= self.parallel_threshold {
                debug!(tweet_id = tweet.id, recipients = recipients.len(), "parallel fanout");
                recipients
                    .par_iter()
                    .map(|&recipient| (recipient, self.deliver(recipient, tweet)))
                    .collect()
            } else {
                recipients
                    .iter()
                    .map(|&recipient| (recipient, self.deliver(recipient, tweet)))
                    .collect()
            };

        let mut report = FanoutReport {
            tweet_id: tweet.id,
            recipients: recipients.len(),
            ..FanoutReport::default()
        };

        for (recipient, outcome) in outcomes {
            match outcome {
                Ok(true) => report.written += 1,
                Ok(false) => report.existing += 1,
                Err(err) => {
                    warn!(tweet_id = tweet.id, recipient, error = %err, "feed entry write failed");
                    report.failed.push(recipient);
                }
            }
        }

        // A delete during the writes may have detached before these rows landed.
        if !self.is_live(tweet.id)? {
            report.withdrawn = true;
            report.detached = self
                .store
                .detach_tweet(tweet.id)
                .map_err(|source| FanoutError::Detach {
                    tweet_id: tweet.id,
                    source,
                })?;
            info!(
                tweet_id = tweet.id,
                detached = report.detached,
                "tweet deleted during fanout"
            );
        }

        info!(
            tweet_id = tweet.id,
            author_id = tweet.author_id,
            recipients = report.recipients,
            written = report.written,
            existing = report.existing,
            failed = report.failed.len(),
            "fanout finished"
        );

        Ok(report)
    }

    fn is_live(&self, tweet_id: TweetId) -> Result<bool, FanoutError> {
        match &self.tweets {
            Some(tweets) => tweets
                .tweet_exists(tweet_id)
                .map_err(|source| FanoutError::Tweet { tweet_id, source }),
            None => Ok(true),
        }
    }

    fn deliver(&self, recipient: UserId, tweet: &TweetCreated) -> Result<bool, StoreError> {
        self.store
            .append_if_absent(recipient, tweet.id, tweet.created_at)
            .map(|(_, inserted)| inserted)
    }
}
