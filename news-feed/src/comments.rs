//! Comments on tweets.
//!
//! Comments hang off a single tweet, never off another comment. Only the
//! author of a comment may edit or delete it, and only its content can change.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::{CommentId, TweetId, UserId};

pub const MAX_COMMENT_CHARS: usize = 140;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommentError {
    #[error("comment content cannot be empty")]
    EmptyContent,

    #[error("comment content is {0} characters, the limit is {max}", max = MAX_COMMENT_CHARS)]
    TooLong(usize),

    #[error("comment {0} not found")]
    NotFound(CommentId),

    #[error("user {user_id} is not the author of comment {comment_id}")]
    NotOwner {
        user_id: UserId,
        comment_id: CommentId,
    },

    #[error("comment store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub user_id: UserId,
    /// `None` once the tweet has been deleted.
    pub tweet_id: Option<TweetId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct CommentStore {
    state: Mutex<CommentState>,
}

#[derive(Default)]
struct CommentState {
    next_id: CommentId,
    comments: BTreeMap<CommentId, Comment>,
}

impl CommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a comment. The caller checks that `tweet_id` exists.
    pub fn create(
        &self,
        user_id: UserId,
        tweet_id: TweetId,
        content: &str,
    ) -> Result<Comment, CommentError> {
        let content = validate(content)?;
        let now = Utc::now().trunc_subsecs(6);

        let mut state = self.lock()?;
        state.next_id += 1;
        let comment = Comment {
            id: state.next_id,
            user_id,
            tweet_id: Some(tweet_id),
            content,
            created_at: now,
            updated_at: now,
        };
        state.comments.insert(comment.id, comment.clone());

        Ok(comment)
    }

    pub fn get(&self, comment_id: CommentId) -> Result<Comment, CommentError> {
        self.lock()?
            .comments
            .get(&comment_id)
            .cloned()
            .ok_or(CommentError::NotFound(comment_id))
    }

    /// Comments on `tweet_id`, oldest first.
    pub fn list_for_tweet(&self, tweet_id: TweetId) -> Result<Vec<Comment>, CommentError> {
        let state = self.lock()?;
        let mut comments: Vec<_> = state
            .comments
            .values()
            .filter(|comment| comment.tweet_id == Some(tweet_id))
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(comments)
    }

    /// Replaces the content of a comment owned by `requester`.
    pub fn update(
        &self,
        comment_id: CommentId,
        requester: UserId,
        content: &str,
    ) -> Result<Comment, CommentError> {
        let content = validate(content)?;
        let mut state = self.lock()?;
        let comment = owned_by(&mut state, comment_id, requester)?;
        comment.content = content;
        comment.updated_at = Utc::now().trunc_subsecs(6).max(comment.updated_at);

        Ok(comment.clone())
    }

    pub fn delete(
        &self,
        comment_id: CommentId,
        requester: UserId,
    ) -> Result<Comment, CommentError> {
        let mut state = self.lock()?;
        owned_by(&mut state, comment_id, requester)?;
        state
            .comments
            .remove(&comment_id)
            .ok_or(CommentError::NotFound(comment_id))
    }

    /// Nulls the tweet of every comment on `tweet_id`.
    pub fn detach_tweet(&self, tweet_id: TweetId) -> Result<usize, CommentError> {
        let mut state = self.lock()?;
        let mut detached = 0;
        for comment in state.comments.values_mut() {
            if comment.tweet_id == Some(tweet_id) {
                comment.tweet_id = None;
                detached += 1;
            }
        }
        Ok(detached)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CommentState>, CommentError> {
        self.state.lock().map_err(|_| CommentError::Poisoned)
    }
}

fn validate(content: &str) -> Result<String, CommentError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(CommentError::EmptyContent);
    }
    let chars = content.chars().count();
    if chars > MAX_COMMENT_CHARS {
        return Err(CommentError::TooLong(chars));
    }
    Ok(content.to_string())
}

fn owned_by(
    state: &mut CommentState,
    comment_id: CommentId,
    requester: UserId,
) -> Result<&mut Comment, CommentError> {
    let comment = state
        .comments
        .get_mut(&comment_id)
        .ok_or(CommentError::NotFound(comment_id))?;
    if comment.user_id != requester {
        return Err(CommentError::NotOwner {
            user_id: requester,
            comment_id,
        });
    }
    Ok(comment)
}
