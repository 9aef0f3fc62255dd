//! Likes on tweets and comments.
//!
//! The liked object is a tagged [`LikeTarget`] rather than a
//! `(type name, object id)` pair looked up at runtime, so every consumer
//! matches on the variant.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CommentId, TweetId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum LikeTarget {
    Tweet(TweetId),
    Comment(CommentId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Like {
    pub user_id: UserId,
    pub target: LikeTarget,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LikeError {
    #[error("like store lock poisoned")]
    Poisoned,
}

type LikeTable = HashMap<(UserId, LikeTarget), DateTime<Utc>>;

/// In-memory like table, unique per `(user, target)`.
#[derive(Default)]
pub struct LikeStore {
    likes: Mutex<LikeTable>,
}

impl LikeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Likes `target` unless `user_id` already did. Returns the like and
    /// whether this call created it.
    pub fn like(&self, user_id: UserId, target: LikeTarget) -> Result<(Like, bool), LikeError> {
        let mut likes = self.lock()?;
        let mut inserted = false;
        let created_at = *likes.entry((user_id, target)).or_insert_with(|| {
            inserted = true;
            Utc::now().trunc_subsecs(6)
        });

        Ok((
            Like {
                user_id,
                target,
                created_at,
            },
            inserted,
        ))
    }

    pub fn unlike(&self, user_id: UserId, target: LikeTarget) -> Result<bool, LikeError> {
        Ok(self.lock()?.remove(&(user_id, target)).is_some())
    }

    /// Drops every like on `target`, as when the liked comment is deleted.
    pub fn unlike_all(&self, target: LikeTarget) -> Result<usize, LikeError> {
        let mut likes = self.lock()?;
        let before = likes.len();
        likes.retain(|(_, liked), _| *liked != target);
        Ok(before - likes.len())
    }

    pub fn has_liked(&self, user_id: UserId, target: LikeTarget) -> Result<bool, LikeError> {
        Ok(self.lock()?.contains_key(&(user_id, target)))
    }

    /// Likes on `target`, newest first.
    pub fn likes_for(&self, target: LikeTarget) -> Result<Vec<Like>, LikeError> {
        let mut likes: Vec<_> = self
            .lock()?
            .iter()
            .filter(|((_, liked), _)| *liked == target)
            .map(|(&(user_id, target), &created_at)| Like {
                user_id,
                target,
                created_at,
            })
            .collect();
        likes.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(a.user_id.cmp(&b.user_id))
        });
        Ok(likes)
    }

    fn lock(&self) -> Result<MutexGuard<'_, LikeTable>, LikeError> {
        self.likes.lock().map_err(|_| LikeError::Poisoned)
    }
}
