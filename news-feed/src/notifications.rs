//! Per-user notification inbox.
//!
//! Comments and likes notify the owner of the thing they land on. Acting on
//! your own tweet or comment never notifies you.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CommentId, TweetId, UserId};

pub type NotificationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    CommentedOnTweet {
        tweet_id: TweetId,
        comment_id: CommentId,
    },
    LikedTweet {
        tweet_id: TweetId,
    },
    LikedComment {
        comment_id: CommentId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub actor_id: UserId,
    pub kind: NotificationKind,
    pub created_at: DateTime<Utc>,
    pub unread: bool,
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification inbox lock poisoned")]
    Poisoned,
}

#[derive(Default)]
pub struct NotificationInbox {
    state: Mutex<InboxState>,
}

#[derive(Default)]
struct InboxState {
    next_id: NotificationId,
    by_recipient: HashMap<UserId, Vec<Notification>>,
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a notification unless `actor_id` is the recipient.
    pub fn notify(
        &self,
        recipient_id: UserId,
        actor_id: UserId,
        kind: NotificationKind,
    ) -> Result<Option<Notification>, NotificationError> {
        if recipient_id == actor_id {
            return Ok(None);
        }

        let mut state = self.lock()?;
        state.next_id += 1;
        let notification = Notification {
            id: state.next_id,
            recipient_id,
            actor_id,
            kind,
            created_at: Utc::now().trunc_subsecs(6),
            unread: true,
        };
        state
            .by_recipient
            .entry(recipient_id)
            .or_default()
            .push(notification.clone());

        Ok(Some(notification))
    }

    /// Notifications for `user_id`, newest first.
    pub fn list_for(&self, user_id: UserId) -> Result<Vec<Notification>, NotificationError> {
        Ok(self
            .lock()?
            .by_recipient
            .get(&user_id)
            .map(|inbox| inbox.iter().rev().cloned().collect())
            .unwrap_or_default())
    }

    pub fn unread_count(&self, user_id: UserId) -> Result<usize, NotificationError> {
        Ok(self
            .lock()?
            .by_recipient
            .get(&user_id)
            .map_or(0, |inbox| inbox.iter().filter(|n| n.unread).count()))
    }

    /// Marks everything in `user_id`'s inbox read. Returns how many changed.
    pub fn mark_all_read(&self, user_id: UserId) -> Result<usize, NotificationError> {
        let mut state = self.lock()?;
        let Some(inbox) = state.by_recipient.get_mut(&user_id) else {
            return Ok(0);
        };
        let mut marked = 0;
        for notification in inbox.iter_mut().filter(|n| n.unread) {
            notification.unread = false;
            marked += 1;
        }
        Ok(marked)
    }

    fn lock(&self) -> Result<MutexGuard<'_, InboxState>, NotificationError> {
        self.state.lock().map_err(|_| NotificationError::Poisoned)
    }
}
