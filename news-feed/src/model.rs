use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pagination::Cursor;

pub type UserId = u64;
pub type TweetId = u64;
pub type CommentId = u64;
pub type EntryId = u64;

/// One row of a viewer's inbox.
///
/// `user_id` is the viewer who sees the entry, not the author of the tweet.
/// Both references become `None` when the user or tweet they point at is
/// deleted; the row itself stays so the feed keeps its shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: EntryId,
    pub user_id: Option<UserId>,
    pub tweet_id: Option<TweetId>,
    pub created_at: DateTime<Utc>,
}

impl FeedEntry {
    /// Position of this entry in its owner's feed.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.created_at, self.id)
    }
}

/// Event published once a tweet has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetCreated {
    pub id: TweetId,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
}

/// `follower_id` follows `followee_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowRelationship {
    pub follower_id: UserId,
    pub followee_id: UserId,
    pub created_at: DateTime<Utc>,
}
