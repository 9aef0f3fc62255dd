//! Follow relationships.
//!
//! Fanout only needs [`FollowerGraph::followers_of`]. The in-memory
//! [`FollowGraph`] also covers the follow/unfollow endpoints.

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{FollowRelationship, UserId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("user {0} cannot follow themselves")]
    SelfFollow(UserId),

    #[error("follow graph lock poisoned")]
    Poisoned,
}

/// Read-only view used by fanout.
///
/// Results reflect the graph at call time. Follows racing with a fanout may
/// or may not be included.
pub trait FollowerGraph: Send + Sync {
    fn followers_of(&self, user_id: UserId) -> Result<Vec<UserId>, GraphError>;
}

/// In-memory follow graph, indexed in both directions.
#[derive(Default)]
pub struct FollowGraph {
    state: RwLock<GraphState>,
}

#[derive(Default)]
struct GraphState {
    // followee -> follower -> followed at
    followers: HashMap<UserId, HashMap<UserId, DateTime<Utc>>>,
    // follower -> followee -> followed at
    followings: HashMap<UserId, HashMap<UserId, DateTime<Utc>>>,
}

impl FollowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `follower` follows `followee`.
    ///
    /// Returns the new relationship, or `None` when the pair already exists;
    /// the original timestamp is kept in that case.
    pub fn follow(
        &self,
        follower: UserId,
        followee: UserId,
    ) -> Result<Option<FollowRelationship>, GraphError> {
        self.follow_at(follower, followee, Utc::now())
    }

    pub fn follow_at(
        &self,
        follower: UserId,
        followee: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Option<FollowRelationship>, GraphError> {
        if follower == followee {
            return Err(GraphError::SelfFollow(follower));
        }

        let mut state = self.write()?;
        let followers = state.followers.entry(followee).or_default();
        if followers.contains_key(&follower) {
            return Ok(None);
        }
        followers.insert(follower, created_at);
        state
            .followings
            .entry(follower)
            .or_default()
            .insert(followee, created_at);

        Ok(Some(FollowRelationship {
            follower_id: follower,
            followee_id: followee,
            created_at,
        }))
    }

    /// Removes the edge if present. Returns whether anything was removed.
    pub fn unfollow(&self, follower: UserId, followee: UserId) -> Result<bool, GraphError> {
        let mut state = self.write()?;
        let removed = state
            .followers
            .get_mut(&followee)
            .and_then(|followers| followers.remove(&follower))
            .is_some();
        if let Some(followings) = state.followings.get_mut(&follower) {
            followings.remove(&followee);
        }

        Ok(removed)
    }

    pub fn has_followed(&self, follower: UserId, followee: UserId) -> Result<bool, GraphError> {
        Ok(self
            .read()?
            .followers
            .get(&followee)
            .is_some_and(|followers| followers.contains_key(&follower)))
    }

    /// Everyone following `user_id`, most recent follow first.
    pub fn follower_relationships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<FollowRelationship>, GraphError> {
        let state = self.read()?;
        let mut relationships: Vec<_> = state
            .followers
            .get(&user_id)
            .into_iter()
            .flatten()
            .map(|(&follower_id, &created_at)| FollowRelationship {
                follower_id,
                followee_id: user_id,
                created_at,
            })
            .collect();
        sort_newest_first(&mut relationships, |r| r.follower_id);
        Ok(relationships)
    }

    /// Everyone `user_id` follows, most recent follow first.
    pub fn followings_of(&self, user_id: UserId) -> Result<Vec<FollowRelationship>, GraphError> {
        let state = self.read()?;
        let mut relationships: Vec<_> = state
            .followings
            .get(&user_id)
            .into_iter()
            .flatten()
            .map(|(&followee_id, &created_at)| FollowRelationship {
                follower_id: user_id,
                followee_id,
                created_at,
            })
            .collect();
        sort_newest_first(&mut relationships, |r| r.followee_id);
        Ok(relationships)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, GraphState>, GraphError> {
        self.state.read().map_err(|_| GraphError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, GraphState>, GraphError> {
        self.state.write().map_err(|_| GraphError::Poisoned)
    }
}

impl FollowerGraph for FollowGraph {
    fn followers_of(&self, user_id: UserId) -> Result<Vec<UserId>, GraphError> {
        Ok(self
            .read()?
            .followers
            .get(&user_id)
            .map(|followers| followers.keys().copied().collect())
            .unwrap_or_default())
    }
}

fn sort_newest_first(
    relationships: &mut [FollowRelationship],
    other: fn(&FollowRelationship) -> UserId,
) {
    relationships.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| other(b).cmp(&other(a)))
    });
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
    }

    #[test]
    fn follow_is_unique_per_pair() {
        let graph = FollowGraph::new();
        let created = graph.follow(1, 2).expect("follow").expect("new edge");
        assert_eq!((created.follower_id, created.followee_id), (1, 2));
        assert_eq!(graph.follow(1, 2), Ok(None));
        assert!(
            graph.follow(2, 1).expect("follow").is_some(),
            "reverse edge is a different pair"
        );

        assert_eq!(graph.followers_of(2), Ok(vec![1]));
    }

    #[test]
    fn self_follow_is_rejected() {
        let graph = FollowGraph::new();
        assert_eq!(graph.follow(3, 3), Err(GraphError::SelfFollow(3)));
        assert_eq!(graph.followers_of(3), Ok(vec![]));
    }

    #[test]
    fn unfollow_removes_both_directions() {
        let graph = FollowGraph::new();
        graph.follow(1, 2).expect("follow");

        assert_eq!(graph.unfollow(1, 2), Ok(true));
        assert_eq!(graph.unfollow(1, 2), Ok(false));
        assert_eq!(graph.has_followed(1, 2), Ok(false));
        assert!(graph.followings_of(1).expect("followings").is_empty());
    }

    #[test]
    fn relationships_list_newest_first() {
        let graph = FollowGraph::new();
        graph.follow_at(10, 1, at(100)).expect("follow");
        graph.follow_at(11, 1, at(300)).expect("follow");
        graph.follow_at(12, 1, at(200)).expect("follow");
        graph.follow_at(10, 5, at(50)).expect("follow");

        let followers: Vec<_> = graph
            .follower_relationships(1)
            .expect("followers")
            .into_iter()
            .map(|r| r.follower_id)
            .collect();
        assert_eq!(followers, vec![11, 12, 10]);

        let followings: Vec<_> = graph
            .followings_of(10)
            .expect("followings")
            .into_iter()
            .map(|r| r.followee_id)
            .collect();
        assert_eq!(followings, vec![1, 5]);
    }
}
