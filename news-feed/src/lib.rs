//! News feed backend built around fanout-on-write.
//!
//! When a user posts a tweet, one feed entry is written into the inbox of
//! every follower and of the author. Readers page through their inbox with a
//! value cursor (`created_at` plus entry id), so pages stay stable while new
//! entries keep landing at the head.
//!
//! # Architecture
//!
//! - **Request path**: axum handlers create tweets and enqueue a fanout job;
//!   feed reads go straight to the paginator.
//! - **Fanout workers**: a fixed pool of tokio tasks pulls jobs from a bounded
//!   queue and runs the synchronous fanout on the blocking pool.
//! - **Storage**: the feed store enforces `(user, tweet)` uniqueness inside a
//!   single critical section, which is the only concurrency control the
//!   pipeline relies on.
//!
//! # Modules
//!
//! - [`model`]: identifiers and the records shared between components
//! - [`graph`]: follower lookups and the in-memory follow graph
//! - [`store`]: per-user feed inboxes with idempotent append
//! - [`fanout`]: writes a tweet into every recipient inbox
//! - [`dispatch`]: queue and worker pool that run fanout off the request path
//! - [`pagination`]: value cursors and the feed paginator
//! - [`tweets`], [`likes`], [`comments`]: in-memory stand-ins for the tweet,
//!   like and comment tables
//! - [`notifications`]: per-user inbox fed by comments and likes
//! - [`settings`], [`cli`]: runtime configuration
//! - [`state`], [`api`]: shared application state and the HTTP surface

pub mod api;
pub mod cli;
pub mod comments;
pub mod dispatch;
pub mod fanout;
pub mod graph;
pub mod likes;
pub mod model;
pub mod notifications;
pub mod pagination;
pub mod settings;
pub mod state;
pub mod store;
pub mod tweets;
