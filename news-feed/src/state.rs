use std::sync::Arc;

use crate::{
    comments::CommentStore,
    dispatch::{FanoutDispatcher, FanoutHandle},
    fanout::FanoutService,
    graph::FollowGraph,
    likes::LikeStore,
    notifications::NotificationInbox,
    pagination::CursorPaginator,
    settings::Settings,
    store::{FeedEntryStore, InMemoryFeedStore},
    tweets::TweetStore,
};

/// Everything the HTTP handlers share.
pub struct AppState {
    pub settings: Settings,
    pub tweets: Arc<TweetStore>,
    pub graph: Arc<FollowGraph>,
    pub feeds: Arc<dyn FeedEntryStore>,
    pub likes: LikeStore,
    pub comments: CommentStore,
    pub notifications: NotificationInbox,
    pub paginator: CursorPaginator,
    pub fanout: FanoutHandle,
}

impl AppState {
    /// Builds empty in-memory stores and starts the fanout workers.
    ///
    /// Must be called from inside a tokio runtime. The returned dispatcher
    /// owns the workers; call [`FanoutDispatcher::shutdown`] once the server
    /// has stopped taking requests.
    pub fn bootstrap(settings: Settings) -> (Arc<Self>, FanoutDispatcher) {
        let tweets = Arc::new(TweetStore::new());
        let graph = Arc::new(FollowGraph::new());
        let feeds: Arc<dyn FeedEntryStore> = Arc::new(InMemoryFeedStore::new());

        let service = FanoutService::new(
            graph.clone(),
            Arc::clone(&feeds),
            settings.parallel_threshold,
        )
        .with_tweet_lookup(tweets.clone());
        let dispatcher = FanoutDispatcher::spawn(
            Arc::new(service),
            settings.fanout_workers,
            settings.fanout_queue_capacity,
        );

        let state = Arc::new(Self {
            paginator: CursorPaginator::new(Arc::clone(&feeds)),
            fanout: dispatcher.handle(),
            likes: LikeStore::new(),
            comments: CommentStore::new(),
            notifications: NotificationInbox::new(),
            settings,
            tweets,
            graph,
            feeds,
        });

        (state, dispatcher)
    }
}
