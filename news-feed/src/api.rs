//! HTTP surface.
//!
//! The caller identifies itself with the `x-user-id` header. Authentication
//! proper is somebody else's job; this layer only needs a viewer id to scope
//! feeds, authorship, comments and likes.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    comments::{Comment, CommentError},
    dispatch::DispatchError,
    graph::GraphError,
    likes::{Like, LikeError, LikeTarget},
    model::{CommentId, EntryId, FeedEntry, FollowRelationship, TweetId, UserId},
    notifications::{Notification, NotificationError, NotificationKind},
    pagination::{Cursor, CursorError, Page},
    state::AppState,
    store::StoreError,
    tweets::{Tweet, TweetError, TweetLookup},
};

pub const VIEWER_HEADER: &str = "x-user-id";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication credentials were not provided")]
    Unauthenticated,

    #[error("invalid {header} header", header = VIEWER_HEADER)]
    InvalidViewer,

    #[error("invalid cursor: {0}")]
    InvalidCursor(#[from] CursorError),

    #[error("invalid page_size `{0}`")]
    InvalidPageSize(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthenticated | ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::InvalidViewer
            | ApiError::InvalidCursor(_)
            | ApiError::InvalidPageSize(_)
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<LikeError> for ApiError {
    fn from(err: LikeError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<NotificationError> for ApiError {
    fn from(err: NotificationError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<CommentError> for ApiError {
    fn from(err: CommentError) -> Self {
        match err {
            CommentError::EmptyContent | CommentError::TooLong(_) => {
                ApiError::BadRequest(err.to_string())
            }
            CommentError::NotFound(_) => ApiError::NotFound(err.to_string()),
            CommentError::NotOwner { .. } => ApiError::Forbidden(err.to_string()),
            CommentError::Poisoned => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<GraphError> for ApiError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::SelfFollow(_) => ApiError::BadRequest(err.to_string()),
            GraphError::Poisoned => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TweetError> for ApiError {
    fn from(err: TweetError) -> Self {
        match err {
            TweetError::EmptyContent | TweetError::TooLong(_) => {
                ApiError::BadRequest(err.to_string())
            }
            TweetError::NotFound(_) => ApiError::NotFound(err.to_string()),
            TweetError::NotAuthor { .. } => ApiError::Forbidden(err.to_string()),
            TweetError::Poisoned => ApiError::Internal(err.to_string()),
        }
    }
}

/// Id of the user making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewer(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(VIEWER_HEADER)
            .ok_or(ApiError::Unauthenticated)?;
        raw.to_str()
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .map(Viewer)
            .ok_or(ApiError::InvalidViewer)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/newsfeeds/", get(list_newsfeed))
        .route("/api/tweets/", get(list_tweets).post(create_tweet))
        .route("/api/tweets/:id", get(get_tweet).delete(delete_tweet))
        .route("/api/friendships/:id/follow/", post(follow))
        .route("/api/friendships/:id/unfollow/", post(unfollow))
        .route("/api/friendships/:id/followers/", get(followers))
        .route("/api/friendships/:id/followings/", get(followings))
        .route("/api/likes/", post(create_like))
        .route("/api/likes/cancel/", post(cancel_like))
        .route("/api/comments/", get(list_comments).post(create_comment))
        .route("/api/comments/:id", put(update_comment).delete(destroy_comment))
        .route("/api/notifications/", get(list_notifications))
        .route("/api/notifications/unread-count/", get(unread_notifications))
        .route("/api/notifications/mark-all-as-read/", post(mark_notifications_read))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Query string of a feed request. Empty values count as absent.
#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    pub older_than: Option<String>,
    pub newer_than: Option<String>,
    pub page_size: Option<String>,
}

impl FeedQuery {
    fn cursor(raw: Option<&str>) -> Result<Option<Cursor>, CursorError> {
        raw.map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(str::parse)
            .transpose()
    }

    fn page_size(&self) -> Result<Option<usize>, ApiError> {
        self.page_size
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse()
                    .map_err(|_| ApiError::InvalidPageSize(raw.to_string()))
            })
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntryView {
    pub id: EntryId,
    pub tweet_id: Option<TweetId>,
    pub created_at: DateTime<Utc>,
    pub cursor: Cursor,
}

impl From<FeedEntry> for FeedEntryView {
    fn from(entry: FeedEntry) -> Self {
        Self {
            cursor: entry.cursor(),
            id: entry.id,
            tweet_id: entry.tweet_id,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPageView {
    pub results: Vec<FeedEntryView>,
    pub has_next_page: bool,
}

impl From<Page> for FeedPageView {
    fn from(page: Page) -> Self {
        Self {
            results: page.results.into_iter().map(FeedEntryView::from).collect(),
            has_next_page: page.has_next_page,
        }
    }
}

async fn list_newsfeed(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Query(query): Query<FeedQuery>,
) -> Result<Json<FeedPageView>, ApiError> {
    let newer_than = FeedQuery::cursor(query.newer_than.as_deref())?;
    let older_than = FeedQuery::cursor(query.older_than.as_deref())?;
    let limit = state.settings.page_size(query.page_size()?);

    let page = state.paginator.page(viewer, newer_than, older_than, limit)?;
    Ok(Json(page.into()))
}

#[derive(Debug, Deserialize)]
pub struct CreateTweet {
    pub content: String,
}

async fn create_tweet(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    payload: Result<Json<CreateTweet>, JsonRejection>,
) -> Result<(StatusCode, Json<Tweet>), ApiError> {
    let body = json_body(payload)?;
    let tweet = state.tweets.create(viewer, &body.content)?;
    state.fanout.enqueue(tweet.created_event()).await?;

    info!(tweet_id = tweet.id, author_id = viewer, "tweet created");
    Ok((StatusCode::CREATED, Json(tweet)))
}

#[derive(Debug, Deserialize)]
pub struct ListTweets {
    pub user_id: Option<UserId>,
}

async fn list_tweets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTweets>,
) -> Result<Json<Vec<Tweet>>, ApiError> {
    let author_id = query
        .user_id
        .ok_or_else(|| ApiError::BadRequest("missing user_id in request".to_string()))?;
    Ok(Json(state.tweets.list_by_author(author_id)?))
}

#[derive(Debug, Serialize)]
pub struct TweetDetail {
    #[serde(flatten)]
    pub tweet: Tweet,
    pub likes_count: usize,
    pub likes: Vec<Like>,
    pub has_liked: bool,
    pub comments: Vec<Comment>,
}

async fn get_tweet(
    State(state): State<Arc<AppState>>,
    viewer: Option<Viewer>,
    Path(tweet_id): Path<TweetId>,
) -> Result<Json<TweetDetail>, ApiError> {
    let tweet = state.tweets.get(tweet_id)?;
    let target = LikeTarget::Tweet(tweet_id);
    let likes = state.likes.likes_for(target)?;
    let has_liked = match viewer {
        Some(Viewer(viewer)) => likes.iter().any(|like| like.user_id == viewer),
        None => false,
    };
    let comments = state.comments.list_for_tweet(tweet_id)?;

    Ok(Json(TweetDetail {
        tweet,
        likes_count: likes.len(),
        likes,
        has_liked,
        comments,
    }))
}

async fn delete_tweet(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(tweet_id): Path<TweetId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.tweets.delete(tweet_id, viewer)?;
    let detached = state.feeds.detach_tweet(tweet_id)?;
    let orphaned = state.comments.detach_tweet(tweet_id)?;

    info!(tweet_id, detached, orphaned, "tweet deleted");
    Ok(Json(json!({ "success": true, "detached": detached })))
}

async fn follow(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(followee): Path<UserId>,
) -> Result<(StatusCode, Json<FollowRelationship>), ApiError> {
    match state.graph.follow(viewer, followee)? {
        Some(relationship) => Ok((StatusCode::CREATED, Json(relationship))),
        None => Err(ApiError::BadRequest(format!(
            "user {viewer} has already followed user {followee}"
        ))),
    }
}

async fn unfollow(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(followee): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if viewer == followee {
        return Err(ApiError::BadRequest(
            "you cannot unfollow yourself".to_string(),
        ));
    }
    let removed = state.graph.unfollow(viewer, followee)?;
    Ok(Json(json!({ "success": true, "deleted": usize::from(removed) })))
}

async fn followers(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let followers = state.graph.follower_relationships(user_id)?;
    Ok(Json(json!({ "followers": followers })))
}

async fn followings(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let followings = state.graph.followings_of(user_id)?;
    Ok(Json(json!({ "followings": followings })))
}

#[derive(Debug, Deserialize)]
pub struct LikeRequest {
    pub target: LikeTarget,
}

async fn create_like(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    payload: Result<Json<LikeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Like>), ApiError> {
    let LikeRequest { target } = json_body(payload)?;
    let (owner_id, kind) = match target {
        LikeTarget::Tweet(tweet_id) => (
            state.tweets.get(tweet_id)?.author_id,
            NotificationKind::LikedTweet { tweet_id },
        ),
        LikeTarget::Comment(comment_id) => (
            state.comments.get(comment_id)?.user_id,
            NotificationKind::LikedComment { comment_id },
        ),
    };

    let (like, inserted) = state.likes.like(viewer, target)?;
    if !inserted {
        return Ok((StatusCode::OK, Json(like)));
    }

    state.notifications.notify(owner_id, viewer, kind)?;
    Ok((StatusCode::CREATED, Json(like)))
}

async fn cancel_like(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    payload: Result<Json<LikeRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let LikeRequest { target } = json_body(payload)?;
    let removed = state.likes.unlike(viewer, target)?;
    Ok(Json(json!({ "success": true, "deleted": usize::from(removed) })))
}

#[derive(Debug, Deserialize)]
pub struct ListComments {
    pub tweet_id: Option<TweetId>,
}

async fn list_comments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListComments>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let tweet_id = query
        .tweet_id
        .ok_or_else(|| ApiError::BadRequest("missing tweet_id in request".to_string()))?;
    let comments = state.comments.list_for_tweet(tweet_id)?;
    Ok(Json(json!({ "comments": comments })))
}

#[derive(Debug, Deserialize)]
pub struct CreateComment {
    pub tweet_id: TweetId,
    pub content: String,
}

async fn create_comment(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    payload: Result<Json<CreateComment>, JsonRejection>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let CreateComment { tweet_id, content } = json_body(payload)?;
    let tweet = state.tweets.get(tweet_id).map_err(|err| match err {
        TweetError::NotFound(_) => ApiError::BadRequest(err.to_string()),
        err => err.into(),
    })?;

    let mut comment = state.comments.create(viewer, tweet_id, &content)?;
    // The tweet may have been deleted, and its comments detached, meanwhile.
    if !state.tweets.tweet_exists(tweet_id)? {
        state.comments.detach_tweet(tweet_id)?;
        comment.tweet_id = None;
    }

    state.notifications.notify(
        tweet.author_id,
        viewer,
        NotificationKind::CommentedOnTweet {
            tweet_id,
            comment_id: comment.id,
        },
    )?;

    info!(comment_id = comment.id, tweet_id, user_id = viewer, "comment created");
    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateComment {
    pub content: String,
}

async fn update_comment(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(comment_id): Path<CommentId>,
    payload: Result<Json<UpdateComment>, JsonRejection>,
) -> Result<Json<Comment>, ApiError> {
    let UpdateComment { content } = json_body(payload)?;
    Ok(Json(state.comments.update(comment_id, viewer, &content)?))
}

async fn destroy_comment(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
    Path(comment_id): Path<CommentId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.comments.delete(comment_id, viewer)?;
    state.likes.unlike_all(LikeTarget::Comment(comment_id))?;
    Ok(Json(json!({ "success": true })))
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notifications: Vec<Notification> = state.notifications.list_for(viewer)?;
    Ok(Json(json!({ "notifications": notifications })))
}

async fn unread_notifications(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
) -> Result<Json<serde_json::Value>, ApiError> {
    let unread_count = state.notifications.unread_count(viewer)?;
    Ok(Json(json!({ "unread_count": unread_count })))
}

async fn mark_notifications_read(
    State(state): State<Arc<AppState>>,
    Viewer(viewer): Viewer,
) -> Result<Json<serde_json::Value>, ApiError> {
    let marked_count = state.notifications.mark_all_read(viewer)?;
    Ok(Json(json!({ "marked_count": marked_count })))
}

// Malformed bodies are client errors, whatever stage of parsing rejected them.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}
