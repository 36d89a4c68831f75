//! HTTP API handlers

use super::state::AppState;
use super::types::*;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use flock_core::store::Store;
use flock_core::{TimelineError, User, UserId};
use std::sync::Arc;
use tracing::{error, warn};

/// Error type for API responses
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<TimelineError> for ApiError {
    fn from(err: TimelineError) -> Self {
        let status = match &err {
            TimelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            TimelineError::AlreadyExists(_) => StatusCode::CONFLICT,
            TimelineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TimelineError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            error: self.message,
            details: None,
        };
        (self.status, Json(error_response)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn resolve_user<S: Store>(
    state: &AppState<S>,
    uid: Option<u64>,
    login: Option<String>,
) -> ApiResult<UserId> {
    match (uid, login) {
        (Some(uid), _) => Ok(UserId(uid)),
        (None, Some(login)) => Ok(state.service.user_id_by_login(login).await?),
        (None, None) => Err(ApiError::bad_request("either uid or login is required")),
    }
}

// ============================================================================
// Account Handlers
// ============================================================================

/// POST /users - Register a new account
pub async fn create_user<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let id = state.service.create_user(req.username, req.name).await?;
    let user = state.service.get_user(id).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /users?uid=|login= - Fetch one account
pub async fn get_user<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(lookup): Query<UserLookup>,
) -> ApiResult<Json<User>> {
    let user = match (lookup.uid, lookup.login) {
        (Some(uid), _) => state.service.get_user(UserId(uid)).await?,
        (None, Some(login)) => state.service.get_user_by_login(login).await?,
        (None, None) => return Err(ApiError::bad_request("either uid or login is required")),
    };
    Ok(Json(user))
}

/// DELETE /users?uid= - Remove an account; unknown ids succeed
pub async fn delete_user<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<DeleteUserQuery>,
) -> ApiResult<Json<DeleteUserResponse>> {
    let deleted = state.service.delete_user(UserId(query.uid)).await?;
    Ok(Json(DeleteUserResponse { deleted }))
}

// ============================================================================
// Graph Handlers
// ============================================================================

/// POST /follow?uid=&otherId= - `uid` starts following `otherId`
pub async fn follow<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<FollowQuery>,
) -> ApiResult<Json<FollowResponse>> {
    let follower = UserId(query.uid);
    let following = UserId(query.other_id);
    let followed = state.service.follow(follower, following).await?;
    Ok(Json(FollowResponse {
        follower,
        following,
        followed,
    }))
}

/// POST /unfollow?uid=&otherId= - `uid` stops following `otherId`
pub async fn unfollow<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<FollowQuery>,
) -> ApiResult<Json<UnfollowResponse>> {
    let follower = UserId(query.uid);
    let following = UserId(query.other_id);
    let unfollowed = state.service.unfollow(follower, following).await?;
    Ok(Json(UnfollowResponse {
        follower,
        following,
        unfollowed,
    }))
}

// ============================================================================
// Post and Timeline Handlers
// ============================================================================

/// POST /status - Publish a post and fan it out
///
/// A fan-out that stops part way still answers 201 with the post, since it
/// exists and is in the author's timeline, but flags `partialFanout`.
pub async fn publish<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let (post_id, delivered) = match state.service.publish(UserId(req.uid), req.msg).await {
        Ok(id) => (id, None),
        Err(TimelineError::PartialFanout {
            post_id, delivered, ..
        }) => {
            warn!(%post_id, delivered, "Answering publish despite incomplete fan-out");
            (post_id, Some(delivered))
        }
        Err(err) => return Err(err.into()),
    };
    let post = state.service.get_post(post_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            post,
            partial_fanout: delivered.is_some(),
            delivered,
        }),
    ))
}

/// GET /timelines?uid=|login=&page= - One page of a user's timeline
pub async fn get_timeline<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<Json<TimelineResponse>> {
    let uid = resolve_user(&state, query.uid, query.login).await?;
    let page = query.page.unwrap_or(1);
    let timeline = state
        .service
        .get_timeline(uid, page, state.page_size)
        .await?;
    Ok(Json(TimelineResponse {
        uid,
        page: timeline.page,
        posts: timeline.posts,
        timed_out: timeline.timed_out,
    }))
}

/// GET /health - Store liveness
pub async fn health<S: Store>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    match state.service.check_store().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                store: true,
            }),
        ),
        Err(err) => {
            warn!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    store: false,
                }),
            )
        }
    }
}
