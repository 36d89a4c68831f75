//! Request/Response types for the HTTP API

use flock_core::{Post, UserId};
use serde::{Deserialize, Serialize};

// ============================================================================
// Account Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub name: String,
}

/// Look a user up by id or by login; `uid` wins when both are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserLookup {
    pub uid: Option<u64>,
    pub login: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserQuery {
    pub uid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserResponse {
    pub deleted: bool,
}

// ============================================================================
// Graph Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowQuery {
    /// The user doing the (un)following
    pub uid: u64,

    #[serde(rename = "otherId")]
    pub other_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowResponse {
    pub follower: UserId,
    pub following: UserId,
    pub followed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnfollowResponse {
    pub follower: UserId,
    pub following: UserId,
    pub unfollowed: bool,
}

// ============================================================================
// Post and Timeline Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub uid: u64,
    pub msg: String,
}

/// The stored post, plus how far its fan-out got.
///
/// `partialFanout` is set when some follower timelines were not written;
/// `delivered` then counts the ones that were.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(flatten)]
    pub post: Post,
    pub partial_fanout: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineQuery {
    pub uid: Option<u64>,
    pub login: Option<String>,

    /// 1-based; defaults to the first page
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineResponse {
    pub uid: UserId,
    pub page: u32,
    pub posts: Vec<Post>,
    pub timed_out: bool,
}

// ============================================================================
// Health and Errors
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
