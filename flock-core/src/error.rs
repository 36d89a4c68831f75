//! Error taxonomy of the timeline engine

use crate::models::PostId;
use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// Result type for timeline engine operations
pub type TimelineResult<T> = Result<T, TimelineError>;

/// What a `NotFound` refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Login,
    Post,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::User => "user",
            Entity::Login => "login",
            Entity::Post => "post",
        })
    }
}

#[derive(Error, Debug)]
pub enum TimelineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("login already registered: {0}")]
    AlreadyExists(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rolled the batch back; none of its effects are visible
    #[error("atomic batch aborted: {0}")]
    BatchAborted(String),

    /// The post exists and sits in its author's timeline, but not every
    /// follower timeline received it
    #[error("post {post_id} published, fan-out stopped after {delivered} follower timelines: {cause}")]
    PartialFanout {
        post_id: PostId,
        delivered: usize,
        #[source]
        cause: StoreError,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("background task failed: {0}")]
    TaskFailed(String),
}

impl TimelineError {
    pub fn not_found(entity: Entity, id: impl fmt::Display) -> Self {
        TimelineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        TimelineError::CorruptRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TimelineError::NotFound { .. })
    }
}

impl From<StoreError> for TimelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => TimelineError::StoreUnavailable(msg),
            StoreError::BatchAborted(msg) => TimelineError::BatchAborted(msg),
            StoreError::Command(msg) => TimelineError::Store(msg),
        }
    }
}

impl From<tokio::task::JoinError> for TimelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        TimelineError::TaskFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TimelineError::not_found(Entity::User, 42);
        assert_eq!(err.to_string(), "user not found: 42");
        assert!(err.is_not_found());

        let err = TimelineError::AlreadyExists("alice".to_string());
        assert_eq!(err.to_string(), "login already registered: alice");

        let err = TimelineError::PartialFanout {
            post_id: PostId(9),
            delivered: 1000,
            cause: StoreError::BatchAborted("EXECABORT".to_string()),
        };
        assert!(err.to_string().starts_with("post 9 published"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_store_error_conversion() {
        let err: TimelineError = StoreError::Unavailable("refused".into()).into();
        assert!(matches!(err, TimelineError::StoreUnavailable(_)));

        let err: TimelineError = StoreError::BatchAborted("rollback".into()).into();
        assert!(matches!(err, TimelineError::BatchAborted(_)));

        let err: TimelineError = StoreError::Command("WRONGTYPE".into()).into();
        assert!(matches!(err, TimelineError::Store(_)));
    }
}
