//! Records stored by the engine and the ids that address them

use crate::error::{TimelineError, TimelineResult};
use crate::keys::{post_field, user_field};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Identifier allocated from the `user:id` counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

/// Identifier allocated from the `status:id` counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

macro_rules! id_impls {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map($name)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }
    };
}

id_impls!(UserId);
id_impls!(PostId);

/// A registered account with its denormalized counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub name: String,
    pub follower_count: u32,
    pub following_count: u32,
    pub post_count: u32,
    pub signup_time: i64,
}

impl User {
    /// A fresh record with zeroed counters.
    pub fn new(id: UserId, login: impl Into<String>, name: impl Into<String>, signup_time: i64) -> Self {
        Self {
            id,
            login: login.into(),
            name: name.into(),
            follower_count: 0,
            following_count: 0,
            post_count: 0,
            signup_time,
        }
    }

    /// Parse the `user:<id>` hash. An empty hash means the user does not exist.
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> TimelineResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let record = Record { key, fields };
        Ok(Some(User {
            id: record.parse(user_field::ID)?,
            login: record.text(user_field::LOGIN)?,
            name: record.text(user_field::NAME)?,
            follower_count: record.counter(user_field::FOLLOWERS)?,
            following_count: record.counter(user_field::FOLLOWING)?,
            post_count: record.counter(user_field::POSTS)?,
            signup_time: record.parse(user_field::SIGNUP)?,
        }))
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (user_field::LOGIN, self.login.clone()),
            (user_field::ID, self.id.to_string()),
            (user_field::NAME, self.name.clone()),
            (user_field::FOLLOWERS, self.follower_count.to_string()),
            (user_field::FOLLOWING, self.following_count.to_string()),
            (user_field::POSTS, self.post_count.to_string()),
            (user_field::SIGNUP, self.signup_time.to_string()),
        ]
    }
}

/// An immutable message, with the author login copied in at creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub author_login: String,
    pub message: String,
    pub posted_at: i64,
}

impl Post {
    /// Parse the `status:<id>` hash. An empty hash means the post does not exist.
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> TimelineResult<Option<Self>> {
        if fields.is_empty() {
            return Ok(None);
        }
        let record = Record { key, fields };
        Ok(Some(Post {
            id: record.parse(post_field::ID)?,
            author_id: record.parse(post_field::AUTHOR_ID)?,
            author_login: record.text(post_field::AUTHOR_LOGIN)?,
            message: record.text(post_field::MESSAGE)?,
            posted_at: record.parse(post_field::POSTED)?,
        }))
    }

    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (post_field::MESSAGE, self.message.clone()),
            (post_field::POSTED, self.posted_at.to_string()),
            (post_field::ID, self.id.to_string()),
            (post_field::AUTHOR_ID, self.author_id.to_string()),
            (post_field::AUTHOR_LOGIN, self.author_login.clone()),
        ]
    }
}

struct Record<'a> {
    key: &'a str,
    fields: &'a HashMap<String, String>,
}

impl Record<'_> {
    fn text(&self, name: &str) -> TimelineResult<String> {
        self.fields
            .get(name)
            .cloned()
            .ok_or_else(|| TimelineError::corrupt(self.key, format!("missing field '{}'", name)))
    }

    fn parse<T>(&self, name: &str) -> TimelineResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.text(name)?;
        raw.parse().map_err(|e: T::Err| {
            TimelineError::corrupt(self.key, format!("field '{}' = '{}': {}", name, raw, e))
        })
    }

    /// Counters are never reported below zero, even if a racing decrement
    /// left the stored value negative.
    fn counter(&self, name: &str) -> TimelineResult<u32> {
        let value: i64 = self.parse(name)?;
        Ok(value.clamp(0, u32::MAX as i64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: Vec<(&'static str, String)>) -> HashMap<String, String> {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_user_fields_roundtrip() {
        let user = User::new(UserId(1), "alice", "Alice", 1_700_000_000);
        let parsed = User::from_fields("user:1", &fields(user.to_fields()))
            .unwrap()
            .unwrap();
        assert_eq!(parsed, user);
    }

    #[test]
    fn test_user_negative_counter_reads_as_zero() {
        let mut stored = fields(User::new(UserId(1), "alice", "Alice", 0).to_fields());
        stored.insert("followers".to_string(), "-1".to_string());
        let parsed = User::from_fields("user:1", &stored).unwrap().unwrap();
        assert_eq!(parsed.follower_count, 0);
    }

    #[test]
    fn test_empty_hash_is_absent() {
        assert!(User::from_fields("user:9", &HashMap::new()).unwrap().is_none());
        assert!(Post::from_fields("status:9", &HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_post_is_reported() {
        let mut stored = fields(
            Post {
                id: PostId(100),
                author_id: UserId(1),
                author_login: "alice".to_string(),
                message: "hi".to_string(),
                posted_at: 5,
            }
            .to_fields(),
        );
        stored.insert("posted".to_string(), "yesterday".to_string());
        let err = Post::from_fields("status:100", &stored).unwrap_err();
        assert!(matches!(err, TimelineError::CorruptRecord { ref key, .. } if key == "status:100"));

        stored.remove("message");
        assert!(Post::from_fields("status:100", &stored).is_err());
    }

    #[test]
    fn test_post_serializes_camel_case() {
        let post = Post {
            id: PostId(100),
            author_id: UserId(1),
            author_login: "alice".to_string(),
            message: "hi".to_string(),
            posted_at: 5,
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["id"], 100);
        assert_eq!(json["authorLogin"], "alice");
        assert_eq!(json["postedAt"], 5);
    }
}
