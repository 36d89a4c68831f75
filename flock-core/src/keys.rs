//! Key-space layout shared with every other client of the store
//!
//! These strings are a wire contract; existing data is addressed by them.

use crate::models::{PostId, UserId};

/// Hash of login -> user id
pub const LOGIN_INDEX: &str = "users:";

/// Global user id counter
pub const USER_ID_COUNTER: &str = "user:id";

/// Global post id counter
pub const POST_ID_COUNTER: &str = "status:id";

pub fn user(id: UserId) -> String {
    format!("user:{}", id)
}

pub fn post(id: PostId) -> String {
    format!("status:{}", id)
}

pub fn timeline(owner: UserId) -> String {
    format!("timeline:{}", owner)
}

pub fn following(id: UserId) -> String {
    format!("following:{}", id)
}

pub fn followers(id: UserId) -> String {
    format!("followers:{}", id)
}

/// Field names of the `user:<id>` hash
pub mod user_field {
    pub const LOGIN: &str = "login";
    pub const ID: &str = "id";
    pub const NAME: &str = "name";
    pub const FOLLOWERS: &str = "followers";
    pub const FOLLOWING: &str = "following";
    pub const POSTS: &str = "posts";
    pub const SIGNUP: &str = "signup";
}

/// Field names of the `status:<id>` hash
pub mod post_field {
    pub const MESSAGE: &str = "message";
    pub const POSTED: &str = "posted";
    pub const ID: &str = "id";
    pub const AUTHOR_ID: &str = "uid";
    pub const AUTHOR_LOGIN: &str = "login";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(user(UserId(7)), "user:7");
        assert_eq!(post(PostId(100)), "status:100");
        assert_eq!(timeline(UserId(2)), "timeline:2");
        assert_eq!(following(UserId(2)), "following:2");
        assert_eq!(followers(UserId(1)), "followers:1");
        assert_eq!(LOGIN_INDEX, "users:");
        assert_eq!(USER_ID_COUNTER, "user:id");
        assert_eq!(POST_ID_COUNTER, "status:id");
    }
}
