//! Post store: immutable post records and the author's post counter

use crate::clock::Clock;
use crate::error::{Entity, TimelineError, TimelineResult};
use crate::keys::{self, user_field};
use crate::models::{Post, PostId, UserId};
use crate::store::{Batch, Connection, Reply, Store};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct PostStore<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> PostStore<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Allocate an id and write the post record.
    ///
    /// The author login and the new id come from one atomic batch; the
    /// record itself and the author's `posts` counter are written after
    /// it. If that write fails the id stays allocated and unused.
    pub fn create_post(&self, author: UserId, message: &str) -> TimelineResult<Post> {
        let mut conn = self.store.acquire()?;
        let author_key = keys::user(author);

        let mut batch = Batch::with_capacity(2);
        batch
            .hash_get(author_key.as_str(), user_field::LOGIN)
            .counter_incr(keys::POST_ID_COUNTER);
        let mut replies = conn.commit_batch(batch)?.into_iter();

        let login = replies.next().and_then(Reply::into_text);
        let id = replies
            .next()
            .and_then(|reply| reply.as_int())
            .map(|n| PostId(n as u64))
            .ok_or_else(|| TimelineError::Store("post id counter gave no integer".to_string()))?;

        let Some(author_login) = login else {
            warn!(post_id = %id, author = %author, "Post for unknown author, id abandoned");
            return Err(TimelineError::not_found(Entity::User, author));
        };

        let post = Post {
            id,
            author_id: author,
            author_login,
            message: message.to_string(),
            posted_at: self.clock.now(),
        };
        conn.hash_set_multiple(&keys::post(id), &post.to_fields())?;
        conn.hash_incr_by(&author_key, user_field::POSTS, 1)?;

        debug!(post_id = %id, author = %author, "Post record written");
        Ok(post)
    }

    pub fn get_post(&self, id: PostId) -> TimelineResult<Post> {
        let mut conn = self.store.acquire()?;
        fetch_post(&mut conn, id)
    }
}

/// Read one post record over an already borrowed connection.
pub(crate) fn fetch_post<C: Connection>(conn: &mut C, id: PostId) -> TimelineResult<Post> {
    let key = keys::post(id);
    let fields = conn.hash_get_all(&key)?;
    Post::from_fields(&key, &fields)?.ok_or_else(|| TimelineError::not_found(Entity::Post, id))
}
