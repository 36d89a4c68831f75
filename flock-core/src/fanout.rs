//! Write-time fan-out of new posts into timeline indexes
//!
//! Publishing pays once per post, proportional to the author's follower
//! count, so that reading a timeline page only touches the page itself.

use crate::error::{TimelineError, TimelineResult};
use crate::graph;
use crate::keys::{self, post_field};
use crate::models::{PostId, UserId};
use crate::posts::PostStore;
use crate::store::{Batch, Connection, Store, StoreError};
use crate::telemetry;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FanoutEngine<S> {
    store: Arc<S>,
    posts: Arc<PostStore<S>>,
    batch_size: usize,
}

impl<S: Store> FanoutEngine<S> {
    /// `batch_size` bounds how many follower timelines are written per
    /// atomic batch; zero is treated as one.
    pub fn new(store: Arc<S>, posts: Arc<PostStore<S>>, batch_size: usize) -> Self {
        Self {
            store,
            posts,
            batch_size: batch_size.max(1),
        }
    }

    /// Create a post and push it into the author's and every follower's
    /// timeline.
    ///
    /// The author's own timeline is written before any follower timeline.
    /// If a follower batch fails the post stays published and the error is
    /// [`TimelineError::PartialFanout`]; nothing is retried.
    pub fn publish(&self, author: UserId, message: &str) -> TimelineResult<PostId> {
        let post = self.posts.create_post(author, message)?;
        let post_id = post.id;

        let mut conn = self.store.acquire()?;
        let post_key = keys::post(post_id);
        let posted_at = conn
            .hash_get(&post_key, post_field::POSTED)?
            .ok_or_else(|| TimelineError::corrupt(post_key.as_str(), "post record vanished"))?
            .parse::<i64>()
            .map_err(|e| TimelineError::corrupt(post_key.as_str(), e.to_string()))?;

        conn.sorted_set_add(&keys::timeline(author), posted_at, &post_id.to_string())?;
        counter!(telemetry::POSTS_PUBLISHED).increment(1);

        match self.syndicate(&mut conn, author, post_id, posted_at) {
            Ok(delivered) => {
                counter!(telemetry::FANOUT_DELIVERIES).increment(delivered as u64);
                info!(%post_id, %author, followers = delivered, "Post published");
                Ok(post_id)
            }
            Err((delivered, cause)) => {
                counter!(telemetry::FANOUT_DELIVERIES).increment(delivered as u64);
                counter!(telemetry::FANOUT_PARTIAL).increment(1);
                warn!(
                    %post_id,
                    %author,
                    delivered,
                    error = %cause,
                    "Fan-out stopped before reaching every follower"
                );
                Err(TimelineError::PartialFanout {
                    post_id,
                    delivered,
                    cause,
                })
            }
        }
    }

    /// Read the followers index once, then commit the timeline inserts in
    /// batches of at most `batch_size`.
    ///
    /// The id list is a single snapshot so that an unfollow landing mid-walk
    /// cannot shift anyone out of reach. Returns how many follower timelines
    /// were written, or that count and the error that stopped the walk.
    fn syndicate(
        &self,
        conn: &mut S::Conn,
        author: UserId,
        post_id: PostId,
        posted_at: i64,
    ) -> Result<usize, (usize, StoreError)> {
        let member = post_id.to_string();
        let followers = graph::followers(conn, author).map_err(|e| (0, e))?;
        let mut delivered = 0;

        for (index, chunk) in followers.chunks(self.batch_size).enumerate() {
            let mut batch = Batch::with_capacity(chunk.len());
            for raw in chunk {
                match raw.parse::<UserId>() {
                    Ok(follower) => {
                        batch.sorted_set_add(keys::timeline(follower), posted_at, member.as_str());
                    }
                    Err(_) => warn!(%author, member = %raw, "Skipping malformed follower id"),
                }
            }

            if !batch.is_empty() {
                let size = batch.len();
                conn.commit_batch(batch).map_err(|e| (delivered, e))?;
                delivered += size;
                debug!(%post_id, batch = index, size, "Fan-out batch committed");
            }
        }

        Ok(delivered)
    }
}
