//! Timeline reader: bounded-latency assembly of one timeline page
//!
//! A page is a window of post ids taken from the owner's timeline index,
//! newest first. Every id is fetched by its own blocking task; the results
//! arrive on a completion channel in whatever order the store answers.
//! Collection stops when every task has reported or the fetch deadline
//! passes, whichever comes first. Posts still in flight at the deadline are
//! left out of the page and their late results are dropped unread.

use crate::error::{TimelineError, TimelineResult};
use crate::keys;
use crate::models::{Post, PostId, UserId};
use crate::posts::fetch_post;
use crate::store::{Connection, Store};
use crate::telemetry;
use metrics::{counter, histogram};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// One assembled page of a user's timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePage {
    pub user_id: UserId,
    pub page: u32,
    /// Newest first; never longer than the requested page size
    pub posts: Vec<Post>,
    /// Entries the index window held before fetching
    pub requested: usize,
    /// Set when the deadline cut collection short
    pub timed_out: bool,
}

pub struct TimelineReader<S> {
    store: Arc<S>,
    fetch_timeout: Duration,
}

impl<S: Store> TimelineReader<S> {
    pub fn new(store: Arc<S>, fetch_timeout: Duration) -> Self {
        Self {
            store,
            fetch_timeout,
        }
    }

    /// Post ids at ranks `[(page-1)*page_size, page*page_size)` of `user`'s
    /// timeline, newest first. Pages are numbered from 1.
    pub fn timeline_ids(&self, user: UserId, page: u32, page_size: u32) -> TimelineResult<Vec<PostId>> {
        let (start, stop) = window(page, page_size)?;
        let mut conn = self.store.acquire()?;
        read_window(&mut conn, user, start, stop)
    }

    /// Resolve one page of `user`'s timeline into full posts.
    ///
    /// Posts that fail to load (missing record, store error) or miss the
    /// deadline are omitted; a slow store shortens the page instead of
    /// delaying it.
    pub async fn get_timeline(
        &self,
        user: UserId,
        page: u32,
        page_size: u32,
    ) -> TimelineResult<TimelinePage> {
        let (start, stop) = window(page, page_size)?;
        let started = Instant::now();
        let deadline = started + self.fetch_timeout;

        let store = Arc::clone(&self.store);
        let ids = tokio::task::spawn_blocking(move || {
            let mut conn = store.acquire()?;
            read_window(&mut conn, user, start, stop)
        })
        .await??;

        let requested = ids.len();
        let (tx, mut rx) = mpsc::channel(requested.max(1));
        for id in ids {
            let store = Arc::clone(&self.store);
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || {
                let result = store
                    .acquire()
                    .map_err(TimelineError::from)
                    .and_then(|mut conn| fetch_post(&mut conn, id));
                // fails only once the reader has given up on this page
                let _ = tx.blocking_send((id, result));
            });
        }
        drop(tx);

        let mut posts = Vec::with_capacity(requested);
        let mut received = 0;
        let mut timed_out = false;
        while received < requested {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some((_, Ok(post)))) => {
                    received += 1;
                    posts.push(post);
                }
                Ok(Some((id, Err(err)))) => {
                    received += 1;
                    warn!(user_id = %user, post_id = %id, error = %err, "Dropping post from timeline page");
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }
        drop(rx);

        if timed_out {
            counter!(telemetry::TIMELINE_TIMEOUTS).increment(1);
            warn!(
                user_id = %user,
                page,
                received,
                requested,
                "Timeout assembling timeline page"
            );
        }

        sort_newest_first(&mut posts);
        counter!(telemetry::TIMELINE_READS).increment(1);
        histogram!(telemetry::TIMELINE_ASSEMBLY_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(user_id = %user, page, posts = posts.len(), requested, "Timeline page assembled");

        Ok(TimelinePage {
            user_id: user,
            page,
            posts,
            requested,
            timed_out,
        })
    }
}

/// Inclusive rank range for a 1-based page.
fn window(page: u32, page_size: u32) -> TimelineResult<(usize, usize)> {
    if page == 0 {
        return Err(TimelineError::InvalidArgument("page numbers start at 1".to_string()));
    }
    if page_size == 0 {
        return Err(TimelineError::InvalidArgument("page size must be positive".to_string()));
    }
    let size = page_size as usize;
    let start = (page as usize - 1)
        .checked_mul(size)
        .ok_or_else(|| TimelineError::InvalidArgument(format!("page {} is out of range", page)))?;
    let stop = start
        .checked_add(size - 1)
        .ok_or_else(|| TimelineError::InvalidArgument(format!("page {} is out of range", page)))?;
    Ok((start, stop))
}

fn read_window<C: Connection>(
    conn: &mut C,
    user: UserId,
    start: usize,
    stop: usize,
) -> TimelineResult<Vec<PostId>> {
    let members = conn.sorted_set_rev_range_by_index(&keys::timeline(user), start, stop)?;
    Ok(members
        .into_iter()
        .filter_map(|raw| match raw.parse::<PostId>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(user_id = %user, member = %raw, "Skipping malformed timeline entry");
                None
            }
        })
        .collect())
}

/// Newest `posted_at` first; equal timestamps put the higher post id first.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(newest_first);
}

fn newest_first(a: &Post, b: &Post) -> Ordering {
    b.posted_at.cmp(&a.posted_at).then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn post(id: u64, posted_at: i64) -> Post {
        Post {
            id: PostId(id),
            author_id: UserId(1),
            author_login: "alice".to_string(),
            message: format!("post {}", id),
            posted_at,
        }
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(window(1, 30).unwrap(), (0, 29));
        assert_eq!(window(2, 30).unwrap(), (30, 59));
        assert_eq!(window(3, 1).unwrap(), (2, 2));
        assert!(matches!(window(0, 30), Err(TimelineError::InvalidArgument(_))));
        assert!(matches!(window(1, 0), Err(TimelineError::InvalidArgument(_))));
    }

    #[test]
    fn test_sort_breaks_ties_by_id() {
        let mut posts = vec![post(1, 10), post(3, 20), post(2, 20), post(4, 5)];
        sort_newest_first(&mut posts);
        let ids: Vec<u64> = posts.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_timeline_ids_window() {
        use crate::store::MemoryStore;

        let store = MemoryStore::new();
        {
            let mut conn = store.acquire().unwrap();
            for id in 1..=5u64 {
                conn.sorted_set_add(&keys::timeline(UserId(7)), 100 + id as i64, &id.to_string())
                    .unwrap();
            }
            conn.sorted_set_add(&keys::timeline(UserId(7)), 200, "garbage").unwrap();
        }
        let reader = TimelineReader::new(Arc::new(store), Duration::from_secs(1));

        // the malformed member takes a rank but is skipped
        let first = reader.timeline_ids(UserId(7), 1, 3).unwrap();
        assert_eq!(first, vec![PostId(5), PostId(4)]);
        let second = reader.timeline_ids(UserId(7), 2, 3).unwrap();
        assert_eq!(second, vec![PostId(3), PostId(2), PostId(1)]);
        assert!(reader.timeline_ids(UserId(7), 3, 3).unwrap().is_empty());
        assert!(reader.timeline_ids(UserId(8), 1, 3).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_order_ignores_arrival_order(
            stamps in proptest::collection::vec(0i64..10, 0..40),
            seed in any::<u64>(),
        ) {
            let posts: Vec<Post> = stamps
                .iter()
                .enumerate()
                .map(|(i, at)| post(i as u64, *at))
                .collect();

            let mut sorted = posts.clone();
            sort_newest_first(&mut sorted);

            // rotate to simulate a different completion order
            let mut arrived = posts;
            if !arrived.is_empty() {
                let shift = (seed as usize) % arrived.len();
                arrived.rotate_left(shift);
            }
            sort_newest_first(&mut arrived);

            prop_assert_eq!(&sorted, &arrived);
            for pair in sorted.windows(2) {
                prop_assert_ne!(newest_first(&pair[0], &pair[1]), Ordering::Greater);
            }
        }
    }
}
