//! Social graph: directed follow edges kept in two time-scored indexes
//!
//! `following:<a>` holds every user `a` follows and `followers:<b>` every
//! user following `b`, both scored by the time the edge was created. The
//! two sides and the denormalized counters change in one atomic batch.

use crate::clock::Clock;
use crate::error::{Entity, TimelineError, TimelineResult};
use crate::keys::{self, user_field};
use crate::models::UserId;
use crate::store::{Batch, Connection, Reply, ScoreRange, Store, StoreResult};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SocialGraph<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> SocialGraph<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// `follower` starts following `followee`. Following twice is a no-op.
    ///
    /// Both users must be registered. Two concurrent calls for the same edge
    /// can both pass the existence check; the set adds are idempotent but the
    /// counters then move twice.
    pub fn follow(&self, follower: UserId, followee: UserId) -> TimelineResult<bool> {
        let mut conn = self.store.acquire()?;
        for id in [follower, followee] {
            if !user_exists(&mut conn, id)? {
                return Err(TimelineError::not_found(Entity::User, id));
            }
        }
        let following_key = keys::following(follower);

        if conn
            .sorted_set_score(&following_key, &followee.to_string())?
            .is_some()
        {
            debug!(%follower, %followee, "Already following");
            return Ok(true);
        }

        let now = self.clock.now();
        let mut batch = Batch::with_capacity(4);
        batch
            .sorted_set_add(following_key, now, followee.to_string())
            .sorted_set_add(keys::followers(followee), now, follower.to_string())
            .hash_incr_by(keys::user(follower), user_field::FOLLOWING, 1)
            .hash_incr_by(keys::user(followee), user_field::FOLLOWERS, 1);
        conn.commit_batch(batch)?;

        debug!(%follower, %followee, "Follow edge created");
        Ok(true)
    }

    /// `follower` stops following `followee`. Unfollowing a stranger is a
    /// no-op.
    ///
    /// Both index entries always go, even when one side has been deleted.
    /// Counters are only touched on records that still exist, and are
    /// clamped at zero: a decrement that lands below zero is reset with a
    /// follow-up write.
    pub fn unfollow(&self, follower: UserId, followee: UserId) -> TimelineResult<bool> {
        let mut conn = self.store.acquire()?;
        let following_key = keys::following(follower);

        if conn
            .sorted_set_score(&following_key, &followee.to_string())?
            .is_none()
        {
            debug!(%follower, %followee, "Not following, nothing to undo");
            return Ok(true);
        }

        let mut batch = Batch::with_capacity(4);
        batch
            .sorted_set_remove(following_key, followee.to_string())
            .sorted_set_remove(keys::followers(followee), follower.to_string());

        let mut counters = Vec::with_capacity(2);
        for (user, field) in [
            (follower, user_field::FOLLOWING),
            (followee, user_field::FOLLOWERS),
        ] {
            if user_exists(&mut conn, user)? {
                counters.push((batch.len(), user, field));
                batch.hash_incr_by(keys::user(user), field, -1);
            } else {
                debug!(user_id = %user, field, "User record gone, counter left alone");
            }
        }
        let replies = conn.commit_batch(batch)?;

        for (index, user, field) in counters {
            clamp_at_zero(&mut conn, &replies, index, user, field)?;
        }

        debug!(%follower, %followee, "Follow edge removed");
        Ok(true)
    }

    pub fn is_following(&self, follower: UserId, followee: UserId) -> TimelineResult<bool> {
        let mut conn = self.store.acquire()?;
        Ok(conn
            .sorted_set_score(&keys::following(follower), &followee.to_string())?
            .is_some())
    }
}

fn user_exists<C: Connection>(conn: &mut C, id: UserId) -> StoreResult<bool> {
    conn.hash_exists(&keys::user(id), user_field::LOGIN)
}

fn clamp_at_zero<C: Connection>(
    conn: &mut C,
    replies: &[Reply],
    index: usize,
    user: UserId,
    field: &str,
) -> StoreResult<()> {
    match replies.get(index).and_then(Reply::as_int) {
        Some(value) if value < 0 => {
            warn!(user_id = %user, field, value, "Counter went negative, resetting to zero");
            conn.hash_set(&keys::user(user), field, "0")
        }
        _ => Ok(()),
    }
}

/// Every follower of `author`, oldest edge first, read in one call.
///
/// Only the fan-out engine reads the followers index.
pub(crate) fn followers<C: Connection>(conn: &mut C, author: UserId) -> StoreResult<Vec<String>> {
    conn.sorted_set_range_by_score(&keys::followers(author), &ScoreRange::all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::TimelineError;
    use crate::identity::IdentityRegistry;
    use crate::store::MemoryStore;

    struct Fixture {
        store: MemoryStore,
        identity: IdentityRegistry<MemoryStore>,
        graph: SocialGraph<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let shared = Arc::new(store.clone());
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::ticking(1_000, 1));
        Fixture {
            identity: IdentityRegistry::new(Arc::clone(&shared), Arc::clone(&clock)),
            graph: SocialGraph::new(shared, clock),
            store,
        }
    }

    fn counts(f: &Fixture, id: UserId) -> (u32, u32) {
        let user = f.identity.get_user(id).unwrap();
        (user.follower_count, user.following_count)
    }

    #[test]
    fn test_follow_is_idempotent() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();
        let b = f.identity.create_user("b", "B").unwrap();

        assert!(f.graph.follow(a, b).unwrap());
        assert!(f.graph.follow(a, b).unwrap());

        assert_eq!(counts(&f, a), (0, 1));
        assert_eq!(counts(&f, b), (1, 0));
        assert!(f.graph.is_following(a, b).unwrap());
        assert!(!f.graph.is_following(b, a).unwrap());
    }

    #[test]
    fn test_follow_writes_both_indexes() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();
        let b = f.identity.create_user("b", "B").unwrap();
        f.graph.follow(a, b).unwrap();

        let mut conn = f.store.acquire().unwrap();
        let forward = conn.sorted_set_score(&keys::following(a), "2").unwrap();
        let backward = conn.sorted_set_score(&keys::followers(b), "1").unwrap();
        assert!(forward.is_some());
        assert_eq!(forward, backward);
        assert_eq!(followers(&mut conn, b).unwrap(), vec!["1"]);
    }

    #[test]
    fn test_unfollow_restores_counters() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();
        let b = f.identity.create_user("b", "B").unwrap();

        f.graph.follow(a, b).unwrap();
        assert!(f.graph.unfollow(a, b).unwrap());

        assert_eq!(counts(&f, a), (0, 0));
        assert_eq!(counts(&f, b), (0, 0));

        let mut conn = f.store.acquire().unwrap();
        assert_eq!(conn.sorted_set_score(&keys::following(a), "2").unwrap(), None);
        assert_eq!(conn.sorted_set_score(&keys::followers(b), "1").unwrap(), None);
    }

    #[test]
    fn test_unfollow_without_edge_is_noop() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();
        let b = f.identity.create_user("b", "B").unwrap();
        assert!(f.graph.unfollow(a, b).unwrap());
        assert_eq!(counts(&f, a), (0, 0));
        assert_eq!(counts(&f, b), (0, 0));
    }

    #[test]
    fn test_unfollow_clamps_counters_at_zero() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();
        let b = f.identity.create_user("b", "B").unwrap();
        f.graph.follow(a, b).unwrap();

        // simulate a counter that drifted, e.g. after a racing unfollow
        let mut conn = f.store.acquire().unwrap();
        conn.hash_set(&keys::user(b), user_field::FOLLOWERS, "0").unwrap();
        drop(conn);

        f.graph.unfollow(a, b).unwrap();
        let mut conn = f.store.acquire().unwrap();
        assert_eq!(
            conn.hash_get(&keys::user(b), user_field::FOLLOWERS).unwrap(),
            Some("0".to_string())
        );
    }

    #[test]
    fn test_aborted_follow_changes_nothing() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();
        let b = f.identity.create_user("b", "B").unwrap();
        f.store.abort_batches_touching(keys::followers(b));

        assert!(matches!(f.graph.follow(a, b), Err(TimelineError::BatchAborted(_))));
        assert!(!f.graph.is_following(a, b).unwrap());
        assert_eq!(counts(&f, a), (0, 0));
        assert_eq!(counts(&f, b), (0, 0));
    }

    #[test]
    fn test_follow_unknown_user_is_not_found() {
        let f = fixture();
        let a = f.identity.create_user("a", "A").unwrap();

        assert!(f.graph.follow(a, UserId(42)).unwrap_err().is_not_found());
        assert!(f.graph.follow(UserId(42), a).unwrap_err().is_not_found());

        let mut conn = f.store.acquire().unwrap();
        assert!(conn.hash_get_all(&keys::user(UserId(42))).unwrap().is_empty());
        assert!(followers(&mut conn, UserId(42)).unwrap().is_empty());
        assert!(followers(&mut conn, a).unwrap().is_empty());
        drop(conn);
        assert_eq!(counts(&f, a), (0, 0));
        assert!(f.identity.get_user(UserId(42)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_unfollow_after_followee_deleted() {
        let f = fixture();
        let alice = f.identity.create_user("alice", "Alice").unwrap();
        let bob = f.identity.create_user("bob", "Bob").unwrap();
        f.graph.follow(bob, alice).unwrap();

        f.identity.delete_user(alice).unwrap();
        assert!(f.graph.unfollow(bob, alice).unwrap());

        assert!(f.identity.get_user(alice).unwrap_err().is_not_found());
        assert!(!f.graph.is_following(bob, alice).unwrap());
        assert_eq!(counts(&f, bob), (0, 0));

        let mut conn = f.store.acquire().unwrap();
        assert!(conn.hash_get_all(&keys::user(alice)).unwrap().is_empty());
        assert!(followers(&mut conn, alice).unwrap().is_empty());
    }
}
