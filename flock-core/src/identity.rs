//! Identity registry: user id allocation and the login uniqueness index

use crate::clock::Clock;
use crate::error::{Entity, TimelineError, TimelineResult};
use crate::keys::{self, user_field};
use crate::models::{User, UserId};
use crate::store::{Batch, Connection, Store};
use crate::telemetry;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct IdentityRegistry<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: Store> IdentityRegistry<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register `login` and allocate its id.
    ///
    /// The existence check and the registering batch are separate round
    /// trips, so two racing calls for the same login can both succeed; the
    /// later batch wins the index entry. An id whose batch fails is never
    /// reused.
    pub fn create_user(&self, login: &str, name: &str) -> TimelineResult<UserId> {
        if login.trim().is_empty() {
            return Err(TimelineError::InvalidArgument("login must not be empty".to_string()));
        }

        let mut conn = self.store.acquire()?;
        if conn.hash_exists(keys::LOGIN_INDEX, login)? {
            return Err(TimelineError::AlreadyExists(login.to_string()));
        }

        let id = UserId(conn.counter_incr(keys::USER_ID_COUNTER)? as u64);
        let user = User::new(id, login, name, self.clock.now());

        let mut batch = Batch::with_capacity(2);
        batch
            .hash_set(keys::LOGIN_INDEX, login, id.to_string())
            .hash_set_multiple(keys::user(id), &user.to_fields());

        if let Err(err) = conn.commit_batch(batch) {
            warn!(user_id = %id, login, error = %err, "User registration failed, id abandoned");
            return Err(err.into());
        }

        counter!(telemetry::USERS_CREATED).increment(1);
        debug!(user_id = %id, login, "Registered user");
        Ok(id)
    }

    /// Remove the login index entry and the user record.
    ///
    /// A record left without a login is removed as well.
    ///
    /// Deleting an unknown id succeeds. Follow edges and timeline entries
    /// that mention the user are left alone.
    pub fn delete_user(&self, id: UserId) -> TimelineResult<bool> {
        let mut conn = self.store.acquire()?;
        let user_key = keys::user(id);

        let fields = conn.hash_get_all(&user_key)?;
        if fields.is_empty() {
            debug!(user_id = %id, "Delete of unknown user treated as done");
            return Ok(true);
        }

        let mut batch = Batch::with_capacity(2);
        let login = fields.get(user_field::LOGIN);
        match login {
            Some(login) => {
                batch.hash_delete(keys::LOGIN_INDEX, login);
            }
            None => warn!(user_id = %id, "Removing user record without a login"),
        }
        batch.delete(user_key);
        conn.commit_batch(batch)?;

        debug!(user_id = %id, login = ?login, "Deleted user");
        Ok(true)
    }

    pub fn get_user(&self, id: UserId) -> TimelineResult<User> {
        let mut conn = self.store.acquire()?;
        let key = keys::user(id);
        let fields = conn.hash_get_all(&key)?;
        User::from_fields(&key, &fields)?.ok_or_else(|| TimelineError::not_found(Entity::User, id))
    }

    pub fn user_id_by_login(&self, login: &str) -> TimelineResult<UserId> {
        let mut conn = self.store.acquire()?;
        let raw = conn
            .hash_get(keys::LOGIN_INDEX, login)?
            .ok_or_else(|| TimelineError::not_found(Entity::Login, login))?;
        raw.parse().map_err(|_| {
            TimelineError::corrupt(keys::LOGIN_INDEX, format!("login '{}' maps to '{}'", login, raw))
        })
    }

    pub fn get_user_by_login(&self, login: &str) -> TimelineResult<User> {
        let id = self.user_id_by_login(login)?;
        self.get_user(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    fn registry() -> (MemoryStore, IdentityRegistry<MemoryStore>) {
        let store = MemoryStore::new();
        let registry =
            IdentityRegistry::new(Arc::new(store.clone()), Arc::new(ManualClock::new(1_000)));
        (store, registry)
    }

    #[test]
    fn test_create_and_get_user() {
        let (_store, registry) = registry();
        let alice = registry.create_user("alice", "Alice").unwrap();
        let bob = registry.create_user("bob", "Bob").unwrap();
        assert_eq!(alice, UserId(1));
        assert_eq!(bob, UserId(2));

        let user = registry.get_user(alice).unwrap();
        assert_eq!(user.login, "alice");
        assert_eq!(user.name, "Alice");
        assert_eq!(user.signup_time, 1_000);
        assert_eq!(
            (user.follower_count, user.following_count, user.post_count),
            (0, 0, 0)
        );
    }

    #[test]
    fn test_duplicate_login_rejected() {
        let (_store, registry) = registry();
        let first = registry.create_user("alice", "Alice").unwrap();
        let err = registry.create_user("alice", "Imposter").unwrap_err();
        assert!(matches!(err, TimelineError::AlreadyExists(ref l) if l == "alice"));

        let user = registry.get_user(first).unwrap();
        assert_eq!(user.name, "Alice");
        assert_eq!(registry.user_id_by_login("alice").unwrap(), first);
    }

    #[test]
    fn test_empty_login_rejected() {
        let (_store, registry) = registry();
        assert!(matches!(
            registry.create_user("  ", "Nobody"),
            Err(TimelineError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_failed_registration_abandons_id() {
        let (store, registry) = registry();
        store.abort_batches_touching(keys::LOGIN_INDEX);
        assert!(matches!(
            registry.create_user("alice", "Alice"),
            Err(TimelineError::BatchAborted(_))
        ));
        assert!(registry.get_user(UserId(1)).unwrap_err().is_not_found());

        store.clear_faults();
        assert_eq!(registry.create_user("alice", "Alice").unwrap(), UserId(2));
    }

    #[test]
    fn test_delete_user_is_idempotent() {
        let (_store, registry) = registry();
        let id = registry.create_user("alice", "Alice").unwrap();

        assert!(registry.delete_user(id).unwrap());
        assert!(registry.get_user(id).unwrap_err().is_not_found());
        assert!(registry.user_id_by_login("alice").unwrap_err().is_not_found());
        assert!(registry.delete_user(id).unwrap());

        // the login is free again
        assert!(registry.create_user("alice", "Alice again").is_ok());
    }

    #[test]
    fn test_get_user_by_login() {
        let (_store, registry) = registry();
        let id = registry.create_user("carol", "Carol").unwrap();
        assert_eq!(registry.get_user_by_login("carol").unwrap().id, id);
        assert!(registry.get_user_by_login("dave").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unavailable_store_surfaces() {
        let (store, registry) = registry();
        store.set_unavailable(true);
        assert!(matches!(
            registry.get_user(UserId(1)),
            Err(TimelineError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_delete_removes_record_without_login() {
        let (store, registry) = registry();
        {
            let mut conn = store.acquire().unwrap();
            conn.hash_incr_by(&keys::user(UserId(9)), user_field::FOLLOWERS, 1)
                .unwrap();
        }
        assert!(matches!(
            registry.get_user(UserId(9)),
            Err(TimelineError::CorruptRecord { .. })
        ));

        assert!(registry.delete_user(UserId(9)).unwrap());
        assert!(registry.get_user(UserId(9)).unwrap_err().is_not_found());
    }
}
