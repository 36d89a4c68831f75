//! In-process store with the ordering and atomicity rules of the remote one
//!
//! Sorted-set ties are broken by member bytes, `HINCRBY`/`INCR` start from
//! zero, keys have a single type, and a batch either applies completely or
//! leaves every touched key as it was. Intended for tests and local runs.

use super::{Batch, Command, Connection, Reply, ScoreRange, Store, StoreError, StoreResult};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    keyspace: Mutex<Keyspace>,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    unavailable: bool,
    abort_batches_touching: HashSet<String>,
    stalled_reads: HashMap<String, Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `acquire` fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.inner.faults).unavailable = unavailable;
    }

    /// Abort any batch that queues a command on `key`.
    pub fn abort_batches_touching(&self, key: impl Into<String>) {
        lock(&self.inner.faults)
            .abort_batches_touching
            .insert(key.into());
    }

    /// Delay `hash_get_all` on `key` by `delay` before answering.
    pub fn stall_reads(&self, key: impl Into<String>, delay: Duration) {
        lock(&self.inner.faults)
            .stalled_reads
            .insert(key.into(), delay);
    }

    pub fn clear_faults(&self) {
        *lock(&self.inner.faults) = Faults::default();
    }
}

impl Store for MemoryStore {
    type Conn = MemoryConnection;

    fn acquire(&self) -> StoreResult<Self::Conn> {
        if lock(&self.inner.faults).unavailable {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(MemoryConnection {
            inner: Arc::clone(&self.inner),
        })
    }
}

pub struct MemoryConnection {
    inner: Arc<Inner>,
}

impl MemoryConnection {
    fn keyspace(&self) -> MutexGuard<'_, Keyspace> {
        lock(&self.inner.keyspace)
    }

    fn stall_for(&self, key: &str) -> Option<Duration> {
        lock(&self.inner.faults).stalled_reads.get(key).copied()
    }

    fn batch_blocked_by(&self, batch: &Batch) -> Option<String> {
        let faults = lock(&self.inner.faults);
        batch
            .commands()
            .iter()
            .map(Command::key)
            .find(|key| faults.abort_batches_touching.contains(*key))
            .map(str::to_string)
    }
}

impl Connection for MemoryConnection {
    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.keyspace()
            .hash_set(key, field.to_string(), value.to_string())
            .map(|_| ())
    }

    fn hash_set_multiple(&mut self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::Hash)?;
        let hash = keyspace.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    fn hash_get(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::Hash)?;
        Ok(keyspace.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    fn hash_get_all(&mut self, key: &str) -> StoreResult<HashMap<String, String>> {
        if let Some(delay) = self.stall_for(key) {
            std::thread::sleep(delay);
        }
        let keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::Hash)?;
        Ok(keyspace.hashes.get(key).cloned().unwrap_or_default())
    }

    fn hash_incr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.keyspace().hash_incr_by(key, field, delta)
    }

    fn hash_exists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        let keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::Hash)?;
        Ok(keyspace.hashes.get(key).map_or(false, |h| h.contains_key(field)))
    }

    fn counter_incr(&mut self, key: &str) -> StoreResult<i64> {
        self.keyspace().counter_incr(key)
    }

    fn sorted_set_add(&mut self, key: &str, score: i64, member: &str) -> StoreResult<()> {
        self.keyspace().sorted_set_add(key, score, member).map(|_| ())
    }

    fn sorted_set_score(&mut self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        let keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::SortedSet)?;
        Ok(keyspace
            .sorted_sets
            .get(key)
            .and_then(|set| set.scores.get(member))
            .copied())
    }

    fn sorted_set_range_by_score(
        &mut self,
        key: &str,
        range: &ScoreRange,
    ) -> StoreResult<Vec<String>> {
        let keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::SortedSet)?;
        let Some(set) = keyspace.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let (offset, count) = range.limit.unwrap_or((0, usize::MAX));
        Ok(set
            .ordered
            .iter()
            .filter(|(score, _)| range.contains(*score))
            .skip(offset)
            .take(count)
            .map(|(_, member)| member.clone())
            .collect())
    }

    fn sorted_set_rev_range_by_index(
        &mut self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> StoreResult<Vec<String>> {
        let keyspace = self.keyspace();
        keyspace.expect_type(key, KeyType::SortedSet)?;
        let Some(set) = keyspace.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        if stop < start {
            return Ok(Vec::new());
        }
        Ok(set
            .ordered
            .iter()
            .rev()
            .skip(start)
            .take(stop - start + 1)
            .map(|(_, member)| member.clone())
            .collect())
    }

    fn commit_batch(&mut self, batch: Batch) -> StoreResult<Vec<Reply>> {
        if let Some(key) = self.batch_blocked_by(&batch) {
            return Err(StoreError::BatchAborted(format!(
                "injected abort for key '{}'",
                key
            )));
        }

        let mut keyspace = self.keyspace();
        let touched: HashSet<String> = batch
            .commands()
            .iter()
            .map(|c| c.key().to_string())
            .collect();
        let snapshot = keyspace.snapshot(&touched);

        let mut replies = Vec::with_capacity(batch.len());
        for command in batch.into_commands() {
            match keyspace.apply(command) {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    keyspace.restore(snapshot);
                    return Err(StoreError::BatchAborted(err.to_string()));
                }
            }
        }
        Ok(replies)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyType {
    Hash,
    Counter,
    SortedSet,
}

#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

#[derive(Default)]
struct Keyspace {
    hashes: HashMap<String, HashMap<String, String>>,
    counters: HashMap<String, i64>,
    sorted_sets: HashMap<String, SortedSet>,
}

struct KeySnapshot {
    key: String,
    hash: Option<HashMap<String, String>>,
    counter: Option<i64>,
    sorted_set: Option<SortedSet>,
}

impl Keyspace {
    fn type_of(&self, key: &str) -> Option<KeyType> {
        if self.hashes.contains_key(key) {
            Some(KeyType::Hash)
        } else if self.counters.contains_key(key) {
            Some(KeyType::Counter)
        } else if self.sorted_sets.contains_key(key) {
            Some(KeyType::SortedSet)
        } else {
            None
        }
    }

    fn expect_type(&self, key: &str, expected: KeyType) -> StoreResult<()> {
        match self.type_of(key) {
            Some(actual) if actual != expected => Err(StoreError::Command(format!(
                "WRONGTYPE key '{}' holds a {:?}, not a {:?}",
                key, actual, expected
            ))),
            _ => Ok(()),
        }
    }

    fn hash_set(&mut self, key: &str, field: String, value: String) -> StoreResult<bool> {
        self.expect_type(key, KeyType::Hash)?;
        Ok(self
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field, value)
            .is_none())
    }

    fn hash_incr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.expect_type(key, KeyType::Hash)?;
        let hash = self.hashes.entry(key.to_string()).or_default();
        let current = match hash.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::Command(format!("hash value of {}.{} is not an integer", key, field))
            })?,
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Command("increment would overflow".to_string()))?;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn counter_incr(&mut self, key: &str) -> StoreResult<i64> {
        self.expect_type(key, KeyType::Counter)?;
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    fn sorted_set_add(&mut self, key: &str, score: i64, member: &str) -> StoreResult<bool> {
        self.expect_type(key, KeyType::SortedSet)?;
        let set = self.sorted_sets.entry(key.to_string()).or_default();
        let previous = set.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            set.ordered.remove(&(old, member.to_string()));
        }
        set.ordered.insert((score, member.to_string()));
        Ok(previous.is_none())
    }

    fn sorted_set_remove(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        self.expect_type(key, KeyType::SortedSet)?;
        let Some(set) = self.sorted_sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = match set.scores.remove(member) {
            Some(score) => set.ordered.remove(&(score, member.to_string())),
            None => false,
        };
        if set.scores.is_empty() {
            self.sorted_sets.remove(key);
        }
        Ok(removed)
    }

    fn delete(&mut self, key: &str) -> bool {
        self.hashes.remove(key).is_some()
            | self.counters.remove(key).is_some()
            | self.sorted_sets.remove(key).is_some()
    }

    fn apply(&mut self, command: Command) -> StoreResult<Reply> {
        match command {
            Command::HashSet { key, field, value } => {
                let added = self.hash_set(&key, field, value)?;
                Ok(Reply::Int(added as i64))
            }
            Command::HashSetMultiple { key, fields } => {
                for (field, value) in fields {
                    self.hash_set(&key, field, value)?;
                }
                Ok(Reply::Ok)
            }
            Command::HashGet { key, field } => {
                self.expect_type(&key, KeyType::Hash)?;
                Ok(self
                    .hashes
                    .get(&key)
                    .and_then(|h| h.get(&field))
                    .cloned()
                    .map_or(Reply::Nil, Reply::Text))
            }
            Command::HashIncrBy { key, field, delta } => {
                self.hash_incr_by(&key, &field, delta).map(Reply::Int)
            }
            Command::HashDelete { key, field } => {
                self.expect_type(&key, KeyType::Hash)?;
                let removed = match self.hashes.get_mut(&key) {
                    Some(hash) => {
                        let removed = hash.remove(&field).is_some();
                        if hash.is_empty() {
                            self.hashes.remove(&key);
                        }
                        removed
                    }
                    None => false,
                };
                Ok(Reply::Int(removed as i64))
            }
            Command::Delete { key } => Ok(Reply::Int(self.delete(&key) as i64)),
            Command::CounterIncr { key } => self.counter_incr(&key).map(Reply::Int),
            Command::SortedSetAdd { key, score, member } => {
                let added = self.sorted_set_add(&key, score, &member)?;
                Ok(Reply::Int(added as i64))
            }
            Command::SortedSetRemove { key, member } => {
                let removed = self.sorted_set_remove(&key, &member)?;
                Ok(Reply::Int(removed as i64))
            }
        }
    }

    fn snapshot(&self, keys: &HashSet<String>) -> Vec<KeySnapshot> {
        keys.iter()
            .map(|key| KeySnapshot {
                key: key.clone(),
                hash: self.hashes.get(key).cloned(),
                counter: self.counters.get(key).copied(),
                sorted_set: self.sorted_sets.get(key).cloned(),
            })
            .collect()
    }

    fn restore(&mut self, snapshot: Vec<KeySnapshot>) {
        for saved in snapshot {
            self.delete(&saved.key);
            if let Some(hash) = saved.hash {
                self.hashes.insert(saved.key.clone(), hash);
            }
            if let Some(counter) = saved.counter {
                self.counters.insert(saved.key.clone(), counter);
            }
            if let Some(set) = saved.sorted_set {
                self.sorted_sets.insert(saved.key, set);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> (MemoryStore, MemoryConnection) {
        let store = MemoryStore::new();
        let conn = store.acquire().unwrap();
        (store, conn)
    }

    #[test]
    fn test_hash_operations() {
        let (_store, mut conn) = conn();
        assert!(!conn.hash_exists("users:", "alice").unwrap());

        conn.hash_set("users:", "alice", "1").unwrap();
        assert!(conn.hash_exists("users:", "alice").unwrap());
        assert_eq!(conn.hash_get("users:", "alice").unwrap(), Some("1".to_string()));
        assert_eq!(conn.hash_get("users:", "bob").unwrap(), None);

        assert_eq!(conn.hash_incr_by("user:1", "posts", 1).unwrap(), 1);
        assert_eq!(conn.hash_incr_by("user:1", "posts", -3).unwrap(), -2);
        assert!(conn.hash_get_all("user:404").unwrap().is_empty());
    }

    #[test]
    fn test_counter_and_wrong_type() {
        let (_store, mut conn) = conn();
        assert_eq!(conn.counter_incr("user:id").unwrap(), 1);
        assert_eq!(conn.counter_incr("user:id").unwrap(), 2);
        assert!(matches!(
            conn.hash_get("user:id", "x"),
            Err(StoreError::Command(_))
        ));
    }

    #[test]
    fn test_sorted_set_ordering_matches_remote() {
        let (_store, mut conn) = conn();
        conn.sorted_set_add("timeline:1", 10, "1").unwrap();
        conn.sorted_set_add("timeline:1", 30, "3").unwrap();
        conn.sorted_set_add("timeline:1", 20, "2").unwrap();
        // ties fall back to member bytes, so "9" sorts after "10"
        conn.sorted_set_add("timeline:1", 20, "10").unwrap();
        conn.sorted_set_add("timeline:1", 20, "9").unwrap();

        let all = conn
            .sorted_set_range_by_score("timeline:1", &ScoreRange::all())
            .unwrap();
        assert_eq!(all, vec!["1", "10", "2", "9", "3"]);

        let rev = conn.sorted_set_rev_range_by_index("timeline:1", 0, 2).unwrap();
        assert_eq!(rev, vec!["3", "9", "2"]);

        let limited = conn
            .sorted_set_range_by_score("timeline:1", &ScoreRange::all().with_limit(1, 2))
            .unwrap();
        assert_eq!(limited, vec!["10", "2"]);

        assert_eq!(conn.sorted_set_score("timeline:1", "2").unwrap(), Some(20));
        assert_eq!(conn.sorted_set_score("timeline:1", "42").unwrap(), None);
    }

    #[test]
    fn test_sorted_set_add_moves_existing_member() {
        let (_store, mut conn) = conn();
        conn.sorted_set_add("followers:1", 5, "2").unwrap();
        conn.sorted_set_add("followers:1", 50, "2").unwrap();
        let members = conn
            .sorted_set_range_by_score("followers:1", &ScoreRange::all())
            .unwrap();
        assert_eq!(members, vec!["2"]);
        assert_eq!(conn.sorted_set_score("followers:1", "2").unwrap(), Some(50));
    }

    #[test]
    fn test_batch_replies_in_order() {
        let (_store, mut conn) = conn();
        conn.hash_set("user:1", "login", "alice").unwrap();

        let mut batch = Batch::new();
        batch.hash_get("user:1", "login").counter_incr("status:id");
        let replies = conn.commit_batch(batch).unwrap();
        assert_eq!(replies, vec![Reply::Text("alice".to_string()), Reply::Int(1)]);
    }

    #[test]
    fn test_failed_batch_leaves_no_trace() {
        let (_store, mut conn) = conn();
        conn.hash_set("user:1", "login", "alice").unwrap();

        let mut batch = Batch::new();
        batch
            .sorted_set_add("following:1", 1, "2")
            .hash_incr_by("user:1", "following", 1)
            .hash_incr_by("user:1", "login", 1);

        assert!(matches!(
            conn.commit_batch(batch),
            Err(StoreError::BatchAborted(_))
        ));
        assert_eq!(conn.sorted_set_score("following:1", "2").unwrap(), None);
        assert_eq!(conn.hash_get("user:1", "following").unwrap(), None);
        assert_eq!(conn.hash_get("user:1", "login").unwrap(), Some("alice".to_string()));
    }

    #[test]
    fn test_injected_faults() {
        let (store, mut conn) = conn();
        store.abort_batches_touching("timeline:7");
        let mut batch = Batch::new();
        batch.sorted_set_add("timeline:6", 1, "1").sorted_set_add("timeline:7", 1, "1");
        assert!(matches!(
            conn.commit_batch(batch),
            Err(StoreError::BatchAborted(_))
        ));
        assert_eq!(conn.sorted_set_score("timeline:6", "1").unwrap(), None);

        store.set_unavailable(true);
        assert!(matches!(store.acquire(), Err(StoreError::Unavailable(_))));

        store.clear_faults();
        assert!(store.acquire().is_ok());
    }

    #[test]
    fn test_delete_in_batch() {
        let (_store, mut conn) = conn();
        conn.hash_set("users:", "alice", "1").unwrap();
        conn.hash_set("user:1", "login", "alice").unwrap();

        let mut batch = Batch::new();
        batch.hash_delete("users:", "alice").delete("user:1");
        let replies = conn.commit_batch(batch).unwrap();
        assert_eq!(replies, vec![Reply::Int(1), Reply::Int(1)]);
        assert!(conn.hash_get_all("user:1").unwrap().is_empty());
        assert!(!conn.hash_exists("users:", "alice").unwrap());
    }
}
