//! Key-value store client
//!
//! The fan-out engine never talks to a concrete backend. It borrows a
//! [`Connection`] from a [`Store`] for the duration of one logical operation
//! and drops it on every exit path, which hands it back to the pool.
//!
//! Two backends exist: [`RedisStore`], an r2d2 pool over a remote Redis
//! server, and [`MemoryStore`], an in-process stand-in with the same
//! ordering and atomicity semantics.

use std::collections::HashMap;
use thiserror::Error;

mod memory;
mod remote;

pub use memory::MemoryStore;
pub use remote::RedisStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Pool exhausted, connection refused or dropped mid-command
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An atomic batch failed; nothing it queued is visible
    #[error("atomic batch aborted: {0}")]
    BatchAborted(String),

    /// The store answered, but with an error or an unexpected reply type
    #[error("store command failed: {0}")]
    Command(String),
}

/// A pool of connections to the key-value store.
pub trait Store: Send + Sync + 'static {
    type Conn: Connection;

    /// Borrow a validated connection. It returns to the pool on drop.
    fn acquire(&self) -> StoreResult<Self::Conn>;
}

/// Operations available on one borrowed connection.
///
/// Scores are integer Unix timestamps; members are decimal ids.
pub trait Connection: Send {
    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    fn hash_set_multiple(&mut self, key: &str, fields: &[(&str, String)]) -> StoreResult<()>;

    fn hash_get(&mut self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Empty map when the key does not exist.
    fn hash_get_all(&mut self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Returns the value after the increment. Missing fields start at 0.
    fn hash_incr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    fn hash_exists(&mut self, key: &str, field: &str) -> StoreResult<bool>;

    /// Returns the value after the increment. Missing counters start at 0.
    fn counter_incr(&mut self, key: &str) -> StoreResult<i64>;

    fn sorted_set_add(&mut self, key: &str, score: i64, member: &str) -> StoreResult<()>;

    fn sorted_set_score(&mut self, key: &str, member: &str) -> StoreResult<Option<i64>>;

    /// Members with score in `range`, lowest score first.
    fn sorted_set_range_by_score(
        &mut self,
        key: &str,
        range: &ScoreRange,
    ) -> StoreResult<Vec<String>>;

    /// Members at rank `start..=stop`, highest score first.
    fn sorted_set_rev_range_by_index(
        &mut self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> StoreResult<Vec<String>>;

    /// Commit every queued command as one unit.
    ///
    /// On success the replies line up with `batch.commands()`. On failure
    /// none of the commands took effect.
    fn commit_batch(&mut self, batch: Batch) -> StoreResult<Vec<Reply>>;
}

/// Score window for [`Connection::sorted_set_range_by_score`].
///
/// `None` bounds are open (`-inf` / `+inf`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreRange {
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// `(offset, count)` applied after the score filter
    pub limit: Option<(usize, usize)>,
}

impl ScoreRange {
    /// The whole set.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, offset: usize, count: usize) -> Self {
        self.limit = Some((offset, count));
        self
    }

    pub(crate) fn contains(&self, score: i64) -> bool {
        self.min.map_or(true, |min| score >= min) && self.max.map_or(true, |max| score <= max)
    }
}

/// One command queued inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HashSet { key: String, field: String, value: String },
    HashSetMultiple { key: String, fields: Vec<(String, String)> },
    HashGet { key: String, field: String },
    HashIncrBy { key: String, field: String, delta: i64 },
    HashDelete { key: String, field: String },
    Delete { key: String },
    CounterIncr { key: String },
    SortedSetAdd { key: String, score: i64, member: String },
    SortedSetRemove { key: String, member: String },
}

impl Command {
    /// The key this command writes or reads.
    pub fn key(&self) -> &str {
        match self {
            Command::HashSet { key, .. }
            | Command::HashSetMultiple { key, .. }
            | Command::HashGet { key, .. }
            | Command::HashIncrBy { key, .. }
            | Command::HashDelete { key, .. }
            | Command::Delete { key }
            | Command::CounterIncr { key }
            | Command::SortedSetAdd { key, .. }
            | Command::SortedSetRemove { key, .. } => key,
        }
    }
}

/// Commands queued for one atomic `MULTI`/`EXEC` round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    pub fn queue(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn hash_set(&mut self, key: impl Into<String>, field: &str, value: impl Into<String>) -> &mut Self {
        self.queue(Command::HashSet {
            key: key.into(),
            field: field.to_string(),
            value: value.into(),
        })
    }

    pub fn hash_set_multiple(&mut self, key: impl Into<String>, fields: &[(&str, String)]) -> &mut Self {
        self.queue(Command::HashSetMultiple {
            key: key.into(),
            fields: fields
                .iter()
                .map(|(f, v)| (f.to_string(), v.clone()))
                .collect(),
        })
    }

    pub fn hash_get(&mut self, key: impl Into<String>, field: &str) -> &mut Self {
        self.queue(Command::HashGet {
            key: key.into(),
            field: field.to_string(),
        })
    }

    pub fn hash_incr_by(&mut self, key: impl Into<String>, field: &str, delta: i64) -> &mut Self {
        self.queue(Command::HashIncrBy {
            key: key.into(),
            field: field.to_string(),
            delta,
        })
    }

    pub fn hash_delete(&mut self, key: impl Into<String>, field: &str) -> &mut Self {
        self.queue(Command::HashDelete {
            key: key.into(),
            field: field.to_string(),
        })
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.queue(Command::Delete { key: key.into() })
    }

    pub fn counter_incr(&mut self, key: impl Into<String>) -> &mut Self {
        self.queue(Command::CounterIncr { key: key.into() })
    }

    pub fn sorted_set_add(&mut self, key: impl Into<String>, score: i64, member: impl Into<String>) -> &mut Self {
        self.queue(Command::SortedSetAdd {
            key: key.into(),
            score,
            member: member.into(),
        })
    }

    pub fn sorted_set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.queue(Command::SortedSetRemove {
            key: key.into(),
            member: member.into(),
        })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Reply to one command of a committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Ok,
    Int(i64),
    Text(String),
}

impl Reply {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(n) => Some(*n),
            Reply::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Reply::Text(s) => Some(s),
            Reply::Int(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
