//! Redis-backed store over an r2d2 connection pool

use super::{Batch, Command, Connection, Reply, ScoreRange, Store, StoreError, StoreResult};
use crate::config::StoreConfig;
use r2d2::{CustomizeConnection, Pool, PooledConnection};
use redis::{Commands, RedisError, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Pooled connections to a remote Redis server.
///
/// Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool<redis::Client>,
}

impl RedisStore {
    /// Build the pool and open the initial idle connections.
    ///
    /// Every checkout runs a `PING` before the connection is handed out.
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StoreError::Unavailable(format!("invalid store url: {}", e)))?;

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_idle))
            .idle_timeout(Some(config.idle_timeout))
            .connection_timeout(config.connection_timeout)
            .test_on_check_out(true)
            .connection_customizer(Box::new(IoTimeouts(config.io_timeout)))
            .build(client)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Connected to key-value store"
        );

        Ok(Self { pool })
    }

    /// Number of open and idle connections, for health reporting.
    pub fn pool_state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }
}

impl Store for RedisStore {
    type Conn = RedisConnection;

    fn acquire(&self) -> StoreResult<Self::Conn> {
        self.pool
            .get()
            .map(RedisConnection)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Applies socket timeouts so a stalled server cannot pin a pooled
/// connection (and the task holding it) indefinitely.
#[derive(Debug)]
struct IoTimeouts(Duration);

impl CustomizeConnection<redis::Connection, RedisError> for IoTimeouts {
    fn on_acquire(&self, conn: &mut redis::Connection) -> Result<(), RedisError> {
        conn.set_read_timeout(Some(self.0))?;
        conn.set_write_timeout(Some(self.0))
    }
}

/// A connection checked out of the pool; returned on drop.
pub struct RedisConnection(PooledConnection<redis::Client>);

impl Connection for RedisConnection {
    fn hash_set(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.0.hset(key, field, value).map_err(command_error)
    }

    fn hash_set_multiple(&mut self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        self.0.hset_multiple(key, fields).map_err(command_error)
    }

    fn hash_get(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.0.hget(key, field).map_err(command_error)
    }

    fn hash_get_all(&mut self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.0.hgetall(key).map_err(command_error)
    }

    fn hash_incr_by(&mut self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        self.0.hincr(key, field, delta).map_err(command_error)
    }

    fn hash_exists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        self.0.hexists(key, field).map_err(command_error)
    }

    fn counter_incr(&mut self, key: &str) -> StoreResult<i64> {
        self.0.incr(key, 1).map_err(command_error)
    }

    fn sorted_set_add(&mut self, key: &str, score: i64, member: &str) -> StoreResult<()> {
        self.0.zadd(key, member, score).map_err(command_error)
    }

    fn sorted_set_score(&mut self, key: &str, member: &str) -> StoreResult<Option<i64>> {
        let score: Option<f64> = self.0.zscore(key, member).map_err(command_error)?;
        Ok(score.map(|s| s as i64))
    }

    fn sorted_set_range_by_score(
        &mut self,
        key: &str,
        range: &ScoreRange,
    ) -> StoreResult<Vec<String>> {
        let min = range.min.map_or_else(|| "-inf".to_string(), |m| m.to_string());
        let max = range.max.map_or_else(|| "+inf".to_string(), |m| m.to_string());
        match range.limit {
            Some((offset, count)) => self
                .0
                .zrangebyscore_limit(key, min, max, rank(offset), rank(count))
                .map_err(command_error),
            None => self.0.zrangebyscore(key, min, max).map_err(command_error),
        }
    }

    fn sorted_set_rev_range_by_index(
        &mut self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> StoreResult<Vec<String>> {
        self.0
            .zrevrange(key, rank(start), rank(stop))
            .map_err(command_error)
    }

    fn commit_batch(&mut self, batch: Batch) -> StoreResult<Vec<Reply>> {
        let size = batch.len();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in batch.into_commands() {
            match command {
                Command::HashSet { key, field, value } => pipe.hset(key, field, value),
                Command::HashSetMultiple { key, fields } => pipe.hset_multiple(key, fields.as_slice()),
                Command::HashGet { key, field } => pipe.hget(key, field),
                Command::HashIncrBy { key, field, delta } => pipe.hincr(key, field, delta),
                Command::HashDelete { key, field } => pipe.hdel(key, field),
                Command::Delete { key } => pipe.del(key),
                Command::CounterIncr { key } => pipe.incr(key, 1),
                Command::SortedSetAdd { key, score, member } => pipe.zadd(key, member, score),
                Command::SortedSetRemove { key, member } => pipe.zrem(key, member),
            };
        }

        let values: Vec<Value> = pipe.query(&mut *self.0).map_err(batch_error)?;
        debug!(commands = size, "Committed atomic batch");
        values.into_iter().map(reply_from_value).collect()
    }
}

/// Ranks past `isize::MAX` saturate; Redis reads negative ranks from the
/// tail, so a wrapped value would select the wrong members.
fn rank(n: usize) -> isize {
    isize::try_from(n).unwrap_or(isize::MAX)
}

fn is_transport_failure(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

fn command_error(err: RedisError) -> StoreError {
    if is_transport_failure(&err) {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

fn batch_error(err: RedisError) -> StoreError {
    if is_transport_failure(&err) {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::BatchAborted(err.to_string())
    }
}

fn reply_from_value(value: Value) -> StoreResult<Reply> {
    match value {
        Value::Nil => Ok(Reply::Nil),
        Value::Okay => Ok(Reply::Ok),
        Value::Int(n) => Ok(Reply::Int(n)),
        Value::Data(bytes) => String::from_utf8(bytes)
            .map(Reply::Text)
            .map_err(|e| StoreError::Command(format!("non-utf8 reply: {}", e))),
        Value::Status(status) => Ok(Reply::Text(status)),
        Value::Bulk(_) => Err(StoreError::Command(
            "unexpected nested reply in batch".to_string(),
        )),
    }
}
