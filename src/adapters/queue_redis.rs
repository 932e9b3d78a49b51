//! Redis-backed `TaskQueuePort`. The real Rust analogue of the original
//! `beanstalkc`-based broker: a sorted set gives priority ordering, a hash
//! tracks reservation deadlines, and a sweep on every `reserve`/`stats` call
//! returns expired reservations to the ready set (the same role beanstalkd's
//! built-in TTR plays).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::domain::errors::{QueueError, QueueResult};
use crate::domain::models::Task;
use crate::domain::ports::task_queue::{QueueStats, ReservedHandle, TaskQueuePort};

const READY_SET_KEY: &str = "dist_test:ready";
const RESERVED_HASH_KEY: &str = "dist_test:reserved";
const RESERVED_DEADLINE_KEY: &str = "dist_test:reserved_deadlines";
const PAYLOAD_HASH_KEY: &str = "dist_test:payloads";

/// Redis-backed task queue. All broker calls are serialized per-process
/// through a single connection behind a mutex, matching the spec's
/// single-mutex-per-process concurrency rule.
pub struct RedisTaskQueue {
    conn: Mutex<ConnectionManager>,
    reservation_ttl_secs: u64,
    sequence: AtomicU64,
}

impl RedisTaskQueue {
    pub async fn connect(redis_url: &str, reservation_ttl_secs: u64) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            reservation_ttl_secs,
            sequence: AtomicU64::new(0),
        })
    }

    fn now_secs() -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
    }

    /// Move any reservation whose visibility deadline has lapsed back onto
    /// the ready set, at its original priority.
    async fn sweep_expired(&self, conn: &mut ConnectionManager) -> QueueResult<()> {
        let now = Self::now_secs();
        let expired: Vec<String> = conn
            .zrangebyscore(RESERVED_DEADLINE_KEY, f64::NEG_INFINITY, now)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;

        for handle_id in expired {
            let priority: Option<f64> = conn
                .hget(RESERVED_HASH_KEY, &handle_id)
                .await
                .map_err(|e| QueueError::Operation(e.to_string()))?;
            if let Some(priority) = priority {
                let _: () = conn
                    .zadd(READY_SET_KEY, &handle_id, priority)
                    .await
                    .map_err(|e| QueueError::Operation(e.to_string()))?;
            }
            let _: () = conn
                .hdel(RESERVED_HASH_KEY, &handle_id)
                .await
                .map_err(|e| QueueError::Operation(e.to_string()))?;
            let _: () = conn
                .zrem(RESERVED_DEADLINE_KEY, &handle_id)
                .await
                .map_err(|e| QueueError::Operation(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskQueuePort for RedisTaskQueue {
    async fn submit(&self, task: &Task, priority: i64) -> QueueResult<()> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        // Sub-sort by insertion sequence: shift priority up by a tiny
        // fraction per enqueued item so ties preserve submission order
        // without colliding across processes (sequence counter is
        // per-process but monotonically increasing, matching the
        // single-mutex-per-process handle to the broker).
        let score = priority as f64 + (seq as f64) * 1e-6;
        let handle_id = task.attempt_id();
        let payload = serde_json::to_string(task).map_err(|e| QueueError::Operation(e.to_string()))?;

        let mut conn = self.conn.lock().await;
        let _: () = conn
            .hset(PAYLOAD_HASH_KEY, &handle_id, payload)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let _: () = conn
            .zadd(READY_SET_KEY, &handle_id, score)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn reserve(&self) -> QueueResult<(Task, ReservedHandle)> {
        loop {
            let mut conn = self.conn.lock().await;
            self.sweep_expired(&mut conn).await?;

            let popped: Vec<(String, f64)> = conn
                .zpopmin(READY_SET_KEY, 1)
                .await
                .map_err(|e| QueueError::Operation(e.to_string()))?;

            if let Some((handle_id, priority)) = popped.into_iter().next() {
                let payload: Option<String> = conn
                    .hget(PAYLOAD_HASH_KEY, &handle_id)
                    .await
                    .map_err(|e| QueueError::Operation(e.to_string()))?;
                let Some(payload) = payload else {
                    // Payload vanished (race with a concurrent delete); skip.
                    continue;
                };
                let task: Task = serde_json::from_str(&payload).map_err(|e| QueueError::Operation(e.to_string()))?;

                let deadline = Self::now_secs() + self.reservation_ttl_secs as f64;
                let _: () = conn
                    .hset(RESERVED_HASH_KEY, &handle_id, priority)
                    .await
                    .map_err(|e| QueueError::Operation(e.to_string()))?;
                let _: () = conn
                    .zadd(RESERVED_DEADLINE_KEY, &handle_id, deadline)
                    .await
                    .map_err(|e| QueueError::Operation(e.to_string()))?;

                return Ok((task, ReservedHandle(handle_id)));
            }

            drop(conn);
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    async fn touch(&self, handle: &ReservedHandle) -> QueueResult<()> {
        let mut conn = self.conn.lock().await;
        let still_reserved: bool = conn
            .hexists(RESERVED_HASH_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        if !still_reserved {
            return Err(QueueError::UnknownHandle(handle.0.clone()));
        }
        let deadline = Self::now_secs() + self.reservation_ttl_secs as f64;
        let _: () = conn
            .zadd(RESERVED_DEADLINE_KEY, &handle.0, deadline)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, handle: &ReservedHandle) -> QueueResult<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .hdel(RESERVED_HASH_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let _: () = conn
            .zrem(RESERVED_DEADLINE_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let _: () = conn
            .hdel(PAYLOAD_HASH_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn release(&self, handle: &ReservedHandle) -> QueueResult<()> {
        let mut conn = self.conn.lock().await;
        let priority: Option<f64> = conn
            .hget(RESERVED_HASH_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let Some(priority) = priority else {
            return Err(QueueError::UnknownHandle(handle.0.clone()));
        };
        let _: () = conn
            .zadd(READY_SET_KEY, &handle.0, priority)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let _: () = conn
            .hdel(RESERVED_HASH_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        let _: () = conn
            .zrem(RESERVED_DEADLINE_KEY, &handle.0)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.conn.lock().await;
        self.sweep_expired(&mut conn).await?;
        let ready: u64 = conn.zcard(READY_SET_KEY).await.map_err(|e| QueueError::Operation(e.to_string()))?;
        let running: u64 = conn
            .hlen(RESERVED_HASH_KEY)
            .await
            .map_err(|e| QueueError::Operation(e.to_string()))?;
        Ok(QueueStats { ready, running })
    }
}
