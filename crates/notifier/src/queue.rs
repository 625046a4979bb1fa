//! At-least-once request queue with a visibility timeout and a dead-letter
//! list.
//!
//! A received message is invisible until it is acknowledged or its
//! visibility timeout lapses. Released or expired messages become visible
//! again until their receive count reaches the configured maximum, after
//! which they are moved to the dead-letter list.
//!
//! Redis layout for a queue named `q`:
//! - `herald:q:messages` HASH id → body
//! - `herald:q:receives` HASH id → receive count
//! - `herald:q:ready` LIST of visible ids (LPUSH / RPOP)
//! - `herald:q:inflight` ZSET id → visibility deadline (unix ms)
//! - `herald:q:dead` LIST of dead-lettered ids

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::NotificationRequest;
use herald_engine::schedule::NotificationSink;

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    /// Times the message has been received, this receive included.
    pub receive_count: u32,
}

#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Enqueue a body, returning the message id.
    async fn send(&self, body: &str) -> Result<String, AppError>;

    /// Receive up to `max` visible messages.
    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, AppError>;

    /// Delete a processed message.
    async fn ack(&self, id: &str) -> Result<(), AppError>;

    /// Give a message back for redelivery without waiting for its timeout.
    async fn release(&self, id: &str) -> Result<(), AppError>;

    /// Messages that exhausted their receives.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueMessage>, AppError>;
}

fn encode_request(request: &NotificationRequest) -> Result<String, AppError> {
    Ok(serde_json::to_string(request)?)
}

// ============================================================
// Redis
// ============================================================

/// Moves every expired in-flight id back to `ready`, or to `dead` once it
/// has been received `max_receives` times.
const RECLAIM_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local dead = 0
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[1], id)
  local count = tonumber(redis.call('HGET', KEYS[3], id) or '0')
  if count >= tonumber(ARGV[2]) then
    redis.call('LPUSH', KEYS[4], id)
    dead = dead + 1
  else
    redis.call('RPUSH', KEYS[2], id)
  end
end
return dead
";

/// Pops up to `ARGV[1]` ids, marks them in flight until `ARGV[2]` and
/// returns `id, count, body` triples.
const RECEIVE_SCRIPT: &str = r"
local out = {}
for _ = 1, tonumber(ARGV[1]) do
  local id = redis.call('RPOP', KEYS[1])
  if not id then break end
  local body = redis.call('HGET', KEYS[4], id)
  if body then
    redis.call('ZADD', KEYS[2], ARGV[2], id)
    local count = redis.call('HINCRBY', KEYS[3], id, 1)
    table.insert(out, id)
    table.insert(out, tostring(count))
    table.insert(out, body)
  end
end
return out
";

/// Queue backed by Redis lists, hashes and a sorted set.
#[derive(Clone)]
pub struct RedisQueue {
    redis: ConnectionManager,
    keys: QueueKeys,
    visibility_timeout: Duration,
    max_receives: u32,
}

#[derive(Debug, Clone)]
struct QueueKeys {
    messages: String,
    receives: String,
    ready: String,
    inflight: String,
    dead: String,
}

impl QueueKeys {
    fn new(name: &str) -> Self {
        let key = |suffix: &str| format!("herald:{name}:{suffix}");
        Self {
            messages: key("messages"),
            receives: key("receives"),
            ready: key("ready"),
            inflight: key("inflight"),
            dead: key("dead"),
        }
    }
}

impl RedisQueue {
    pub fn new(
        redis: ConnectionManager,
        name: &str,
        visibility_timeout: Duration,
        max_receives: u32,
    ) -> Self {
        Self {
            redis,
            keys: QueueKeys::new(name),
            visibility_timeout,
            max_receives: max_receives.max(1),
        }
    }

    /// Return expired in-flight messages to the queue.
    async fn reclaim(&self) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        let dead: u64 = redis::Script::new(RECLAIM_SCRIPT)
            .key(&self.keys.inflight)
            .key(&self.keys.ready)
            .key(&self.keys.receives)
            .key(&self.keys.dead)
            .arg(Utc::now().timestamp_millis())
            .arg(self.max_receives)
            .invoke_async(&mut redis)
            .await?;
        if dead > 0 {
            tracing::warn!(count = dead, queue = %self.keys.ready, "Messages moved to dead-letter list");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationQueue for RedisQueue {
    async fn send(&self, body: &str) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let mut redis = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .hset(&self.keys.messages, &id, body)
            .ignore()
            .lpush(&self.keys.ready, &id)
            .ignore()
            .query_async(&mut redis)
            .await?;
        Ok(id)
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, AppError> {
        self.reclaim().await?;

        let deadline = Utc::now().timestamp_millis()
            + i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX / 2);
        let mut redis = self.redis.clone();
        let raw: Vec<String> = redis::Script::new(RECEIVE_SCRIPT)
            .key(&self.keys.ready)
            .key(&self.keys.inflight)
            .key(&self.keys.receives)
            .key(&self.keys.messages)
            .arg(max)
            .arg(deadline)
            .invoke_async(&mut redis)
            .await?;

        raw.chunks_exact(3)
            .map(|triple| -> Result<QueueMessage, AppError> {
                let receive_count = triple[1].parse().map_err(|_| {
                    AppError::Internal(format!("Bad receive count for message {}", triple[0]))
                })?;
                Ok(QueueMessage {
                    id: triple[0].clone(),
                    receive_count,
                    body: triple[2].clone(),
                })
            })
            .collect()
    }

    async fn ack(&self, id: &str) -> Result<(), AppError> {
        let mut redis = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.inflight, id)
            .ignore()
            .hdel(&self.keys.messages, id)
            .ignore()
            .hdel(&self.keys.receives, id)
            .ignore()
            .query_async(&mut redis)
            .await?;
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), AppError> {
        // Expire the visibility deadline; the next reclaim requeues it.
        let mut redis = self.redis.clone();
        let _: () = redis::cmd("ZADD")
            .arg(&self.keys.inflight)
            .arg("XX")
            .arg(0)
            .arg(id)
            .query_async(&mut redis)
            .await?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueMessage>, AppError> {
        // LRANGE 0 -1 would return the whole list.
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut redis = self.redis.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.keys.dead)
            .arg(0)
            .arg(stop)
            .query_async(&mut redis)
            .await?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let (body, count): (Option<String>, Option<u32>) = redis::pipe()
                .hget(&self.keys.messages, &id)
                .hget(&self.keys.receives, &id)
                .query_async(&mut redis)
                .await?;
            messages.push(QueueMessage {
                id,
                body: body.unwrap_or_default(),
                receive_count: count.unwrap_or_default(),
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl NotificationSink for RedisQueue {
    async fn submit(&self, request: &NotificationRequest) -> Result<(), AppError> {
        let id = self.send(&encode_request(request)?).await?;
        tracing::debug!(request_id = %request.id, message_id = %id, "Request enqueued");
        Ok(())
    }
}

// ============================================================
// In-memory
// ============================================================

#[derive(Debug, Default)]
struct MemoryState {
    messages: HashMap<String, String>,
    receives: HashMap<String, u32>,
    ready: VecDeque<String>,
    inflight: HashMap<String, Instant>,
    dead: Vec<String>,
}

/// Process-local queue with the same delivery semantics, for tests and
/// single-process setups.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    visibility_timeout: Duration,
    max_receives: u32,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration, max_receives: u32) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            visibility_timeout,
            max_receives: max_receives.max(1),
        }
    }

    /// Visible plus in-flight messages.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.inflight.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn requeue(&self, state: &mut MemoryState, id: String) {
        let count = state.receives.get(&id).copied().unwrap_or_default();
        if count >= self.max_receives {
            tracing::warn!(message_id = %id, receives = count, "Message moved to dead-letter list");
            state.dead.push(id);
        } else {
            state.ready.push_back(id);
        }
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn send(&self, body: &str) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        state.messages.insert(id.clone(), body.to_string());
        state.ready.push_back(id.clone());
        Ok(id)
    }

    async fn receive(&self, max: usize) -> Result<Vec<QueueMessage>, AppError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = state
            .inflight
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            state.inflight.remove(&id);
            self.requeue(&mut state, id);
        }

        let mut out = Vec::new();
        while out.len() < max {
            let Some(id) = state.ready.pop_front() else {
                break;
            };
            let Some(body) = state.messages.get(&id).cloned() else {
                continue;
            };
            let count = state.receives.entry(id.clone()).or_default();
            *count += 1;
            let receive_count = *count;
            state
                .inflight
                .insert(id.clone(), now + self.visibility_timeout);
            out.push(QueueMessage {
                id,
                body,
                receive_count,
            });
        }
        Ok(out)
    }

    async fn ack(&self, id: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.inflight.remove(id);
        state.messages.remove(id);
        state.receives.remove(id);
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state.inflight.remove(id).is_some() {
            self.requeue(&mut state, id.to_string());
        }
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueMessage>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .dead
            .iter()
            .take(limit)
            .map(|id| QueueMessage {
                id: id.clone(),
                body: state.messages.get(id).cloned().unwrap_or_default(),
                receive_count: state.receives.get(id).copied().unwrap_or_default(),
            })
            .collect())
    }
}

#[async_trait]
impl NotificationSink for MemoryQueue {
    async fn submit(&self, request: &NotificationRequest) -> Result<(), AppError> {
        self.send(&encode_request(request)?).await?;
        Ok(())
    }
}
