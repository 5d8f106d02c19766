//! Redis sorted-set event store.
//!
//! Each identifier maps to one sorted set whose scores are event timestamps in
//! microseconds. Trimming, counting, the conditional insert and the expiry
//! refresh run inside a single Lua script, which Redis executes without
//! interleaving other commands.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};
use uuid::Uuid;

use super::backend::{AdmitOutcome, AdmitRequest, EventStore, WindowSnapshot};
use super::clock::Timestamp;
use crate::error::{QuotaError, Result};

/// KEYS[1] = record; ARGV = now, cutoff, max_requests, ttl_ms, member.
const ADMIT_SCRIPT: &str = r"
local key = KEYS[1]
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. ARGV[2])
local count = redis.call('ZCARD', key)
local admitted = 0
if count < tonumber(ARGV[3]) then
  redis.call('ZADD', key, ARGV[1], ARGV[5])
  admitted = 1
end
local oldest = false
local head = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if head[2] then
  oldest = head[2]
  redis.call('PEXPIRE', key, ARGV[4])
end
return {count, admitted, oldest}
";

/// KEYS[1] = record; ARGV = cutoff.
const COUNT_SCRIPT: &str = r"
local key = KEYS[1]
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. ARGV[1])
local count = redis.call('ZCARD', key)
local oldest = false
local head = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if head[2] then
  oldest = head[2]
end
return {count, oldest}
";

/// An [`EventStore`] backed by Redis sorted sets.
#[derive(Clone)]
pub struct RedisEventStore {
    conn: ConnectionManager,
    admit_script: Script,
    count_script: Script,
}

impl std::fmt::Debug for RedisEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventStore").finish_non_exhaustive()
    }
}

impl RedisEventStore {
    /// Connect to Redis at `url`, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        info!(url = %sanitize_url(url), "Connecting to Redis event store");

        let client = Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                QuotaError::StoreUnavailable(format!(
                    "timed out connecting to Redis after {:?}",
                    connect_timeout
                ))
            })??;

        info!("Redis event store connected");
        Ok(Self::with_connection(conn))
    }

    /// Wrap an existing connection manager.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            admit_script: Script::new(ADMIT_SCRIPT),
            count_script: Script::new(COUNT_SCRIPT),
        }
    }

    /// Round-trip a `PING` to check the connection.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis health check passed");
        Ok(())
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn trim_and_admit(&self, key: &str, request: AdmitRequest) -> Result<AdmitOutcome> {
        let mut conn = self.conn.clone();
        let member = entry_member(request.now);

        let (count, admitted, oldest): (u64, u8, Option<String>) = self
            .admit_script
            .key(key)
            .arg(request.now.as_micros())
            .arg(request.cutoff.as_micros())
            .arg(request.max_requests)
            .arg(request.ttl_millis)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        Ok(AdmitOutcome {
            count_before: count,
            admitted: admitted == 1,
            oldest: oldest.as_deref().map(parse_score).transpose()?,
        })
    }

    async fn trim_and_count(
        &self,
        key: &str,
        _now: Timestamp,
        cutoff: Timestamp,
    ) -> Result<WindowSnapshot> {
        let mut conn = self.conn.clone();

        let (count, oldest): (u64, Option<String>) = self
            .count_script
            .key(key)
            .arg(cutoff.as_micros())
            .invoke_async(&mut conn)
            .await?;

        Ok(WindowSnapshot {
            count,
            oldest: oldest.as_deref().map(parse_score).transpose()?,
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

/// Sorted-set member for an event at `now`.
///
/// Unique per call so concurrent events sharing a timestamp are all counted.
fn entry_member(now: Timestamp) -> String {
    format!("{}-{}", now.as_micros(), Uuid::new_v4().simple())
}

fn parse_score(raw: &str) -> Result<Timestamp> {
    raw.parse::<f64>()
        .map(|micros| Timestamp::from_micros(micros.round() as i64))
        .map_err(|e| QuotaError::StoreUnavailable(format!("malformed score {:?}: {}", raw, e)))
}

/// Hide the password in a Redis URL for logging.
pub fn sanitize_url(url: &str) -> String {
    match url.split_once('@') {
        Some((credentials, host)) => match credentials.rsplit_once(':') {
            Some((scheme_user, _password)) if scheme_user.contains("://") => {
                format!("{}:***@{}", scheme_user, host)
            }
            _ => format!("{}@{}", credentials, host),
        },
        None => url.to_string(),
    }
}
