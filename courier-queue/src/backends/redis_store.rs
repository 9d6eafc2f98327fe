use std::{collections::HashMap, fmt, future::Future, time::Duration};

use async_trait::async_trait;
use courier_common::{
    config::ConnectionConfig,
    time::{duration_millis, now_millis},
};
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

use crate::{
    FailedJob, Job, JobId, MailPayload, QueueConfig, QueueError, QueueStats, QueueStore, Result,
};

/// Reclaims expired leases, then moves the earliest available job from the
/// pending set to the reserved set.
///
/// KEYS: pending, reserved. ARGV: now, lease expiry, job key prefix.
/// Returns `[id, field, value, ...]` or nil.
const RESERVE_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[2], id)
    if redis.call('EXISTS', ARGV[3] .. id) == 1 then
        redis.call('HSET', ARGV[3] .. id, 'available_at', ARGV[1])
        redis.call('HDEL', ARGV[3] .. id, 'reserved_at')
        redis.call('ZADD', KEYS[1], ARGV[1], id)
    end
end
while true do
    local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
    if #ids == 0 then
        return false
    end
    local id = ids[1]
    local key = ARGV[3] .. id
    redis.call('ZREM', KEYS[1], id)
    if redis.call('EXISTS', key) == 1 then
        redis.call('HINCRBY', key, 'attempts', 1)
        redis.call('HSET', key, 'reserved_at', ARGV[1])
        redis.call('ZADD', KEYS[2], ARGV[2], id)
        local result = redis.call('HGETALL', key)
        table.insert(result, 1, id)
        return result
    end
end
";

/// KEYS: job, pending, reserved. ARGV: id, available_at.
const RELEASE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HSET', KEYS[1], 'available_at', ARGV[2])
redis.call('HDEL', KEYS[1], 'reserved_at')
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
return 1
";

/// KEYS: job, pending, reserved, failed. ARGV: id, failed record.
const FAIL_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('HSET', KEYS[4], ARGV[1], ARGV[2])
return 1
";

/// KEYS: failed, job, pending, queues. ARGV: id, available_at, queue, field, value, ...
const RETRY_SCRIPT: &str = r"
if redis.call('HDEL', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[2], unpack(ARGV, 4))
redis.call('ZADD', KEYS[3], ARGV[2], ARGV[1])
redis.call('SADD', KEYS[4], ARGV[3])
return 1
";

/// Queue store backed by a Redis-compatible server.
///
/// Key layout, all under the configured prefix:
///
/// - `<prefix><queue>`: sorted set of pending ids scored by `available_at`
/// - `<prefix><queue>:reserved`: sorted set of reserved ids scored by lease expiry
/// - `<prefix>job:<id>`: hash holding the job
/// - `<prefix>queues`: set of known queue names
/// - `<failed_key>`: hash of id to failed record JSON
///
/// Every operation is bounded by the connection timeout.
pub struct RedisQueueStore {
    pool: Pool,
    prefix: String,
    failed_key: String,
    lease: Duration,
    timeout: Duration,
    reserve_script: Script,
    release_script: Script,
    fail_script: Script,
    retry_script: Script,
}

impl fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("prefix", &self.prefix)
            .field("failed_key", &self.failed_key)
            .field("lease", &self.lease)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RedisQueueStore {
    /// Create a store. The pool connects lazily, so this does not touch the network.
    ///
    /// # Errors
    /// Returns [`QueueError::Connection`] if the pool cannot be built.
    pub fn new(connection: &ConnectionConfig, config: QueueConfig) -> Result<Self> {
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(connection.host().to_string(), connection.port()),
            redis: redis::RedisConnectionInfo {
                db: i64::from(connection.database()),
                username: connection.username().map(ToString::to_string),
                password: connection.password().map(ToString::to_string),
                ..Default::default()
            },
        };

        let pool = Config::from_connection_info(info)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        debug!(
            host = connection.host(),
            port = connection.port(),
            database = connection.database(),
            prefix = %config.prefix,
            "Created queue store pool"
        );

        Ok(Self {
            pool,
            failed_key: config.failed_key(),
            lease: config.lease(),
            prefix: config.prefix,
            timeout: connection.timeout(),
            reserve_script: Script::new(RESERVE_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
            fail_script: Script::new(FAIL_SCRIPT),
            retry_script: Script::new(RETRY_SCRIPT),
        })
    }

    fn pending_key(&self, queue: &str) -> String {
        format!("{}{queue}", self.prefix)
    }

    fn reserved_key(&self, queue: &str) -> String {
        format!("{}{queue}:reserved", self.prefix)
    }

    fn job_prefix(&self) -> String {
        format!("{}job:", self.prefix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}job:{id}", self.prefix)
    }

    fn queues_key(&self) -> String {
        format!("{}queues", self.prefix)
    }

    async fn get_conn(&self) -> Result<Connection> {
        Ok(self.pool.get().await?)
    }

    /// Run `operation` under the connection timeout.
    async fn bounded<T>(&self, operation: impl Future<Output = Result<T>> + Send) -> Result<T> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| QueueError::Timeout(self.timeout))?
    }

    async fn queue_of(&self, conn: &mut Connection, id: &JobId) -> Result<Option<String>> {
        Ok(conn.hget(self.job_key(&id.to_string()), "queue").await?)
    }

    async fn load_jobs(&self, conn: &mut Connection, ids: &[String]) -> Result<Vec<Job>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in ids {
            pipe.hgetall(self.job_key(id));
        }
        let rows: Vec<HashMap<String, String>> = pipe.query_async(conn).await?;

        ids.iter()
            .zip(rows)
            .filter(|(_, fields)| !fields.is_empty())
            .map(|(id, fields)| job_from_fields(id, &fields))
            .collect()
    }

    async fn ids_in(&self, conn: &mut Connection, queue: &str) -> Result<Vec<String>> {
        let (mut pending, reserved): (Vec<String>, Vec<String>) = redis::pipe()
            .zrange(self.pending_key(queue), 0, -1)
            .zrange(self.reserved_key(queue), 0, -1)
            .query_async(conn)
            .await?;
        pending.extend(reserved);
        Ok(pending)
    }

    async fn failed_records(&self, conn: &mut Connection) -> Result<Vec<FailedJob>> {
        let raw: Vec<String> = conn.hvals(&self.failed_key).await?;
        let mut records = raw
            .iter()
            .map(|json| serde_json::from_str::<FailedJob>(json))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        records.sort_by_key(|record| (record.failed_at, record.id()));
        Ok(records)
    }

    async fn retry_record(&self, conn: &mut Connection, record: FailedJob) -> Result<bool> {
        let mut job = record.job;
        job.reset(now_millis());
        let id = job.id.to_string();

        let mut invocation = self.retry_script.prepare_invoke();
        invocation
            .key(&self.failed_key)
            .key(self.job_key(&id))
            .key(self.pending_key(&job.queue))
            .key(self.queues_key())
            .arg(&id)
            .arg(job.available_at)
            .arg(&job.queue);
        for (field, value) in job_fields(&job)? {
            invocation.arg(field).arg(value);
        }

        let moved: i64 = invocation.invoke_async(conn).await?;
        Ok(moved == 1)
    }

    /// Delete every job in `queue`. Returns the number of jobs removed.
    async fn drop_queue(&self, conn: &mut Connection, queue: &str) -> Result<usize> {
        let ids = self.ids_in(conn, queue).await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for id in &ids {
            pipe.del(self.job_key(id)).ignore();
        }
        pipe.del(self.pending_key(queue))
            .ignore()
            .del(self.reserved_key(queue))
            .ignore();
        let (): () = pipe.query_async(conn).await?;
        Ok(ids.len())
    }
}

fn job_fields(job: &Job) -> Result<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("queue", job.queue.clone()),
        ("payload", serde_json::to_string(&job.payload)?),
        ("attempts", job.attempts.to_string()),
        ("enqueued_at", job.enqueued_at.to_string()),
        ("available_at", job.available_at.to_string()),
    ];
    if let Some(reserved_at) = job.reserved_at {
        fields.push(("reserved_at", reserved_at.to_string()));
    }
    Ok(fields)
}

fn job_from_fields(id: &str, fields: &HashMap<String, String>) -> Result<Job> {
    let corrupted = |reason: String| QueueError::Corrupted {
        id: id.to_string(),
        reason,
    };
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| corrupted(format!("missing field '{name}'")))
    };
    let number = |name: &str| {
        field(name)?
            .parse::<u64>()
            .map_err(|e| corrupted(format!("field '{name}': {e}")))
    };

    let payload: MailPayload = serde_json::from_str(field("payload")?)?;
    let attempts = u32::try_from(number("attempts")?)
        .map_err(|e| corrupted(format!("field 'attempts': {e}")))?;
    let reserved_at = match fields.get("reserved_at") {
        Some(_) => Some(number("reserved_at")?),
        None => None,
    };

    Ok(Job {
        id: id.parse()?,
        queue: field("queue")?.clone(),
        payload,
        attempts,
        enqueued_at: number("enqueued_at")?,
        available_at: number("available_at")?,
        reserved_at,
    })
}

fn reply_to_job(reply: &[String]) -> Result<Job> {
    let Some((id, rest)) = reply.split_first() else {
        return Err(QueueError::Corrupted {
            id: String::new(),
            reason: "empty reservation reply".to_string(),
        });
    };
    let fields = rest
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    job_from_fields(id, &fields)
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    fn lease(&self) -> Duration {
        self.lease
    }

    async fn enqueue(&self, queue: &str, payload: MailPayload) -> Result<JobId> {
        let job = Job::new(queue, payload, now_millis());
        let id = job.id.to_string();
        let fields = job_fields(&job)?;

        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let (): () = redis::pipe()
                .atomic()
                .hset_multiple(self.job_key(&id), &fields)
                .ignore()
                .zadd(self.pending_key(queue), &id, job.available_at)
                .ignore()
                .sadd(self.queues_key(), queue)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await?;

        Ok(job.id)
    }

    async fn reserve(&self, queue: &str) -> Result<Option<Job>> {
        let now = now_millis();
        let lease_until = now.saturating_add(duration_millis(self.lease));

        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let reply: Option<Vec<String>> = self
                .reserve_script
                .key(self.pending_key(queue))
                .key(self.reserved_key(queue))
                .arg(now)
                .arg(lease_until)
                .arg(self.job_prefix())
                .invoke_async(&mut conn)
                .await?;

            reply.as_deref().map(reply_to_job).transpose()
        })
        .await
    }

    async fn acknowledge(&self, id: &JobId) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let Some(queue) = self.queue_of(&mut conn, id).await? else {
                return Ok(());
            };
            let id = id.to_string();
            let (): () = redis::pipe()
                .atomic()
                .del(self.job_key(&id))
                .ignore()
                .zrem(self.pending_key(&queue), &id)
                .ignore()
                .zrem(self.reserved_key(&queue), &id)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn release(&self, id: &JobId, delay: Duration) -> Result<()> {
        let available_at = now_millis().saturating_add(duration_millis(delay));

        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let Some(queue) = self.queue_of(&mut conn, id).await? else {
                return Err(QueueError::JobNotFound(*id));
            };
            let key = id.to_string();
            let released: i64 = self
                .release_script
                .key(self.job_key(&key))
                .key(self.pending_key(&queue))
                .key(self.reserved_key(&queue))
                .arg(&key)
                .arg(available_at)
                .invoke_async(&mut conn)
                .await?;

            if released == 1 {
                Ok(())
            } else {
                Err(QueueError::JobNotFound(*id))
            }
        })
        .await
    }

    async fn fail(&self, id: &JobId, reason: &str) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let key = id.to_string();
            let fields: HashMap<String, String> = conn.hgetall(self.job_key(&key)).await?;
            if fields.is_empty() {
                return Err(QueueError::JobNotFound(*id));
            }

            let job = job_from_fields(&key, &fields)?;
            let queue = job.queue.clone();
            let record = serde_json::to_string(&FailedJob::new(job, reason, now_millis()))?;

            let moved: i64 = self
                .fail_script
                .key(self.job_key(&key))
                .key(self.pending_key(&queue))
                .key(self.reserved_key(&queue))
                .key(&self.failed_key)
                .arg(&key)
                .arg(record)
                .invoke_async(&mut conn)
                .await?;

            if moved == 1 {
                Ok(())
            } else {
                Err(QueueError::JobNotFound(*id))
            }
        })
        .await
    }

    async fn list(&self, queue: &str) -> Result<Vec<Job>> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let ids = self.ids_in(&mut conn, queue).await?;
            self.load_jobs(&mut conn, &ids).await
        })
        .await
    }

    async fn list_failed(&self) -> Result<Vec<FailedJob>> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            self.failed_records(&mut conn).await
        })
        .await
    }

    async fn retry(&self, id: &JobId) -> Result<bool> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let raw: Option<String> = conn.hget(&self.failed_key, id.to_string()).await?;
            let Some(raw) = raw else {
                return Ok(false);
            };
            let record: FailedJob = serde_json::from_str(&raw)?;
            self.retry_record(&mut conn, record).await
        })
        .await
    }

    async fn retry_all(&self) -> Result<usize> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let mut moved = 0;
            for record in self.failed_records(&mut conn).await? {
                if self.retry_record(&mut conn, record).await? {
                    moved += 1;
                }
            }
            Ok(moved)
        })
        .await
    }

    async fn purge(&self, queue: Option<&str>) -> Result<usize> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;

            let Some(queue) = queue else {
                let queues: Vec<String> = conn.smembers(self.queues_key()).await?;
                let mut removed = 0;
                for queue in &queues {
                    removed += self.drop_queue(&mut conn, queue).await?;
                }
                let (failed, _): (usize, i64) = redis::pipe()
                    .atomic()
                    .hlen(&self.failed_key)
                    .del(&self.failed_key)
                    .del(self.queues_key())
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                return Ok(removed + failed);
            };

            let removed = self.drop_queue(&mut conn, queue).await?;
            let failed: Vec<String> = self
                .failed_records(&mut conn)
                .await?
                .into_iter()
                .filter(|record| record.job.queue == queue)
                .map(|record| record.id().to_string())
                .collect();

            let mut pipe = redis::pipe();
            pipe.atomic();
            if !failed.is_empty() {
                pipe.hdel(&self.failed_key, &failed).ignore();
            }
            pipe.srem(self.queues_key(), queue).ignore();
            let (): () = pipe.query_async(&mut conn).await?;

            Ok(removed + failed.len())
        })
        .await
    }

    async fn clear(&self, queue: &str) -> Result<usize> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            self.drop_queue(&mut conn, queue).await
        })
        .await
    }

    async fn flush_failed(&self) -> Result<usize> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let (removed, _): (usize, i64) = redis::pipe()
                .atomic()
                .hlen(&self.failed_key)
                .del(&self.failed_key)
                .query_async(&mut conn)
                .await?;
            Ok(removed)
        })
        .await
    }

    async fn queues(&self) -> Result<Vec<String>> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let mut queues: Vec<String> = conn.smembers(self.queues_key()).await?;
            queues.sort();
            Ok(queues)
        })
        .await
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats> {
        let now = now_millis();
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let pending_key = self.pending_key(queue);
            let (pending, delayed, reserved): (usize, usize, usize) = redis::pipe()
                .zcount(&pending_key, "-inf", now)
                .zcount(&pending_key, format!("({now}"), "+inf")
                .zcard(self.reserved_key(queue))
                .query_async(&mut conn)
                .await?;
            Ok(QueueStats {
                pending,
                delayed,
                reserved,
            })
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.bounded(async {
            let mut conn = self.get_conn().await?;
            let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
            if reply != "PONG" {
                warn!(reply = %reply, "Unexpected PING reply from queue store");
            }
            Ok(())
        })
        .await
    }
}
