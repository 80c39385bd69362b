//! A [`Queue`] backed by a Redis list.
//!
//! Jobs are serialized as JSON and pushed onto the head of the list with `LPUSH`, and popped from
//! its tail with `BRPOP`, giving FIFO ordering shared by every process using the same key.
//!
//! Redis only acknowledges a job by removing it from the list, so a job popped by a process that
//! crashes before delivering it is lost.
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use courier::{
    job::Job,
    queue::{Queue, QueueError},
};
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How long a single `BRPOP` waits for a job before [`QueueError::Timeout`] is returned.
const POP_TIMEOUT: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedisQueueConfig {
    pub url: String,
    /// The key of the list holding the jobs.
    pub queue_key: String,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_owned(),
            queue_key: "email:jobs".to_owned(),
        }
    }
}

pub struct RedisQueue {
    conn: ConnectionManager,
    // BRPOP blocks the connection it is sent on, so pops get a connection of their own.
    pop_conn: Mutex<ConnectionManager>,
    queue_key: String,
    closed: AtomicBool,
}

fn map_err(error: RedisError) -> QueueError {
    QueueError::transport(error)
}

impl RedisQueue {
    /// Connect to the server at `config.url`, failing if it does not answer a `PING` in time.
    pub async fn connect(config: RedisQueueConfig) -> Result<Self, QueueError> {
        let client = Client::open(config.url.as_str()).map_err(map_err)?;

        let (conn, pop_conn) = tokio::time::timeout(CONNECT_TIMEOUT, async {
            let mut conn = ConnectionManager::new(client.clone()).await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await?;
            let pop_conn = ConnectionManager::new(client).await?;
            Ok::<_, RedisError>((conn, pop_conn))
        })
        .await
        .map_err(QueueError::transport)?
        .map_err(map_err)?;

        tracing::info!(queue_key = %config.queue_key, "Connected to redis queue");
        Ok(Self {
            conn,
            pop_conn: Mutex::new(pop_conn),
            queue_key: config.queue_key,
            closed: AtomicBool::new(false),
        })
    }

    pub async fn from_url(redis_url: &str, queue_key: impl ToString) -> Result<Self, QueueError> {
        Self::connect(RedisQueueConfig {
            url: redis_url.to_owned(),
            queue_key: queue_key.to_string(),
        })
        .await
    }

    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    /// Put a job popped after cancellation back on the tail, where it is the next to be popped.
    async fn unclaim(&self, data: String) -> Result<(), QueueError> {
        tracing::debug!(queue_key = %self.queue_key, "Returning job popped after cancellation");
        let _: () = self
            .conn
            .clone()
            .rpush(&self.queue_key, data)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for RedisQueue {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        self.ensure_open()?;
        let data = serde_json::to_string(&job)?;
        let _: () = self
            .conn
            .clone()
            .lpush(&self.queue_key, data)
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn pop(&self, cancellation_token: &CancellationToken) -> Result<Job, QueueError> {
        if cancellation_token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        self.ensure_open()?;

        let mut conn = tokio::select! {
            conn = self.pop_conn.lock() => conn,
            _ = cancellation_token.cancelled() => return Err(QueueError::Cancelled),
        };
        // Not raced against cancellation: a reply dropped mid flight would lose its job.
        let popped: Option<(String, String)> = conn
            .brpop(&self.queue_key, POP_TIMEOUT.as_secs_f64())
            .await
            .map_err(map_err)?;
        drop(conn);

        match popped {
            Some((_key, data)) if cancellation_token.is_cancelled() => {
                self.unclaim(data).await?;
                Err(QueueError::Cancelled)
            }
            Some((_key, data)) => Ok(serde_json::from_str(&data)?),
            None if cancellation_token.is_cancelled() => Err(QueueError::Cancelled),
            None => Err(QueueError::Timeout),
        }
    }

    /// Stop accepting and handing out jobs through this handle.
    ///
    /// Jobs already in the list are left for other processes. The connections stay open until
    /// the queue is dropped.
    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(queue_key = %self.queue_key, "Closed redis queue");
        }
        Ok(())
    }

    async fn size(&self) -> Result<Option<usize>, QueueError> {
        self.ensure_open()?;
        let len: usize = self
            .conn
            .clone()
            .llen(&self.queue_key)
            .await
            .map_err(map_err)?;
        Ok(Some(len))
    }
}
