//! A [`Queue`] backed by a NATS subject.
//!
//! Jobs are published as JSON to a subject and received through a queue group subscription, so
//! each job is handed to a single subscriber across every process sharing the group.
//!
//! Core NATS delivers at most once: jobs published while no subscriber is connected, or received
//! by a process that crashes before delivering them, are lost. NATS does not expose the number of
//! pending messages, so [`Queue::size`] returns `None`.
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_nats::{Client, Subscriber};
use async_trait::async_trait;
use courier::{
    job::Job,
    queue::{Queue, QueueError},
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// How long a single pop waits for a message before [`QueueError::Timeout`] is returned.
const POP_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NatsQueueConfig {
    pub url: String,
    pub subject: String,
    /// Subscribers sharing a queue group split the messages between them.
    pub queue_group: String,
}

impl Default for NatsQueueConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_owned(),
            subject: "email.jobs".to_owned(),
            queue_group: "courier".to_owned(),
        }
    }
}

pub struct NatsQueue {
    client: Client,
    subscriber: Mutex<Subscriber>,
    subject: String,
    closed: AtomicBool,
}

impl NatsQueue {
    pub async fn connect(config: NatsQueueConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(config.url.as_str())
            .await
            .map_err(QueueError::transport)?;
        let subscriber = client
            .queue_subscribe(config.subject.clone(), config.queue_group.clone())
            .await
            .map_err(QueueError::transport)?;

        tracing::info!(
            subject = %config.subject,
            queue_group = %config.queue_group,
            "Subscribed to nats queue"
        );
        Ok(Self {
            client,
            subscriber: Mutex::new(subscriber),
            subject: config.subject,
            closed: AtomicBool::new(false),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for NatsQueue {
    async fn push(&self, job: Job) -> Result<(), QueueError> {
        self.ensure_open()?;
        let data = serde_json::to_vec(&job)?;
        self.client
            .publish(self.subject.clone(), data.into())
            .await
            .map_err(QueueError::transport)
    }

    async fn pop(&self, cancellation_token: &CancellationToken) -> Result<Job, QueueError> {
        if cancellation_token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        self.ensure_open()?;

        // Waiting behind other workers for the subscriber counts towards the timeout.
        let receive = tokio::time::timeout(POP_TIMEOUT, async {
            self.subscriber.lock().await.next().await
        });
        let message = tokio::select! {
            received = receive => match received {
                Ok(Some(message)) => message,
                Ok(None) => return Err(QueueError::Closed),
                Err(_elapsed) => return Err(QueueError::Timeout),
            },
            _ = cancellation_token.cancelled() => return Err(QueueError::Cancelled),
        };

        Ok(serde_json::from_slice(&message.payload)?)
    }

    /// Unsubscribe and flush pending publishes.
    ///
    /// The client connection stays open until the queue is dropped.
    async fn close(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.subscriber
            .lock()
            .await
            .unsubscribe()
            .await
            .map_err(QueueError::transport)?;
        self.client.flush().await.map_err(QueueError::transport)?;
        tracing::debug!(subject = %self.subject, "Closed nats queue");
        Ok(())
    }

    async fn size(&self) -> Result<Option<usize>, QueueError> {
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const NATS_URL: &str = "nats://localhost:4222";

    fn unique_config() -> NatsQueueConfig {
        NatsQueueConfig {
            url: NATS_URL.to_owned(),
            subject: format!("courier.test.{}", rand::random::<u64>()),
            ..Default::default()
        }
    }

    courier::queue_test_suite!(
        ignored: "requires a running nats server",
        for: NatsQueue::connect(unique_config()).await.unwrap()
    );

    #[tokio::test]
    #[ignore = "requires a running nats server"]
    async fn pop_waiting_for_the_subscriber_times_out() {
        let queue = NatsQueue::connect(unique_config()).await.unwrap();
        let _busy = queue.subscriber.lock().await;

        let result = tokio::time::timeout(POP_TIMEOUT * 2, queue.pop(&CancellationToken::new()))
            .await
            .expect("Pop waited for the subscriber beyond its timeout");

        assert!(matches!(result, Err(QueueError::Timeout)));
    }

    #[test]
    fn config_defaults() {
        let config = NatsQueueConfig::default();

        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.subject, "email.jobs");
        assert_eq!(config.queue_group, "courier");
    }
}
