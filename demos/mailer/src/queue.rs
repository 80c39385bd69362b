use anyhow::Context;
use courier::queue::{memory::MemoryQueue, Queue};
use courier_nats::{NatsQueue, NatsQueueConfig};
use courier_redis::{RedisQueue, RedisQueueConfig};

use crate::args::{Args, QueueType};

/// Create the queue selected by `args.queue_type`.
pub async fn build_queue(args: &Args) -> anyhow::Result<Box<dyn Queue>> {
    let queue: Box<dyn Queue> = match args.queue_type {
        QueueType::Memory => Box::new(MemoryQueue::new(args.queue_size)),
        QueueType::Redis => Box::new(
            RedisQueue::connect(RedisQueueConfig {
                url: args.redis_url.clone(),
                queue_key: args.redis_queue_key.clone(),
            })
            .await
            .with_context(|| format!("Failed to connect to redis at {}", args.redis_url))?,
        ),
        QueueType::Nats => Box::new(
            NatsQueue::connect(NatsQueueConfig {
                url: args.nats_url.clone(),
                subject: args.nats_subject.clone(),
                queue_group: args.nats_queue_group.clone(),
            })
            .await
            .with_context(|| format!("Failed to connect to nats at {}", args.nats_url))?,
        ),
    };
    tracing::info!(queue_type = ?args.queue_type, "Created queue");
    Ok(queue)
}
