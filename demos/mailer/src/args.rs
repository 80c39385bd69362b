use std::time::Duration;

use clap::{Parser, ValueEnum};
use courier::{config::DispatcherConfig, queue::memory::MemoryQueue, retry::RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueueType {
    Memory,
    Redis,
    Nats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Reads send requests as newline delimited JSON from stdin and delivers one message per
/// recipient.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    #[arg(long, env = "MAX_WORKERS", default_value_t = courier::config::DEFAULT_WORKERS)]
    pub workers: usize,

    #[arg(long, env = "QUEUE_TYPE", value_enum, default_value_t = QueueType::Memory)]
    pub queue_type: QueueType,

    /// Capacity of the in memory queue.
    #[arg(long, env = "MAX_QUEUE_SIZE", default_value_t = MemoryQueue::DEFAULT_CAPACITY)]
    pub queue_size: usize,

    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    #[arg(long, env = "REDIS_QUEUE_KEY", default_value = "email:jobs")]
    pub redis_queue_key: String,

    #[arg(long, env = "NATS_URL", default_value = "nats://localhost:4222")]
    pub nats_url: String,

    #[arg(long, env = "NATS_SUBJECT", default_value = "email.jobs")]
    pub nats_subject: String,

    #[arg(long, env = "NATS_QUEUE_GROUP", default_value = "courier")]
    pub nats_queue_group: String,

    #[arg(long, env = "MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    #[arg(long, env = "RETRY_BASE_DELAY_SECS", default_value_t = 60)]
    pub retry_base_delay_secs: u64,

    #[arg(long, env = "RETRY_MAX_DELAY_SECS", default_value_t = 30 * 60)]
    pub retry_max_delay_secs: u64,

    #[arg(long, env = "DELIVERY_TIMEOUT_SECS")]
    pub delivery_timeout_secs: Option<u64>,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            workers: self.workers,
            retry: RetryPolicy::default()
                .with_max_retries(self.max_retries)
                .with_base_delay(Duration::from_secs(self.retry_base_delay_secs))
                .with_max_delay(Duration::from_secs(self.retry_max_delay_secs)),
            delivery_timeout: self.delivery_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    /// Parse `args` without the environment variable fallbacks.
    fn parse(args: &[&str]) -> Args {
        for arg in Args::command().get_arguments() {
            if let Some(name) = arg.get_env() {
                std::env::remove_var(name);
            }
        }
        Args::try_parse_from(args.iter().copied()).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&["mailer"]);

        assert_eq!(args.queue_type, QueueType::Memory);
        assert_eq!(args.queue_size, 1000);
        assert_eq!(args.dispatcher_config(), DispatcherConfig::default());
    }

    #[test]
    fn flags() {
        let args = parse(&[
            "mailer",
            "--queue-type",
            "redis",
            "--workers",
            "2",
            "--retry-base-delay-secs",
            "1",
            "--delivery-timeout-secs",
            "30",
        ]);

        let config = args.dispatcher_config();

        assert_eq!(args.queue_type, QueueType::Redis);
        assert_eq!(config.workers, 2);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.delivery_timeout, Some(Duration::from_secs(30)));
    }
}
