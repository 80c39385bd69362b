//! Test suite for ensuring a [`Queue`] implementation behaves like the in-process reference.
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use super::{Queue, QueueError};
use crate::job::{Attachment, Job};

const WAIT: Duration = Duration::from_secs(3);

fn mock_job(destination: &str) -> Job {
    Job::builder(destination)
        .with_subject("subject")
        .with_body("body")
        .build()
}

/// Create the queue contract test suite.
///
/// For queue implementors, it is useful to include this as part of your test suite.
///
/// # Example
///
/// ```
/// use courier::queue::memory::MemoryQueue;
/// use courier::queue_test_suite;
///
/// queue_test_suite!(for: MemoryQueue::new(16));
/// ```
///
/// Backends that need a running broker can generate the suite as ignored tests:
///
/// ```ignore
/// queue_test_suite!(
///     ignored: "requires a running redis server",
///     for: RedisQueue::from_url(URL, unique_key()).await.unwrap()
/// );
/// ```
///
/// Every test receives a fresh queue, so for shared brokers the expression should produce a queue
/// on its own key or subject.
#[macro_export]
macro_rules! queue_test_suite {
    (for: $queue:expr) => {
        $crate::queue_test_suite!(@suite [#[tokio::test]] $queue);
    };
    (ignored: $reason:literal, for: $queue:expr) => {
        $crate::queue_test_suite!(@suite [#[tokio::test] #[ignore = $reason]] $queue);
    };
    (@suite [$(#[$attr:meta])*] $queue:expr) => {
        $(#[$attr])*
        async fn push_then_pop_round_trips() {
          let queue = $queue;
          $crate::queue::testing::push_then_pop_round_trips(queue).await;
        }
        $(#[$attr])*
        async fn pop_returns_jobs_in_fifo_order() {
          let queue = $queue;
          $crate::queue::testing::pop_returns_jobs_in_fifo_order(queue).await;
        }
        $(#[$attr])*
        async fn pop_on_empty_queue_returns_no_job() {
          let queue = $queue;
          $crate::queue::testing::pop_on_empty_queue_returns_no_job(queue).await;
        }
        $(#[$attr])*
        async fn pop_with_cancelled_token() {
          let queue = $queue;
          $crate::queue::testing::pop_with_cancelled_token(queue).await;
        }
        $(#[$attr])*
        async fn pop_cancelled_while_waiting() {
          let queue = $queue;
          $crate::queue::testing::pop_cancelled_while_waiting(queue).await;
        }
        $(#[$attr])*
        async fn push_after_close() {
          let queue = $queue;
          $crate::queue::testing::push_after_close(queue).await;
        }
        $(#[$attr])*
        async fn pop_after_close() {
          let queue = $queue;
          $crate::queue::testing::pop_after_close(queue).await;
        }
        $(#[$attr])*
        async fn size_counts_waiting_jobs() {
          let queue = $queue;
          $crate::queue::testing::size_counts_waiting_jobs(queue).await;
        }
    };
}

/// Pops until a job arrives, skipping the transient timeouts of broker backends.
async fn pop_next(queue: &impl Queue) -> Job {
    let token = CancellationToken::new();
    tokio::time::timeout(WAIT, async {
        loop {
            match queue.pop(&token).await {
                Ok(job) => return job,
                Err(error) if error.is_transient() => continue,
                Err(error) => panic!("Unexpected error popping job: {error}"),
            }
        }
    })
    .await
    .expect("Timed out waiting for the pushed job")
}

pub async fn push_then_pop_round_trips(queue: impl Queue) {
    let mut job = Job::builder("someone@example.com")
        .with_subject("subject")
        .with_template("welcome.html", serde_json::json!({"name": "Ada"}))
        .with_attachment(Attachment::inline("a.txt", "aGVsbG8="))
        .with_attachment(Attachment::remote("b.pdf", "https://example.com/b.pdf"))
        .with_max_retries(4)
        .schedule_at(Utc::now() + TimeDelta::minutes(3))
        .build();
    job.retry_count = 2;
    job.last_error = "connection refused".to_owned();

    queue.push(job.clone()).await.unwrap();
    let popped = pop_next(&queue).await;

    assert_eq!(popped, job);
}

pub async fn pop_returns_jobs_in_fifo_order(queue: impl Queue) {
    for destination in ["first", "second", "third"] {
        queue.push(mock_job(destination)).await.unwrap();
    }

    assert_eq!(pop_next(&queue).await.destination, "first");
    assert_eq!(pop_next(&queue).await.destination, "second");
    assert_eq!(pop_next(&queue).await.destination, "third");
}

pub async fn pop_on_empty_queue_returns_no_job(queue: impl Queue) {
    let token = CancellationToken::new();

    match tokio::time::timeout(Duration::from_millis(200), queue.pop(&token)).await {
        Err(_elapsed) => {}
        Ok(Err(QueueError::Timeout)) => {}
        Ok(other) => panic!("Expected the pop to wait or time out, got {other:?}"),
    }
}

pub async fn pop_with_cancelled_token(queue: impl Queue) {
    let token = CancellationToken::new();
    token.cancel();

    let result = tokio::time::timeout(WAIT, queue.pop(&token))
        .await
        .expect("Pop did not observe the cancelled token");

    assert!(matches!(result, Err(QueueError::Cancelled)), "{result:?}");
}

pub async fn pop_cancelled_while_waiting(queue: impl Queue) {
    let token = CancellationToken::new();
    let cancel = {
        let token = token.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        }
    };

    let (result, ()) = tokio::join!(
        tokio::time::timeout(WAIT, async {
            loop {
                match queue.pop(&token).await {
                    Err(error) if error.is_transient() => continue,
                    other => return other,
                }
            }
        }),
        cancel
    );

    let result = result.expect("Pop did not observe the cancellation");
    assert!(matches!(result, Err(QueueError::Cancelled)), "{result:?}");
}

pub async fn push_after_close(queue: impl Queue) {
    queue.close().await.unwrap();

    let result = queue.push(mock_job("late")).await;

    assert!(matches!(result, Err(QueueError::Closed)), "{result:?}");
}

pub async fn pop_after_close(queue: impl Queue) {
    queue.push(mock_job("stranded")).await.unwrap();
    queue.close().await.unwrap();

    let result = queue.pop(&CancellationToken::new()).await;

    assert!(matches!(result, Err(QueueError::Closed)), "{result:?}");
}

pub async fn size_counts_waiting_jobs(queue: impl Queue) {
    let Some(initial) = queue.size().await.unwrap() else {
        return;
    };

    queue.push(mock_job("one")).await.unwrap();
    queue.push(mock_job("two")).await.unwrap();
    assert_eq!(queue.size().await.unwrap(), Some(initial + 2));

    pop_next(&queue).await;
    assert_eq!(queue.size().await.unwrap(), Some(initial + 1));
}
