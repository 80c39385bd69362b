//! The delivery action executed for every job.
use std::{fmt::Display, time::Duration};

use async_trait::async_trait;
use tokio::task::JoinError;

use crate::job::Payload;

/// Delivers the content of a job to its destination.
///
/// A single instance is shared by all the workers of a dispatcher, so it will be called
/// concurrently with independent jobs. Implementations own their connection and authentication
/// handling.
///
/// # Example
///
/// ```
/// # use courier::prelude::*;
/// struct Stdout;
///
/// #[async_trait::async_trait]
/// impl Deliver for Stdout {
///     async fn deliver(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError> {
///         println!("To: {destination}\nSubject: {}\n\n{}", payload.subject, payload.body);
///         Ok(())
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Deliver: Send + Sync {
    /// Deliver `payload` to `destination`.
    ///
    /// Implementations fetching remote attachments must bound each fetch by
    /// [`crate::job::ATTACHMENT_FETCH_TIMEOUT`].
    ///
    /// The returned error is recorded as the job's `last_error`.
    async fn deliver(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError>;
}

const ERROR_TYPE_DELIVERY: &str = "delivery";
const ERROR_TYPE_PANIC: &str = "panic";
const ERROR_TYPE_TIMEOUT: &str = "timeout";

/// Why a delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    /// A short classification of the failure, e.g. `"delivery"`, `"panic"` or `"timeout"`.
    pub error_type: &'static str,
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Display) -> Self {
        Self::with_type(ERROR_TYPE_DELIVERY, message)
    }

    pub fn with_type(error_type: &'static str, message: impl Display) -> Self {
        Self {
            error_type,
            message: message.to_string(),
        }
    }
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for DeliveryError {}

impl From<Box<dyn std::error::Error + Send + Sync>> for DeliveryError {
    fn from(value: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::new(value)
    }
}

impl From<JoinError> for DeliveryError {
    fn from(value: JoinError) -> Self {
        let msg = value.to_string();
        let message = match value.try_into_panic() {
            Ok(panic) => panic
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or(msg),
            Err(_) => msg,
        };
        Self::with_type(ERROR_TYPE_PANIC, message)
    }
}

impl From<Duration> for DeliveryError {
    fn from(value: Duration) -> Self {
        Self::with_type(
            ERROR_TYPE_TIMEOUT,
            format!("Delivery failed to complete within timeout: {value:?}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            DeliveryError::new("connection refused").to_string(),
            "delivery: connection refused"
        );
        assert_eq!(
            DeliveryError::from(Duration::from_secs(1)).to_string(),
            "timeout: Delivery failed to complete within timeout: 1s"
        );
    }

    #[tokio::test]
    async fn from_panicking_task() {
        let join_error = tokio::spawn(async { panic!("smtp exploded") })
            .await
            .unwrap_err();

        let error = DeliveryError::from(join_error);

        assert_eq!(error.error_type, "panic");
        assert_eq!(error.message, "smtp exploded");
    }

    #[test]
    fn from_boxed_error() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = "bad gateway".into();

        let error = DeliveryError::from(boxed);

        assert_eq!(error, DeliveryError::new("bad gateway"));
    }
}
