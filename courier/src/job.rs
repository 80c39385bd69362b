//! The unit of work handed between the submitter, the queue and the workers.
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod builder;

use builder::JobBuilder;

/// The maximum time a delivery action may spend fetching a remote attachment.
///
/// Delivery actions that resolve [`AttachmentSource::Remote`] attachments must not wait longer
/// than this for any single fetch, so that one slow dependency cannot stall a worker.
pub const ATTACHMENT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A single pending outbound message together with its retry state.
///
/// A job is owned by exactly one component at a time: the submitter, the queue, a worker or a
/// pending re-push timer. It is moved, never shared, at each hand-off.
///
/// The serialized form (used by broker backed queues) uses camel cased field names, e.g.
/// `retryCount` and `nextRetryAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Where the message is to be delivered, e.g. a recipient address.
    pub destination: String,
    /// What is to be delivered. The dispatcher never interprets this.
    pub payload: Payload,
    /// The number of attempts that have already failed.
    pub retry_count: u32,
    /// The number of attempts allowed beyond the first one.
    pub max_retries: u32,
    /// The job must not be executed before this instant.
    pub next_retry_at: DateTime<Utc>,
    /// When the job was created. Never modified.
    pub created_at: DateTime<Utc>,
    /// The description of the most recent failure, empty until the first failure.
    #[serde(default)]
    pub last_error: String,
}

impl Job {
    /// Start building a job for the given destination.
    ///
    /// # Example
    ///
    /// ```
    /// # use courier::job::Job;
    /// let job = Job::builder("someone@example.com")
    ///     .with_subject("Hello")
    ///     .with_body("<p>Hi there</p>")
    ///     .with_max_retries(5)
    ///     .build();
    ///
    /// assert_eq!(job.retry_count, 0);
    /// assert_eq!(job.max_retries, 5);
    /// assert!(job.last_error.is_empty());
    /// ```
    pub fn builder(destination: impl Into<String>) -> JobBuilder {
        JobBuilder::new(destination)
    }

    /// Whether the job has already been attempted at least once.
    pub fn is_retry(&self) -> bool {
        self.retry_count > 0
    }
}

/// The content of a message as submitted.
///
/// Templates and attachments are descriptors only; resolving them into deliverable content is the
/// business of the delivery action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// A reference to a template and the parameters it should be rendered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    #[serde(flatten)]
    pub source: AttachmentSource,
}

/// Where the bytes of an [`Attachment`] come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentSource {
    /// Base64 encoded content carried with the job.
    Inline { content: String },
    /// Content to be downloaded at delivery time.
    ///
    /// See [`ATTACHMENT_FETCH_TIMEOUT`].
    Remote { url: String },
}

impl Attachment {
    pub fn inline(filename: impl Into<String>, base64_content: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source: AttachmentSource::Inline {
                content: base64_content.into(),
            },
        }
    }

    pub fn remote(filename: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source: AttachmentSource::Remote { url: url.into() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_field_names() {
        let job = Job::builder("to@example.com")
            .with_subject("subject")
            .with_attachment(Attachment::remote("report.pdf", "https://example.com/r.pdf"))
            .build();

        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["destination"], "to@example.com");
        assert_eq!(value["retryCount"], 0);
        assert_eq!(value["maxRetries"], 3);
        assert!(value.get("nextRetryAt").is_some());
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["lastError"], "");
        assert_eq!(value["payload"]["subject"], "subject");
        assert_eq!(
            value["payload"]["attachments"][0]["remote"]["url"],
            "https://example.com/r.pdf"
        );
    }

    #[test]
    fn deserializes_job_without_last_error() {
        let json = r#"{
            "destination": "to@example.com",
            "payload": {"subject": "hi", "body": "there"},
            "retryCount": 1,
            "maxRetries": 3,
            "nextRetryAt": "2024-01-01T00:00:00Z",
            "createdAt": "2024-01-01T00:00:00Z"
        }"#;

        let job: Job = serde_json::from_str(json).unwrap();

        assert_eq!(job.retry_count, 1);
        assert!(job.is_retry());
        assert!(job.last_error.is_empty());
        assert!(job.payload.attachments.is_empty());
        assert_eq!(job.payload.template, None);
    }

    #[test]
    fn attachment_sources() {
        let inline = Attachment::inline("a.txt", "aGVsbG8=");
        let remote = Attachment::remote("b.txt", "https://example.com/b.txt");

        assert_eq!(
            inline.source,
            AttachmentSource::Inline {
                content: "aGVsbG8=".to_owned()
            }
        );
        assert_eq!(
            remote.source,
            AttachmentSource::Remote {
                url: "https://example.com/b.txt".to_owned()
            }
        );
    }
}
