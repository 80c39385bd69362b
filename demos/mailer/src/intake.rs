//! Turns send requests into jobs, one per recipient.
use courier::{
    deliver::Deliver,
    job::{Attachment, Payload, Template},
    queue::{Queue, QueueError},
    Dispatcher,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SendRequest {
    pub subject: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_data: serde_json::Value,
    #[serde(default)]
    pub attachments: Vec<AttachmentRequest>,
}

/// An attachment as submitted, either downloaded from `url` or decoded from base64 `content`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachmentRequest {
    pub filename: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl AttachmentRequest {
    fn into_attachment(self) -> Option<Attachment> {
        match (self.url, self.content) {
            (Some(url), _) if !url.is_empty() => Some(Attachment::remote(self.filename, url)),
            (_, Some(content)) if !content.is_empty() => {
                Some(Attachment::inline(self.filename, content))
            }
            _ => None,
        }
    }
}

impl SendRequest {
    fn payload(self) -> Payload {
        let template = self.template_id.map(|id| Template {
            id,
            data: self.template_data,
        });
        let attachments = self
            .attachments
            .into_iter()
            .filter_map(AttachmentRequest::into_attachment)
            .collect();
        Payload {
            subject: self.subject,
            body: self.body,
            template,
            attachments,
        }
    }
}

/// The outcome of queueing a request for all its recipients.
#[derive(Debug, Default)]
pub struct Queued {
    pub submitted: usize,
    pub failed: Vec<(String, QueueError)>,
}

/// Submit one job per recipient of `request`.
///
/// A recipient whose job can not be submitted does not prevent the others from being queued.
pub async fn queue_jobs<Q, D>(dispatcher: &Dispatcher<Q, D>, mut request: SendRequest) -> Queued
where
    Q: Queue + 'static,
    D: Deliver + 'static,
{
    let recipients = std::mem::take(&mut request.recipients);
    let payload = request.payload();
    let mut queued = Queued::default();

    for recipient in recipients {
        let job = dispatcher
            .retry_policy()
            .job_builder(recipient.clone())
            .with_payload(payload.clone())
            .build();
        match dispatcher.submit(job).await {
            Ok(()) => queued.submitted += 1,
            Err(error) => {
                tracing::error!(%recipient, %error, "Failed to queue job for {recipient}");
                queued.failed.push((recipient, error));
            }
        }
    }
    queued
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use courier::{deliver::DeliveryError, job::AttachmentSource, queue::memory::MemoryQueue};

    use super::*;

    struct Discard;

    #[async_trait]
    impl Deliver for Discard {
        async fn deliver(&self, _: &str, _: &Payload) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn request(recipients: &[&str]) -> SendRequest {
        serde_json::from_value(serde_json::json!({
            "subject": "Welcome",
            "recipients": recipients,
            "template_id": "welcome.html",
            "template_data": {"name": "Ada"},
            "attachments": [
                {"filename": "a.txt", "content": "aGVsbG8="},
                {"filename": "b.pdf", "url": "https://example.com/b.pdf", "content": "ignored"},
                {"filename": "empty.txt"},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn payload_from_request() {
        let payload = request(&["a@example.com"]).payload();

        assert_eq!(payload.subject, "Welcome");
        let template = payload.template.unwrap();
        assert_eq!(template.id, "welcome.html");
        assert_eq!(template.data, serde_json::json!({"name": "Ada"}));
        assert_eq!(payload.attachments.len(), 2);
        assert_eq!(
            payload.attachments[1].source,
            AttachmentSource::Remote {
                url: "https://example.com/b.pdf".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn one_job_per_recipient() {
        let dispatcher = Dispatcher::new(MemoryQueue::new(10), Discard);

        let queued = queue_jobs(&dispatcher, request(&["a@example.com", "b@example.com"])).await;

        assert_eq!(queued.submitted, 2);
        assert!(queued.failed.is_empty());
        assert_eq!(dispatcher.size().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn collects_failures_per_recipient() {
        let dispatcher = Dispatcher::new(MemoryQueue::new(1), Discard);

        let queued = queue_jobs(&dispatcher, request(&["a@example.com", "b@example.com"])).await;

        assert_eq!(queued.submitted, 1);
        assert_eq!(queued.failed.len(), 1);
        assert_eq!(queued.failed[0].0, "b@example.com");
        assert!(matches!(queued.failed[0].1, QueueError::Full { capacity: 1 }));
    }
}
