use chrono::{DateTime, TimeDelta, Utc};

use super::{Attachment, Job, Payload, Template};

/// Builder for constructing a [`Job`].
///
/// Created via [`Job::builder`]. Unless configured otherwise the job allows
/// [`JobBuilder::DEFAULT_MAX_RETRIES`] retries and is ready for execution immediately.
pub struct JobBuilder {
    destination: String,
    payload: Payload,
    max_retries: u32,
    scheduled_at: Option<DateTime<Utc>>,
}

impl JobBuilder {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub(crate) fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            payload: Default::default(),
            max_retries: Self::DEFAULT_MAX_RETRIES,
            scheduled_at: None,
        }
    }

    pub fn with_subject(self, subject: impl Into<String>) -> Self {
        Self {
            payload: Payload {
                subject: subject.into(),
                ..self.payload
            },
            ..self
        }
    }

    pub fn with_body(self, body: impl Into<String>) -> Self {
        Self {
            payload: Payload {
                body: body.into(),
                ..self.payload
            },
            ..self
        }
    }

    pub fn with_template(self, id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            payload: Payload {
                template: Some(Template {
                    id: id.into(),
                    data,
                }),
                ..self.payload
            },
            ..self
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.payload.attachments.push(attachment);
        self
    }

    /// Replace the whole payload, e.g. one shared between several recipients.
    pub fn with_payload(self, payload: Payload) -> Self {
        Self { payload, ..self }
    }

    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self {
            max_retries,
            ..self
        }
    }

    /// Do not execute the job before `schedule_at`.
    pub fn schedule_at(self, schedule_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_at: Some(schedule_at),
            ..self
        }
    }

    pub fn schedule_in(self, schedule_in: TimeDelta) -> Self {
        Self {
            scheduled_at: Some(Utc::now() + schedule_in),
            ..self
        }
    }

    pub fn build(self) -> Job {
        let now = Utc::now();
        Job {
            destination: self.destination,
            payload: self.payload,
            retry_count: 0,
            max_retries: self.max_retries,
            next_retry_at: self.scheduled_at.unwrap_or(now),
            created_at: now,
            last_error: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build() {
        let before = Utc::now();

        let job = Job::builder("to@example.com")
            .with_subject("Welcome")
            .with_template("welcome.html", serde_json::json!({"name": "Ada"}))
            .with_attachment(Attachment::inline("a.txt", "aGVsbG8="))
            .with_max_retries(1)
            .build();

        assert_eq!(job.destination, "to@example.com");
        assert_eq!(job.payload.subject, "Welcome");
        assert_eq!(job.payload.template.unwrap().id, "welcome.html");
        assert_eq!(job.payload.attachments.len(), 1);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, 1);
        assert!(job.created_at >= before);
        assert_eq!(job.next_retry_at, job.created_at);
    }

    #[test]
    fn schedule_in() {
        let job = Job::builder("to@example.com")
            .schedule_in(TimeDelta::minutes(5))
            .build();

        assert!(job.next_retry_at > job.created_at + TimeDelta::minutes(4));
    }

    #[test]
    fn with_payload_keeps_other_settings() {
        let payload = Payload {
            subject: "shared".to_owned(),
            ..Default::default()
        };

        let job = Job::builder("to@example.com")
            .with_max_retries(0)
            .with_payload(payload.clone())
            .build();

        assert_eq!(job.payload, payload);
        assert_eq!(job.max_retries, 0);
    }
}
