use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use courier::{
    deliver::{Deliver, DeliveryError},
    job::{Attachment, AttachmentSource, Payload, ATTACHMENT_FETCH_TIMEOUT},
};

/// Resolves each message's attachments and writes the result to the log in place of sending it.
pub struct LogDeliverer {
    client: reqwest::Client,
}

impl LogDeliverer {
    pub fn new() -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(ATTACHMENT_FETCH_TIMEOUT)
            .build()
            .map_err(DeliveryError::new)?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn resolve(&self, attachment: &Attachment) -> Result<Vec<u8>, DeliveryError> {
        match &attachment.source {
            AttachmentSource::Inline { content } => BASE64
                .decode(content)
                .map_err(|error| DeliveryError::with_type("attachment", error)),
            AttachmentSource::Remote { url } => self
                .fetch(url)
                .await
                .map_err(|error| DeliveryError::with_type("attachment", error)),
        }
    }

    /// The attachments which could be resolved, paired with their content.
    ///
    /// An attachment that can not be resolved is left out of the message.
    async fn resolve_attachments<'a>(&self, payload: &'a Payload) -> Vec<(&'a str, Vec<u8>)> {
        let mut resolved = Vec::with_capacity(payload.attachments.len());
        for attachment in &payload.attachments {
            match self.resolve(attachment).await {
                Ok(content) if content.is_empty() => {}
                Ok(content) => resolved.push((attachment.filename.as_str(), content)),
                Err(error) => tracing::error!(
                    filename = %attachment.filename,
                    %error,
                    "Failed to resolve attachment {}, skipping it",
                    attachment.filename,
                ),
            }
        }
        resolved
    }
}

#[async_trait]
impl Deliver for LogDeliverer {
    async fn deliver(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError> {
        let attachments = self.resolve_attachments(payload).await;
        let template = payload.template.as_ref().map(|template| template.id.as_str());
        tracing::info!(
            to = destination,
            subject = %payload.subject,
            template,
            body_length = payload.body.len(),
            attachments = ?attachments
                .iter()
                .map(|(filename, content)| format!("{filename} ({} bytes)", content.len()))
                .collect::<Vec<_>>(),
            "Sending message to {destination}",
        );
        Ok(())
    }
}
