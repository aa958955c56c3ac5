// Queue boundary: certificate requests arrive as JSON messages and are acknowledged
// only after the whole event has been processed.

pub mod consumer;
pub mod redis_queue;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

pub use self::consumer::{ConsumerSettings, QueueConsumer};
pub use self::redis_queue::RedisQueue;

/// A received message. `receipt_handle` acknowledges or releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt_handle: String,
}

/// Body of a certificate generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRequest {
    pub event_id: String,
    /// Also zip all PDFs of the event into one archive.
    #[serde(default)]
    pub bundle: bool,
}

impl CertificateRequest {
    pub fn parse(body: &str) -> Result<Self> {
        let request: CertificateRequest = serde_json::from_str(body)
            .map_err(|e| AppError::Validation(format!("Malformed certificate request: {e}")))?;
        if request.event_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Certificate request has an empty eventId".to_string(),
            ));
        }
        Ok(request)
    }
}

/// At-least-once message queue.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn send(&self, body: &str) -> Result<()>;

    /// Waits up to `wait` for the first message, then takes up to `max_messages` without
    /// waiting. Received messages stay invisible until deleted or released.
    async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>>;

    /// Acknowledges a processed message.
    async fn delete(&self, receipt_handle: &str) -> Result<()>;

    /// Makes a received message visible again for redelivery.
    async fn release(&self, receipt_handle: &str) -> Result<()>;

    /// Requeues messages received by a previous, crashed consumer. Returns how many.
    async fn recover_in_flight(&self) -> Result<usize>;
}
