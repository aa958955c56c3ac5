use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::certificates::{CertificateService, GenerationReport};
use crate::errors::Result;
use crate::queue::{CertificateRequest, MessageQueue, QueueMessage};

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Work performed for one decoded request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &CertificateRequest) -> Result<GenerationReport>;
}

#[async_trait]
impl RequestHandler for CertificateService {
    async fn handle(&self, request: &CertificateRequest) -> Result<GenerationReport> {
        self.generate_for_event(&request.event_id, request.bundle).await
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub wait: Duration,
    /// Upper bound on processing one message; past it the message is released.
    pub message_timeout: Duration,
    /// Pause before the next poll when a batch released anything, so a failing
    /// dependency is not hammered by the same message.
    pub retry_backoff: Duration,
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Processed and deleted.
    Completed(GenerationReport),
    /// Deleted without processing success; redelivery cannot help.
    Rejected(String),
    /// Left for redelivery.
    Released(String),
}

/// Sequential consumer: one message at a time, acknowledged only after processing.
pub struct QueueConsumer {
    queue: Arc<dyn MessageQueue>,
    handler: Arc<dyn RequestHandler>,
    settings: ConsumerSettings,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        handler: Arc<dyn RequestHandler>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            handler,
            settings,
        }
    }

    /// Polls until `shutdown` resolves. A batch already received is finished first.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let recovered = self.queue.recover_in_flight().await?;
        info!(
            "Queue consumer started (batch {}, timeout {:?}, {recovered} recovered)",
            self.settings.batch_size, self.settings.message_timeout
        );

        tokio::pin!(shutdown);
        loop {
            let batch = tokio::select! {
                _ = &mut shutdown => {
                    info!("Queue consumer stopping");
                    return Ok(());
                }
                batch = self.queue.receive(self.settings.batch_size, self.settings.wait) => batch,
            };

            let pause = match batch {
                Ok(messages) => {
                    let mut released = 0;
                    for message in messages {
                        if let MessageOutcome::Released(_) = self.process(message).await {
                            released += 1;
                        }
                    }
                    if released == 0 {
                        continue;
                    }
                    warn!(
                        "{released} message(s) released, next poll in {:?}",
                        self.settings.retry_backoff
                    );
                    self.settings.retry_backoff
                }
                Err(e) => {
                    error!("Failed to receive messages: {e}");
                    POLL_ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Queue consumer stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    /// Receives one batch and processes it. Returns the outcome per message.
    pub async fn poll_once(&self) -> Result<Vec<MessageOutcome>> {
        let messages = self
            .queue
            .receive(self.settings.batch_size, self.settings.wait)
            .await?;
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in messages {
            outcomes.push(self.process(message).await);
        }
        Ok(outcomes)
    }

    async fn process(&self, message: QueueMessage) -> MessageOutcome {
        let outcome = self.evaluate(&message).await;

        let ack = match &outcome {
            MessageOutcome::Completed(_) | MessageOutcome::Rejected(_) => {
                self.queue.delete(&message.receipt_handle).await
            }
            MessageOutcome::Released(_) => self.queue.release(&message.receipt_handle).await,
        };
        if let Err(e) = ack {
            // The message stays in flight and comes back on the next recovery.
            error!("Failed to settle queue message: {e}");
        }
        outcome
    }

    async fn evaluate(&self, message: &QueueMessage) -> MessageOutcome {
        let request = match CertificateRequest::parse(&message.body) {
            Ok(request) => request,
            Err(e) => {
                error!("Dropping unprocessable message: {e}");
                return MessageOutcome::Rejected(e.to_string());
            }
        };

        let event_id = request.event_id.clone();
        match tokio::time::timeout(self.settings.message_timeout, self.handler.handle(&request)).await {
            Ok(Ok(report)) => {
                info!("[Event={event_id}] Certificate request processed");
                MessageOutcome::Completed(report)
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!("[Event={event_id}] Certificate request failed, leaving for redelivery: {e}");
                MessageOutcome::Released(e.to_string())
            }
            Ok(Err(e)) => {
                error!("[Event={event_id}] Certificate request rejected: {e}");
                MessageOutcome::Rejected(e.to_string())
            }
            Err(_) => {
                warn!(
                    "[Event={event_id}] Certificate request exceeded {:?}, leaving for redelivery",
                    self.settings.message_timeout
                );
                MessageOutcome::Released(format!(
                    "timed out after {:?}",
                    self.settings.message_timeout
                ))
            }
        }
    }
}
