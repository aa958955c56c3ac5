use std::sync::Arc;

use crate::models::{Event, Registration};
use crate::queue::MessageQueue;
use crate::records::RecordStore;
use crate::storage::ObjectStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub events: RecordStore<Event>,
    /// Producer side of the certificate queue.
    pub queue: Arc<dyn MessageQueue>,
    /// Hands out presigned URLs for templates and certificates.
    pub objects: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn registrations(&self, event_id: &str) -> RecordStore<Registration> {
        self.events.rescoped(event_id)
    }
}
