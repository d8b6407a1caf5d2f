//! Domain event publication over NATS

use std::sync::{Arc, Mutex};

use crate::domain::events::DomainEvent;

/// Publishes domain events after the fact. Publication failures are logged and
/// never fail the operation that produced the event.
#[derive(Clone, Default)]
pub struct EventPublisher {
    nats: Option<async_nats::Client>,
    /// Set only by tests
    recorded: Option<Arc<Mutex<Vec<DomainEvent>>>>,
}

impl EventPublisher {
    pub fn new(nats: Option<async_nats::Client>) -> Self {
        Self { nats, recorded: None }
    }

    /// Log-only publisher, used when no bus is configured.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Keeps every published event in memory for assertions.
    #[cfg(test)]
    pub(crate) fn recording() -> (Self, Arc<Mutex<Vec<DomainEvent>>>) {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        (Self { nats: None, recorded: Some(recorded.clone()) }, recorded)
    }

    pub async fn publish(&self, event: DomainEvent) {
        let subject = event.subject();
        if let Some(recorded) = &self.recorded {
            if let Ok(mut events) = recorded.lock() {
                events.push(event.clone());
            }
        }
        let Some(client) = &self.nats else {
            tracing::debug!(subject, ?event, "event bus disabled, event not published");
            return;
        };
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(subject, error = %e, "failed to encode domain event");
                return;
            }
        };
        if let Err(e) = client.publish(subject.to_string(), payload.into()).await {
            tracing::warn!(subject, error = %e, "failed to publish domain event");
        }
    }
}
