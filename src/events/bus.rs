//! In-process pub/sub over the closed event union.
//!
//! Delivery is best-effort: the publisher awaits each handler in turn, a
//! failing handler is logged and skipped, and an optional per-handler
//! timeout keeps a stalled handler from wedging the bus. Because publishes
//! for a given producer are sequential, a handler observes that producer's
//! events in publication order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use crate::models::{Event, EventKind};

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Identifier used in delivery logs.
    fn name(&self) -> &str {
        "handler"
    }

    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// Adapter so tests and simple wiring can subscribe a closure.
struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(Event) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self.f)(event);
        Ok(())
    }
}

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, Vec<Arc<dyn EventHandler>>>>,
    delivery_timeout: Option<Duration>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each handler invocation; a handler that exceeds the bound is
    /// skipped for that event.
    pub fn with_delivery_timeout(timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            delivery_timeout: Some(timeout),
        }
    }

    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        debug!(?kind, handler = handler.name(), "subscribed");
        self.subscribers.write().entry(kind).or_default().push(handler);
    }

    pub fn subscribe_many(&self, kinds: &[EventKind], handler: Arc<dyn EventHandler>) {
        for kind in kinds {
            self.subscribe(*kind, handler.clone());
        }
    }

    pub fn subscribe_fn(
        &self,
        kind: EventKind,
        name: impl Into<String>,
        f: impl Fn(Event) + Send + Sync + 'static,
    ) {
        self.subscribe(
            kind,
            Arc::new(FnHandler {
                name: name.into(),
                f,
            }),
        );
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .get(&kind)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    /// Deliver `event` to every subscriber of its kind. Handler errors and
    /// timeouts are logged; remaining handlers still receive the event.
    pub async fn publish(&self, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .subscribers
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        debug!(kind = ?event.kind(), handlers = handlers.len(), "publishing event");

        for handler in handlers {
            let delivery = handler.handle(event.clone());
            let outcome = match self.delivery_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, delivery).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(handler = handler.name(), "event delivery timed out, skipping");
                        continue;
                    }
                },
                None => delivery.await,
            };

            if let Err(e) = outcome {
                error!(handler = handler.name(), error = %e, "event handler failed");
            }
        }
    }
}
