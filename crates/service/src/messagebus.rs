//! Message bus delivering domain events to registered handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{DomainEvent, ProductEvent};

use crate::error::HandlerError;
use crate::handlers::OutOfStockNotification;
use crate::notifications::Notifier;

/// Reacts to one kind of domain event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the handler name, used in logs and reports.
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &ProductEvent) -> Result<(), HandlerError>;
}

/// A handler that failed while processing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub event_type: &'static str,
    pub handler: &'static str,
    pub error: String,
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Number of handler invocations that succeeded.
    pub handled: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    /// Returns true if every handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: DispatchReport) {
        self.handled += other.handled;
        self.failures.extend(other.failures);
    }
}

/// Builds a [`MessageBus`]. Handlers run in registration order.
#[derive(Default)]
pub struct MessageBusBuilder {
    handlers: HashMap<&'static str, Vec<Box<dyn EventHandler>>>,
}

impl MessageBusBuilder {
    /// Registers `handler` for events whose type name is `event_type`.
    pub fn register(
        mut self,
        event_type: &'static str,
        handler: impl EventHandler + 'static,
    ) -> Self {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(Box::new(handler));
        self
    }

    pub fn build(self) -> MessageBus {
        MessageBus {
            handlers: self.handlers,
        }
    }
}

/// Dispatches domain events to the handlers registered for their type.
///
/// The registry is fixed once built. Handler failures are logged, counted,
/// and reported back; they never abort the dispatch.
pub struct MessageBus {
    handlers: HashMap<&'static str, Vec<Box<dyn EventHandler>>>,
}

impl MessageBus {
    pub fn builder() -> MessageBusBuilder {
        MessageBusBuilder::default()
    }

    /// The standard wiring: out-of-stock events notify the stock team.
    pub fn with_default_handlers(notifier: Arc<dyn Notifier>) -> Self {
        Self::builder()
            .register("OutOfStock", OutOfStockNotification::new(notifier))
            .build()
    }

    /// Returns the number of handlers registered for an event type.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Delivers one event to each of its handlers in turn.
    #[tracing::instrument(skip(self, event), fields(event_type = event.event_type()))]
    pub async fn handle(&self, event: &ProductEvent) -> DispatchReport {
        let event_type = event.event_type();
        let mut report = DispatchReport::default();

        let Some(handlers) = self.handlers.get(event_type) else {
            tracing::debug!("no handlers registered");
            return report;
        };

        for handler in handlers {
            match handler.handle(event).await {
                Ok(()) => {
                    report.handled += 1;
                    metrics::counter!("messagebus_events_handled_total", "event_type" => event_type)
                        .increment(1);
                }
                Err(e) => {
                    tracing::warn!(handler = handler.name(), error = %e, "event handler failed");
                    metrics::counter!("messagebus_handler_failures_total", "event_type" => event_type)
                        .increment(1);
                    report.failures.push(HandlerFailure {
                        event_type,
                        handler: handler.name(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }

    /// Delivers events in order.
    pub async fn handle_all(&self, events: &[ProductEvent]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for event in events {
            report.merge(self.handle(event).await);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotificationError;
    use common::Sku;
    use std::sync::Mutex;

    /// Handler that appends its tag to a shared log.
    struct Recording {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recording {
        fn name(&self) -> &'static str {
            self.tag
        }

        async fn handle(&self, event: &ProductEvent) -> Result<(), HandlerError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.tag, event.sku()));
            if self.fail {
                return Err(NotificationError::SendFailed {
                    recipient: "nobody".to_string(),
                    reason: "boom".to_string(),
                }
                .into());
            }
            Ok(())
        }
    }

    fn recording(tag: &'static str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Recording {
        Recording {
            tag,
            log: Arc::clone(log),
            fail,
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = MessageBus::builder()
            .register("OutOfStock", recording("first", &log, false))
            .register("OutOfStock", recording("second", &log, false))
            .build();

        let report = bus
            .handle(&ProductEvent::out_of_stock(Sku::new("LAMP")))
            .await;

        assert!(report.is_clean());
        assert_eq!(report.handled, 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:LAMP", "second:LAMP"]);
    }

    #[tokio::test]
    async fn failures_are_reported_and_do_not_stop_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = MessageBus::builder()
            .register("OutOfStock", recording("broken", &log, true))
            .register("OutOfStock", recording("healthy", &log, false))
            .build();

        let report = bus
            .handle(&ProductEvent::out_of_stock(Sku::new("RUG")))
            .await;

        assert_eq!(report.handled, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].handler, "broken");
        assert_eq!(report.failures[0].event_type, "OutOfStock");
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn events_without_handlers_are_ignored() {
        let bus = MessageBus::builder().build();

        let report = bus
            .handle(&ProductEvent::out_of_stock(Sku::new("MUG")))
            .await;

        assert_eq!(report, DispatchReport::default());
        assert_eq!(bus.handler_count("OutOfStock"), 0);
    }

    #[tokio::test]
    async fn handle_all_preserves_event_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bus = MessageBus::builder()
            .register("OutOfStock", recording("h", &log, false))
            .build();
        let events = vec![
            ProductEvent::out_of_stock(Sku::new("A")),
            ProductEvent::out_of_stock(Sku::new("B")),
        ];

        let report = bus.handle_all(&events).await;

        assert_eq!(report.handled, 2);
        assert_eq!(*log.lock().unwrap(), vec!["h:A", "h:B"]);
    }
}
