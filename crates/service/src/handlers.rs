//! Event handlers.

use std::sync::Arc;

use async_trait::async_trait;
use domain::ProductEvent;

use crate::error::HandlerError;
use crate::messagebus::EventHandler;
use crate::notifications::Notifier;

/// Mailbox of the team that restocks products.
pub const STOCK_TEAM_ADDRESS: &str = "stock@made.com";

/// Tells the stock team when a SKU can no longer be allocated.
pub struct OutOfStockNotification {
    notifier: Arc<dyn Notifier>,
}

impl OutOfStockNotification {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler for OutOfStockNotification {
    fn name(&self) -> &'static str {
        "send_out_of_stock_notification"
    }

    async fn handle(&self, event: &ProductEvent) -> Result<(), HandlerError> {
        match event {
            ProductEvent::OutOfStock(data) => {
                let subject = format!("Out of stock for {}", data.sku);
                self.notifier.send(STOCK_TEAM_ADDRESS, &subject).await?;
            }
        }
        Ok(())
    }
}
