//! Product domain events.

use common::Sku;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events raised by the product aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProductEvent {
    /// An order line could not be allocated to any batch of the SKU.
    OutOfStock(OutOfStockData),
}

impl ProductEvent {
    pub fn out_of_stock(sku: Sku) -> Self {
        ProductEvent::OutOfStock(OutOfStockData { sku })
    }

    /// Returns the SKU the event is about.
    pub fn sku(&self) -> &Sku {
        match self {
            ProductEvent::OutOfStock(data) => &data.sku,
        }
    }
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::OutOfStock(_) => "OutOfStock",
        }
    }
}

/// Data for OutOfStock event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutOfStockData {
    /// The SKU that ran out of allocatable stock.
    pub sku: Sku,
}
