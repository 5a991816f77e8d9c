//! Value objects for the allocation domain.

use common::{OrderId, Sku};
use serde::{Deserialize, Serialize};

/// A request to allocate a quantity of one SKU for a customer order.
///
/// Order lines are values: two lines with the same order id, SKU and quantity
/// are the same line. That is what makes allocating a line twice a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderLine {
    orderid: OrderId,
    sku: Sku,
    qty: u32,
}

impl OrderLine {
    /// Creates a new order line.
    ///
    /// Quantities are validated by the caller; the domain accepts any value.
    pub fn new(orderid: impl Into<OrderId>, sku: impl Into<Sku>, qty: u32) -> Self {
        Self {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        }
    }

    /// Returns the order this line belongs to.
    pub fn orderid(&self) -> &OrderId {
        &self.orderid
    }

    /// Returns the requested SKU.
    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    /// Returns the requested quantity.
    pub fn qty(&self) -> u32 {
        self.qty
    }
}
