//! Commands accepted by the allocation service.
//!
//! Commands carry caller input as received; the service validates them before
//! any unit of work starts.

use chrono::NaiveDate;
use common::{BatchRef, OrderId, Sku};
use domain::OrderLine;

use crate::error::{Result, ServiceError};

/// Command to register a newly received batch of stock.
#[derive(Debug, Clone)]
pub struct AddBatch {
    pub reference: BatchRef,
    pub sku: Sku,
    pub qty: i64,

    /// Expected arrival. `None` means the stock is already in the warehouse.
    pub eta: Option<NaiveDate>,
}

impl AddBatch {
    pub fn new(
        reference: impl Into<BatchRef>,
        sku: impl Into<Sku>,
        qty: i64,
        eta: Option<NaiveDate>,
    ) -> Self {
        Self {
            reference: reference.into(),
            sku: sku.into(),
            qty,
            eta,
        }
    }

    /// Returns the purchased quantity once checked.
    pub(crate) fn validate(&self) -> Result<u32> {
        if self.reference.is_blank() {
            return Err(empty("ref"));
        }
        if self.sku.is_blank() {
            return Err(empty("sku"));
        }
        u32::try_from(self.qty).map_err(|_| {
            ServiceError::Validation(format!(
                "qty must be between 0 and {}, got {}",
                u32::MAX,
                self.qty
            ))
        })
    }
}

/// Command to allocate an order line to stock.
#[derive(Debug, Clone)]
pub struct Allocate {
    pub orderid: OrderId,
    pub sku: Sku,
    pub qty: i64,
}

impl Allocate {
    pub fn new(orderid: impl Into<OrderId>, sku: impl Into<Sku>, qty: i64) -> Self {
        Self {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        }
    }

    pub(crate) fn order_line(&self) -> Result<OrderLine> {
        order_line(&self.orderid, &self.sku, self.qty)
    }
}

/// Command to release a previously allocated order line.
#[derive(Debug, Clone)]
pub struct Deallocate {
    pub orderid: OrderId,
    pub sku: Sku,
    pub qty: i64,
}

impl Deallocate {
    pub fn new(orderid: impl Into<OrderId>, sku: impl Into<Sku>, qty: i64) -> Self {
        Self {
            orderid: orderid.into(),
            sku: sku.into(),
            qty,
        }
    }

    pub(crate) fn order_line(&self) -> Result<OrderLine> {
        order_line(&self.orderid, &self.sku, self.qty)
    }
}

fn empty(field: &str) -> ServiceError {
    ServiceError::Validation(format!("{field} must not be empty"))
}

fn order_line(orderid: &OrderId, sku: &Sku, qty: i64) -> Result<OrderLine> {
    if orderid.is_blank() {
        return Err(empty("orderid"));
    }
    if sku.is_blank() {
        return Err(empty("sku"));
    }
    let qty = u32::try_from(qty)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| ServiceError::Validation(format!("qty must be positive, got {qty}")))?;
    Ok(OrderLine::new(orderid.clone(), sku.clone(), qty))
}
