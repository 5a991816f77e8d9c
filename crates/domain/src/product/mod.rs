//! Product aggregate and related types.

mod aggregate;
mod batch;
mod events;
mod value_objects;

pub use aggregate::Product;
pub use batch::Batch;
pub use events::{OutOfStockData, ProductEvent};
pub use value_objects::OrderLine;

use common::{BatchRef, Sku};
use thiserror::Error;

/// Reasons a product command can be refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    /// No batch of the SKU can take the line.
    #[error("Out of stock for sku {sku}")]
    OutOfStock { sku: Sku },

    /// The order line is for a different SKU than the product.
    #[error("Order line for sku {line} cannot be allocated against product {product}")]
    SkuMismatch { product: Sku, line: Sku },

    /// The batch is for a different SKU than the product.
    #[error("Batch {reference} has sku {batch}, expected {product}")]
    BatchSkuMismatch {
        reference: BatchRef,
        product: Sku,
        batch: Sku,
    },

    /// A batch with this reference is already registered.
    #[error("Batch already exists: {reference}")]
    DuplicateBatch { reference: BatchRef },
}
