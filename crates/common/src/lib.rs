//! Shared identifier types for the allocation service.

mod types;

pub use types::{BatchRef, OrderId, Sku, Version};
