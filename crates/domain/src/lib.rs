//! Domain layer for the allocation service.
//!
//! This crate is pure business logic with no I/O:
//! - Aggregate and DomainEvent traits
//! - `OrderLine` value object and `Batch` entity
//! - `Product` aggregate owning the allocation algorithm

pub mod aggregate;
pub mod product;

pub use aggregate::{Aggregate, DomainEvent};
pub use product::{Batch, OrderLine, OutOfStockData, Product, ProductError, ProductEvent};
