//! Service layer for stock allocation.
//!
//! Each use case validates its command, runs in its own unit of work, and
//! hands the events it raised to the [`MessageBus`] once the unit of work has
//! closed.

pub mod commands;
pub mod error;
pub mod handlers;
pub mod messagebus;
pub mod notifications;
pub mod services;

pub use commands::{AddBatch, Allocate, Deallocate};
pub use error::{HandlerError, NotificationError, Result, ServiceError};
pub use handlers::{OutOfStockNotification, STOCK_TEAM_ADDRESS};
pub use messagebus::{DispatchReport, EventHandler, HandlerFailure, MessageBus, MessageBusBuilder};
pub use notifications::{InMemoryNotifier, LogNotifier, Notification, Notifier};
pub use services::{AllocationService, AllocationView};
