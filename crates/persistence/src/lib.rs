//! Persistence layer for the Product aggregate.
//!
//! - [`Repository`]: identity-mapped access to products
//! - [`UnitOfWork`]: atomic commit/rollback around one use case
//! - Backends: [`InMemoryStore`] and [`PostgresStore`], both checking
//!   `version_number` at commit

pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod unit_of_work;

pub use error::{PersistenceError, Result};
pub use memory::{InMemorySession, InMemoryStore};
pub use postgres::{PostgresSession, PostgresStore};
pub use repository::{ProductBackend, Repository, Session, SessionFactory};
pub use unit_of_work::{UnitOfWork, UnitOfWorkState};
