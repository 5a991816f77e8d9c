use common::{BatchRef, Sku, Version};
use thiserror::Error;

use crate::UnitOfWorkState;

/// Errors that can occur when loading or storing products.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Another unit of work committed a newer version of the product first.
    #[error(
        "Concurrency conflict for product {sku}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        sku: Sku,
        expected: Version,
        actual: Version,
    },

    /// A new batch reuses a reference that is already stored, either under
    /// another SKU or by a unit of work that committed first.
    #[error("Batch reference {reference} is already taken by sku {owner}")]
    BatchReferenceTaken { reference: BatchRef, owner: Sku },

    /// The product was already added or loaded in this unit of work.
    #[error("Product already tracked in this unit of work: {0}")]
    DuplicateProduct(Sku),

    /// The product was handed to the session without being added or loaded
    /// through it.
    #[error("Product was never added or loaded through this session: {0}")]
    UntrackedProduct(Sku),

    /// The unit of work was used out of order.
    #[error("Unit of work is {actual}, expected {expected}")]
    InvalidState {
        expected: UnitOfWorkState,
        actual: UnitOfWorkState,
    },

    /// The session already committed or rolled back.
    #[error("Session is closed")]
    SessionClosed,

    /// A stored row could not be mapped back onto the domain model.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl PersistenceError {
    /// Returns true if retrying the whole unit of work may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
