//! Service error types.

use common::{OrderId, Sku, Version};
use domain::ProductError;
use persistence::PersistenceError;
use thiserror::Error;

/// Errors returned by the allocation use cases.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input, rejected before any unit of work starts.
    #[error("{0}")]
    Validation(String),

    /// No product exists for the SKU.
    #[error("Invalid sku {0}")]
    UnknownSku(Sku),

    /// The SKU exists but no batch can take the line.
    #[error("Out of stock for sku {0}")]
    OutOfStock(Sku),

    /// The order line is not allocated to any batch.
    #[error("Order line {orderid} for sku {sku} is not allocated")]
    NotAllocated { orderid: OrderId, sku: Sku },

    /// Another request changed the product first. Retrying may succeed.
    #[error(
        "Concurrency conflict for product {sku}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        sku: Sku,
        expected: Version,
        actual: Version,
    },

    /// Domain rule violation.
    #[error("Domain error: {0}")]
    Domain(ProductError),

    /// Storage failure.
    #[error("Persistence error: {0}")]
    Persistence(PersistenceError),
}

impl ServiceError {
    /// Returns true if the caller may retry the request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Short label used for the failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UnknownSku(_) => "unknown_sku",
            Self::OutOfStock(_) => "out_of_stock",
            Self::NotAllocated { .. } => "not_allocated",
            Self::ConcurrencyConflict { .. } => "conflict",
            Self::Domain(_) => "domain",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<ProductError> for ServiceError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::OutOfStock { sku } => ServiceError::OutOfStock(sku),
            other => ServiceError::Domain(other),
        }
    }
}

impl From<PersistenceError> for ServiceError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::ConcurrencyConflict {
                sku,
                expected,
                actual,
            } => ServiceError::ConcurrencyConflict {
                sku,
                expected,
                actual,
            },
            PersistenceError::BatchReferenceTaken { reference, .. } => {
                ServiceError::Domain(ProductError::DuplicateBatch { reference })
            }
            other => ServiceError::Persistence(other),
        }
    }
}

/// Failure of the notification sink.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Failed to notify {recipient}: {reason}")]
    SendFailed { recipient: String, reason: String },
}

/// Failure of a message bus handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::BatchRef;

    #[test]
    fn unknown_sku_message() {
        let err = ServiceError::UnknownSku(Sku::new("NONEXISTENTSKU"));
        assert_eq!(err.to_string(), "Invalid sku NONEXISTENTSKU");
        assert_eq!(err.reason(), "unknown_sku");
    }

    #[test]
    fn out_of_stock_maps_from_domain() {
        let err: ServiceError = ProductError::OutOfStock {
            sku: Sku::new("FORK"),
        }
        .into();
        assert!(matches!(err, ServiceError::OutOfStock(ref sku) if sku.as_str() == "FORK"));
        assert_eq!(err.to_string(), "Out of stock for sku FORK");
    }

    #[test]
    fn other_domain_errors_are_wrapped() {
        let err: ServiceError = ProductError::SkuMismatch {
            product: Sku::new("A"),
            line: Sku::new("B"),
        }
        .into();
        assert_eq!(err.reason(), "domain");
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflicts_are_retryable() {
        let err: ServiceError = PersistenceError::ConcurrencyConflict {
            sku: Sku::new("LAMP"),
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "conflict");
    }

    #[test]
    fn taken_batch_reference_is_a_duplicate_batch() {
        let err: ServiceError = PersistenceError::BatchReferenceTaken {
            reference: BatchRef::new("b1"),
            owner: Sku::new("LAMP"),
        }
        .into();
        assert!(matches!(
            err,
            ServiceError::Domain(ProductError::DuplicateBatch { ref reference })
                if reference.as_str() == "b1"
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_persistence_errors_are_not_retryable() {
        let err: ServiceError = PersistenceError::SessionClosed.into();
        assert!(matches!(err, ServiceError::Persistence(_)));
        assert!(!err.is_retryable());
    }
}
