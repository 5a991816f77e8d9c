//! Product aggregate implementation.

use common::{BatchRef, Sku, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

use super::{Batch, OrderLine, ProductError, ProductEvent};

/// Product aggregate root.
///
/// Owns every batch of one SKU and is the only way to allocate against them.
/// `version_number` is the optimistic-concurrency token checked at commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    /// Natural key.
    sku: Sku,

    /// Batches in registration order.
    batches: Vec<Batch>,

    /// Current version for optimistic concurrency.
    #[serde(default)]
    version_number: Version,

    /// Events raised since the last drain. Never persisted.
    #[serde(skip)]
    events: Vec<ProductEvent>,
}

impl Aggregate for Product {
    type Id = Sku;
    type Event = ProductEvent;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn id(&self) -> &Sku {
        &self.sku
    }

    fn version(&self) -> Version {
        self.version_number
    }

    fn take_events(&mut self) -> Vec<ProductEvent> {
        std::mem::take(&mut self.events)
    }
}

impl Product {
    /// Creates a product at the initial version.
    pub fn new(sku: impl Into<Sku>, batches: Vec<Batch>) -> Self {
        Self::with_version(sku, batches, Version::initial())
    }

    /// Rebuilds a product from stored state.
    pub fn with_version(sku: impl Into<Sku>, batches: Vec<Batch>, version_number: Version) -> Self {
        Self {
            sku: sku.into(),
            batches,
            version_number,
            events: Vec::new(),
        }
    }
}

// Query methods
impl Product {
    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn version_number(&self) -> Version {
        self.version_number
    }

    /// Returns the batches in registration order.
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Returns a batch by reference.
    pub fn batch(&self, reference: &BatchRef) -> Option<&Batch> {
        self.batches.iter().find(|b| b.reference() == reference)
    }

    /// Total quantity still free across all batches.
    pub fn available_quantity(&self) -> u64 {
        self.batches
            .iter()
            .map(|b| u64::from(b.available_quantity()))
            .sum()
    }

    /// Returns the events raised but not yet drained.
    pub fn pending_events(&self) -> &[ProductEvent] {
        &self.events
    }
}

// Command methods
impl Product {
    /// Registers a newly received batch of this SKU.
    pub fn add_batch(&mut self, batch: Batch) -> Result<(), ProductError> {
        if *batch.sku() != self.sku {
            return Err(ProductError::BatchSkuMismatch {
                reference: batch.reference().clone(),
                product: self.sku.clone(),
                batch: batch.sku().clone(),
            });
        }

        if self.batch(batch.reference()).is_some() {
            return Err(ProductError::DuplicateBatch {
                reference: batch.reference().clone(),
            });
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Allocates `line` to the preferred batch that can take it.
    ///
    /// Warehouse stock is used before shipments, and earlier shipments before
    /// later ones. Batches that tie keep their registration order. On success
    /// the version moves forward by one; when nothing fits the product is left
    /// untouched apart from an `OutOfStock` event.
    ///
    /// A line that is already allocated returns its batch without changes.
    pub fn allocate(&mut self, line: &OrderLine) -> Result<BatchRef, ProductError> {
        if *line.sku() != self.sku {
            return Err(ProductError::SkuMismatch {
                product: self.sku.clone(),
                line: line.sku().clone(),
            });
        }

        if let Some(batch) = self.batches.iter().find(|b| b.is_allocated(line)) {
            return Ok(batch.reference().clone());
        }

        let mut order: Vec<usize> = (0..self.batches.len()).collect();
        order.sort_by_key(|&i| self.batches[i].preference_key());

        let Some(index) = order
            .into_iter()
            .find(|&i| self.batches[i].can_allocate(line))
        else {
            self.events.push(ProductEvent::out_of_stock(self.sku.clone()));
            return Err(ProductError::OutOfStock {
                sku: self.sku.clone(),
            });
        };

        let batch = &mut self.batches[index];
        batch.allocate(line);
        self.version_number = self.version_number.next();
        Ok(batch.reference().clone())
    }

    /// Removes `line` from whichever batch holds it.
    ///
    /// Returns the batch the line was released from, if any. Releasing a line
    /// moves the version forward like an allocation does.
    pub fn deallocate(&mut self, line: &OrderLine) -> Option<BatchRef> {
        let batch = self.batches.iter_mut().find(|b| b.is_allocated(line))?;
        batch.deallocate(line);
        let reference = batch.reference().clone();
        self.version_number = self.version_number.next();
        Some(reference)
    }
}
