use std::collections::HashMap;

use async_trait::async_trait;
use common::Sku;
use domain::{Aggregate, Product, ProductEvent};

use crate::{PersistenceError, Result};

/// Storage primitives a backend provides for the `Product` aggregate.
///
/// Backends only load and register; identity tracking lives in [`Repository`].
#[async_trait]
pub trait ProductBackend: Send {
    /// Registers a new product so the next commit persists it.
    async fn add_product(&mut self, product: &Product) -> Result<()>;

    /// Loads a snapshot of the product, if one is stored.
    async fn get_product(&mut self, sku: &Sku) -> Result<Option<Product>>;
}

/// A backend session scoped to one unit of work.
///
/// A session commits or rolls back once; afterwards it is closed.
#[async_trait]
pub trait Session: ProductBackend {
    /// Writes every product atomically and makes the changes visible.
    async fn commit(&mut self, products: &[&Product]) -> Result<()>;

    /// Discards everything staged in this session.
    async fn rollback(&mut self) -> Result<()>;
}

/// Opens backend sessions.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: Session;

    async fn open(&self) -> Result<Self::Session>;
}

/// Product repository with an identity map.
///
/// Every product handed out is remembered in the *seen* map, so repeated
/// lookups within one unit of work return the same instance and the commit
/// knows exactly which aggregates to write.
pub struct Repository<B> {
    backend: B,
    seen: HashMap<Sku, Product>,
}

impl<B: ProductBackend> Repository<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            seen: HashMap::new(),
        }
    }

    /// Registers a new product and starts tracking it.
    pub async fn add(&mut self, product: Product) -> Result<&mut Product> {
        let sku = product.id().clone();
        if self.seen.contains_key(&sku) {
            return Err(PersistenceError::DuplicateProduct(sku));
        }

        self.backend.add_product(&product).await?;
        tracing::debug!(aggregate = Product::aggregate_type(), %sku, "tracking new aggregate");
        Ok(self.seen.entry(sku).or_insert(product))
    }

    /// Returns the tracked product, loading it on first access.
    pub async fn get(&mut self, sku: &Sku) -> Result<Option<&mut Product>> {
        if !self.seen.contains_key(sku) {
            let Some(product) = self.backend.get_product(sku).await? else {
                return Ok(None);
            };
            tracing::debug!(
                aggregate = Product::aggregate_type(),
                %sku,
                version = %product.version(),
                "loaded aggregate"
            );
            self.seen.insert(sku.clone(), product);
        }
        Ok(self.seen.get_mut(sku))
    }

    /// Returns every product touched through `add` or a successful `get`.
    pub fn seen(&self) -> impl Iterator<Item = &Product> {
        self.seen.values()
    }

    /// Drains the events raised by every tracked product.
    pub fn take_events(&mut self) -> Vec<ProductEvent> {
        let mut skus: Vec<Sku> = self.seen.keys().cloned().collect();
        skus.sort();

        let mut events = Vec::new();
        for sku in &skus {
            if let Some(product) = self.seen.get_mut(sku) {
                events.extend(product.take_events());
            }
        }
        events
    }

    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: Session> Repository<B> {
    pub(crate) async fn commit(&mut self) -> Result<()> {
        let products: Vec<&Product> = self.seen.values().collect();
        self.backend.commit(&products).await
    }
}
