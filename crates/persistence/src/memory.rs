use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use common::{BatchRef, Sku, Version};
use domain::{Aggregate, Batch, Product};
use tokio::sync::RwLock;

use crate::repository::{ProductBackend, Session, SessionFactory};
use crate::{PersistenceError, Result};

type Products = Arc<RwLock<HashMap<Sku, Product>>>;

/// In-memory product store.
///
/// Provides the same commit semantics as the PostgreSQL backend: nothing is
/// visible until commit, and a commit against a stale version fails.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    products: Products,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a product directly, bypassing any session.
    pub async fn insert(&self, mut product: Product) {
        product.take_events();
        self.products
            .write()
            .await
            .insert(product.sku().clone(), product);
    }

    /// Returns a copy of the committed product.
    pub async fn product(&self, sku: &Sku) -> Option<Product> {
        self.products.read().await.get(sku).cloned()
    }

    /// Returns the number of committed products.
    pub async fn product_count(&self) -> usize {
        self.products.read().await.len()
    }
}

#[async_trait]
impl SessionFactory for InMemoryStore {
    type Session = InMemorySession;

    async fn open(&self) -> Result<InMemorySession> {
        Ok(InMemorySession {
            products: Arc::clone(&self.products),
            loaded: HashMap::new(),
            closed: false,
        })
    }
}

/// What a session saw of a product when it entered the session.
struct Snapshot {
    /// `None` for products added through the session.
    version: Option<Version>,
    batches: HashSet<BatchRef>,
}

/// Session over an [`InMemoryStore`].
///
/// Remembers the version and batch references each product had when it
/// entered the session and checks them again at commit.
pub struct InMemorySession {
    products: Products,
    loaded: HashMap<Sku, Snapshot>,
    closed: bool,
}

impl InMemorySession {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PersistenceError::SessionClosed);
        }
        Ok(())
    }

    fn snapshot(&self, product: &Product) -> Result<&Snapshot> {
        self.loaded
            .get(product.sku())
            .ok_or_else(|| PersistenceError::UntrackedProduct(product.sku().clone()))
    }
}

fn check_version(snapshot: &Snapshot, stored: Option<&Product>, product: &Product) -> Result<()> {
    let actual = stored.map(Product::version_number);
    if actual == snapshot.version {
        return Ok(());
    }

    Err(PersistenceError::ConcurrencyConflict {
        sku: product.sku().clone(),
        expected: snapshot.version.unwrap_or_default(),
        actual: actual.unwrap_or_default(),
    })
}

fn batch_owner<'a>(store: &'a HashMap<Sku, Product>, reference: &BatchRef) -> Option<&'a Sku> {
    store
        .values()
        .find(|p| p.batch(reference).is_some())
        .map(Product::sku)
}

/// Applies `product` over the stored copy, keeping batches the session never saw.
fn merge(stored: Option<Product>, product: &Product) -> Product {
    let mut batches: Vec<Batch> = stored.map(|p| p.batches().to_vec()).unwrap_or_default();
    for batch in product.batches() {
        match batches.iter_mut().find(|b| b.reference() == batch.reference()) {
            Some(existing) => *existing = batch.clone(),
            None => batches.push(batch.clone()),
        }
    }
    Product::with_version(product.sku().clone(), batches, product.version_number())
}

#[async_trait]
impl ProductBackend for InMemorySession {
    async fn add_product(&mut self, product: &Product) -> Result<()> {
        self.ensure_open()?;
        self.loaded.insert(
            product.sku().clone(),
            Snapshot {
                version: None,
                batches: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn get_product(&mut self, sku: &Sku) -> Result<Option<Product>> {
        self.ensure_open()?;
        let product = self.products.read().await.get(sku).cloned();
        if let Some(ref product) = product {
            let snapshot = Snapshot {
                version: Some(product.version_number()),
                batches: product
                    .batches()
                    .iter()
                    .map(|b| b.reference().clone())
                    .collect(),
            };
            self.loaded.insert(sku.clone(), snapshot);
        }
        Ok(product)
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn commit(&mut self, products: &[&Product]) -> Result<()> {
        self.ensure_open()?;
        let mut store = self.products.write().await;

        let mut claimed: HashMap<&BatchRef, &Sku> = HashMap::new();
        for product in products {
            let snapshot = self.snapshot(product)?;
            check_version(snapshot, store.get(product.sku()), product)?;

            for batch in product.batches() {
                let reference = batch.reference();
                if snapshot.batches.contains(reference) {
                    continue;
                }
                let owner = batch_owner(&store, reference)
                    .or_else(|| claimed.get(reference).copied());
                if let Some(owner) = owner {
                    return Err(PersistenceError::BatchReferenceTaken {
                        reference: reference.clone(),
                        owner: owner.clone(),
                    });
                }
                claimed.insert(reference, product.sku());
            }
        }

        for product in products {
            let stored = store.remove(product.sku());
            store.insert(product.sku().clone(), merge(stored, product));
        }

        self.closed = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.loaded.clear();
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::OrderLine;

    async fn seeded(product: Product) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert(product).await;
        store
    }

    #[tokio::test]
    async fn nothing_is_visible_before_commit() {
        let store = InMemoryStore::new();
        let mut session = store.open().await.unwrap();
        let product = Product::new("LAMP", vec![]);

        session.add_product(&product).await.unwrap();
        assert_eq!(store.product_count().await, 0);

        session.commit(&[&product]).await.unwrap();
        assert_eq!(store.product_count().await, 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = seeded(Product::new("RUG", vec![Batch::new("b1", "RUG", 10, None)])).await;
        let mut first = store.open().await.unwrap();
        let mut second = store.open().await.unwrap();
        let sku = Sku::new("RUG");

        let mut a = first.get_product(&sku).await.unwrap().unwrap();
        let mut b = second.get_product(&sku).await.unwrap().unwrap();
        a.allocate(&OrderLine::new("o1", "RUG", 1)).unwrap();
        b.allocate(&OrderLine::new("o2", "RUG", 1)).unwrap();

        first.commit(&[&a]).await.unwrap();
        let err = second.commit(&[&b]).await.unwrap_err();

        assert!(matches!(
            err,
            PersistenceError::ConcurrencyConflict { expected, actual, .. }
                if expected == Version::new(0) && actual == Version::new(1)
        ));
        let stored = store.product(&sku).await.unwrap();
        assert_eq!(stored.version_number(), Version::new(1));
        assert_eq!(stored.available_quantity(), 9);
    }

    #[tokio::test]
    async fn adding_a_product_committed_elsewhere_is_a_conflict() {
        let store = InMemoryStore::new();
        let mut first = store.open().await.unwrap();
        let mut second = store.open().await.unwrap();
        let a = Product::new("VASE", vec![]);
        let b = Product::new("VASE", vec![]);

        first.add_product(&a).await.unwrap();
        second.add_product(&b).await.unwrap();
        first.commit(&[&a]).await.unwrap();

        let err = second.commit(&[&b]).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn concurrent_batches_on_one_product_both_survive() {
        let store = seeded(Product::new("MUG", vec![])).await;
        let mut first = store.open().await.unwrap();
        let mut second = store.open().await.unwrap();
        let sku = Sku::new("MUG");

        let mut a = first.get_product(&sku).await.unwrap().unwrap();
        let mut b = second.get_product(&sku).await.unwrap().unwrap();
        a.add_batch(Batch::new("b1", "MUG", 5, None)).unwrap();
        b.add_batch(Batch::new("b2", "MUG", 7, None)).unwrap();

        first.commit(&[&a]).await.unwrap();
        second.commit(&[&b]).await.unwrap();

        let stored = store.product(&sku).await.unwrap();
        assert_eq!(stored.batches().len(), 2);
        assert_eq!(stored.available_quantity(), 12);
    }

    #[tokio::test]
    async fn concurrent_batches_with_one_reference_keep_the_first() {
        let store = seeded(Product::new("LAMP", vec![])).await;
        let mut first = store.open().await.unwrap();
        let mut second = store.open().await.unwrap();
        let sku = Sku::new("LAMP");

        let mut a = first.get_product(&sku).await.unwrap().unwrap();
        let mut b = second.get_product(&sku).await.unwrap().unwrap();
        a.add_batch(Batch::new("b1", "LAMP", 10, None)).unwrap();
        b.add_batch(Batch::new("b1", "LAMP", 99, None)).unwrap();

        first.commit(&[&a]).await.unwrap();
        let err = second.commit(&[&b]).await.unwrap_err();

        assert!(matches!(
            err,
            PersistenceError::BatchReferenceTaken { ref owner, .. } if owner.as_str() == "LAMP"
        ));
        let stored = store.product(&sku).await.unwrap();
        assert_eq!(stored.batches().len(), 1);
        assert_eq!(stored.available_quantity(), 10);
    }

    #[tokio::test]
    async fn batch_reference_of_another_sku_is_rejected() {
        let mut lamp = Product::new("LAMP", vec![Batch::new("b1", "LAMP", 10, None)]);
        lamp.allocate(&OrderLine::new("o1", "LAMP", 4)).unwrap();
        let store = seeded(lamp).await;
        let mut session = store.open().await.unwrap();
        let rug = Product::new("RUG", vec![Batch::new("b1", "RUG", 50, None)]);

        session.add_product(&rug).await.unwrap();
        let err = session.commit(&[&rug]).await.unwrap_err();

        assert!(matches!(
            err,
            PersistenceError::BatchReferenceTaken { ref owner, .. } if owner.as_str() == "LAMP"
        ));
        assert!(store.product(&Sku::new("RUG")).await.is_none());
        let lamp = store.product(&Sku::new("LAMP")).await.unwrap();
        assert_eq!(lamp.available_quantity(), 6);
    }

    #[tokio::test]
    async fn one_commit_cannot_reuse_a_reference_twice() {
        let store = InMemoryStore::new();
        let mut session = store.open().await.unwrap();
        let lamp = Product::new("LAMP", vec![Batch::new("b1", "LAMP", 10, None)]);
        let rug = Product::new("RUG", vec![Batch::new("b1", "RUG", 10, None)]);

        session.add_product(&lamp).await.unwrap();
        session.add_product(&rug).await.unwrap();
        let err = session.commit(&[&lamp, &rug]).await.unwrap_err();

        assert!(matches!(err, PersistenceError::BatchReferenceTaken { .. }));
        assert_eq!(store.product_count().await, 0);
    }

    #[tokio::test]
    async fn untracked_products_are_rejected() {
        let store = InMemoryStore::new();
        let mut session = store.open().await.unwrap();

        let err = session
            .commit(&[&Product::new("STRAY", vec![])])
            .await
            .unwrap_err();

        assert!(matches!(err, PersistenceError::UntrackedProduct(_)));
        assert_eq!(store.product_count().await, 0);
    }

    #[tokio::test]
    async fn closed_session_refuses_work() {
        let store = InMemoryStore::new();
        let mut session = store.open().await.unwrap();
        session.rollback().await.unwrap();

        let err = session.get_product(&Sku::new("ANY")).await.unwrap_err();
        assert!(matches!(err, PersistenceError::SessionClosed));
        session.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn pending_events_are_not_stored() {
        let store = InMemoryStore::new();
        let mut session = store.open().await.unwrap();
        let mut product = Product::new("FORK", vec![]);
        let _ = product.allocate(&OrderLine::new("o1", "FORK", 1));

        session.add_product(&product).await.unwrap();
        session.commit(&[&product]).await.unwrap();

        let stored = store.product(&Sku::new("FORK")).await.unwrap();
        assert!(stored.pending_events().is_empty());
    }
}
