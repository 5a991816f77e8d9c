//! End-to-end use cases against the in-memory store.

use std::sync::Arc;

use chrono::NaiveDate;
use common::{Sku, Version};
use domain::{Batch, Product, ProductError};
use persistence::InMemoryStore;
use service::{
    AddBatch, Allocate, AllocationService, Deallocate, InMemoryNotifier, MessageBus, Notification,
    ServiceError,
};

struct Harness {
    service: AllocationService<InMemoryStore>,
    store: InMemoryStore,
    notifier: InMemoryNotifier,
}

fn harness() -> Harness {
    let store = InMemoryStore::new();
    let notifier = InMemoryNotifier::new();
    let bus = Arc::new(MessageBus::with_default_handlers(Arc::new(notifier.clone())));
    Harness {
        service: AllocationService::new(store.clone(), bus),
        store,
        notifier,
    }
}

fn tomorrow() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2011, 1, 2)
}

#[tokio::test]
async fn allocate_returns_allocation() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("batch1", "COMPLICATED-LAMP", 100, None))
        .await
        .unwrap();

    let result = h
        .service
        .allocate(Allocate::new("o1", "COMPLICATED-LAMP", 10))
        .await
        .unwrap();

    assert_eq!(result.as_str(), "batch1");
}

#[tokio::test]
async fn allocate_errors_for_invalid_sku() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("b1", "AREALSKU", 100, None))
        .await
        .unwrap();

    let err = h
        .service
        .allocate(Allocate::new("o1", "NONEXISTENTSKU", 10))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::UnknownSku(_)));
    assert_eq!(err.to_string(), "Invalid sku NONEXISTENTSKU");
}

#[tokio::test]
async fn allocate_commits() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("b1", "OMINOUS-MIRROR", 100, None))
        .await
        .unwrap();

    h.service
        .allocate(Allocate::new("o1", "OMINOUS-MIRROR", 10))
        .await
        .unwrap();

    let product = h.store.product(&Sku::new("OMINOUS-MIRROR")).await.unwrap();
    assert_eq!(product.available_quantity(), 90);
    assert_eq!(product.version_number(), Version::new(1));
}

#[tokio::test]
async fn prefers_earlier_shipments_across_calls() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new(
            "laterbatch",
            "SHARED-SKU",
            100,
            NaiveDate::from_ymd_opt(2011, 1, 2),
        ))
        .await
        .unwrap();
    h.service
        .add_batch(AddBatch::new(
            "earlybatch",
            "SHARED-SKU",
            100,
            NaiveDate::from_ymd_opt(2011, 1, 1),
        ))
        .await
        .unwrap();
    h.service
        .add_batch(AddBatch::new("otherbatch", "OTHER-SKU", 100, None))
        .await
        .unwrap();

    let result = h
        .service
        .allocate(Allocate::new("o1", "SHARED-SKU", 3))
        .await
        .unwrap();

    assert_eq!(result.as_str(), "earlybatch");
}

#[tokio::test]
async fn batch_reference_is_unique_across_skus() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("b1", "TALL-LAMP", 10, None))
        .await
        .unwrap();
    h.service
        .allocate(Allocate::new("o1", "TALL-LAMP", 4))
        .await
        .unwrap();

    let err = h
        .service
        .add_batch(AddBatch::new("b1", "SHORT-RUG", 50, None))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Domain(ProductError::DuplicateBatch { ref reference })
            if reference.as_str() == "b1"
    ));
    assert!(h.store.product(&Sku::new("SHORT-RUG")).await.is_none());
    let views = h
        .service
        .allocations_for(&Sku::new("TALL-LAMP"))
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].orderid.as_str(), "o1");

    let err = h
        .service
        .allocate(Allocate::new("o2", "TALL-LAMP", 40))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::OutOfStock(_)));
}

#[tokio::test]
async fn sends_email_on_out_of_stock_error() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("b1", "POPULAR-CURTAINS", 9, None))
        .await
        .unwrap();

    let err = h
        .service
        .allocate(Allocate::new("o1", "POPULAR-CURTAINS", 10))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::OutOfStock(_)));
    assert_eq!(err.to_string(), "Out of stock for sku POPULAR-CURTAINS");
    assert_eq!(
        h.notifier.sent(),
        vec![Notification {
            recipient: "stock@made.com".to_string(),
            subject: "Out of stock for POPULAR-CURTAINS".to_string(),
        }]
    );

    let product = h.store.product(&Sku::new("POPULAR-CURTAINS")).await.unwrap();
    assert_eq!(product.version_number(), Version::initial());
}

#[tokio::test]
async fn notification_failure_does_not_change_the_outcome() {
    let h = harness();
    h.notifier.set_fail_on_send(true);
    h.service
        .add_batch(AddBatch::new("b1", "SPARSE-SHELF", 1, tomorrow()))
        .await
        .unwrap();

    let err = h
        .service
        .allocate(Allocate::new("o1", "SPARSE-SHELF", 2))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::OutOfStock(_)));
    assert_eq!(h.notifier.sent_count(), 0);
}

#[tokio::test]
async fn deallocate_releases_stock() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("b1", "BLUE-VASE", 10, None))
        .await
        .unwrap();
    h.service
        .allocate(Allocate::new("o1", "BLUE-VASE", 4))
        .await
        .unwrap();

    let batchref = h
        .service
        .deallocate(Deallocate::new("o1", "BLUE-VASE", 4))
        .await
        .unwrap();

    assert_eq!(batchref.as_str(), "b1");
    let product = h.store.product(&Sku::new("BLUE-VASE")).await.unwrap();
    assert_eq!(product.available_quantity(), 10);
    assert!(h
        .service
        .allocations_for(&Sku::new("BLUE-VASE"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn deallocate_unknown_line_is_an_error() {
    let h = harness();
    h.service
        .add_batch(AddBatch::new("b1", "RED-STOOL", 10, None))
        .await
        .unwrap();

    let err = h
        .service
        .deallocate(Deallocate::new("o1", "RED-STOOL", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotAllocated { .. }));

    let err = h
        .service
        .deallocate(Deallocate::new("o1", "GREEN-STOOL", 4))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::UnknownSku(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_oversell() {
    let h = harness();
    h.store
        .insert(Product::new(
            "LIMITED-PRINT",
            vec![Batch::new("b1", "LIMITED-PRINT", 5, None)],
        ))
        .await;
    let service = Arc::new(h.service);

    let mut tasks = Vec::new();
    for n in 0..10 {
        let service = Arc::clone(&service);
        tasks.push(tokio::spawn(async move {
            service
                .allocate(Allocate::new(format!("order-{n}"), "LIMITED-PRINT", 1))
                .await
        }));
    }

    let mut allocated = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => allocated += 1,
            Err(e) => assert!(
                e.is_retryable() || matches!(e, ServiceError::OutOfStock(_)),
                "unexpected error: {e}"
            ),
        }
    }

    let product = h.store.product(&Sku::new("LIMITED-PRINT")).await.unwrap();
    assert_eq!(product.version_number(), Version::new(allocated));
    assert_eq!(product.available_quantity(), 5 - allocated as u64);
}
