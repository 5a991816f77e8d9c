//! Allocation use cases.

use std::sync::Arc;

use common::{BatchRef, OrderId, Sku};
use domain::{Batch, OrderLine, Product};
use persistence::{SessionFactory, UnitOfWork};
use serde::Serialize;

use crate::commands::{AddBatch, Allocate, Deallocate};
use crate::error::{Result, ServiceError};
use crate::messagebus::MessageBus;

/// One allocated order line, as reported by [`AllocationService::allocations_for`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationView {
    pub batchref: BatchRef,
    pub orderid: OrderId,
    pub qty: u32,
}

/// Service running each use case in its own unit of work.
///
/// Events raised while the unit of work was open are dispatched after it
/// closes, whether it committed or not.
pub struct AllocationService<F: SessionFactory> {
    factory: F,
    bus: Arc<MessageBus>,
}

impl<F: SessionFactory + Clone> AllocationService<F> {
    /// Creates a new allocation service.
    pub fn new(factory: F, bus: Arc<MessageBus>) -> Self {
        Self { factory, bus }
    }

    /// Returns the message bus events are dispatched to.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Registers a batch, creating the product on first sight of the SKU.
    #[tracing::instrument(skip(self), fields(reference = %cmd.reference, sku = %cmd.sku))]
    pub async fn add_batch(&self, cmd: AddBatch) -> Result<()> {
        let result = match cmd.validate() {
            Ok(qty) => {
                let mut uow = UnitOfWork::new(self.factory.clone());
                let result = Self::add_batch_in(&mut uow, cmd, qty).await;
                self.finish(uow, result).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                metrics::counter!("batches_added_total").increment(1);
                tracing::info!("batch added");
            }
            Err(e) => {
                metrics::counter!("batch_failures_total", "reason" => e.reason()).increment(1);
                tracing::warn!(error = %e, "add batch failed");
            }
        }
        result
    }

    /// Allocates an order line and returns the chosen batch.
    #[tracing::instrument(skip(self), fields(orderid = %cmd.orderid, sku = %cmd.sku, qty = cmd.qty))]
    pub async fn allocate(&self, cmd: Allocate) -> Result<BatchRef> {
        let result = match cmd.order_line() {
            Ok(line) => {
                let mut uow = UnitOfWork::new(self.factory.clone());
                let result = Self::allocate_in(&mut uow, &line).await;
                self.finish(uow, result).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(batchref) => {
                metrics::counter!("allocations_total").increment(1);
                tracing::info!(%batchref, "order line allocated");
            }
            Err(e) => {
                metrics::counter!("allocation_failures_total", "reason" => e.reason())
                    .increment(1);
                tracing::warn!(error = %e, "allocation failed");
            }
        }
        result
    }

    /// Releases an allocated order line and returns the batch it came from.
    #[tracing::instrument(skip(self), fields(orderid = %cmd.orderid, sku = %cmd.sku, qty = cmd.qty))]
    pub async fn deallocate(&self, cmd: Deallocate) -> Result<BatchRef> {
        let result = match cmd.order_line() {
            Ok(line) => {
                let mut uow = UnitOfWork::new(self.factory.clone());
                let result = Self::deallocate_in(&mut uow, &line).await;
                self.finish(uow, result).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(batchref) => {
                metrics::counter!("deallocations_total").increment(1);
                tracing::info!(%batchref, "order line deallocated");
            }
            Err(e) => {
                metrics::counter!("deallocation_failures_total", "reason" => e.reason())
                    .increment(1);
                tracing::warn!(error = %e, "deallocation failed");
            }
        }
        result
    }

    /// Lists the current allocations of a SKU in batch order.
    ///
    /// Unknown SKUs have no allocations. Nothing is committed.
    #[tracing::instrument(skip(self))]
    pub async fn allocations_for(&self, sku: &Sku) -> Result<Vec<AllocationView>> {
        let mut uow = UnitOfWork::new(self.factory.clone());
        let result = Self::allocations_in(&mut uow, sku).await;
        self.finish(uow, result).await
    }

    async fn add_batch_in(uow: &mut UnitOfWork<F>, cmd: AddBatch, qty: u32) -> Result<()> {
        uow.begin().await?;
        let products = uow.products()?;

        if products.get(&cmd.sku).await?.is_none() {
            products.add(Product::new(cmd.sku.clone(), vec![])).await?;
        }
        let product = products
            .get(&cmd.sku)
            .await?
            .ok_or_else(|| ServiceError::UnknownSku(cmd.sku.clone()))?;
        product.add_batch(Batch::new(cmd.reference, cmd.sku, qty, cmd.eta))?;

        uow.commit().await?;
        Ok(())
    }

    async fn allocate_in(uow: &mut UnitOfWork<F>, line: &OrderLine) -> Result<BatchRef> {
        uow.begin().await?;
        let product = uow
            .products()?
            .get(line.sku())
            .await?
            .ok_or_else(|| ServiceError::UnknownSku(line.sku().clone()))?;
        let batchref = product.allocate(line)?;

        uow.commit().await?;
        Ok(batchref)
    }

    async fn deallocate_in(uow: &mut UnitOfWork<F>, line: &OrderLine) -> Result<BatchRef> {
        uow.begin().await?;
        let product = uow
            .products()?
            .get(line.sku())
            .await?
            .ok_or_else(|| ServiceError::UnknownSku(line.sku().clone()))?;
        let batchref = product
            .deallocate(line)
            .ok_or_else(|| ServiceError::NotAllocated {
                orderid: line.orderid().clone(),
                sku: line.sku().clone(),
            })?;

        uow.commit().await?;
        Ok(batchref)
    }

    async fn allocations_in(uow: &mut UnitOfWork<F>, sku: &Sku) -> Result<Vec<AllocationView>> {
        uow.begin().await?;
        let Some(product) = uow.products()?.get(sku).await? else {
            return Ok(Vec::new());
        };

        let mut views = Vec::new();
        for batch in product.batches() {
            let mut lines: Vec<&OrderLine> = batch.allocations().collect();
            lines.sort_by(|a, b| a.orderid().cmp(b.orderid()).then(a.qty().cmp(&b.qty())));
            views.extend(lines.into_iter().map(|line| AllocationView {
                batchref: batch.reference().clone(),
                orderid: line.orderid().clone(),
                qty: line.qty(),
            }));
        }
        Ok(views)
    }

    /// Closes the unit of work and dispatches the events it collected.
    async fn finish<T>(&self, mut uow: UnitOfWork<F>, result: Result<T>) -> Result<T> {
        let closed = uow.close().await;

        let events = uow.collect_new_events();
        if !events.is_empty() {
            let report = self.bus.handle_all(&events).await;
            if !report.is_clean() {
                tracing::warn!(
                    failures = report.failures.len(),
                    "event handlers failed after unit of work closed"
                );
            }
        }

        let value = result?;
        closed?;
        Ok(value)
    }
}
