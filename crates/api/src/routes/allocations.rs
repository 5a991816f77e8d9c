//! Batch and allocation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::Sku;
use persistence::SessionFactory;
use serde::{Deserialize, Serialize};
use service::{AddBatch, Allocate, AllocationService, AllocationView, Deallocate};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<F: SessionFactory> {
    pub service: AllocationService<F>,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AddBatchRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    pub sku: String,
    pub qty: i64,
    #[serde(default)]
    pub eta: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub orderid: String,
    pub sku: String,
    pub qty: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct BatchRefResponse {
    pub batchref: String,
}

// -- Handlers --

/// POST /batches: register received or incoming stock.
#[tracing::instrument(skip(state, req))]
pub async fn add_batch<F: SessionFactory + Clone + 'static>(
    State(state): State<Arc<AppState<F>>>,
    req: Result<Json<AddBatchRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = req?;
    state
        .service
        .add_batch(AddBatch::new(req.reference, req.sku, req.qty, req.eta))
        .await?;
    Ok(StatusCode::CREATED)
}

/// POST /allocate: allocate an order line and return the chosen batch.
#[tracing::instrument(skip(state, req))]
pub async fn allocate<F: SessionFactory + Clone + 'static>(
    State(state): State<Arc<AppState<F>>>,
    req: Result<Json<OrderLineRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchRefResponse>), ApiError> {
    let Json(req) = req?;
    let batchref = state
        .service
        .allocate(Allocate::new(req.orderid, req.sku, req.qty))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BatchRefResponse {
            batchref: batchref.to_string(),
        }),
    ))
}

/// POST /deallocate: release an allocated order line.
#[tracing::instrument(skip(state, req))]
pub async fn deallocate<F: SessionFactory + Clone + 'static>(
    State(state): State<Arc<AppState<F>>>,
    req: Result<Json<OrderLineRequest>, JsonRejection>,
) -> Result<Json<BatchRefResponse>, ApiError> {
    let Json(req) = req?;
    let batchref = state
        .service
        .deallocate(Deallocate::new(req.orderid, req.sku, req.qty))
        .await?;
    Ok(Json(BatchRefResponse {
        batchref: batchref.to_string(),
    }))
}

/// GET /allocations/{sku}: current allocations of a SKU.
#[tracing::instrument(skip(state))]
pub async fn list<F: SessionFactory + Clone + 'static>(
    State(state): State<Arc<AppState<F>>>,
    Path(sku): Path<String>,
) -> Result<Json<Vec<AllocationView>>, ApiError> {
    let views = state.service.allocations_for(&Sku::new(sku)).await?;
    Ok(Json(views))
}
