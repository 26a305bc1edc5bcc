use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use chrono::Utc;
use uuid::Uuid;

use partledger_infra::ReferencedEntity;
use partledger_infra::store::{Pagination, StockFilter, TransactionFilter};
use partledger_inventory::{
    LocationId, MovementRequest, PartId, StockKey, TransactionType, TransferRequest,
};

use crate::app::services::AppServices;
use crate::app::extract::{ApiJson, ApiQuery};
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/stock", get(list_stock))
        .route("/stock/:part_id/:location_id", get(get_stock))
        .route("/stock/:part_id/:location_id/threshold", put(set_threshold))
        .route("/adjustments", post(adjust))
        .route("/transfers", post(transfer))
        .route("/transactions", get(list_transactions))
        .route("/usage/:entity/:id", get(usage))
        .route("/locations/:id", delete(remove_location))
}

fn stock_key(
    ctx: &RequestContext,
    part_id: &str,
    location_id: &str,
) -> Result<StockKey, axum::response::Response> {
    let part_id: PartId = dto::parse_id(part_id, "part")?;
    let location_id: LocationId = dto::parse_id(location_id, "location")?;
    Ok(StockKey::new(ctx.tenant_id(), part_id, location_id))
}

pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    ApiQuery(query): ApiQuery<dto::StockQuery>,
) -> axum::response::Response {
    let filter = StockFilter {
        part_id: query.part_id,
        location_id: query.location_id,
        below_threshold: query.below_threshold,
    };
    match services.ledger.list_stock(ctx.tenant_id(), filter).await {
        Ok(rows) => {
            let items: Vec<_> = rows.iter().map(dto::stock_to_json).collect();
            Json(serde_json::json!({ "items": items })).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((part_id, location_id)): Path<(String, String)>,
) -> axum::response::Response {
    let key = match stock_key(&ctx, &part_id, &location_id) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match services.ledger.stock(key).await {
        Ok(stock) => Json(dto::stock_to_json(&stock)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn set_threshold(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((part_id, location_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<dto::ThresholdBody>,
) -> axum::response::Response {
    let key = match stock_key(&ctx, &part_id, &location_id) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match services
        .ledger
        .set_threshold(key.tenant_id, key.part_id, key.location_id, body.threshold)
        .await
    {
        Ok(stock) => Json(dto::stock_to_json(&stock)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn adjust(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(body): ApiJson<dto::AdjustmentRequest>,
) -> axum::response::Response {
    let mut request = MovementRequest::new(
        ctx.tenant_id(),
        body.part_id,
        body.location_id,
        body.kind.unwrap_or(TransactionType::ManualAdjustment),
        body.quantity_change,
        ctx.user_id(),
    );
    request.reason = body.reason;
    if let Some(metadata) = body.metadata {
        request = request.with_metadata(metadata);
    }

    match services.ledger.adjust(request).await {
        Ok(recorded) => (StatusCode::CREATED, Json(dto::movement_to_json(&recorded))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(body): ApiJson<dto::TransferBody>,
) -> axum::response::Response {
    let request = TransferRequest {
        tenant_id: ctx.tenant_id(),
        part_id: body.part_id,
        from_location: body.from_location_id,
        to_location: body.to_location_id,
        quantity: body.quantity,
        reason: body.reason,
        performed_by: ctx.user_id(),
        occurred_at: Utc::now(),
    };

    match services.ledger.transfer(request).await {
        Ok(outcome) => (StatusCode::CREATED, Json(dto::transfer_to_json(&outcome))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    ApiQuery(query): ApiQuery<dto::TransactionQuery>,
) -> axum::response::Response {
    let filter = TransactionFilter {
        part_id: query.part_id,
        location_id: query.location_id,
        kind: query.kind,
        performed_by: query.performed_by,
        from: query.from,
        to: query.to,
    };
    let pagination = Pagination::new(query.limit, query.offset);

    match services
        .ledger
        .transactions(ctx.tenant_id(), filter, pagination)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn usage(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path((entity, id)): Path<(String, String)>,
) -> axum::response::Response {
    let entity: ReferencedEntity = match entity.parse() {
        Ok(e) => e,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                "entity must be one of: part, location, vendor",
            );
        }
    };
    let id: Uuid = match dto::parse_id(&id, entity.as_str()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.ledger.usage(ctx.tenant_id(), entity, id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn remove_location(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let location_id: LocationId = match dto::parse_id(&id, "location") {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .ledger
        .remove_location(ctx.tenant_id(), location_id)
        .await
    {
        Ok(removed) => Json(serde_json::json!({
            "id": location_id.to_string(),
            "removed_stock_rows": removed,
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
