use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use partledger_infra::OrderRequest;
use partledger_infra::store::{OrderFilter, Pagination};
use partledger_purchasing::PurchaseOrderId;

use crate::app::services::AppServices;
use crate::app::extract::{ApiJson, ApiQuery, OptionalJson};
use crate::app::{dto, errors};
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route(
            "/orders/:id",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/orders/:id/approve", post(approve_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/purchase", post(purchase_order))
        .route("/orders/:id/receive", post(receive_goods))
        .route("/orders/:id/history", get(order_history))
}

fn order_id(raw: &str) -> Result<PurchaseOrderId, axum::response::Response> {
    dto::parse_id(raw, "purchase order")
}

pub async fn create_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    ApiJson(body): ApiJson<OrderRequest>,
) -> axum::response::Response {
    match services
        .orders
        .create(ctx.tenant_id(), ctx.user_id(), body)
        .await
    {
        Ok(order) => (StatusCode::CREATED, Json(dto::order_to_json(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    ApiQuery(query): ApiQuery<dto::OrderQuery>,
) -> axum::response::Response {
    let filter = OrderFilter {
        status: query.status,
        vendor_id: query.vendor_id,
    };
    let pagination = Pagination::new(query.limit, query.offset);

    match services.orders.list(ctx.tenant_id(), filter, pagination).await {
        Ok(page) => Json(page.map(|order| dto::order_to_json(&order))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orders.get(ctx.tenant_id(), id).await {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn update_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<OrderRequest>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .orders
        .update(ctx.tenant_id(), ctx.user_id(), id, body)
        .await
    {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn delete_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orders.delete(ctx.tenant_id(), id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn approve_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .orders
        .approve(ctx.tenant_id(), ctx.user_id(), id)
        .await
    {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn reject_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<dto::RejectBody>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .orders
        .reject(ctx.tenant_id(), ctx.user_id(), id, body.reason)
        .await
    {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    OptionalJson(body): OptionalJson<dto::PurchaseBody>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .orders
        .mark_purchased(ctx.tenant_id(), ctx.user_id(), id, body.payment_reference)
        .await
    {
        Ok(order) => Json(dto::order_to_json(&order)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn receive_goods(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<dto::ReceiveBody>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services
        .orders
        .receive(ctx.tenant_id(), ctx.user_id(), id, body.lines)
        .await
    {
        Ok(outcome) => Json(serde_json::json!({
            "order": dto::order_to_json(&outcome.order),
            "movements": outcome.movements.iter().map(dto::movement_to_json).collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn order_history(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match order_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orders.history(ctx.tenant_id(), id).await {
        Ok(entries) => Json(serde_json::json!({ "items": entries })).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
