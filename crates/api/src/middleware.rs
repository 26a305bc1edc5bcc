use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use partledger_core::{TenantId, UserId};

use crate::context::RequestContext;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

/// Attach a [`RequestContext`] or reject with 401.
pub async fn request_context(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let tenant_id: TenantId = header_id(req.headers(), TENANT_HEADER)?;
    let user_id: UserId = header_id(req.headers(), USER_HEADER)?;

    req.extensions_mut()
        .insert(RequestContext::new(tenant_id, user_id));

    Ok(next.run(req).await)
}

fn header_id<T: core::str::FromStr>(headers: &HeaderMap, name: &str) -> Result<T, StatusCode> {
    headers
        .get(name)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::UNAUTHORIZED)?
        .trim()
        .parse()
        .map_err(|_| StatusCode::UNAUTHORIZED)
}
