use std::sync::Arc;

use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use partledger_api::app::{self, AppServices};
use partledger_core::{TenantId, UserId};
use partledger_infra::RetryPolicy;
use partledger_infra::store::InMemoryLedgerStore;
use partledger_inventory::{Part, PartLocation};
use partledger_purchasing::Vendor;

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(store: InMemoryLedgerStore) -> Self {
        // Same router as prod, over a seeded in-memory store, on an ephemeral port.
        let services = AppServices::new(Arc::new(store), RetryPolicy::default());
        let app = app::router(Arc::new(services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Catalog {
    tenant: TenantId,
    user: UserId,
    part: Part,
    dock: PartLocation,
    shelf: PartLocation,
    vendor: Vendor,
}

fn seeded() -> (InMemoryLedgerStore, Catalog) {
    let store = InMemoryLedgerStore::new();
    let tenant = TenantId::new();
    let part = Part::new(tenant, "FLT-100", "Oil filter", "pcs", Decimal::new(10, 0));
    let dock = PartLocation::new(tenant, "Dock");
    let shelf = PartLocation::new(tenant, "Shelf");
    let vendor = Vendor::new(tenant, "Northwind Parts");
    store.insert_part(part.clone()).unwrap();
    store.insert_location(dock.clone()).unwrap();
    store.insert_location(shelf.clone()).unwrap();
    store.insert_vendor(vendor.clone()).unwrap();
    (
        store,
        Catalog {
            tenant,
            user: UserId::new(),
            part,
            dock,
            shelf,
            vendor,
        },
    )
}

fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

fn with_ctx(req: reqwest::RequestBuilder, c: &Catalog) -> reqwest::RequestBuilder {
    req.header("x-tenant-id", c.tenant.to_string())
        .header("x-user-id", c.user.to_string())
}

#[tokio::test]
async fn health_is_public() {
    let (store, _) = seeded();
    let srv = TestServer::spawn(store).await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn context_headers_required_for_domain_routes() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{}/inventory/stock", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let malformed = client
        .get(format!("{}/whoami", srv.base_url))
        .header("x-tenant-id", "not-a-uuid")
        .header("x-user-id", c.user.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::UNAUTHORIZED);

    let ok = with_ctx(client.get(format!("{}/whoami", srv.base_url)), &c)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["tenant_id"].as_str().unwrap(), c.tenant.to_string());
}

#[tokio::test]
async fn purchase_order_lifecycle_updates_stock() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    // Create
    let res = with_ctx(client.post(format!("{}/purchases/orders", srv.base_url)), &c)
        .json(&json!({
            "vendor_id": c.vendor.id.to_string(),
            "location_id": c.dock.id.to_string(),
            "lines": [{
                "part_id": c.part.id.to_string(),
                "quantity_ordered": 100,
                "unit_cost": "10",
            }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let order: Value = res.json().await.unwrap();
    assert_eq!(order["status"], "pending-approval");
    assert_eq!(decimal(&order["totals"]["subtotal"]), Decimal::new(1000, 0));
    assert_eq!(decimal(&order["totals"]["total"]), Decimal::new(1000, 0));
    let id = order["id"].as_str().unwrap().to_string();
    let line_id = order["lines"][0]["id"].as_str().unwrap().to_string();

    // Approve
    let res = with_ctx(
        client.post(format!("{}/purchases/orders/{}/approve", srv.base_url, id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Receive 40
    let res = with_ctx(
        client.post(format!("{}/purchases/orders/{}/receive", srv.base_url, id)),
        &c,
    )
    .json(&json!({ "lines": [{ "line_id": line_id, "quantity": 40 }] }))
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let received: Value = res.json().await.unwrap();
    assert_eq!(received["order"]["status"], "partial-received");
    assert_eq!(received["order"]["lines"][0]["quantity_received"], 40);

    // Over-receive is rejected
    let res = with_ctx(
        client.post(format!("{}/purchases/orders/{}/receive", srv.base_url, id)),
        &c,
    )
    .json(&json!({ "lines": [{ "line_id": line_id, "quantity": 61 }] }))
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "validation_error");

    // Receive the rest
    let res = with_ctx(
        client.post(format!("{}/purchases/orders/{}/receive", srv.base_url, id)),
        &c,
    )
    .json(&json!({ "lines": [{ "line_id": line_id, "quantity": 60 }] }))
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let received: Value = res.json().await.unwrap();
    assert_eq!(received["order"]["status"], "received");

    let res = with_ctx(
        client.get(format!(
            "{}/inventory/stock/{}/{}",
            srv.base_url, c.part.id, c.dock.id
        )),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stock: Value = res.json().await.unwrap();
    assert_eq!(stock["quantity"], 100);

    // Received orders cannot be deleted
    let res = with_ctx(
        client.delete(format!("{}/purchases/orders/{}", srv.base_url, id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = with_ctx(
        client.get(format!("{}/purchases/orders/{}/history", srv.base_url, id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    let history: Value = res.json().await.unwrap();
    assert_eq!(history["items"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn adjustments_and_transfers_show_in_feed() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    let res = with_ctx(client.post(format!("{}/inventory/adjustments", srv.base_url)), &c)
        .json(&json!({
            "part_id": c.part.id.to_string(),
            "location_id": c.dock.id.to_string(),
            "quantity_change": 10,
            "reason": "opening count",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["transaction"]["type"], "manual-adjustment");
    assert_eq!(body["transaction"]["direction"], "IN");

    let res = with_ctx(client.post(format!("{}/inventory/transfers", srv.base_url)), &c)
        .json(&json!({
            "part_id": c.part.id.to_string(),
            "from_location_id": c.dock.id.to_string(),
            "to_location_id": c.shelf.id.to_string(),
            "quantity": 25,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "insufficient_stock");

    let res = with_ctx(client.post(format!("{}/inventory/transfers", srv.base_url)), &c)
        .json(&json!({
            "part_id": c.part.id.to_string(),
            "from_location_id": c.dock.id.to_string(),
            "to_location_id": c.shelf.id.to_string(),
            "quantity": 4,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let transfer: Value = res.json().await.unwrap();
    assert_eq!(transfer["outbound"]["stock"]["quantity"], 6);
    assert_eq!(transfer["inbound"]["stock"]["quantity"], 4);

    let res = with_ctx(
        client.get(format!(
            "{}/inventory/transactions?part_id={}&type=transfer-in",
            srv.base_url, c.part.id
        )),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let feed: Value = res.json().await.unwrap();
    assert_eq!(feed["total"], 1);
    assert_eq!(feed["items"][0]["quantity_change"], 4);

    let res = with_ctx(
        client.get(format!("{}/inventory/usage/part/{}", srv.base_url, c.part.id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    let usage: Value = res.json().await.unwrap();
    assert_eq!(usage["total"], 5);
}

#[tokio::test]
async fn unknown_order_is_404_and_bad_id_is_400() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    let res = with_ctx(
        client.get(format!(
            "{}/purchases/orders/{}",
            srv.base_url,
            uuid::Uuid::now_v7()
        )),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = with_ctx(
        client.get(format!("{}/purchases/orders/not-an-id", srv.base_url)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_bodies_are_validation_errors() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    let res = with_ctx(client.post(format!("{}/purchases/orders", srv.base_url)), &c)
        .json(&json!({
            "vendor_id": c.vendor.id.to_string(),
            "location_id": c.dock.id.to_string(),
            "lines": [{
                "part_id": c.part.id.to_string(),
                "quantity_ordered": 1,
                "unit_cost": "10",
            }],
            "charges": { "discount": { "kind": "bogus", "value": "5" } },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "validation_error");
    assert!(err["message"].as_str().unwrap().contains("bogus"));

    let res = with_ctx(client.post(format!("{}/inventory/adjustments", srv.base_url)), &c)
        .header("content-type", "application/json")
        .body("{\"part_id\":")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "validation_error");

    let res = with_ctx(
        client.get(format!("{}/inventory/transactions?type=bogus", srv.base_url)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_amounts_past_decimal_range_are_rejected() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    let res = with_ctx(client.post(format!("{}/purchases/orders", srv.base_url)), &c)
        .json(&json!({
            "vendor_id": c.vendor.id.to_string(),
            "location_id": c.dock.id.to_string(),
            "lines": [{
                "part_id": c.part.id.to_string(),
                "quantity_ordered": 1_000_000_000_000_000_000i64,
                "unit_cost": "100000000000000",
            }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "validation_error");

    // The server is still serving after the rejected request.
    let res = with_ctx(client.get(format!("{}/purchases/orders", srv.base_url)), &c)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn purchase_without_body_and_unknown_location_stock() {
    let (store, c) = seeded();
    let srv = TestServer::spawn(store).await;
    let client = reqwest::Client::new();

    let res = with_ctx(client.post(format!("{}/purchases/orders", srv.base_url)), &c)
        .json(&json!({
            "vendor_id": c.vendor.id.to_string(),
            "location_id": c.dock.id.to_string(),
            "lines": [{
                "part_id": c.part.id.to_string(),
                "quantity_ordered": 2,
                "unit_cost": "3",
            }],
        }))
        .send()
        .await
        .unwrap();
    let order: Value = res.json().await.unwrap();
    let id = order["id"].as_str().unwrap().to_string();

    let res = with_ctx(
        client.post(format!("{}/purchases/orders/{}/approve", srv.base_url, id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = with_ctx(
        client.post(format!("{}/purchases/orders/{}/purchase", srv.base_url, id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let purchased: Value = res.json().await.unwrap();
    assert_eq!(purchased["status"], "purchased");

    let res = with_ctx(
        client.get(format!(
            "{}/inventory/stock/{}/{}",
            srv.base_url,
            c.part.id,
            uuid::Uuid::now_v7()
        )),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = with_ctx(
        client.delete(format!("{}/inventory/locations/{}", srv.base_url, c.shelf.id)),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = with_ctx(
        client.get(format!(
            "{}/inventory/stock/{}/{}",
            srv.base_url, c.part.id, c.shelf.id
        )),
        &c,
    )
    .send()
    .await
    .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
