// ============================================================================
// HTTP Surface
// ============================================================================
//
// Thin actix-web layer over `OrderCommandHandler`. Authentication happens
// upstream; the caller's id arrives in `X-User-Id` and is trusted as-is.
//
// ============================================================================

mod error;

use std::str::FromStr;

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::order::{ChangeStatus, CheckoutSource, OrderCommandHandler, OrderStatus, PlaceOrder};
use crate::health;

pub use error::ApiError;

pub const USER_ID_HEADER: &str = "X-User-Id";

const DEFAULT_BACKFILL_LIMIT: i64 = 100;
const MAX_BACKFILL_LIMIT: i64 = 1000;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/orders", web::post().to(place_order))
        .route("/orders/{id}", web::get().to(get_order))
        .route("/orders/{id}", web::delete().to(delete_order))
        .route("/orders/{id}/status", web::put().to(change_status))
        .route("/orders/{id}/settle", web::post().to(settle_order))
        .route("/vendors/{id}/earnings", web::get().to(vendor_earnings))
        .route("/admin/commissions/summary", web::get().to(commission_summary))
        .route("/admin/settlements/backfill", web::post().to(settle_outstanding))
        .route("/metrics", web::get().to(metrics))
        .route("/health", web::get().to(health_check));
}

fn caller_id(req: &HttpRequest) -> Result<Uuid, ApiError> {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or(ApiError::Unauthenticated)
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
    #[serde(default)]
    pub status_notes: Option<String>,
    /// Optional precondition on the current status.
    #[serde(default)]
    pub expected_status: Option<String>,
}

async fn change_status(
    req: HttpRequest,
    handler: web::Data<OrderCommandHandler>,
    path: web::Path<Uuid>,
    body: web::Json<StatusRequest>,
) -> Result<HttpResponse, ApiError> {
    let caller = caller_id(&req)?;
    let order_id = path.into_inner();
    let body = body.into_inner();
    let target = OrderStatus::from_str(&body.status).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let expected_from = body
        .expected_status
        .as_deref()
        .map(OrderStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::debug!(caller = %caller, order_id = %order_id, target = %target, "Status change requested");

    let outcome = handler
        .apply_transition(ChangeStatus {
            order_id,
            target,
            notes: body.status_notes,
            expected_from,
        })
        .await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// `{product_id, quantity}` buys one product directly; `{}` or
/// `{"from_cart": true}` checks out the caller's cart.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CheckoutRequest {
    pub product_id: Option<Uuid>,
    pub quantity: Option<i32>,
    pub from_cart: Option<bool>,
}

impl CheckoutRequest {
    fn into_source(self) -> Result<CheckoutSource, ApiError> {
        match (self.product_id, self.from_cart.unwrap_or(false)) {
            (Some(_), true) => Err(ApiError::BadRequest(
                "product_id cannot be combined with from_cart".to_string(),
            )),
            (Some(product_id), false) => {
                let quantity = self
                    .quantity
                    .ok_or_else(|| ApiError::BadRequest("quantity is required".to_string()))?;
                Ok(CheckoutSource::Direct { product_id, quantity })
            }
            (None, _) => Ok(CheckoutSource::Cart),
        }
    }
}

async fn place_order(
    req: HttpRequest,
    handler: web::Data<OrderCommandHandler>,
    body: web::Json<CheckoutRequest>,
) -> Result<HttpResponse, ApiError> {
    let buyer_id = caller_id(&req)?;
    let source = body.into_inner().into_source()?;

    let outcome = handler.checkout(PlaceOrder { buyer_id, source }).await?;
    Ok(HttpResponse::Created().json(outcome))
}

async fn get_order(
    handler: web::Data<OrderCommandHandler>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let order = handler.get_order(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

async fn delete_order(
    req: HttpRequest,
    handler: web::Data<OrderCommandHandler>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    caller_id(&req)?;
    handler.delete_order(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ============================================================================
// Settlement
// ============================================================================

async fn settle_order(
    req: HttpRequest,
    handler: web::Data<OrderCommandHandler>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    caller_id(&req)?;
    let outcome = handler.settle_order(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct BackfillQuery {
    pub limit: Option<i64>,
}

async fn settle_outstanding(
    req: HttpRequest,
    handler: web::Data<OrderCommandHandler>,
    query: web::Query<BackfillQuery>,
) -> Result<HttpResponse, ApiError> {
    caller_id(&req)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_BACKFILL_LIMIT)
        .clamp(1, MAX_BACKFILL_LIMIT);
    let report = handler.settle_outstanding(limit).await?;
    Ok(HttpResponse::Ok().json(report))
}

async fn vendor_earnings(
    handler: web::Data<OrderCommandHandler>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let summary = handler.vendor_payout_summary(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(summary))
}

async fn commission_summary(handler: web::Data<OrderCommandHandler>) -> Result<HttpResponse, ApiError> {
    let summary = handler.commission_summary().await?;
    Ok(HttpResponse::Ok().json(summary))
}

// ============================================================================
// Operations
// ============================================================================

async fn metrics(handler: web::Data<OrderCommandHandler>) -> Result<HttpResponse, ApiError> {
    let body = handler.metrics().encode_text()?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(body))
}

async fn health_check(handler: web::Data<OrderCommandHandler>) -> HttpResponse {
    let report = health::check(handler.store().as_ref(), handler.notifications()).await;
    if report.status.is_unhealthy() {
        HttpResponse::ServiceUnavailable().json(report)
    } else {
        HttpResponse::Ok().json(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::order::{CartLine, Order, Product};
    use crate::domain::settlement::SettlementEngine;
    use crate::metrics::CoreMetrics;
    use crate::notifications::{LogNotifier, NotificationDispatcher};
    use crate::store::MemoryStore;
    use crate::utils::CircuitBreakerConfig;

    fn handler_for(store: &MemoryStore) -> web::Data<OrderCommandHandler> {
        let metrics = Arc::new(CoreMetrics::new().unwrap());
        let notifications = NotificationDispatcher::new(
            Arc::new(LogNotifier),
            CircuitBreakerConfig::default(),
            metrics.clone(),
        );
        web::Data::new(OrderCommandHandler::new(
            Arc::new(store.clone()),
            SettlementEngine::default(),
            notifications,
            metrics,
            Duration::from_secs(5),
        ))
    }

    async fn seed_product(store: &MemoryStore, stock: i32) -> Product {
        let product = Product {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            name: "Broiler chicks".to_string(),
            price: dec!(5.00),
            stock_quantity: stock,
            is_active: true,
        };
        store.seed_product(product.clone()).await;
        product
    }

    #[actix_web::test]
    async fn test_status_change_requires_caller() {
        let store = MemoryStore::new();
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{}/status", Uuid::new_v4()))
            .set_json(serde_json::json!({"status": "confirmed"}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_invalid_transition_is_conflict() {
        let store = MemoryStore::new();
        let product = seed_product(&store, 10).await;
        let order = Order::place("ORD-HTTP", Uuid::new_v4(), &product, 1, Utc::now());
        store.seed_order(order.clone()).await;
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{}/status", order.id))
            .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
            .set_json(serde_json::json!({"status": "shipped"}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "invalid_transition");
    }

    #[actix_web::test]
    async fn test_unknown_status_is_bad_request() {
        let store = MemoryStore::new();
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri(&format!("/orders/{}/status", Uuid::new_v4()))
            .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
            .set_json(serde_json::json!({"status": "refunded"}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_direct_checkout_created() {
        let store = MemoryStore::new();
        let product = seed_product(&store, 10).await;
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header((USER_ID_HEADER, Uuid::new_v4().to_string()))
            .set_json(serde_json::json!({"product_id": product.id, "quantity": 3}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["orders"].as_array().unwrap().len(), 1);
        assert_eq!(store.product(product.id).await.unwrap().stock_quantity, 7);
    }

    #[actix_web::test]
    async fn test_cart_checkout_insufficient_stock() {
        let store = MemoryStore::new();
        let product = seed_product(&store, 1).await;
        let buyer_id = Uuid::new_v4();
        store
            .add_to_cart(buyer_id, CartLine { product_id: product.id, quantity: 2 })
            .await;
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header((USER_ID_HEADER, buyer_id.to_string()))
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "insufficient_stock");
        assert_eq!(store.cart(buyer_id).await.len(), 1);
    }

    #[actix_web::test]
    async fn test_missing_order_is_not_found() {
        let store = MemoryStore::new();
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let req = test::TestRequest::get()
            .uri(&format!("/orders/{}", Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_health_and_metrics() {
        let store = MemoryStore::new();
        let app = test::init_service(App::new().app_data(handler_for(&store)).configure(configure)).await;

        let health = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(health.status(), StatusCode::OK);

        let metrics = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        assert_eq!(metrics.status(), StatusCode::OK);
    }

    #[::core::prelude::v1::test]
    fn test_checkout_request_sources() {
        let product_id = Uuid::new_v4();

        let direct = CheckoutRequest {
            product_id: Some(product_id),
            quantity: Some(2),
            from_cart: None,
        };
        assert_eq!(
            direct.into_source().unwrap(),
            CheckoutSource::Direct { product_id, quantity: 2 }
        );

        assert_eq!(CheckoutRequest::default().into_source().unwrap(), CheckoutSource::Cart);

        let missing_quantity = CheckoutRequest {
            product_id: Some(product_id),
            ..Default::default()
        };
        assert!(missing_quantity.into_source().is_err());
    }
}
