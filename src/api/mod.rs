//! API layer - HTTP handlers and routing
//!
//! Admin endpoints live under `/api/v1/admin` behind the bearer-token guard.
//! The only public endpoint is the recommended feed.

pub mod common;
pub mod entities;
pub mod middleware;
pub mod recommended;
pub mod settings;
pub mod stats;
pub mod users;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use middleware::{ApiError, AppState};

/// Build the API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    let admin_routes = Router::new()
        .merge(entities::router())
        .nest("/recommended", recommended::admin_router())
        .merge(stats::router())
        .merge(settings::router())
        .merge(users::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_admin_token,
        ));

    Router::new()
        .nest("/recommended", recommended::public_router())
        .nest("/admin", admin_routes)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if cors_origin == "*" {
        return cors.allow_origin(Any);
    }
    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            warn!(cors_origin, "invalid CORS origin, cross-origin requests disabled");
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .nest("/api/v1", build_api_router(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origin)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::migrated_test_pool;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const TOKEN: &str = "test-admin-token";

    async fn app_with_token(token: Option<&str>) -> Router {
        let mut config = Config::default();
        config.admin.token = token.map(str::to_string);
        let state = AppState::new(migrated_test_pool().await, &config);
        build_router(state, "*")
    }

    async fn app() -> Router {
        app_with_token(Some(TOKEN)).await
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_user(app: &Router, email: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/admin/users",
            Some(json!({ "email": email, "name": "Tamar" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_i64().unwrap()
    }

    async fn submit_listing(app: &Router, user_id: i64) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/v1/admin/entities",
            Some(json!({
                "kind": "listing",
                "user_id": user_id,
                "price": 65000,
                "area": 41.5,
                "rooms": 2
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        assert_eq!(body["status"], "pending_moderation");
        body["id"].as_i64().unwrap()
    }

    async fn active_listing(app: &Router, user_id: i64) -> i64 {
        let id = submit_listing(app, user_id).await;
        let (status, _) = send(
            app,
            "POST",
            &format!("/api/v1/admin/entities/listings/{}/approve", id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        id
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let app = app().await;
        let request = Request::builder()
            .uri("/api/v1/admin/stats")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/api/v1/admin/stats")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_locked_without_configured_token() {
        let app = app_with_token(None).await;
        let (status, body) = send(&app, "GET", "/api/v1/admin/stats", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        // The public feed stays open
        let (status, _) = send(&app, "GET", "/api/v1/recommended", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reject_hides_recommended_listing() {
        let app = app().await;
        let user_id = create_user(&app, "seller@example.com").await;
        let listing = active_listing(&app, user_id).await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/v1/admin/recommended",
            Some(json!({ "listing_id": listing })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, feed) = send(&app, "GET", "/api/v1/recommended", None).await;
        assert_eq!(feed["items"].as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/admin/entities/listing/{}/reject", listing),
            Some(json!({ "reason": "wrong district" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["rejection_reason"], "wrong district");

        let (_, feed) = send(&app, "GET", "/api/v1/recommended", None).await;
        assert!(feed["items"].as_array().unwrap().is_empty());

        let (_, admin) = send(&app, "GET", "/api/v1/admin/recommended", None).await;
        assert_eq!(admin["items"][0]["stale"], true);

        let (_, available) = send(&app, "GET", "/api/v1/admin/recommended/available", None).await;
        assert!(available["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_domain_errors_map_to_statuses() {
        let app = app().await;
        let user_id = create_user(&app, "seller@example.com").await;
        let pending = submit_listing(&app, user_id).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/admin/recommended",
            Some(json!({ "listing_id": pending })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "NOT_ELIGIBLE");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/admin/entities/listings/{}/status", pending),
            Some(json!({ "status": "inactive" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INVALID_TRANSITION");

        let (status, _) = send(&app, "GET", "/api/v1/admin/entities/bicycles", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "DELETE", "/api/v1/admin/recommended/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let active = active_listing(&app, user_id).await;
        send(
            &app,
            "POST",
            "/api/v1/admin/recommended",
            Some(json!({ "listing_id": active })),
        )
        .await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/admin/recommended",
            Some(json!({ "listing_id": active })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_RECOMMENDED");
    }

    #[tokio::test]
    async fn test_random_mode_needs_confirmation_over_manual_entries() {
        let app = app().await;
        let user_id = create_user(&app, "seller@example.com").await;
        let mut listings = Vec::new();
        for _ in 0..3 {
            listings.push(active_listing(&app, user_id).await);
        }
        send(
            &app,
            "POST",
            "/api/v1/admin/recommended",
            Some(json!({ "listing_id": listings[0] })),
        )
        .await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/admin/recommended/random",
            Some(json!({ "enabled": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFIRMATION_REQUIRED");
        assert_eq!(body["error"]["details"]["manual_entries"], 1);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/admin/recommended/random",
            Some(json!({ "enabled": true, "confirm": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], true);
        assert_eq!(body["items"].as_array().unwrap().len(), 3);

        let (_, settings) = send(&app, "GET", "/api/v1/admin/settings", None).await;
        assert_eq!(settings["recommended_random_mode"], true);

        let (status, body) = send(&app, "POST", "/api/v1/admin/recommended/restore", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["items"][0]["listing"]["id"], listings[0]);
    }

    #[tokio::test]
    async fn test_stats_settings_and_users() {
        let app = app().await;
        let user_id = create_user(&app, "buyer@example.com").await;

        let (status, stats) = send(&app, "GET", "/api/v1/admin/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["users"]["total"], 1);
        assert_eq!(stats["users"]["active_percent"], 100);

        let (status, body) = send(
            &app,
            "PUT",
            "/api/v1/admin/settings",
            Some(json!({ "free_listings_per_month": -3 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/v1/admin/users/{}/block", user_id),
            Some(json!({ "reason": "chargeback" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["is_blocked"], true);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/v1/admin/users/{}/block", user_id),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, blocked) = send(&app, "GET", "/api/v1/admin/users?blocked=true", None).await;
        assert_eq!(blocked["total"], 1);

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/v1/admin/users/{}/limits", user_id),
            Some(json!({ "listings_limit": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["listings_limit"], 0);
    }
}
