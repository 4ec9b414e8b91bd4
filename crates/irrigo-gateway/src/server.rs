//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post},
};
use irrigo_core::{IrrigoConfig, Result};
use irrigo_scheduler::dispatch::PlatformNotifier;
use irrigo_scheduler::notify::NotificationCenter;
use irrigo_scheduler::{
    CommunityBoard, CompletionHandler, CostLedger, DueScanner, IrrigationDb, KvStore, SharedNotifications,
    SmsSender, SoilMoistureLog,
};
use std::sync::{Arc, MutexGuard};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
pub struct AppState {
    pub config: IrrigoConfig,
    pub start_time: std::time::Instant,
    pub db: Arc<IrrigationDb>,
    pub notifications: SharedNotifications,
    pub scanner: Arc<DueScanner>,
    pub completion: Arc<CompletionHandler>,
    pub soil: Arc<SoilMoistureLog>,
    pub costs: Arc<CostLedger>,
    pub community: Arc<CommunityBoard>,
}

impl AppState {
    /// Wire every service from its collaborators. Built once at startup.
    pub fn new(
        config: IrrigoConfig,
        db: Arc<IrrigationDb>,
        kv: Arc<dyn KvStore>,
        sms: Arc<dyn SmsSender>,
        platform: Arc<dyn PlatformNotifier>,
    ) -> Self {
        let offset = config.scheduler.offset();
        let notifications =
            NotificationCenter::load(kv.clone(), platform, &config.notifications.storage_key).shared();
        let scanner = Arc::new(DueScanner::new(
            db.clone(),
            notifications.clone(),
            sms,
            &config.scheduler,
        ));
        let completion = Arc::new(CompletionHandler::new(
            db.clone(),
            db.clone(),
            notifications.clone(),
            offset,
        ));
        Self {
            soil: Arc::new(SoilMoistureLog::new(kv.clone(), config.soil.low_moisture_percent, offset)),
            costs: Arc::new(CostLedger::new(kv.clone())),
            community: Arc::new(CommunityBoard::new(kv)),
            start_time: std::time::Instant::now(),
            config,
            db,
            notifications,
            scanner,
            completion,
        }
    }

    /// Lock the notification center. A poisoned lock is recovered; every
    /// mutation is a single step, so the list is never left half-written.
    pub fn notifications(&self) -> MutexGuard<'_, NotificationCenter> {
        self.notifications.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    use super::routes;

    Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/v1/farms", get(routes::list_farms).post(routes::create_farm))
        .route("/api/v1/crops", post(routes::create_crop))
        .route("/api/v1/schedules", get(routes::list_schedules).post(routes::create_schedule))
        .route("/api/v1/schedules/{id}", axum::routing::delete(routes::delete_schedule))
        .route("/api/v1/schedules/{id}/active", post(routes::set_schedule_active))
        .route("/api/v1/schedules/{id}/complete", post(routes::complete_schedule))
        .route("/api/v1/schedules/{id}/logs", get(routes::schedule_logs))
        .route("/api/v1/notifications", get(routes::list_notifications))
        .route("/api/v1/notifications/read-all", post(routes::mark_all_notifications_read))
        .route("/api/v1/notifications/{id}/read", post(routes::mark_notification_read))
        .route("/api/v1/scan", post(routes::run_scan))
        .route("/api/v1/soil-readings", get(routes::list_soil_readings).post(routes::record_soil_reading))
        .route("/api/v1/costs", get(routes::list_costs).post(routes::add_cost))
        .route("/api/v1/costs/{id}", axum::routing::delete(routes::delete_cost))
        .route("/api/v1/posts", get(routes::list_posts).post(routes::create_post))
        .route("/api/v1/posts/{id}", get(routes::get_post).delete(routes::delete_post))
        .route("/api/v1/posts/{id}/like", post(routes::like_post))
        .route("/ws", get(super::ws::ws_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", state.config.gateway.host, state.config.gateway.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("Gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_router_health() {
        let state = crate::routes::tests::test_state().0;
        let app = build_router(state);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_router_notifications_route() {
        let state = crate::routes::tests::test_state().0;
        let app = build_router(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/notifications/read-all")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_router_post_by_id_routes() {
        let state = crate::routes::tests::test_state().0;
        let app = build_router(state);
        for method in ["GET", "DELETE"] {
            let resp = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/api/v1/posts/missing")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{method}");
        }
        let resp = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/costs/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["deleted"], false);
    }
}
