use axum::{
    routing::{get, post},
    Router,
};
use log::info;
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::api::{self, AppState};
use crate::error::DataKitError;

pub struct WebServer {
    host: String,
    port: u16,
    state: AppState,
}

impl WebServer {
    pub fn new(host: String, port: u16, state: AppState) -> Self {
        Self { host, port, state }
    }

    pub async fn start(self) -> Result<(), DataKitError> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| DataKitError::Error(format!("Invalid address: {}", e)))?;

        let app = create_router(self.state);

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DataKitError::Error(format!("Failed to bind to {}: {}", addr, e)))?;

        println!("datakit server listening on http://{}", addr);
        info!("Server ready to handle requests on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                info!("Shutdown signal received, stopping server");
                println!("\nShutdown signal received - stopping server gracefully...");
            })
            .await
            .map_err(|e| DataKitError::Error(format!("Server error: {}", e)))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // App info
        .route("/api/app-info", get(api::app::get_app_info))
        // Collection endpoints
        .route(
            "/api/collections/{name}/fetch",
            post(api::collections::fetch_collection),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Waits for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            log::info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            log::info!("Received SIGTERM");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SqliteCollection;
    use crate::demo;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(count: usize) -> Router {
        let coll = SqliteCollection::open_in_memory(demo::USERS).unwrap();
        demo::seed_users(&coll, count).unwrap();
        create_router(demo::app_state(coll, 100))
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_owned()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let response = router(0)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }

    #[tokio::test]
    async fn test_fetch_envelope() {
        let (status, body) = post_json(
            router(25),
            "/api/collections/users/fetch",
            r#"{"action":"FETCH","page":2,"limit":10,"sorts":[{"path":"age","value":-1}]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "ITEMS");
        assert_eq!(body["documentTotal"], 25);
        assert_eq!(body["items"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_fetch_error_statuses() {
        let (status, body) =
            post_json(router(1), "/api/collections/nope/fetch", r#"{"page":1,"limit":1}"#).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Collection not found: 'nope'"}));

        let (status, body) = post_json(
            router(1),
            "/api/collections/users/fetch",
            r#"{"page":1,"limit":500}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("limit"));

        let (status, body) = post_json(
            router(1),
            "/api/collections/users/fetch",
            r#"{"page":1,"limit":5,"filter":{"email":"x"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "[Security] Filter field 'email' is not allowed.");

        let (status, _) =
            post_json(router(1), "/api/collections/users/fetch", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
