use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::dispatcher::{EventDispatcher, WebhookRequest, WebhookResponse};

pub fn router(dispatcher: Arc<EventDispatcher>, webhook_path: &str) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route(webhook_path, post(webhook));
    if webhook_path != "/webhook" {
        app = app.route("/webhook", post(webhook));
    }
    app.with_state(dispatcher)
}

async fn health() -> &'static str {
    "ok"
}

async fn webhook(
    State(dispatcher): State<Arc<EventDispatcher>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request = WebhookRequest {
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    };

    match dispatcher.handle(&request).await {
        Ok(response) => into_http(response),
        Err(e) => {
            error!("Webhook invocation failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn into_http(response: WebhookResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code()).unwrap_or(StatusCode::OK);
    match response.body() {
        Some(body) => (status, Json(body)).into_response(),
        None => status.into_response(),
    }
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(dispatcher: Arc<EventDispatcher>, config: &ServerConfig) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!(
        "Listening for webhooks on http://{}{}",
        config.bind_address, config.webhook_path
    );

    axum::serve(listener, router(dispatcher, &config.webhook_path))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Webhook server failed")
}
