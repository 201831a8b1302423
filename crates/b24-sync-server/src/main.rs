mod bitrix;
mod config;
mod form;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::bitrix::{BitrixClient, RemoteCall};
use crate::config::Config;

#[derive(Clone)]
struct AppState {
    remote: Arc<dyn RemoteCall>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::parse();
    info!(base = %config.masked_webhook_base(), "bitrix24 webhook base configured");

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("build reqwest client")?;

    let state = AppState {
        remote: Arc::new(BitrixClient::new(http, config.normalized_webhook_base())),
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(healthz))
        .route("/healthz", get(healthz))
        .route("/bitrix24/outgoing", get(healthz).post(bitrix24_outgoing))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Bitrix24 retries outbound webhooks on any non-2xx answer, so every
/// terminal state here — including remote failures — maps to 200 with a
/// short status token. The token and a structured log line are the only
/// places the outcome is visible.
async fn bitrix24_outgoing(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let payload = parse_event_body(&headers, &body);
    match sync::process(state.remote.as_ref(), &payload).await {
        Ok(sync::Outcome::Renamed { task_id, title }) => {
            info!(task_id, title = %title, "subtask renamed");
            (StatusCode::OK, "renamed".to_string())
        }
        Ok(outcome) => {
            info!(outcome = outcome.token(), "task event processed");
            (StatusCode::OK, outcome.token().to_string())
        }
        Err(err) => {
            error!(error = %err, "task title sync failed");
            (StatusCode::OK, format!("error: {err}"))
        }
    }
}

/// Bitrix24 delivers either JSON or form-urlencoded bodies depending on
/// how the outbound webhook is configured, so sniff before decoding. An
/// undecodable body degrades to an empty object; the extractor then
/// answers `no taskId` and the sender still gets its 200.
fn parse_event_body(headers: &HeaderMap, body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Object(Default::default());
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let looks_like_json = content_type.contains("json")
        || body.first() == Some(&b'{')
        || body.first() == Some(&b'[');
    if looks_like_json {
        match serde_json::from_slice(body) {
            Ok(v) => return v,
            Err(err) => warn!(error = %err, "invalid json payload; trying form decoding"),
        }
    }
    form::parse_form_payload(body).unwrap_or_else(|| {
        warn!("undecodable event payload; treating as empty");
        Value::Object(Default::default())
    })
}
