use crate::config::GatewayConfig;
use crate::engine::SignalingEngine;
use crate::hub::BrowserHub;
use crate::metrics::GatewayMetrics;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct HttpState {
    pub hub: BrowserHub,
    pub engine: Option<SignalingEngine>,
    pub config: Arc<GatewayConfig>,
    pub metrics: Arc<GatewayMetrics>,
}

/// `/health` and `/` plus the browser-signaling WebSocket upgrade on
/// `/ws`. CORS (including `OPTIONS` preflight) is handled by the layer;
/// TLS is a fronting-listener concern.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<HttpState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| state.hub.handle_socket(socket))
}

async fn health(State(state): State<HttpState>) -> Json<Value> {
    let snapshot = state.metrics.snapshot();
    let call_count = state
        .engine
        .as_ref()
        .map(|engine| engine.active_calls())
        .unwrap_or_default();
    Json(json!({
        "status": "ok",
        "sslEnabled": state.config.enable_ssl,
        "sipGatewayEnabled": state.config.enable_sip_gateway,
        "peerCount": state.hub.peer_count(),
        "callCount": call_count,
        "relayMetrics": snapshot.relay,
        "metrics": snapshot,
    }))
}

async fn index(State(state): State<HttpState>) -> Html<String> {
    let call_count = state
        .engine
        .as_ref()
        .map(|engine| engine.active_calls())
        .unwrap_or_default();
    Html(format!(
        "<html><head><title>sipbridge</title></head><body>\
         <h1>sipbridge</h1>\
         <p>WebRTC &harr; SIP signaling gateway</p>\
         <ul>\
         <li>connected peers: {}</li>\
         <li>active calls: {}</li>\
         <li>SIP gateway: {}</li>\
         </ul>\
         </body></html>",
        state.hub.peer_count(),
        call_count,
        if state.config.enable_sip_gateway {
            "enabled"
        } else {
            "disabled"
        },
    ))
}
