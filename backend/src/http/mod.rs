//! HTTP surface: download routes gated by the admission controller, plus the
//! admin panel API.

mod admin;
mod download;

use std::{collections::HashSet, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    http::{HeaderMap, HeaderName, HeaderValue, Method, header::CONTENT_DISPOSITION},
    routing::{delete, get, post},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::{
    admission::AdmissionController,
    config::{AdminCredentials, normalize_origin},
    fetch::MediaFetcher,
    stats::DownloadStats,
};

pub const DOWNLOAD_ID_HEADER: &str = "x-download-id";

#[derive(Clone)]
pub struct AppState {
    pub admission: Arc<AdmissionController>,
    pub stats: Arc<DownloadStats>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub admin: Option<Arc<AdminCredentials>>,
    pub trust_proxy_headers: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/test", get(health))
        .route("/api/video-info", get(download::video_info))
        .route("/api/download", get(download::download_video))
        .route("/api/download-audio", get(download::download_audio))
        .route("/api/quick-download", get(download::quick_download))
        .route("/api/admin/stats", get(admin::stats))
        .route("/api/admin/settings", post(admin::update_settings))
        .route("/api/admin/block-video", post(admin::block_video))
        .route("/api/admin/block-video/{video_id}", delete(admin::unblock_video))
        .route("/api/admin/reset-stats", post(admin::reset_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `origins` must already be normalized (see [`normalize_origin`]).
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed_origins = Arc::new(origins.iter().cloned().collect::<HashSet<_>>());
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        origins
    );

    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!("CORS origin check raw={origin:?} normalized={normalized:?} allowed={allowed}");
        allowed
    });

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_ID_HEADER),
        ])
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for")
        && let Some(first_ip) = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    {
        return Some(first_ip.to_string());
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
