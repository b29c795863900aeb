use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AppState, DOWNLOAD_ID_HEADER, client_ip_for_request, non_empty};
use crate::{
    error::ApiError,
    fetch::{FetchRequest, MediaKind, VideoInfo},
    video_id::parse_video_url,
};

pub const DEFAULT_QUALITY: &str = "720p";

#[derive(Debug, Deserialize)]
pub(super) struct VideoQuery {
    url: Option<String>,
    quality: Option<String>,
}

impl VideoQuery {
    fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }
}

/// Metadata lookups only honor maintenance mode; they never use a download slot.
pub(super) async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Result<Json<VideoInfo>, ApiError> {
    if !state.admission.mode().is_service_enabled() {
        return Err(ApiError::maintenance());
    }

    let video = parse_video_url(query.url())?;
    let mut info = state.fetcher.probe(&video.url).await.map_err(|error| {
        warn!("Metadata lookup failed for {}: {error}", video.video_id);
        ApiError::from(error)
    })?;
    if info.video_id.is_empty() {
        info.video_id = video.video_id;
    }

    Ok(Json(info))
}

pub(super) async fn download_video(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    let quality = query
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(DEFAULT_QUALITY)
        .to_string();

    if !state.admission.settings().get().allows_quality(&quality) {
        return Err(ApiError::bad_request(format!(
            "Quality {quality:?} is not available."
        )));
    }

    serve_download(&state, addr, &headers, query.url(), MediaKind::Video { quality }).await
}

/// One-click download with no quality picker: the default tier when it is
/// allowed, otherwise the first allowed tier.
pub(super) async fn quick_download(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    let settings = state.admission.settings().get();
    let quality = if settings.allows_quality(DEFAULT_QUALITY) {
        DEFAULT_QUALITY.to_string()
    } else {
        settings
            .allowed_qualities
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_QUALITY.to_string())
    };

    serve_download(&state, addr, &headers, query.url(), MediaKind::Video { quality }).await
}

pub(super) async fn download_audio(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<VideoQuery>,
) -> Result<Response, ApiError> {
    serve_download(&state, addr, &headers, query.url(), MediaKind::Audio).await
}

async fn serve_download(
    state: &AppState,
    addr: SocketAddr,
    headers: &HeaderMap,
    url: &str,
    kind: MediaKind,
) -> Result<Response, ApiError> {
    let video = parse_video_url(url)?;
    let client_ip = client_ip_for_request(state, headers, addr);

    state
        .admission
        .admit(&client_ip, &video.video_id, Utc::now())
        .into_result()?;
    state.stats.record_admitted();

    let download_id = Uuid::new_v4();
    let request = FetchRequest {
        url: video.url,
        video_id: video.video_id,
        kind,
        max_file_size_bytes: state.admission.settings().get().max_file_size_bytes(),
    };
    info!(
        "Download {download_id} started for {} ({:?}) by {client_ip}",
        request.video_id, request.kind
    );

    let media = match state.fetcher.stream(&request).await {
        Ok(media) => media,
        Err(error) => {
            state.stats.record_failure();
            warn!("Download {download_id} failed for {}: {error}", request.video_id);
            return Err(error.into());
        }
    };

    let stats = Arc::clone(&state.stats);
    let video_id = request.video_id.clone();
    let finished = media.finished;
    tokio::spawn(async move {
        match finished.await {
            Ok(Ok(())) => {
                stats.record_success();
                info!("Download {download_id} completed for {video_id}");
            }
            Ok(Err(error)) => {
                stats.record_failure();
                warn!("Download {download_id} stopped early for {video_id}: {error}");
            }
            Err(_) => {
                stats.record_failure();
                warn!("Download {download_id} for {video_id} ended without an outcome");
            }
        }
    });

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(media.content_type));
    response_headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&media.filename))
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    response_headers.insert(
        HeaderName::from_static(DOWNLOAD_ID_HEADER),
        HeaderValue::from_str(&download_id.to_string())
            .map_err(|_| ApiError::internal("Could not build the download id header."))?,
    );

    let body = Body::from_stream(ReaderStream::new(media.reader));
    Ok((response_headers, body).into_response())
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
                character
            } else {
                '_'
            }
        })
        .collect::<String>();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}
