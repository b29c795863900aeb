//! Admin panel API. Every handler authenticates with HTTP Basic credentials
//! configured through `ADMIN_USERNAME` / `ADMIN_PASSWORD`.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, header::AUTHORIZATION},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::AppState;
use crate::{
    error::ApiError,
    settings::{Settings, SettingsUpdate},
    stats::StatsSnapshot,
    video_id::{is_valid_video_id, parse_video_url},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AdminStats {
    #[serde(flatten)]
    counters: StatsSnapshot,
    settings: Settings,
    blocked_videos: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AdminStatsResponse {
    stats: AdminStats,
    /// Clients currently tracked by the rate limiter.
    rate_limit: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct SettingsResponse {
    success: bool,
    settings: Settings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BlockRequest {
    video_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BlockResponse {
    success: bool,
    video_id: String,
    /// `false` when the video was already blocked.
    blocked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UnblockResponse {
    success: bool,
    video_id: String,
    removed: bool,
}

pub(super) async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AdminStatsResponse>, ApiError> {
    require_admin(&state, &headers)?;

    let admission = &state.admission;
    Ok(Json(AdminStatsResponse {
        stats: AdminStats {
            counters: state.stats.snapshot(),
            settings: Settings::clone(&admission.settings().get()),
            blocked_videos: admission.block_list().blocked(),
        },
        rate_limit: admission.rate_limiter().active_identities(),
    }))
}

pub(super) async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SettingsResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let update: SettingsUpdate = parse_body(&body)?;

    if update.is_empty() {
        return Err(ApiError::bad_request("No settings were provided."));
    }

    let settings = state.admission.settings().update(update)?;
    Ok(Json(SettingsResponse {
        success: true,
        settings: Settings::clone(&settings),
    }))
}

pub(super) async fn block_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<BlockResponse>, ApiError> {
    require_admin(&state, &headers)?;
    let request: BlockRequest = parse_body(&body)?;

    let video_id = resolve_video_id(&request.video_id)?;
    let blocked = state.admission.block_list().block(&video_id);
    Ok(Json(BlockResponse {
        success: true,
        video_id,
        blocked,
    }))
}

pub(super) async fn unblock_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(video_id): Path<String>,
) -> Result<Json<UnblockResponse>, ApiError> {
    require_admin(&state, &headers)?;

    let video_id = resolve_video_id(&video_id)?;
    let removed = state.admission.block_list().unblock(&video_id);
    Ok(Json(UnblockResponse {
        success: true,
        video_id,
        removed,
    }))
}

pub(super) async fn reset_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    state.stats.reset();
    info!("Download statistics reset");
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Bodies are read raw so that credentials are checked before the payload.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|error| ApiError::invalid_body(error.to_string()))
}

/// Accepts a bare video id or any supported video URL.
fn resolve_video_id(input: &str) -> Result<String, ApiError> {
    let input = input.trim();
    if is_valid_video_id(input) {
        return Ok(input.to_string());
    }

    parse_video_url(input)
        .map(|video| video.video_id)
        .map_err(|_| ApiError::bad_request("Please enter a valid video ID or URL."))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.admin.as_deref() else {
        return Err(ApiError::unauthorized("The admin panel is not configured."));
    };

    let (username, password) = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_basic_credentials)
        .ok_or_else(|| ApiError::unauthorized("Admin credentials are required."))?;

    if digest_eq(&username, &expected.username) & digest_eq(&password, &expected.password) {
        Ok(())
    } else {
        warn!("Rejected admin request for user {username:?}");
        Err(ApiError::unauthorized("Invalid credentials."))
    }
}

fn parse_basic_credentials(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn digest_eq(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_header() {
        let header = format!("Basic {}", general_purpose::STANDARD.encode("admin:pa:ss"));
        assert_eq!(
            parse_basic_credentials(&header),
            Some(("admin".to_string(), "pa:ss".to_string()))
        );
        assert_eq!(parse_basic_credentials("Bearer abc"), None);
        assert_eq!(parse_basic_credentials("Basic !!!"), None);
        assert_eq!(
            parse_basic_credentials(&format!("Basic {}", general_purpose::STANDARD.encode("nocolon"))),
            None
        );
    }

    #[test]
    fn resolves_ids_and_urls() {
        assert_eq!(resolve_video_id(" dQw4w9WgXcQ ").unwrap(), "dQw4w9WgXcQ");
        assert_eq!(
            resolve_video_id("https://youtu.be/dQw4w9WgXcQ").unwrap(),
            "dQw4w9WgXcQ"
        );
        assert!(resolve_video_id("").is_err());
        assert!(resolve_video_id("not a video").is_err());
    }

    #[test]
    fn malformed_bodies_are_bad_requests() {
        let error = parse_body::<SettingsUpdate>(br#"{"rateLimit": -1}"#).unwrap_err();
        assert_eq!(error.status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Some("INVALID_BODY"));

        assert!(parse_body::<BlockRequest>(b"{not json").is_err());
        assert!(parse_body::<BlockRequest>(b"").is_err());
        let request = parse_body::<BlockRequest>(br#"{"videoId": "dQw4w9WgXcQ"}"#).unwrap();
        assert_eq!(request.video_id, "dQw4w9WgXcQ");
    }
}
