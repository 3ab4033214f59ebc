use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;

use crate::config::Config;
use crate::download::{self, DownloadResult, MediaFormat, Quality};
use crate::error::ApiError;
use crate::validate::{sanitize_filename, validate_url};
use crate::ytdlp::{self, MediaInfo};

const RATE_LIMIT_MAX_REQUESTS: usize = 50;
const RATE_LIMIT_WINDOW_MINUTES: i64 = 15;

pub type RateLimitMap = HashMap<String, Vec<DateTime<Utc>>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rate_limits: Arc<Mutex<RateLimitMap>>,
    pub http_client: reqwest::Client,
    pub started_at: Instant,
}

impl AppState {
    /// Strip internal failure detail from outgoing errors unless the
    /// deployment opted into exposing it.
    fn scrub(&self, error: ApiError) -> ApiError {
        if self.config.expose_error_detail {
            error
        } else {
            error.without_detail()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    url: Option<String>,
}

pub async fn info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> Result<Json<MediaInfo>, ApiError> {
    let url = query.url.as_deref().ok_or_else(ApiError::missing_url)?;
    let url = validate_url(url)?;

    let media_info = ytdlp::fetch_media_info(&url)
        .await
        .map_err(|error| state.scrub(error))?;

    Ok(Json(media_info))
}

#[derive(Debug, Deserialize)]
pub struct AlldlQuery {
    url: Option<String>,
    format: Option<String>,
    quality: Option<String>,
}

pub async fn alldl(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<AlldlQuery>,
) -> Result<Json<DownloadResult>, ApiError> {
    let client_ip = client_ip_for_request(&state, &headers, addr);
    register_request(&state, &client_ip).await?;

    let url = query.url.as_deref().ok_or_else(ApiError::missing_url)?;
    let url = validate_url(url)?;

    let format = MediaFormat::from_param(query.format.as_deref());
    let quality = Quality::from_param(query.quality.as_deref());

    let result = download::download_media(&state.config, &state.http_client, &url, format, quality)
        .await
        .map_err(|error| state.scrub(error))?;

    Ok(Json(result))
}

pub async fn serve_file(
    State(state): State<AppState>,
    axum::extract::Path(filename): axum::extract::Path<String>,
) -> Result<Response, ApiError> {
    // Stored names are already sanitized; anything that changes under
    // sanitization is not a name we ever handed out.
    if filename.is_empty() || sanitize_filename(&filename) != filename {
        return Err(ApiError::file_not_found());
    }

    let path = state.config.downloads_dir.join(&filename);
    let metadata = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(ApiError::file_not_found()),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return Err(ApiError::file_not_found());
        }
        Err(error) => {
            return Err(state.scrub(ApiError::internal(format!(
                "Failed to open stored file: {error}"
            ))));
        }
    };

    let file = tokio::fs::File::open(&path).await.map_err(|error| {
        state.scrub(ApiError::internal(format!(
            "Failed to open stored file: {error}"
        )))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("Failed to build Content-Length header"))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Failed to build Content-Disposition header"))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime": state.started_at.elapsed().as_secs_f64(),
    }))
}

pub async fn fallback() -> ApiError {
    ApiError::not_found()
}

/// Sliding-window per-IP limiter ahead of the download route.
async fn register_request(state: &AppState, ip: &str) -> Result<(), ApiError> {
    let now = Utc::now();
    let retry_after = {
        let mut rate_limits = state.rate_limits.lock().await;
        prune_expired(&mut rate_limits, now);
        let entries = rate_limits.entry(ip.to_string()).or_default();
        register_attempt(entries, now)
    };

    match retry_after {
        Some(seconds) => Err(ApiError::rate_limited(seconds)),
        None => Ok(()),
    }
}

/// Prune timestamps outside the window, then either record the attempt or
/// report how long until the oldest one expires.
fn register_attempt(entries: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) -> Option<u64> {
    let window_start = now - chrono::Duration::minutes(RATE_LIMIT_WINDOW_MINUTES);
    entries.sort();
    entries.retain(|timestamp| *timestamp > window_start);

    if entries.len() >= RATE_LIMIT_MAX_REQUESTS {
        let reset_at = entries
            .first()
            .copied()
            .map(|oldest| oldest + chrono::Duration::minutes(RATE_LIMIT_WINDOW_MINUTES))
            .unwrap_or_else(|| now + chrono::Duration::minutes(RATE_LIMIT_WINDOW_MINUTES));
        Some((reset_at - now).num_seconds().max(1) as u64)
    } else {
        entries.push(now);
        None
    }
}

/// Drop IPs whose recorded requests have all left the window, so the map
/// does not grow with every distinct client ever seen.
fn prune_expired(rate_limits: &mut RateLimitMap, now: DateTime<Utc>) {
    let window_start = now - chrono::Duration::minutes(RATE_LIMIT_WINDOW_MINUTES);
    rate_limits.retain(|_, entries| {
        entries.retain(|timestamp| *timestamp > window_start);
        !entries.is_empty()
    });
}

fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.config.trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
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

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')') {
                c
            } else {
                '_'
            }
        })
        .collect();

    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}
