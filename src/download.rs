use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ApiError;
use crate::validate::sanitize_filename;
use crate::ytdlp::{self, DOWNLOAD_TIMEOUT, InvokeError};

const SHORTENER_ENDPOINT: &str = "https://tinyurl.com/api-create.php";
const SHORTENER_TIMEOUT: Duration = Duration::from_secs(5);
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Video,
    Audio,
}

impl MediaFormat {
    /// Lenient query-parameter parsing: anything but "audio" means video.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("audio") => MediaFormat::Audio,
            _ => MediaFormat::Video,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl Quality {
    /// Lenient query-parameter parsing: unknown values fall back to best.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("720p") => Quality::P720,
            Some("1080p") => Quality::P1080,
            _ => Quality::Best,
        }
    }
}

/// Map (format, quality) to a yt-dlp format selector and the default output
/// extension, with fixed fallback precedence.
pub fn format_selector(format: MediaFormat, quality: Quality) -> (&'static str, &'static str) {
    match format {
        MediaFormat::Audio => ("bestaudio[ext=m4a]/bestaudio/best", "m4a"),
        MediaFormat::Video => match quality {
            Quality::P720 => (
                "best[height<=720][ext=mp4]/best[height<=720]/best[ext=mp4]/best",
                "mp4",
            ),
            Quality::P1080 => (
                "best[height<=1080][ext=mp4]/best[height<=1080]/best[ext=mp4]/best",
                "mp4",
            ),
            Quality::Best => ("best[ext=mp4]/best", "mp4"),
        },
    }
}

#[derive(Debug, Serialize)]
pub struct DownloadResult {
    /// Shortened public URL, or the plain one when shortening failed.
    pub url: String,
    pub title: String,
    pub filename: String,
    pub size: u64,
    pub format: MediaFormat,
    pub quality: Quality,
}

/// Final stored name: sanitized length-capped title plus the request id,
/// keeping the extension of whatever yt-dlp actually produced.
fn final_filename(title: &str, request_id: &str, extension: &str) -> String {
    let capped: String = title.chars().take(TITLE_MAX_CHARS).collect();
    let safe_title = sanitize_filename(&capped);
    format!("{safe_title}_{request_id}{extension}")
}

fn is_no_format_error(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("requested format is not available")
        || lower.contains("no video formats found")
}

/// Run the full download: fetch metadata, invoke yt-dlp into the temp
/// directory, move the result into the public downloads directory, and
/// build the (optionally shortened) public link.
pub async fn download_media(
    config: &Config,
    client: &reqwest::Client,
    url: &str,
    format: MediaFormat,
    quality: Quality,
) -> Result<DownloadResult, ApiError> {
    let media_info = ytdlp::fetch_media_info(url).await?;

    let (selector, default_extension) = format_selector(format, quality);
    let request_id = Uuid::new_v4().to_string();
    let output_template = config
        .temp_dir
        .join(format!("{request_id}.%(ext)s"))
        .to_string_lossy()
        .into_owned();

    let args = vec![
        "--format".to_string(),
        selector.to_string(),
        "--max-filesize".to_string(),
        config.max_file_size.clone(),
        "--output".to_string(),
        output_template,
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        url.to_string(),
    ];

    if let Err(error) = ytdlp::run(&args, DOWNLOAD_TIMEOUT, |_| Ok(())).await {
        cleanup_temp_files(config, &request_id).await;
        return Err(match error {
            InvokeError::TimedOut => ApiError::download_timeout(),
            InvokeError::Spawn(io) => ytdlp::spawn_error(io),
            InvokeError::Failed { stderr } if is_no_format_error(&stderr) => {
                ApiError::no_usable_format()
            }
            InvokeError::Failed { stderr } => ApiError::download_failed(stderr),
            InvokeError::Parse(message) => ApiError::internal(message),
        });
    }

    let downloaded = match find_temp_file(config, &request_id).await {
        Ok(Some(name)) => name,
        Ok(None) => return Err(ApiError::output_file_missing()),
        Err(error) => {
            cleanup_temp_files(config, &request_id).await;
            return Err(error);
        }
    };

    let extension = Path::new(&downloaded)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_else(|| format!(".{default_extension}"));

    let filename = final_filename(&media_info.title, &request_id, &extension);
    let temp_path = config.temp_dir.join(&downloaded);
    let final_path = config.downloads_dir.join(&filename);

    move_file(&temp_path, &final_path).await?;

    let size = fs::metadata(&final_path)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to stat stored file: {error}")))?
        .len();

    let public_url = format!(
        "{}/files/{}",
        config.base_url.trim_end_matches('/'),
        urlencoding::encode(&filename)
    );
    let url = match shorten_url(client, &public_url).await {
        Some(short) => short,
        None => public_url,
    };

    info!(filename = %filename, size, "download stored");

    Ok(DownloadResult {
        url,
        title: media_info.title,
        filename,
        size,
        format,
        quality,
    })
}

/// Locate the file yt-dlp produced for this request id. The extension is
/// chosen by yt-dlp, so we match on the id prefix.
async fn find_temp_file(config: &Config, request_id: &str) -> Result<Option<String>, ApiError> {
    let mut entries = fs::read_dir(&config.temp_dir).await.map_err(|error| {
        ApiError::internal(format!("Failed to read temp directory: {error}"))
    })?;

    while let Some(entry) = entries.next_entry().await.map_err(|error| {
        ApiError::internal(format!("Failed to read temp directory: {error}"))
    })? {
        let name = entry.file_name();
        if let Some(name) = name.to_str()
            && name.starts_with(request_id)
        {
            return Ok(Some(name.to_string()));
        }
    }

    Ok(None)
}

/// Best-effort removal of this request's temp files, so a timed-out or
/// failed download leaves nothing behind.
async fn cleanup_temp_files(config: &Config, request_id: &str) {
    let mut entries = match fs::read_dir(&config.temp_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            warn!("Failed to open temp directory for cleanup: {error}");
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(request_id)
            && let Err(error) = fs::remove_file(entry.path()).await
        {
            warn!("Failed to remove temp file {name}: {error}");
        }
    }
}

/// Move across filesystems: rename first, copy+remove when the temp and
/// downloads directories live on different devices.
async fn move_file(from: &Path, to: &Path) -> Result<(), ApiError> {
    if fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    fs::copy(from, to)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to store downloaded file: {error}")))?;
    if let Err(error) = fs::remove_file(from).await {
        warn!("Failed to remove temp file after copy: {error}");
    }
    Ok(())
}

/// TinyURL shortening. Any failure is swallowed; the caller falls back to
/// the plain URL.
async fn shorten_url(client: &reqwest::Client, long_url: &str) -> Option<String> {
    let response = client
        .get(SHORTENER_ENDPOINT)
        .query(&[("url", long_url)])
        .timeout(SHORTENER_TIMEOUT)
        .send()
        .await
        .map_err(|error| info!("URL shortening failed: {error}"))
        .ok()?;

    if !response.status().is_success() {
        info!("URL shortener returned status {}", response.status());
        return None;
    }

    let body = response.text().await.ok()?;
    let short = body.trim();
    if short.starts_with("http") {
        Some(short.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_selector_prefers_m4a() {
        for quality in [Quality::Best, Quality::P720, Quality::P1080] {
            let (selector, ext) = format_selector(MediaFormat::Audio, quality);
            assert_eq!(selector, "bestaudio[ext=m4a]/bestaudio/best");
            assert_eq!(ext, "m4a");
        }
    }

    #[test]
    fn video_selectors_cap_height_and_prefer_mp4() {
        let (selector, ext) = format_selector(MediaFormat::Video, Quality::P720);
        assert_eq!(
            selector,
            "best[height<=720][ext=mp4]/best[height<=720]/best[ext=mp4]/best"
        );
        assert_eq!(ext, "mp4");

        let (selector, _) = format_selector(MediaFormat::Video, Quality::P1080);
        assert_eq!(
            selector,
            "best[height<=1080][ext=mp4]/best[height<=1080]/best[ext=mp4]/best"
        );

        let (selector, ext) = format_selector(MediaFormat::Video, Quality::Best);
        assert_eq!(selector, "best[ext=mp4]/best");
        assert_eq!(ext, "mp4");
    }

    #[test]
    fn param_parsing_defaults() {
        assert_eq!(MediaFormat::from_param(None), MediaFormat::Video);
        assert_eq!(MediaFormat::from_param(Some("audio")), MediaFormat::Audio);
        assert_eq!(MediaFormat::from_param(Some("weird")), MediaFormat::Video);
        assert_eq!(Quality::from_param(None), Quality::Best);
        assert_eq!(Quality::from_param(Some("720p")), Quality::P720);
        assert_eq!(Quality::from_param(Some("4k")), Quality::Best);
    }

    #[test]
    fn quality_serializes_to_param_form() {
        assert_eq!(serde_json::to_string(&Quality::P720).unwrap(), "\"720p\"");
        assert_eq!(serde_json::to_string(&Quality::Best).unwrap(), "\"best\"");
        assert_eq!(
            serde_json::to_string(&MediaFormat::Audio).unwrap(),
            "\"audio\""
        );
    }

    #[test]
    fn final_filename_is_deterministic_and_collision_free() {
        let id_a = "11111111-1111-1111-1111-111111111111";
        let id_b = "22222222-2222-2222-2222-222222222222";

        let first = final_filename("My Video", id_a, ".mp4");
        assert_eq!(first, final_filename("My Video", id_a, ".mp4"));
        assert_eq!(first, format!("My Video_{id_a}.mp4"));

        // Identical titles never collide across requests.
        assert_ne!(first, final_filename("My Video", id_b, ".mp4"));
    }

    #[test]
    fn final_filename_caps_and_sanitizes_title() {
        let long_title = "a/b".repeat(60);
        let name = final_filename(&long_title, "id", ".mp4");
        assert!(!name.contains('/'));
        // 50 title chars, a third of which are slashes that get stripped.
        assert!(name.len() < 50 + "_id.mp4".len());
    }

    #[tokio::test]
    async fn cleanup_removes_only_this_requests_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            bind_addr: "127.0.0.1:3000".to_string(),
            base_url: "http://127.0.0.1:3000".to_string(),
            downloads_dir: dir.path().join("downloads"),
            temp_dir: dir.path().to_path_buf(),
            max_file_size: "100M".to_string(),
            retention: Duration::from_secs(3600),
            trust_proxy_headers: false,
            expose_error_detail: false,
        };

        let id = "33333333-3333-3333-3333-333333333333";
        std::fs::write(dir.path().join(format!("{id}.mp4.part")), b"partial").unwrap();
        std::fs::write(dir.path().join(format!("{id}.mp4")), b"partial").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"data").unwrap();

        cleanup_temp_files(&config, id).await;

        assert!(!dir.path().join(format!("{id}.mp4.part")).exists());
        assert!(!dir.path().join(format!("{id}.mp4")).exists());
        assert!(dir.path().join("other.mp4").exists());
    }

    #[test]
    fn no_format_stderr_maps_to_not_found() {
        assert!(is_no_format_error(
            "ERROR: Requested format is not available"
        ));
        assert!(is_no_format_error("error: no video formats found"));
        assert!(!is_no_format_error("ERROR: HTTP Error 403: Forbidden"));
    }
}
