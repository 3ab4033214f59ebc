use std::io::ErrorKind;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::non_empty;
use crate::error::ApiError;

pub const INFO_TIMEOUT: Duration = Duration::from_secs(30);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Failure classification for one yt-dlp invocation, decided before the
/// caller converts it into an API error.
#[derive(Debug)]
pub enum InvokeError {
    TimedOut,
    Spawn(std::io::Error),
    Failed { stderr: String },
    Parse(String),
}

/// Spawn yt-dlp with the given arguments, wait at most `limit`, and feed
/// stdout to `parse`. The child is killed when the timeout fires.
pub async fn run<T, F>(args: &[String], limit: Duration, parse: F) -> Result<T, InvokeError>
where
    F: FnOnce(&[u8]) -> Result<T, String>,
{
    let mut command = Command::new("yt-dlp");
    command.args(args).kill_on_drop(true);

    let output = timeout(limit, command.output())
        .await
        .map_err(|_| InvokeError::TimedOut)?
        .map_err(InvokeError::Spawn)?;

    if !output.status.success() {
        return Err(InvokeError::Failed {
            stderr: stderr_tail(&output.stderr),
        });
    }

    parse(&output.stdout).map_err(InvokeError::Parse)
}

/// Last non-empty stderr line, which is where yt-dlp puts its actual error.
pub fn stderr_tail(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string()
}

pub fn spawn_error(error: std::io::Error) -> ApiError {
    if error.kind() == ErrorKind::NotFound {
        ApiError::internal("yt-dlp is not installed on this system")
    } else {
        ApiError::internal(format!("Failed to run yt-dlp: {error}"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    pub title: String,
    pub description: String,
    /// Seconds; passed through verbatim from the extractor.
    pub duration: Option<serde_json::Number>,
    pub uploader: String,
    pub thumbnail: Option<String>,
    /// Number of formats the extractor reported.
    pub formats: usize,
}

#[derive(Debug, Deserialize)]
struct RawMediaInfo {
    title: Option<String>,
    description: Option<String>,
    duration: Option<serde_json::Number>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    #[serde(default)]
    formats: Vec<serde_json::Value>,
}

/// Parse the first JSON line of `--dump-json` output into a `MediaInfo`,
/// substituting defaults for absent fields.
pub fn parse_media_info(stdout: &[u8]) -> Result<MediaInfo, String> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| "empty yt-dlp output".to_string())?;

    let raw: RawMediaInfo = serde_json::from_str(line).map_err(|error| error.to_string())?;

    Ok(MediaInfo {
        title: raw
            .title
            .as_deref()
            .and_then(non_empty)
            .unwrap_or("Unknown")
            .to_string(),
        description: raw.description.unwrap_or_default(),
        duration: raw.duration,
        uploader: raw
            .uploader
            .as_deref()
            .and_then(non_empty)
            .unwrap_or("Unknown")
            .to_string(),
        thumbnail: raw.thumbnail,
        formats: raw.formats.len(),
    })
}

/// Metadata-only invocation: `--dump-json --no-download`, 30s limit.
pub async fn fetch_media_info(url: &str) -> Result<MediaInfo, ApiError> {
    let args = vec![
        "--dump-json".to_string(),
        "--no-download".to_string(),
        "--no-warnings".to_string(),
        url.to_string(),
    ];

    run(&args, INFO_TIMEOUT, parse_media_info)
        .await
        .map_err(|error| match error {
            InvokeError::TimedOut => ApiError::timeout(),
            InvokeError::Spawn(io) => spawn_error(io),
            InvokeError::Failed { stderr } => ApiError::extraction_failed(stderr),
            InvokeError::Parse(_) => ApiError::malformed_metadata(),
        })
}
