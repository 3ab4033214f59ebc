use std::path::PathBuf;
use std::time::Duration;

/// Platforms we hand off to yt-dlp. Subdomains (www., m., music., ...) of
/// every entry are accepted as well.
pub const SUPPORTED_DOMAINS: [&str; 12] = [
    "tiktok.com",
    "vt.tiktok.com",
    "vm.tiktok.com",
    "youtube.com",
    "youtu.be",
    "instagram.com",
    "facebook.com",
    "fb.watch",
    "twitter.com",
    "x.com",
    "pinterest.com",
    "pin.it",
];

const DEFAULT_MAX_FILE_SIZE: &str = "100M";
const DEFAULT_RETENTION_HOURS: u64 = 1;

/// Runtime configuration, built once at startup from the environment and
/// passed to every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Base URL used to build public file links, e.g. "https://dl.example.com".
    pub base_url: String,
    pub downloads_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Passed verbatim to yt-dlp's --max-filesize.
    pub max_file_size: String,
    /// Age after which stored files are eligible for deletion.
    pub retention: Duration,
    pub trust_proxy_headers: bool,
    /// When true, error responses carry the underlying failure detail.
    pub expose_error_detail: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let bind_addr = resolve_bind_addr();
        let base_url = read_env("BASE_URL").unwrap_or_else(|| format!("http://{bind_addr}"));
        let downloads_dir = read_env("DOWNLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("downloads"));
        let temp_dir = read_env("TEMP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let max_file_size =
            read_env("MAX_FILE_SIZE").unwrap_or_else(|| DEFAULT_MAX_FILE_SIZE.to_string());
        let retention_hours = read_env("FILE_RETENTION_HOURS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_RETENTION_HOURS);

        Self {
            bind_addr,
            base_url,
            downloads_dir,
            temp_dir,
            max_file_size,
            retention: Duration::from_secs(retention_hours * 3600),
            trust_proxy_headers: read_bool_env("TRUST_PROXY_HEADERS").unwrap_or(false),
            expose_error_detail: read_bool_env("EXPOSE_ERROR_DETAIL").unwrap_or(false),
        }
    }
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_env("APP_ADDR") {
        return configured;
    }

    if let Some(port) = read_env("PORT").and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    "127.0.0.1:3000".to_string()
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .and_then(|value| non_empty(&value).map(ToString::to_string))
}

fn read_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}
