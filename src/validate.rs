use url::Url;

use crate::config::SUPPORTED_DOMAINS;
use crate::error::ApiError;

/// Validate a raw URL: must parse, use http/https, and point at one of the
/// supported platforms (exact host or subdomain). Returns the trimmed URL.
pub fn validate_url(input: &str) -> Result<String, ApiError> {
    let trimmed = input.trim();
    let parsed =
        Url::parse(trimmed).map_err(|_| ApiError::invalid_url("Invalid URL format"))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ApiError::invalid_url("Invalid URL format"));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ApiError::invalid_url("Invalid URL format"))?
        .to_ascii_lowercase();

    let supported = SUPPORTED_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")));

    if !supported {
        return Err(ApiError::unsupported_platform());
    }

    Ok(trimmed.to_string())
}

/// Sanitize a proposed filename: drop characters illegal in filenames,
/// remove path-traversal sequences, strip a leading dot, cap at 255 chars.
/// Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();

    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "");
    }

    let cleaned = cleaned.strip_prefix('.').unwrap_or(&cleaned);

    cleaned.chars().take(255).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn accepts_allowlisted_hosts_and_subdomains() {
        for url in [
            "https://www.youtube.com/watch?v=abc",
            "https://youtu.be/abc",
            "https://m.youtube.com/watch?v=abc",
            "https://music.youtube.com/watch?v=abc",
            "https://vt.tiktok.com/xyz",
            "https://vm.tiktok.com/xyz",
            "https://www.tiktok.com/@user/video/1",
            "https://www.instagram.com/reel/abc/",
            "https://fb.watch/abc/",
            "https://m.facebook.com/watch?v=1",
            "https://mobile.twitter.com/user/status/1",
            "https://x.com/user/status/1",
            "http://pin.it/abc",
            "https://www.pinterest.com/pin/1/",
        ] {
            assert!(validate_url(url).is_ok(), "expected accept: {url}");
        }
    }

    #[test]
    fn rejects_unsupported_hosts() {
        for url in [
            "https://example.com/video",
            "https://vimeo.com/123",
            "https://nottiktok.com/xyz",
            "https://tiktok.com.evil.net/xyz",
        ] {
            let error = validate_url(url).unwrap_err();
            assert_eq!(error.code, Some("UNSUPPORTED_PLATFORM"), "url: {url}");
        }
    }

    #[test]
    fn rejects_malformed_and_non_http() {
        for url in ["not a url", "ftp://youtube.com/x", "youtube.com/watch", ""] {
            let error = validate_url(url).unwrap_err();
            assert_eq!(error.status, StatusCode::BAD_REQUEST, "url: {url}");
            assert_eq!(error.code, Some("INVALID_URL"), "url: {url}");
        }
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(
            validate_url("  https://youtu.be/abc  ").unwrap(),
            "https://youtu.be/abc"
        );
    }

    #[test]
    fn strips_illegal_characters() {
        assert_eq!(sanitize_filename(r#"a<b>c:d"e/f\g|h?i*j"#), "abcdefghij");
    }

    #[test]
    fn removes_path_traversal() {
        assert!(!sanitize_filename("..a....b..").contains(".."));
        assert!(!sanitize_filename("a/../../etc/passwd").contains(".."));
    }

    #[test]
    fn strips_leading_dot() {
        assert!(!sanitize_filename(".hidden").starts_with('.'));
        assert!(!sanitize_filename("..hidden").starts_with('.'));
    }

    #[test]
    fn caps_length_at_255() {
        let long = "x".repeat(400);
        assert_eq!(sanitize_filename(&long).chars().count(), 255);
    }

    #[test]
    fn idempotent() {
        let long = "y".repeat(300);
        for input in [
            "normal title",
            ".leading",
            "a..b..c",
            r#"we/ird\chars?*"#,
            long.as_str(),
        ] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once, "input: {input}");
        }
    }
}
