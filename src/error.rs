use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

/// API-facing error: an HTTP status, a human-readable message, a stable
/// machine code, and optional underlying detail (stripped in production).
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
    pub detail: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code: Some(code),
            detail: None,
            retry_after_seconds: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "INVALID_URL")
    }

    pub fn unsupported_platform() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "Unsupported URL. Supported platforms: TikTok, YouTube, Instagram, Facebook, X/Twitter, Pinterest",
            "UNSUPPORTED_PLATFORM",
        )
    }

    pub fn missing_url() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "Missing required parameter: url",
            "INVALID_URL",
        )
    }

    pub fn timeout() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Request timeout",
            "TIMEOUT",
        )
    }

    pub fn extraction_failed(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to get media info",
            "EXTRACTION_FAILED",
        )
        .with_detail(detail)
    }

    pub fn malformed_metadata() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to parse media info",
            "MALFORMED_METADATA",
        )
    }

    pub fn download_timeout() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Download timeout",
            "DOWNLOAD_TIMEOUT",
        )
    }

    pub fn download_failed(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Download failed",
            "DOWNLOAD_FAILED",
        )
        .with_detail(detail)
    }

    pub fn no_usable_format() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "Content not found or unavailable",
            "NO_USABLE_FORMAT",
        )
    }

    pub fn output_file_missing() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Downloaded file not found",
            "OUTPUT_FILE_MISSING",
        )
    }

    pub fn file_not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "File not found", "NOT_FOUND")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "Endpoint not found", "NOT_FOUND")
    }

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        let mut error = Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, please try again later",
            "RATE_LIMITED",
        );
        error.retry_after_seconds = Some(retry_after_seconds);
        error
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            "INTERNAL_ERROR",
        )
        .with_detail(detail)
    }

    /// Strip underlying detail before the error leaves the process.
    /// Used when EXPOSE_ERROR_DETAIL is off.
    pub fn without_detail(mut self) -> Self {
        self.detail = None;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            message: self.detail,
            retry_after_seconds: self.retry_after_seconds,
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(
            ApiError::invalid_url("Invalid URL format").status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::unsupported_platform().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::missing_url().status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_content_is_not_found() {
        assert_eq!(ApiError::no_usable_format().status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn process_failures_are_internal() {
        for error in [
            ApiError::timeout(),
            ApiError::extraction_failed("boom"),
            ApiError::malformed_metadata(),
            ApiError::download_timeout(),
            ApiError::download_failed("boom"),
            ApiError::output_file_missing(),
        ] {
            assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn without_detail_strips_detail_only() {
        let error = ApiError::download_failed("stderr tail").without_detail();
        assert!(error.detail.is_none());
        assert_eq!(error.code, Some("DOWNLOAD_FAILED"));
    }
}
