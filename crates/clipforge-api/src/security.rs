//! Input validation for remote source URLs.
//!
//! Remote URLs reach a downloader subprocess, so they are validated at the
//! boundary: length, scheme, a blocked-pattern check for internal endpoints,
//! and a per-platform domain allowlist. Only a URL that passes all four is
//! stored on the project row.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;
use url::Url;

use clipforge_models::RemotePlatform;

/// Longest URL accepted at the boundary.
const MAX_URL_LENGTH: usize = 2048;

/// Patterns that must never be fetched: loopback, private and link-local
/// ranges, cloud metadata endpoints.
static BLOCKED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^https?://127\.").unwrap(),
        Regex::new(r"^https?://localhost").unwrap(),
        Regex::new(r"^https?://10\.").unwrap(),
        Regex::new(r"^https?://172\.(1[6-9]|2[0-9]|3[0-1])\.").unwrap(),
        Regex::new(r"^https?://192\.168\.").unwrap(),
        Regex::new(r"^https?://169\.254\.").unwrap(),
        Regex::new(r"^https?://\[::1\]").unwrap(),
        Regex::new(r"^https?://\[fd").unwrap(),
        Regex::new(r"^https?://\[fe80").unwrap(),
        Regex::new(r"^https?://metadata\.").unwrap(),
        Regex::new(r"^https?://169\.254\.169\.254").unwrap(),
    ]
});

/// Hosts accepted for each supported platform.
fn platform_domains(platform: RemotePlatform) -> &'static [&'static str] {
    match platform {
        RemotePlatform::Youtube => &[
            "youtube.com",
            "www.youtube.com",
            "m.youtube.com",
            "youtu.be",
        ],
        RemotePlatform::Bilibili => &["bilibili.com", "www.bilibili.com", "b23.tv"],
        RemotePlatform::Douyin => &["douyin.com", "www.douyin.com", "v.douyin.com"],
    }
}

/// Validate a remote source URL against the declared platform.
///
/// Returns the trimmed URL on success; the error string is safe to surface
/// to the caller.
pub fn validate_remote_url(url: &str, platform: RemotePlatform) -> Result<String, String> {
    if url.len() > MAX_URL_LENGTH {
        return Err(format!(
            "URL exceeds maximum length of {MAX_URL_LENGTH} characters"
        ));
    }

    let url = url.trim();
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    let parsed = Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(format!("unsupported scheme '{scheme}', use http or https")),
    }

    for pattern in BLOCKED_PATTERNS.iter() {
        if pattern.is_match(url) {
            warn!(%url, "blocked URL pattern detected");
            return Err("URL targets an internal or restricted endpoint".to_string());
        }
    }

    let host = parsed
        .host_str()
        .map(str::to_lowercase)
        .ok_or_else(|| "URL must have a host".to_string())?;
    if !host_matches(&host, platform_domains(platform)) {
        return Err(format!(
            "host '{host}' is not a known {} domain",
            platform.as_str()
        ));
    }

    Ok(url.to_string())
}

/// Direct match or a subdomain of an allowed host.
fn host_matches(host: &str, allowed: &[&str]) -> bool {
    allowed
        .iter()
        .any(|a| host == *a || host.ends_with(&format!(".{a}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_platform_urls() {
        assert!(validate_remote_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            RemotePlatform::Youtube
        )
        .is_ok());
        assert!(validate_remote_url("https://youtu.be/dQw4w9WgXcQ", RemotePlatform::Youtube).is_ok());
        assert!(
            validate_remote_url("https://www.bilibili.com/video/BV1xx411c7mD", RemotePlatform::Bilibili)
                .is_ok()
        );
        assert!(validate_remote_url("https://v.douyin.com/abc123/", RemotePlatform::Douyin).is_ok());
    }

    #[test]
    fn rejects_cross_platform_hosts() {
        assert!(validate_remote_url("https://www.youtube.com/watch?v=x", RemotePlatform::Bilibili)
            .is_err());
        assert!(validate_remote_url("https://evil.example.com/video.mp4", RemotePlatform::Youtube)
            .is_err());
        // A lookalike suffix is not a subdomain.
        assert!(validate_remote_url("https://notyoutube.com/watch", RemotePlatform::Youtube).is_err());
    }

    #[test]
    fn rejects_internal_endpoints() {
        for url in [
            "http://127.0.0.1/video.mp4",
            "http://localhost/video.mp4",
            "http://192.168.1.1/video.mp4",
            "http://169.254.169.254/latest/meta-data/",
            "http://metadata.google.internal/computeMetadata/v1/",
        ] {
            assert!(validate_remote_url(url, RemotePlatform::Youtube).is_err(), "{url}");
        }
    }

    #[test]
    fn rejects_bad_schemes_and_lengths() {
        assert!(validate_remote_url("ftp://youtube.com/video", RemotePlatform::Youtube).is_err());
        assert!(validate_remote_url("javascript:alert(1)", RemotePlatform::Youtube).is_err());
        assert!(validate_remote_url("", RemotePlatform::Youtube).is_err());

        let long = format!("https://youtube.com/watch?v={}", "a".repeat(MAX_URL_LENGTH));
        assert!(validate_remote_url(&long, RemotePlatform::Youtube).is_err());
    }

    #[test]
    fn subdomains_of_allowed_hosts_pass() {
        assert!(
            validate_remote_url("https://music.youtube.com/watch?v=x", RemotePlatform::Youtube)
                .is_ok()
        );
    }
}
