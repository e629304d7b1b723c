use thiserror::Error;
use url::Url;

/// Errors that can occur while validating a configured feed address.
#[derive(Error, Debug)]
pub enum FeedUrlError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component to connect to.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed address.
///
/// Feed addresses come from the operator's configuration, so only the shape
/// is checked: an absolute `http`/`https` URL with a host.
///
/// # Examples
///
/// ```
/// use newsroom::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// assert!(validate_feed_url("example.com/rss").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, FeedUrlError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(FeedUrlError::MissingHost),
    }
}

/// Derives a short label for a feed from its address.
///
/// Returns the host with any leading `www.` removed, or `"Unknown"` when the
/// address cannot be parsed or has no host.
pub fn display_name_from_url(url_str: &str) -> String {
    let host = Url::parse(url_str.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_owned));

    match host {
        Some(host) if !host.is_empty() => host
            .strip_prefix("www.")
            .map(str::to_owned)
            .unwrap_or(host),
        _ => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_feed_url("https://example.com/feed.xml").is_ok());
        assert!(validate_feed_url("http://news.example.org").is_ok());
        assert!(validate_feed_url("http://127.0.0.1:8080/rss").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd"),
            Err(FeedUrlError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_feed_url("ftp://example.com"),
            Err(FeedUrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_relative_url_rejected() {
        assert!(matches!(
            validate_feed_url("/rss.xml"),
            Err(FeedUrlError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_display_name_strips_www() {
        assert_eq!(
            display_name_from_url("https://www.theguardian.com/world/rss"),
            "theguardian.com"
        );
        assert_eq!(display_name_from_url("https://lenta.ru/rss"), "lenta.ru");
    }

    #[test]
    fn test_display_name_omits_port() {
        assert_eq!(display_name_from_url("http://127.0.0.1:9000/feed"), "127.0.0.1");
    }

    #[test]
    fn test_display_name_unknown_for_garbage() {
        assert_eq!(display_name_from_url(""), "Unknown");
        assert_eq!(display_name_from_url("mailto:someone@example.com"), "Unknown");
    }
}
