use bytes::Bytes;

/// How a request interacts with HTTP-level caches between us and the origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CacheMode {
    /// Let intermediaries answer from their caches as usual.
    #[default]
    Default,
    /// Bypass every HTTP cache and revalidate with the origin, the equivalent
    /// of the browser's `{cache: 'reload'}`.
    Reload,
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FetchOptions {
    pub cache: CacheMode,
}
impl FetchOptions {
    /// Options for a forced, cache-bypassing fetch.
    pub fn reload() -> Self {
        Self { cache: CacheMode::Reload }
    }
}

/// A completed network exchange, or a response rebuilt from cached bytes.
///
/// The body is [`Bytes`] so that handing one copy to the caller and another
/// to a cache is a reference count bump, not a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// URL the response was obtained for
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Value of the `Content-Type` header, if any
    pub content_type: Option<String>,
    pub body: Bytes,
}
impl Response {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            content_type: None,
            body: body.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_success() {
        assert!(Response::new("u", 200, "ok").is_success());
        assert!(Response::new("u", 204, "").is_success());
        assert!(!Response::new("u", 304, "").is_success());
        assert!(!Response::new("u", 404, "missing").is_success());
    }

    #[test]
    fn test_reload_options() {
        assert_eq!(FetchOptions::default().cache, CacheMode::Default);
        assert_eq!(FetchOptions::reload().cache, CacheMode::Reload);
    }
}
