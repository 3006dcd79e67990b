//! Mapping between request URLs, cache entry keys and logical resource keys.

use crate::error::{ErrorKind, Result};
use crate::manifest::ResourceKey;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Scheme and authority the application is served from, without a trailing
/// slash, e.g. `https://app.example.com`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    /// Parse an origin, accepting (and dropping) trailing slashes.
    ///
    /// ```
    /// use shellsync_worker::Origin;
    /// assert_eq!(Origin::parse("https://App.Example.com/").unwrap().as_str(), "https://app.example.com");
    /// assert!(Origin::parse("https://example.com/app").is_err());
    /// assert!(Origin::parse("example.com").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || ErrorKind::InvalidOrigin(raw.to_string());
        let trimmed = raw.trim().trim_end_matches('/');
        let Some(authority) = trimmed.strip_prefix("https://").or_else(|| trimmed.strip_prefix("http://")) else {
            exn::bail!(invalid());
        };
        if authority.is_empty() || authority.contains(['/', '?', '#']) || authority.chars().any(char::is_whitespace) {
            exn::bail!(invalid());
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identity a request is cached under.
    ///
    /// Scheme and host are case-insensitive and lowercased, and fragments
    /// never distinguish cache entries. The bare origin and any
    /// fragment-anchored root URL (`origin/#/route`) are the site root,
    /// `origin/`.
    pub fn request_identity(&self, url: &str) -> String {
        let url = normalize_authority(url);
        if self.is_root_url(&url) {
            return format!("{}/", self.0);
        }
        let identity = url.split_once('#').map_or(url.as_str(), |(head, _fragment)| head);
        identity.to_string()
    }

    /// Logical resource key for a request URL (or a cache entry key).
    ///
    /// Returns `None` for URLs outside this origin or whose path is not a
    /// valid [`ResourceKey`], which includes any non-root URL carrying a
    /// fragment. The bare origin, `origin/` and `origin/#...` all map to the
    /// root sentinel.
    pub fn logical_key(&self, url: &str) -> Option<ResourceKey> {
        let url = normalize_authority(url);
        if self.is_root_url(&url) {
            return Some(ResourceKey::root());
        }
        let path = url.strip_prefix(self.0.as_str())?.strip_prefix('/')?;
        ResourceKey::new(path).ok()
    }

    fn is_root_url(&self, url: &str) -> bool {
        match url.strip_prefix(self.0.as_str()) {
            Some(rest) => rest.is_empty() || rest == "/" || rest.starts_with("/#"),
            None => false,
        }
    }

    /// Absolute URL of a resource, which is also its cache entry key.
    pub fn url_for(&self, key: &ResourceKey) -> String {
        match key.is_root() {
            true => format!("{}/", self.0),
            false => format!("{}/{}", self.0, key),
        }
    }
}

/// Lowercase the scheme and host of a URL, leaving the rest untouched.
fn normalize_authority(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(end);
    format!("{}://{}{}", scheme.to_ascii_lowercase(), authority.to_ascii_lowercase(), tail)
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ORIGIN: &str = "https://app.example.com";

    fn origin() -> Origin {
        Origin::parse(ORIGIN).unwrap()
    }

    #[rstest]
    #[case("https://app.example.com")]
    #[case("https://app.example.com/")]
    #[case("http://localhost:8080")]
    #[case("  https://app.example.com//  ")]
    fn test_parse_valid(#[case] raw: &str) {
        assert!(Origin::parse(raw).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("https://")]
    #[case("ftp://app.example.com")]
    #[case("https://app.example.com/sub")]
    #[case("https://app.example.com?x=1")]
    #[case("https://app .example.com")]
    fn test_parse_invalid(#[case] raw: &str) {
        let err = Origin::parse(raw).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidOrigin(_)));
    }

    #[rstest]
    #[case("https://app.example.com", Some("/"))]
    #[case("https://app.example.com/", Some("/"))]
    #[case("https://app.example.com/#/", Some("/"))]
    #[case("https://app.example.com/#/settings/profile", Some("/"))]
    #[case("https://app.example.com#top", None)]
    #[case("https://app.example.com/index.html", Some("index.html"))]
    #[case("https://app.example.com/assets/app.js", Some("assets/app.js"))]
    #[case("https://app.example.com/main.js#sourcemap", None)]
    #[case("https://App.Example.com/main.js", Some("main.js"))]
    #[case("HTTPS://APP.EXAMPLE.COM/#/route", Some("/"))]
    #[case("https://App.Example.com/Main.js", Some("Main.js"))]
    #[case("https://app.example.com/main.js?v=2", Some("main.js?v=2"))]
    #[case("https://cdn.example.com/main.js", None)]
    #[case("https://app.example.community/main.js", None)]
    #[case("https://app.example.com/with space", None)]
    fn test_logical_key(#[case] url: &str, #[case] expected: Option<&str>) {
        assert_eq!(origin().logical_key(url).as_ref().map(ResourceKey::as_str), expected);
    }

    #[rstest]
    #[case("https://app.example.com", "https://app.example.com/")]
    #[case("https://app.example.com/#/route", "https://app.example.com/")]
    #[case("https://app.example.com/main.js", "https://app.example.com/main.js")]
    #[case("https://cdn.example.com/x.js#y", "https://cdn.example.com/x.js")]
    #[case("https://App.Example.com/main.js", "https://app.example.com/main.js")]
    #[case("https://app.example.com/Main.js?Q=1", "https://app.example.com/Main.js?Q=1")]
    fn test_request_identity(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(origin().request_identity(url), expected);
    }

    #[test]
    fn test_url_for_round_trips_through_logical_key() {
        let origin = origin();
        for raw in ["/", "index.html", "assets/fonts/a.otf"] {
            let key = ResourceKey::new(raw).unwrap();
            let url = origin.url_for(&key);
            assert_eq!(origin.logical_key(&url), Some(key));
        }
        assert_eq!(origin.url_for(&ResourceKey::root()), "https://app.example.com/");
    }
}
