//! Bucket name and entry key validation.
//!
//! Bucket names double as directory names for the local backend, so they are
//! held to the same rules as a single path component: no separators, no
//! traversal, no null bytes. Entry keys are opaque strings and only need to
//! be non-empty and free of null bytes.

use std::path::{Component, Path};

use crate::error::{ErrorKind, Result};

/// Validates a bucket name.
///
/// # Examples
///
/// ```
/// use shellsync_storage::validate_bucket;
/// assert!(validate_bucket("app-cache").is_ok());
/// assert!(validate_bucket("nested/cache").is_err());
/// assert!(validate_bucket("..").is_err());
/// assert!(validate_bucket("").is_err());
/// ```
pub fn validate_bucket(name: &str) -> Result<&str> {
    let invalid = || ErrorKind::InvalidName(name.to_string());
    if name.is_empty() || name.contains('\0') || name.contains('\\') {
        exn::bail!(invalid());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        // Trailing slashes are swallowed by Path::components(), catch them here.
        (Some(Component::Normal(s)), None) if s.len() == name.len() => Ok(name),
        _ => exn::bail!(invalid()),
    }
}

/// Validates an entry key.
///
/// ```
/// use shellsync_storage::validate_key;
/// assert!(validate_key("https://example.com/main.js").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("a\0b").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<&str> {
    // Null bytes cause truncation in C-based syscalls further down.
    if key.is_empty() || key.contains('\0') {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("app-cache")]
    #[case("flutter-temp-cache")]
    #[case("v1.2")]
    fn test_valid_bucket_names(#[case] name: &str) {
        assert_eq!(validate_bucket(name).unwrap(), name);
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("..")]
    #[case("a/b")]
    #[case("/abs")]
    #[case("trailing/")]
    #[case("back\\slash")]
    #[case("nul\0byte")]
    fn test_invalid_bucket_names(#[case] name: &str) {
        let err = validate_bucket(name).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidName(_)));
    }

    #[test]
    fn test_keys() {
        assert!(validate_key("/").is_ok());
        assert!(validate_key("https://example.com/#/route").is_ok());
        assert!(matches!(&*validate_key("").unwrap_err(), ErrorKind::InvalidKey(_)));
        assert!(matches!(&*validate_key("\0").unwrap_err(), ErrorKind::InvalidKey(_)));
    }
}
