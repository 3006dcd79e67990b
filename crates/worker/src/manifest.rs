//! Resource manifest: which resources make up a deployment, and the content
//! fingerprint of each one.
//!
//! Serialized as a flat JSON object, `{"index.html": "64df8e67...", ...}`,
//! both inside deployment descriptors and as the persisted record of the
//! last successful reconciliation.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Logical key of a resource: its path relative to the origin.
///
/// The site root is the sentinel key `/`. Every other key is stored without
/// a leading slash, so `"/main.js"` and `"main.js"` name the same resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Sentinel key of the site root.
    pub const ROOT: &'static str = "/";

    /// Normalize and validate a key.
    ///
    /// Leading slashes are stripped and an empty path becomes [`ROOT`](Self::ROOT).
    /// Fragments are never part of a resource's identity, so keys containing
    /// `#` are rejected, as are keys containing whitespace or null bytes.
    pub fn new(key: impl AsRef<str>) -> Result<Self> {
        let raw = key.as_ref();
        if raw.chars().any(|c| c == '#' || c == '\0' || c.is_whitespace()) {
            exn::bail!(ErrorKind::InvalidKey(raw.to_string()));
        }
        let trimmed = raw.trim_start_matches('/');
        match trimmed.is_empty() {
            true => Ok(Self::root()),
            false => Ok(Self(trimmed.to_string())),
        }
    }

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}
impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
impl TryFrom<String> for ResourceKey {
    type Error = ErrorKind;
    fn try_from(value: String) -> std::result::Result<Self, ErrorKind> {
        Self::new(value).map_err(|e| (*e).clone())
    }
}
impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.0
    }
}

/// Content fingerprint: an opaque token, usually a content hash.
///
/// Compared byte for byte, so `"AB"` and `"ab"` are different fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(fingerprint: impl AsRef<str>) -> Result<Self> {
        let raw = fingerprint.as_ref();
        if raw.is_empty() || raw.chars().any(|c| c == '\0' || c.is_whitespace()) {
            exn::bail!(ErrorKind::InvalidFingerprint(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}
impl TryFrom<String> for Fingerprint {
    type Error = ErrorKind;
    fn try_from(value: String) -> std::result::Result<Self, ErrorKind> {
        Self::new(value).map_err(|e| (*e).clone())
    }
}
impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

/// Mapping of every resource in a deployment to its content fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct ResourceManifest {
    resources: BTreeMap<ResourceKey, Fingerprint>,
}

impl ResourceManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a manifest from raw key/fingerprint pairs.
    ///
    /// Fails if any key or fingerprint is invalid, or if two raw keys
    /// normalize to the same [`ResourceKey`].
    pub fn from_pairs<K: AsRef<str>, F: AsRef<str>>(pairs: impl IntoIterator<Item = (K, F)>) -> Result<Self> {
        let mut manifest = Self::new();
        for (key, fingerprint) in pairs {
            let key = ResourceKey::new(key)?;
            let fingerprint = Fingerprint::new(fingerprint)?;
            if manifest.resources.contains_key(&key) {
                exn::bail!(ErrorKind::InvalidManifest(format!("duplicate key {key}")));
            }
            manifest.resources.insert(key, fingerprint);
        }
        Ok(manifest)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).or_raise(|| ErrorKind::InvalidManifest("malformed JSON".to_string()))
    }

    pub fn to_json(&self) -> Vec<u8> {
        let map: BTreeMap<String, String> = self.clone().into();
        // Serializing a map of strings into memory cannot fail.
        serde_json::to_vec(&map).unwrap_or_default()
    }

    /// Insert or replace a resource, returning the previous fingerprint.
    pub fn insert(&mut self, key: ResourceKey, fingerprint: Fingerprint) -> Option<Fingerprint> {
        self.resources.insert(key, fingerprint)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Fingerprint> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    /// Whether a cached copy of `key` made under `previous` is still valid
    /// under this manifest: the key must still be listed, with the exact same
    /// fingerprint.
    pub fn retains(&self, key: &ResourceKey, previous: &ResourceManifest) -> bool {
        match (self.get(key), previous.get(key)) {
            (Some(current), Some(old)) => current == old,
            _ => false,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ResourceKey, Fingerprint> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl TryFrom<BTreeMap<String, String>> for ResourceManifest {
    type Error = ErrorKind;
    fn try_from(map: BTreeMap<String, String>) -> std::result::Result<Self, ErrorKind> {
        Self::from_pairs(map).map_err(|e| (*e).clone())
    }
}
impl From<ResourceManifest> for BTreeMap<String, String> {
    fn from(manifest: ResourceManifest) -> Self {
        manifest.resources.into_iter().map(|(key, fingerprint)| (key.into(), fingerprint.into())).collect()
    }
}
impl<'a> IntoIterator for &'a ResourceManifest {
    type Item = (&'a ResourceKey, &'a Fingerprint);
    type IntoIter = btree_map::Iter<'a, ResourceKey, Fingerprint>;
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "/")]
    #[case("/", "/")]
    #[case("//", "/")]
    #[case("main.js", "main.js")]
    #[case("/main.js", "main.js")]
    #[case("assets/fonts/MaterialIcons-Regular.otf", "assets/fonts/MaterialIcons-Regular.otf")]
    #[case("main.js?v=2", "main.js?v=2")]
    fn test_key_normalization(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(ResourceKey::new(raw).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("/#/route")]
    #[case("index.html#top")]
    #[case("with space.js")]
    #[case("nul\0")]
    fn test_invalid_keys(#[case] raw: &str) {
        let err = ResourceKey::new(raw).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(_)));
    }

    #[test]
    fn test_root() {
        assert!(ResourceKey::root().is_root());
        assert!(ResourceKey::new("").unwrap().is_root());
        assert!(!ResourceKey::new("index.html").unwrap().is_root());
    }

    #[rstest]
    #[case("64df8e67309794b5d6b45a17bf758c03", true)]
    #[case("64DF8E67", true)]
    #[case("h1", true)]
    #[case("", false)]
    #[case("with space", false)]
    #[case("tab\t", false)]
    fn test_fingerprint(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(Fingerprint::new(raw).is_ok(), valid);
    }

    #[test]
    fn test_fingerprint_comparison_is_exact() {
        assert_eq!(Fingerprint::new("64DF8E67").unwrap().as_str(), "64DF8E67");
        assert_ne!(Fingerprint::new("AB").unwrap(), Fingerprint::new("ab").unwrap());
        let old = ResourceManifest::from_pairs([("a", "AB")]).unwrap();
        let new = ResourceManifest::from_pairs([("a", "ab")]).unwrap();
        assert_ne!(old, new);
        assert!(!new.retains(&ResourceKey::new("a").unwrap(), &old));
    }

    #[test]
    fn test_json() {
        let json = br#"{"index.html": "aa", "/": "bb", "assets/app.js": "cc"}"#;
        let manifest = ResourceManifest::from_json(json).unwrap();
        assert_eq!(manifest.len(), 3);
        assert!(manifest.contains(&ResourceKey::root()));
        assert_eq!(manifest.get(&ResourceKey::new("index.html").unwrap()).unwrap().as_str(), "aa");
        let reparsed = ResourceManifest::from_json(&manifest.to_json()).unwrap();
        assert_eq!(reparsed, manifest);
    }

    #[test]
    fn test_json_rejects_bad_input() {
        assert!(ResourceManifest::from_json(b"[1, 2]").is_err());
        assert!(ResourceManifest::from_json(br#"{"a.js": "z z"}"#).is_err());
        // Both keys normalize to "a.js".
        assert!(ResourceManifest::from_json(br#"{"a.js": "aa", "/a.js": "bb"}"#).is_err());
    }

    #[test]
    fn test_retains() {
        let old = ResourceManifest::from_pairs([("a", "01"), ("b", "02"), ("c", "03")]).unwrap();
        let new = ResourceManifest::from_pairs([("a", "01"), ("b", "ff"), ("d", "04")]).unwrap();
        let key = |k: &str| ResourceKey::new(k).unwrap();
        // Unchanged.
        assert!(new.retains(&key("a"), &old));
        // Changed fingerprint.
        assert!(!new.retains(&key("b"), &old));
        // Removed from the new manifest.
        assert!(!new.retains(&key("c"), &old));
        // Newly added: there's no old copy to retain.
        assert!(!new.retains(&key("d"), &old));
    }
}
