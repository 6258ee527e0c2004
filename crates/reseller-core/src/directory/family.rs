//! Static suffix → registry family table

use serde::{Deserialize, Serialize};
use std::fmt;

/// Registry implementation behind a suffix, selecting protocol extensions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryFamily(String);

impl RegistryFamily {
    /// Family used by every suffix without special handling
    pub const GENERIC: &'static str = "generic";

    /// Create a family identifier, normalized to lower case
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// The generic family
    pub fn generic() -> Self {
        Self(Self::GENERIC.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_generic(&self) -> bool {
        self.0 == Self::GENERIC
    }
}

impl fmt::Display for RegistryFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const FAMILY_TABLE: &[(&str, &str)] = &[
    ("fr", "fr"),
    ("pm", "fr"),
    ("re", "fr"),
    ("tf", "fr"),
    ("wf", "fr"),
    ("yt", "fr"),
    ("hr", "hr"),
    ("lt", "lt"),
    ("eu", "eu"),
    ("gr", "gr"),
    ("ελ", "gr"),
    ("cz", "fred"),
    ("ua", "ua"),
    ("se", "se"),
    ("nu", "se"),
    ("hk", "hk"),
    ("pl", "pl"),
    ("mx", "mx"),
    ("lv", "lv"),
    ("no", "no"),
    ("pt", "pt"),
    ("it", "it"),
    ("fi", "fi"),
    ("jp", "jp"),
    ("com", "vrsn"),
    ("net", "vrsn"),
];

fn lookup(label: &str) -> Option<&'static str> {
    FAMILY_TABLE
        .iter()
        .find(|(key, _)| *key == label)
        .map(|(_, family)| *family)
}

/// Normalize a suffix: trimmed, lower case, no leading or trailing dot
pub fn normalize_suffix(suffix: &str) -> String {
    suffix
        .trim()
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_lowercase()
}

/// Map a top-level suffix (with or without leading dot) to its registry family
///
/// A multi-label suffix such as `com.pl` belongs to the family of its last
/// label when that label is a two-letter country code in the table.
pub fn resolve_registry_family(suffix: &str) -> RegistryFamily {
    let suffix = normalize_suffix(suffix);

    if let Some(family) = lookup(&suffix) {
        return RegistryFamily::new(family);
    }

    if let Some((_, last)) = suffix.rsplit_once('.')
        && last.chars().count() == 2
        && let Some(family) = lookup(last)
    {
        return RegistryFamily::new(family);
    }

    RegistryFamily::generic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overseas_french_suffixes_share_a_family() {
        for tld in ["fr", ".pm", "RE", "tf", "wf", "yt"] {
            assert_eq!(resolve_registry_family(tld).as_str(), "fr", "{}", tld);
        }
    }

    #[test]
    fn special_families() {
        assert_eq!(resolve_registry_family(".cz").as_str(), "fred");
        assert_eq!(resolve_registry_family("nu").as_str(), "se");
        assert_eq!(resolve_registry_family("ελ").as_str(), "gr");
        assert_eq!(resolve_registry_family("com").as_str(), "vrsn");
        assert_eq!(resolve_registry_family(".fi").as_str(), "fi");
    }

    #[test]
    fn unknown_suffixes_are_generic() {
        assert!(resolve_registry_family("test").is_generic());
        assert!(resolve_registry_family("co.uk").is_generic());
        assert!(resolve_registry_family("").is_generic());
    }

    #[test]
    fn second_level_suffix_follows_country_label() {
        assert_eq!(resolve_registry_family("com.pl").as_str(), "pl");
        assert_eq!(resolve_registry_family(".co.jp").as_str(), "jp");
        // `net` is a three-letter label, so only exact matches count
        assert!(resolve_registry_family("example.net").is_generic());
    }
}
