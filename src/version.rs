//! Package versions as served by legacy feeds.
//!
//! Feeds emit versions with one to four numeric components, an optional
//! dot-separated prerelease label and optional build metadata
//! (`1.0.0.1-beta.2+sha.abc`). Ordering follows SemVer 2.0 precedence with
//! a fourth `revision` component and case-insensitive label comparison.
//! Build metadata never participates in ordering or equality.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when a version string cannot be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Input was empty or whitespace only.
    #[error("Version string is empty")]
    Empty,
    /// The numeric part had fewer than one or more than four components.
    #[error("Invalid version '{0}': expected 1 to 4 numeric components")]
    ComponentCount(String),
    /// A numeric component was not a non-negative integer.
    #[error("Invalid version '{0}': numeric component '{1}' is not a number")]
    NotNumeric(String, String),
    /// A prerelease or metadata label contained an invalid character or empty part.
    #[error("Invalid version '{0}': malformed label '{1}'")]
    Label(String, String),
}

/// A NuGet-style package version.
#[derive(Debug, Clone)]
pub struct NuGetVersion {
    major: u64,
    minor: u64,
    patch: u64,
    revision: u64,
    release_labels: Vec<String>,
    metadata: Option<String>,
    original: String,
}

impl NuGetVersion {
    /// Builds a stable version from its numeric parts.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        let original = format!("{major}.{minor}.{patch}");
        Self {
            major,
            minor,
            patch,
            revision: 0,
            release_labels: Vec::new(),
            metadata: None,
            original,
        }
    }

    /// Parses a version, returning `None` instead of an error.
    ///
    /// Used for optional fields where an unparseable value means "absent".
    pub fn try_parse(input: &str) -> Option<Self> {
        input.parse().ok()
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Dot-joined prerelease label, empty for stable versions.
    pub fn release(&self) -> String {
        self.release_labels.join(".")
    }

    pub fn metadata(&self) -> Option<&str> {
        self.metadata.as_deref()
    }

    pub fn is_prerelease(&self) -> bool {
        !self.release_labels.is_empty()
    }

    /// The string exactly as it was parsed.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Normalized form: three components (four when the revision is
    /// non-zero), the prerelease label, and no build metadata.
    ///
    /// This is the form used when a version is embedded in a query URL.
    pub fn to_normalized_string(&self) -> String {
        let mut out = format!("{}.{}.{}", self.major, self.minor, self.patch);
        if self.revision > 0 {
            out.push('.');
            out.push_str(&self.revision.to_string());
        }
        if self.is_prerelease() {
            out.push('-');
            out.push_str(&self.release());
        }
        out
    }
}

impl FromStr for NuGetVersion {
    type Err = VersionError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let (rest, metadata) = match trimmed.split_once('+') {
            Some((rest, meta)) => {
                validate_labels(trimmed, meta)?;
                (rest, Some(meta.to_string()))
            }
            None => (trimmed, None),
        };

        let (numbers, release) = match rest.split_once('-') {
            Some((numbers, release)) => {
                validate_labels(trimmed, release)?;
                (numbers, Some(release))
            }
            None => (rest, None),
        };

        let parts: Vec<&str> = numbers.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(VersionError::ComponentCount(trimmed.to_string()));
        }

        let mut values = [0u64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(VersionError::NotNumeric(
                    trimmed.to_string(),
                    (*part).to_string(),
                ));
            }
            *slot = part
                .parse()
                .map_err(|_| VersionError::NotNumeric(trimmed.to_string(), (*part).to_string()))?;
        }

        Ok(Self {
            major: values[0],
            minor: values[1],
            patch: values[2],
            revision: values[3],
            release_labels: release
                .map(|r| r.split('.').map(str::to_string).collect())
                .unwrap_or_default(),
            metadata,
            original: trimmed.to_string(),
        })
    }
}

fn validate_labels(full: &str, labels: &str) -> Result<(), VersionError> {
    let valid = !labels.is_empty()
        && labels.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        });
    if valid {
        Ok(())
    } else {
        Err(VersionError::Label(full.to_string(), labels.to_string()))
    }
}

fn compare_label(a: &str, b: &str) -> Ordering {
    let a_num = a.bytes().all(|c| c.is_ascii_digit());
    let b_num = b.bytes().all(|c| c.is_ascii_digit());
    match (a_num, b_num) {
        (true, true) => {
            // Compare by digit length first so long numeric labels never overflow.
            let a_trim = a.trim_start_matches('0');
            let b_trim = b.trim_start_matches('0');
            a_trim
                .len()
                .cmp(&b_trim.len())
                .then_with(|| a_trim.cmp(b_trim))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(b.bytes().map(|c| c.to_ascii_lowercase())),
    }
}

impl Ord for NuGetVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let numeric = (self.major, self.minor, self.patch, self.revision).cmp(&(
            other.major,
            other.minor,
            other.patch,
            other.revision,
        ));
        if numeric != Ordering::Equal {
            return numeric;
        }

        match (self.is_prerelease(), other.is_prerelease()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (true, true) => {
                for (a, b) in self.release_labels.iter().zip(&other.release_labels) {
                    let ord = compare_label(a, b);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                self.release_labels.len().cmp(&other.release_labels.len())
            }
        }
    }
}

impl PartialOrd for NuGetVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NuGetVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NuGetVersion {}

impl Hash for NuGetVersion {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.major, self.minor, self.patch, self.revision).hash(state);
        for label in &self.release_labels {
            let lowered = if label.bytes().all(|c| c.is_ascii_digit()) {
                label.trim_start_matches('0').to_string()
            } else {
                label.to_ascii_lowercase()
            };
            lowered.hash(state);
        }
    }
}

impl fmt::Display for NuGetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_normalized_string())?;
        if let Some(meta) = &self.metadata {
            write!(f, "+{meta}")?;
        }
        Ok(())
    }
}

impl Serialize for NuGetVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> NuGetVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_three_part() {
        let version = v("1.2.3");
        assert_eq!(version.major(), 1);
        assert_eq!(version.minor(), 2);
        assert_eq!(version.patch(), 3);
        assert!(!version.is_prerelease());
    }

    #[test]
    fn test_parse_short_and_four_part() {
        assert_eq!(v("2").to_normalized_string(), "2.0.0");
        assert_eq!(v("2.1").to_normalized_string(), "2.1.0");
        assert_eq!(v("1.0.0.0").to_normalized_string(), "1.0.0");
        assert_eq!(v("1.0.0.4").to_normalized_string(), "1.0.0.4");
    }

    #[test]
    fn test_parse_prerelease_and_metadata() {
        let version = v("1.0.0-Beta.2+git.abc");
        assert!(version.is_prerelease());
        assert_eq!(version.release(), "Beta.2");
        assert_eq!(version.metadata(), Some("git.abc"));
        assert_eq!(version.to_normalized_string(), "1.0.0-Beta.2");
        assert_eq!(version.to_string(), "1.0.0-Beta.2+git.abc");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<NuGetVersion>(), Err(VersionError::Empty));
        assert!(matches!(
            "1.0.0.0.0".parse::<NuGetVersion>(),
            Err(VersionError::ComponentCount(_))
        ));
        assert!(matches!(
            "1.x.0".parse::<NuGetVersion>(),
            Err(VersionError::NotNumeric(_, _))
        ));
        assert!(matches!(
            "1.0.0-".parse::<NuGetVersion>(),
            Err(VersionError::Label(_, _))
        ));
        assert!(matches!(
            "1.0.0-a..b".parse::<NuGetVersion>(),
            Err(VersionError::Label(_, _))
        ));
        assert!(NuGetVersion::try_parse("not-a-version").is_none());
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha") < v("1.0.0-alpha.1"));
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.beta"));
        assert!(v("1.0.0-beta.2") < v("1.0.0-beta.11"));
        assert!(v("1.0.0-rc.1") < v("1.0.0"));
    }

    #[test]
    fn test_revision_participates_in_ordering() {
        assert!(v("1.0.0") < v("1.0.0.1"));
        assert!(v("1.0.0.9") < v("1.0.1"));
    }

    #[test]
    fn test_equality_ignores_case_and_metadata() {
        assert_eq!(v("1.0.0-BETA"), v("1.0.0-beta"));
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
        assert_eq!(v("1.0"), v("1.0.0.0"));
    }

    proptest! {
        #[test]
        fn prop_ordering_matches_numeric_tuple(
            a in (0u64..50, 0u64..50, 0u64..50),
            b in (0u64..50, 0u64..50, 0u64..50),
        ) {
            let va = NuGetVersion::new(a.0, a.1, a.2);
            let vb = NuGetVersion::new(b.0, b.1, b.2);
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }

        #[test]
        fn prop_normalized_string_reparses_equal(
            major in 0u64..1000,
            minor in 0u64..1000,
            patch in 0u64..1000,
            label in proptest::option::of("[a-z][a-z0-9]{0,6}"),
        ) {
            let text = match &label {
                Some(l) => format!("{major}.{minor}.{patch}-{l}"),
                None => format!("{major}.{minor}.{patch}"),
            };
            let parsed: NuGetVersion = text.parse().unwrap();
            let reparsed: NuGetVersion = parsed.to_normalized_string().parse().unwrap();
            prop_assert_eq!(parsed, reparsed);
        }
    }
}
