use crate::version::NuGetVersion;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Legacy feeds mark unlisted packages with a publish date in this year.
const UNLISTED_PUBLISH_YEAR: i32 = 1900;

/// The (package id, exact version) pair naming one release.
///
/// Ids compare case-insensitively; versions compare by NuGet precedence,
/// so build metadata is ignored.
#[derive(Debug, Clone, Serialize)]
pub struct PackageIdentity {
    pub id: String,
    pub version: NuGetVersion,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: NuGetVersion) -> Self {
        Self {
            id: id.into(),
            version,
        }
    }
}

impl PartialEq for PackageIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id.eq_ignore_ascii_case(&other.id) && self.version == other.version
    }
}

impl Eq for PackageIdentity {}

impl Hash for PackageIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.to_ascii_lowercase().hash(state);
        self.version.hash(state);
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.version)
    }
}

/// Whether a package is visible in default listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingState {
    Listed,
    Unlisted,
}

/// One package release as described by a feed entry.
#[derive(Debug, Clone, Serialize)]
pub struct PackageEntry {
    pub identity: PackageIdentity,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub tags: Option<String>,
    pub icon_url: Option<String>,
    pub license_url: Option<String>,
    pub project_url: Option<String>,
    pub report_abuse_url: Option<String>,
    pub gallery_details_url: Option<String>,
    /// Raw dependency string as served, see [`parse_dependency_groups`].
    pub dependencies: Option<String>,
    pub download_count: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub last_edited: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    pub package_hash: Option<String>,
    pub package_hash_algorithm: Option<String>,
    pub require_license_acceptance: bool,
    pub min_client_version: Option<NuGetVersion>,
    pub download_url: Option<String>,
}

impl PackageEntry {
    /// An entry with only an identity set.
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            identity,
            title: None,
            summary: None,
            description: None,
            authors: Vec::new(),
            tags: None,
            icon_url: None,
            license_url: None,
            project_url: None,
            report_abuse_url: None,
            gallery_details_url: None,
            dependencies: None,
            download_count: None,
            created: None,
            last_edited: None,
            published: None,
            package_hash: None,
            package_hash_algorithm: None,
            require_license_acceptance: false,
            min_client_version: None,
            download_url: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn version(&self) -> &NuGetVersion {
        &self.identity.version
    }

    /// Entries without a publish date count as listed.
    pub fn listing_state(&self) -> ListingState {
        match self.published {
            Some(date) if date.year() <= UNLISTED_PUBLISH_YEAR => ListingState::Unlisted,
            _ => ListingState::Listed,
        }
    }

    pub fn is_listed(&self) -> bool {
        self.listing_state() == ListingState::Listed
    }

    /// Dependency groups parsed from the raw dependency string.
    pub fn dependency_groups(&self) -> Vec<DependencyGroup> {
        self.dependencies
            .as_deref()
            .map(parse_dependency_groups)
            .unwrap_or_default()
    }
}

/// Orders entries by version, highest first.
pub fn by_version_descending(a: &PackageEntry, b: &PackageEntry) -> Ordering {
    b.identity.version.cmp(&a.identity.version)
}

/// A single dependency on another package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageDependency {
    pub id: String,
    /// Version range as written by the feed, e.g. `[1.0.0, )`. Empty when
    /// the feed gave none.
    pub range: String,
}

/// Dependencies that apply to one target framework (or to all, if `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyGroup {
    pub target_framework: Option<String>,
    pub packages: Vec<PackageDependency>,
}

/// Parses the legacy `id:range:framework|id:range:framework` dependency
/// encoding into groups keyed by framework, in order of first appearance.
///
/// Best effort: empty segments are skipped, and an entry with only a
/// framework (`::net45`) yields an empty group for that framework.
pub fn parse_dependency_groups(raw: &str) -> Vec<DependencyGroup> {
    let mut groups: Vec<DependencyGroup> = Vec::new();

    for segment in raw.split('|').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = segment.splitn(3, ':');
        let id = parts.next().unwrap_or_default().trim();
        let range = parts.next().unwrap_or_default().trim();
        let framework = parts
            .next()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string);

        let index = match groups
            .iter()
            .position(|g| g.target_framework.as_deref() == framework.as_deref())
        {
            Some(index) => index,
            None => {
                groups.push(DependencyGroup {
                    target_framework: framework,
                    packages: Vec::new(),
                });
                groups.len() - 1
            }
        };

        if !id.is_empty() {
            groups[index].packages.push(PackageDependency {
                id: id.to_string(),
                range: range.to_string(),
            });
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn entry(id: &str, version: &str) -> PackageEntry {
        PackageEntry::new(PackageIdentity::new(id, version.parse().unwrap()))
    }

    #[test]
    fn test_identity_equality_ignores_id_case() {
        let a = PackageIdentity::new("Newtonsoft.Json", "9.0.1".parse().unwrap());
        let b = PackageIdentity::new("newtonsoft.json", "9.0.1".parse().unwrap());
        assert_eq!(a, b);

        let c = PackageIdentity::new("newtonsoft.json", "9.0.2".parse().unwrap());
        assert_ne!(a, c);
    }

    #[test]
    fn test_listing_state_from_publish_year() {
        let mut e = entry("a", "1.0.0");
        assert!(e.is_listed());

        e.published = Some(Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(e.listing_state(), ListingState::Unlisted);

        e.published = Some(Utc.with_ymd_and_hms(2016, 3, 4, 0, 0, 0).unwrap());
        assert_eq!(e.listing_state(), ListingState::Listed);
    }

    #[test]
    fn test_sort_by_version_descending() {
        let mut entries = vec![entry("a", "1.0.0"), entry("a", "2.0.0-beta"), entry("a", "2.0.0")];
        entries.sort_by(by_version_descending);
        let versions: Vec<String> = entries.iter().map(|e| e.version().to_string()).collect();
        assert_eq!(versions, vec!["2.0.0", "2.0.0-beta", "1.0.0"]);
    }

    #[test]
    fn test_parse_dependency_groups() {
        let groups = parse_dependency_groups(
            "Microsoft.CSharp:4.0.1:netstandard1.0|System.Linq:[4.1.0, ):netstandard1.0|::net45",
        );
        assert_eq!(
            groups,
            vec![
                DependencyGroup {
                    target_framework: Some("netstandard1.0".into()),
                    packages: vec![
                        PackageDependency {
                            id: "Microsoft.CSharp".into(),
                            range: "4.0.1".into(),
                        },
                        PackageDependency {
                            id: "System.Linq".into(),
                            range: "[4.1.0, )".into(),
                        },
                    ],
                },
                DependencyGroup {
                    target_framework: Some("net45".into()),
                    packages: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_parse_dependency_groups_without_framework() {
        let groups = parse_dependency_groups("jQuery:1.4.4|");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].target_framework, None);
        assert_eq!(groups[0].packages[0].id, "jQuery");
        assert!(parse_dependency_groups("").is_empty());
    }
}
