//! Relative query URLs understood by legacy feeds.
//!
//! Every builder returns a path relative to the feed's base address, which
//! the engine prefixes verbatim.

use super::package::PackageIdentity;
use super::source::FeedSource;
use serde::Serialize;

const SEMVER_LEVEL: &str = "semVerLevel=2.0.0";

/// Server-side "latest version" predicate for search queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchFilterType {
    IsLatestVersion,
    IsAbsoluteLatestVersion,
}

impl SearchFilterType {
    fn as_str(self) -> &'static str {
        match self {
            SearchFilterType::IsLatestVersion => "IsLatestVersion",
            SearchFilterType::IsAbsoluteLatestVersion => "IsAbsoluteLatestVersion",
        }
    }
}

/// Server-side ordering for search queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SearchOrderBy {
    #[default]
    None,
    Id,
}

/// Options shared by search and listing queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchFilter {
    pub include_prerelease: bool,
    pub include_delisted: bool,
    /// Target framework short names. Only the first is sent to the feed.
    pub supported_frameworks: Vec<String>,
    pub filter: Option<SearchFilterType>,
    pub order_by: SearchOrderBy,
}

impl SearchFilter {
    pub fn new(include_prerelease: bool) -> Self {
        Self {
            include_prerelease,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Option<SearchFilterType>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order_by(mut self, order_by: SearchOrderBy) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_frameworks<I, S>(mut self, frameworks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_frameworks = frameworks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delisted(mut self, include_delisted: bool) -> Self {
        self.include_delisted = include_delisted;
        self
    }
}

/// `FindPackagesById()?id='{id}'`
pub fn find_packages_by_id(id: &str) -> String {
    format!("FindPackagesById()?id='{}'&{SEMVER_LEVEL}", escape_value(id))
}

/// `Packages(Id='{id}',Version='{version}')` with the normalized version.
pub fn packages_by_identity(identity: &PackageIdentity) -> String {
    format!(
        "Packages(Id='{}',Version='{}')",
        escape_value(&identity.id),
        escape_value(&identity.version.to_normalized_string())
    )
}

/// `Search()` with the filter predicate, order, term, first framework,
/// prerelease flag and paging window.
pub fn search(term: &str, filter: &SearchFilter, skip: usize, take: usize) -> String {
    let mut query = String::from("Search()?");
    if let Some(predicate) = filter.filter {
        query.push_str("$filter=");
        query.push_str(predicate.as_str());
        query.push('&');
    }
    if filter.order_by == SearchOrderBy::Id {
        query.push_str("$orderby=Id&");
    }
    let framework = filter
        .supported_frameworks
        .first()
        .map(|f| f.to_lowercase())
        .unwrap_or_default();
    query.push_str(&format!(
        "searchTerm='{}'&targetFramework='{}'&includePrerelease={}&$skip={}&$top={}&{SEMVER_LEVEL}",
        escape_value(term),
        escape_value(&framework),
        filter.include_prerelease,
        skip,
        take
    ));
    query
}

/// Raw `Packages()` listing for feeds without search support.
pub fn list_packages(skip: usize, take: usize) -> String {
    format!("Packages()?$orderby=Id&$skip={skip}&$top={take}&{SEMVER_LEVEL}")
}

/// Position of the next page within one logical query.
///
/// Offsets drive the enumerator's skip/take windows; next links are the
/// feed's own continuation URLs. A query uses one kind throughout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Offset { skip: usize, take: usize },
    NextLink(String),
}

impl Cursor {
    /// The cursor after a page holding `fetched` entries, or `None` when
    /// that page was the last one.
    ///
    /// An offset window ends on a short page. A next-link cursor ends when
    /// the page has no continuation or links back to itself; a short page
    /// with a continuation is not terminal.
    pub fn advance(&self, fetched: usize, next_link: Option<&str>) -> Option<Cursor> {
        match self {
            Cursor::Offset { skip, take } => (fetched >= *take).then(|| Cursor::Offset {
                skip: skip + take,
                take: *take,
            }),
            Cursor::NextLink(url) => match next_link {
                // Same comparison as the engine's visited set, so a self-link
                // that differs only in case ends paging instead of erroring.
                Some(next) if next.eq_ignore_ascii_case(url) => {
                    tracing::debug!(url = %url, "Page links to itself, stopping");
                    None
                }
                Some(next) => Some(Cursor::NextLink(next.to_string())),
                None => None,
            },
        }
    }
}

/// Cache key for one page of a paginated query against `source`.
///
/// Relative URIs repeat across feeds, so the source key is part of the key.
pub fn page_cache_key(source: &FeedSource, relative_uri: &str, page: usize) -> String {
    format!("{}|list_{relative_uri}_page{page}", source.key())
}

/// Escapes a value for use inside a quoted OData string literal.
///
/// Single quotes are doubled, then everything outside the RFC 2396
/// unreserved set (`A-Z a-z 0-9 - _ . ! ~ * ' ( )`) is percent-encoded as
/// UTF-8.
pub fn escape_value(value: &str) -> String {
    let doubled = value.replace('\'', "''");
    let mut out = String::with_capacity(doubled.len());
    for byte in doubled.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
