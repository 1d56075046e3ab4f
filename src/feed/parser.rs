use super::package::{PackageEntry, PackageIdentity};
use super::xml::{parse_document, XmlElement, XmlError};
use crate::version::{NuGetVersion, VersionError};
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Atom syndication namespace.
pub const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
/// OData metadata namespace holding the `properties` element.
pub const METADATA_NS: &str = "http://schemas.microsoft.com/ado/2007/08/dataservices/metadata";
/// OData data-services namespace holding the typed package fields.
pub const DATA_NS: &str = "http://schemas.microsoft.com/ado/2007/08/dataservices";

/// Errors that can occur while parsing a feed page.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error(transparent)]
    Xml(#[from] XmlError),
    /// An entry had no version field.
    #[error("Package entry '{id}' has no version")]
    MissingVersion { id: String },
    /// An entry's version field did not parse.
    #[error("Package entry '{id}' has an invalid version: {source}")]
    InvalidVersion {
        id: String,
        #[source]
        source: VersionError,
    },
    /// No id could be resolved from the entry or the query context.
    #[error("Package entry has no id and the query supplied none")]
    MissingId,
}

impl ParseError {
    /// Whether this error is about the content of an entry rather than the
    /// shape of the document. Entry errors are not worth retrying.
    pub fn is_malformed_entry(&self) -> bool {
        !matches!(self, ParseError::Xml(_))
    }
}

/// The entries of one fetched page plus its continuation link.
#[derive(Debug, Clone, Default)]
pub struct FeedPage {
    pub entries: Vec<PackageEntry>,
    pub next_link: Option<String>,
}

impl FeedPage {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses a page of entries.
///
/// A root `entry` yields exactly one package; any other root yields one
/// package per child `entry` in document order. `id_hint` is the id from
/// the query, used when an entry names neither an id nor a title.
///
/// # Errors
///
/// Fails on malformed XML, on a missing or unparseable version, and when no
/// id can be resolved. Missing optional fields never fail.
pub fn parse_page(bytes: &[u8], id_hint: Option<&str>) -> Result<FeedPage, ParseError> {
    let root = parse_document(bytes)?;

    let entries = if root.is(ATOM_NS, "entry") {
        vec![parse_entry(&root, id_hint)?]
    } else {
        root.children_named(ATOM_NS, "entry")
            .map(|entry| parse_entry(entry, id_hint))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(FeedPage {
        entries,
        next_link: next_link(&root),
    })
}

/// First root-level `link` with `rel="next"` (any case) that has an `href`.
pub fn next_link(root: &XmlElement) -> Option<String> {
    root.children_named(ATOM_NS, "link")
        .filter(|link| {
            link.attr("rel")
                .is_some_and(|rel| rel.eq_ignore_ascii_case("next"))
        })
        .find_map(|link| link.attr("href"))
        .map(str::to_string)
}

/// Reads the `xml:base` attribute from a service document root.
///
/// Returns `None` for malformed documents or when the attribute is absent,
/// so the caller can fall back to the source URL.
pub fn parse_base_address(bytes: &[u8]) -> Option<String> {
    let root = match parse_document(bytes) {
        Ok(root) => root,
        Err(e) => {
            tracing::debug!(error = %e, "Service document is not valid XML");
            return None;
        }
    };
    root.raw_attr("xml:base")
        .map(str::trim)
        .filter(|base| !base.is_empty())
        .map(str::to_string)
}

/// Cheap content check run by the transport before a body is accepted.
///
/// Only rejects bodies that cannot possibly be XML; full well-formedness is
/// checked when the page is parsed.
pub fn validate_xml(body: &[u8]) -> Result<(), String> {
    let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
    match body.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'<') => Ok(()),
        Some(_) => Err("response is not an XML document".into()),
        None => Err("response body is empty".into()),
    }
}

fn parse_entry(element: &XmlElement, id_hint: Option<&str>) -> Result<PackageEntry, ParseError> {
    let properties = element.child(METADATA_NS, "properties");
    let prop = |name: &str| {
        properties
            .and_then(|p| p.child_text(DATA_NS, name))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let owned = |name: &str| prop(name).map(str::to_string);

    let title = element
        .child_text(ATOM_NS, "title")
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let id = prop("Id")
        .or(title)
        .or(id_hint)
        .ok_or(ParseError::MissingId)?
        .to_string();

    let version_text = prop("Version").ok_or_else(|| ParseError::MissingVersion { id: id.clone() })?;
    let version: NuGetVersion =
        version_text
            .parse()
            .map_err(|source| ParseError::InvalidVersion {
                id: id.clone(),
                source,
            })?;

    let mut entry = PackageEntry::new(PackageIdentity::new(id, version));
    entry.title = title.map(str::to_string);
    entry.summary = element
        .child_text(ATOM_NS, "summary")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    entry.authors = element
        .child(ATOM_NS, "author")
        .map(|author| {
            author
                .children_named(ATOM_NS, "name")
                .map(|name| name.text.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();
    entry.download_url = element
        .child(ATOM_NS, "content")
        .and_then(|content| content.attr("src"))
        .map(str::to_string);

    entry.description = owned("Description");
    entry.tags = owned("Tags");
    entry.icon_url = owned("IconUrl");
    entry.license_url = owned("LicenseUrl");
    entry.project_url = owned("ProjectUrl");
    entry.report_abuse_url = owned("ReportAbuseUrl");
    entry.gallery_details_url = owned("GalleryDetailsUrl");
    entry.dependencies = owned("Dependencies");
    entry.package_hash = owned("PackageHash");
    entry.package_hash_algorithm = owned("PackageHashAlgorithm");
    entry.require_license_acceptance =
        prop("RequireLicenseAcceptance").is_some_and(|v| v.eq_ignore_ascii_case("true"));

    entry.download_count = prop("DownloadCount").and_then(|count| match count.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::debug!(id = %entry.identity.id, value = count, "Ignoring invalid download count");
            None
        }
    });
    entry.min_client_version = prop("MinClientVersion").and_then(NuGetVersion::try_parse);

    entry.created = prop("Created").and_then(parse_date);
    entry.last_edited = prop("LastEdited").and_then(parse_date);
    entry.published = prop("Published").and_then(parse_date);

    Ok(entry)
}

/// Best-effort timestamp parsing. Timestamps without an offset are UTC.
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    match NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Some(naive.and_utc()),
        Err(_) => {
            tracing::debug!(value = text, "Ignoring unparseable timestamp");
            None
        }
    }
}
