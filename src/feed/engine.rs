use super::endpoint::ServiceEndpointCache;
use super::package::{by_version_descending, PackageEntry, PackageIdentity};
use super::parser::{parse_page, validate_xml};
use super::query::{self, Cursor, SearchFilter};
use super::FeedSource;
use crate::error::FeedError;
use crate::transport::{
    CacheContext, FetchOutcome, FetchRequest, Transport, TransportError, ATOM_ACCEPT, XML_ACCEPT,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Retry and caching behavior of a [`QueryEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Attempts per logical query, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one.
    pub retry_delay: Duration,
    /// Cache policy passed to the transport for page requests.
    pub cache_context: CacheContext,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            cache_context: CacheContext::default(),
        }
    }
}

/// Parameters of one paginated query.
#[derive(Debug, Clone, Copy)]
struct QueryParams<'a> {
    relative_uri: &'a str,
    id_hint: Option<&'a str>,
    max: Option<usize>,
    ignore_not_found: bool,
    follow_links: bool,
}

/// Why a single attempt of a logical query failed.
#[derive(Debug)]
enum AttemptError {
    /// Worth another attempt: transport failure or an unparseable document.
    Transient { url: String, message: String },
    /// Bad entry data. Another attempt would read the same data.
    MalformedEntry { url: String, message: String },
    DuplicateNextLink { url: String },
    Cancelled,
}

impl AttemptError {
    fn transport(url: &str, err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => AttemptError::Cancelled,
            err => AttemptError::Transient {
                url: url.to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Runs queries against legacy feeds.
///
/// Every logical query resolves the feed's endpoint, walks continuation
/// links page by page and restarts from scratch on transient failure, up to
/// [`EngineOptions::max_attempts`] times.
pub struct QueryEngine {
    transport: Arc<dyn Transport>,
    endpoints: Arc<ServiceEndpointCache>,
    options: EngineOptions,
}

impl QueryEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Arc<ServiceEndpointCache>,
        options: EngineOptions,
    ) -> Self {
        Self {
            transport,
            endpoints,
            options,
        }
    }

    pub fn endpoints(&self) -> &Arc<ServiceEndpointCache> {
        &self.endpoints
    }

    /// All versions of a package, highest first.
    ///
    /// Unlisted and prerelease versions are dropped unless requested, and
    /// duplicate identities are collapsed.
    ///
    /// # Errors
    ///
    /// [`FeedError::InvalidArgument`] for an empty id, otherwise whatever
    /// the query raises.
    pub async fn find_by_id(
        &self,
        source: &FeedSource,
        id: &str,
        include_unlisted: bool,
        include_prerelease: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, FeedError> {
        let id = require_id(id)?;
        let relative_uri = query::find_packages_by_id(id);
        let entries = self
            .query(source, &relative_uri, Some(id), None, false, cancel)
            .await?;

        let mut seen = HashSet::new();
        let mut results: Vec<PackageEntry> = entries
            .into_iter()
            .filter(|e| include_unlisted || e.is_listed())
            .filter(|e| include_prerelease || !e.version().is_prerelease())
            .filter(|e| seen.insert(e.identity.clone()))
            .collect();
        results.sort_by(by_version_descending);
        Ok(results)
    }

    /// One exact release, or `None` when the feed does not have it.
    ///
    /// Tries the direct id+version lookup first, then falls back to the
    /// full id listing for feeds that do not serve the direct endpoint.
    pub async fn get_exact(
        &self,
        source: &FeedSource,
        identity: &PackageIdentity,
        cancel: &CancellationToken,
    ) -> Result<Option<PackageEntry>, FeedError> {
        let id = require_id(&identity.id)?;
        let relative_uri = query::packages_by_identity(identity);
        let direct = self
            .query(source, &relative_uri, Some(id), Some(1), true, cancel)
            .await?;
        if let Some(entry) = direct.into_iter().next() {
            return Ok(Some(entry));
        }

        tracing::debug!(
            feed = %source,
            package = %identity,
            "Direct lookup returned nothing, falling back to id listing"
        );
        let all = self.find_by_id(source, id, true, true, cancel).await?;
        Ok(all
            .into_iter()
            .find(|e| e.identity.version == identity.version))
    }

    /// Runs a search and returns at most `take` entries.
    pub async fn search(
        &self,
        source: &FeedSource,
        term: &str,
        filter: &SearchFilter,
        skip: usize,
        take: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, FeedError> {
        if take == 0 {
            return Ok(Vec::new());
        }
        let relative_uri = query::search(term, filter, skip, take);
        self.query(source, &relative_uri, None, Some(take), false, cancel)
            .await
    }

    /// One feed page of search results starting at `skip`.
    pub async fn search_page(
        &self,
        source: &FeedSource,
        term: &str,
        filter: &SearchFilter,
        skip: usize,
        take: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, FeedError> {
        let relative_uri = query::search(term, filter, skip, take.max(1));
        self.query_page(source, &relative_uri, cancel).await
    }

    /// One feed page of the raw `Packages()` listing starting at `skip`.
    pub async fn list_page(
        &self,
        source: &FeedSource,
        skip: usize,
        take: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, FeedError> {
        let relative_uri = query::list_packages(skip, take.max(1));
        self.query_page(source, &relative_uri, cancel).await
    }

    /// Runs one logical paginated query with retries.
    ///
    /// `relative_uri` is appended to the feed's base address. Continuation
    /// links are followed verbatim until a page has none, `max` entries have
    /// been collected, or a page links to itself. With `ignore_not_found` a
    /// 404 ends the query with whatever was collected so far.
    ///
    /// # Errors
    ///
    /// - [`FeedError::Fatal`] once every attempt failed
    /// - [`FeedError::MalformedEntry`] on bad entry data, without retrying
    /// - [`FeedError::DuplicateNextLink`] when continuation links form a cycle
    /// - [`FeedError::Cancelled`] when `cancel` fires before completion
    pub async fn query(
        &self,
        source: &FeedSource,
        relative_uri: &str,
        id_hint: Option<&str>,
        max: Option<usize>,
        ignore_not_found: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, FeedError> {
        let params = QueryParams {
            relative_uri,
            id_hint,
            max,
            ignore_not_found,
            follow_links: true,
        };
        self.with_retries(source, relative_uri, cancel, move || {
            self.query_once(source, params, cancel)
        })
        .await
    }

    /// Fetches only the first page of a query, ignoring its continuation
    /// link. Retried like [`query`](Self::query).
    pub async fn query_page(
        &self,
        source: &FeedSource,
        relative_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, FeedError> {
        let params = QueryParams {
            relative_uri,
            id_hint: None,
            max: None,
            ignore_not_found: false,
            follow_links: false,
        };
        self.with_retries(source, relative_uri, cancel, move || {
            self.query_once(source, params, cancel)
        })
        .await
    }

    /// Fetches the feed's `$metadata` document, `None` if the feed has none.
    pub async fn fetch_metadata(
        &self,
        source: &FeedSource,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, FeedError> {
        self.with_retries(source, "$metadata", cancel, move || {
            self.fetch_metadata_once(source, cancel)
        })
        .await
    }

    async fn with_retries<T, F, Fut>(
        &self,
        source: &FeedSource,
        what: &str,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T, FeedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(FeedError::Cancelled);
            }

            let (url, message) = match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Cancelled) => return Err(FeedError::Cancelled),
                Err(AttemptError::MalformedEntry { url, message }) => {
                    tracing::warn!(feed = %source, url = %url, error = %message, "Malformed package entry");
                    return Err(FeedError::MalformedEntry { url, message });
                }
                Err(AttemptError::DuplicateNextLink { url }) => {
                    tracing::warn!(feed = %source, url = %url, "Continuation link repeats an earlier page");
                    return Err(FeedError::DuplicateNextLink { url });
                }
                Err(AttemptError::Transient { url, message }) => (url, message),
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    feed = %source,
                    url = %url,
                    attempts = attempt,
                    error = %message,
                    "Feed query failed"
                );
                return Err(FeedError::Fatal {
                    feed: source.url().to_string(),
                    url,
                    message,
                });
            }

            let delay = self.options.retry_delay.saturating_mul(1 << (attempt - 1).min(16));
            tracing::debug!(
                feed = %source,
                query = what,
                url = %url,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Feed query failed, retrying"
            );

            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FeedError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;
        }
    }

    async fn query_once(
        &self,
        source: &FeedSource,
        params: QueryParams<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackageEntry>, AttemptError> {
        let QueryParams {
            relative_uri,
            id_hint,
            max,
            ignore_not_found,
            follow_links,
        } = params;
        let endpoint = self
            .endpoints
            .resolve(source, cancel)
            .await
            .map_err(|e| AttemptError::transport(source.url(), e))?;

        let mut url = format!("{}/{}", endpoint.base_address, relative_uri);
        let mut visited = HashSet::from([url.to_ascii_lowercase()]);
        let mut entries = Vec::new();
        let mut page_number = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }

            // Pages are cached independently, so a page that shrank upstream
            // can leave later cached pages out of step until they expire.
            let request = FetchRequest::new(&url)
                .accept(ATOM_ACCEPT)
                .cache_key(query::page_cache_key(source, relative_uri, page_number))
                .cache_context(self.options.cache_context)
                .credentials(source.credentials().cloned())
                .ignore_not_found(ignore_not_found)
                .validate(validate_xml);

            let body = match self.transport.fetch(&request, cancel).await {
                Ok(FetchOutcome::Found(body)) => body,
                Ok(FetchOutcome::NotFound) => break,
                Err(e) => return Err(AttemptError::transport(&url, e)),
            };

            let page = parse_page(&body, id_hint).map_err(|e| {
                if e.is_malformed_entry() {
                    AttemptError::MalformedEntry {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                } else {
                    AttemptError::Transient {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

            let fetched = page.len();
            entries.extend(page.entries);
            if !follow_links || max.is_some_and(|max| entries.len() >= max) {
                break;
            }

            match Cursor::NextLink(url).advance(fetched, page.next_link.as_deref()) {
                Some(Cursor::NextLink(next)) => {
                    if !visited.insert(next.to_ascii_lowercase()) {
                        return Err(AttemptError::DuplicateNextLink { url: next });
                    }
                    url = next;
                    page_number += 1;
                }
                _ => break,
            }
        }

        if let Some(max) = max {
            entries.truncate(max);
        }
        Ok(entries)
    }

    async fn fetch_metadata_once(
        &self,
        source: &FeedSource,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, AttemptError> {
        let endpoint = self
            .endpoints
            .resolve(source, cancel)
            .await
            .map_err(|e| AttemptError::transport(source.url(), e))?;

        let url = format!("{}/$metadata", endpoint.base_address);
        let request = FetchRequest::new(&url)
            .accept(XML_ACCEPT)
            .ignore_not_found(true)
            .credentials(source.credentials().cloned())
            .validate(validate_xml);

        match self.transport.fetch(&request, cancel).await {
            Ok(FetchOutcome::Found(body)) => Ok(Some(body)),
            Ok(FetchOutcome::NotFound) => Ok(None),
            Err(e) => Err(AttemptError::transport(&url, e)),
        }
    }
}

fn require_id(id: &str) -> Result<&str, FeedError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(FeedError::InvalidArgument("package id must not be empty".into()));
    }
    Ok(id)
}
