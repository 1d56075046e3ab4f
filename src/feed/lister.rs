//! Lazy, capability-aware listing of a feed's packages.

use super::capabilities::{CapabilityResource, FeedCapabilities};
use super::engine::QueryEngine;
use super::package::PackageEntry;
use super::query::{Cursor, SearchFilter, SearchFilterType, SearchOrderBy};
use super::FeedSource;
use crate::error::FeedError;
use async_stream::try_stream;
use futures::stream::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entries requested per page when the caller does not say otherwise.
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// What to list.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub term: String,
    /// Prerelease and delisted policy plus frameworks. The predicate and
    /// ordering are chosen from the feed's capabilities.
    pub filter: SearchFilter,
    /// Yield every version instead of one entry per id per page.
    pub all_versions: bool,
    pub take: usize,
}

impl ListOptions {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            filter: SearchFilter::default(),
            all_versions: false,
            take: DEFAULT_PAGE_SIZE,
        }
    }
}

/// How pages are fetched for one listing, fixed before the first page.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ListPlan {
    Search(SearchFilter),
    RawListing,
}

impl ListPlan {
    fn choose(capabilities: FeedCapabilities, options: &ListOptions) -> Self {
        if !capabilities.supports_search {
            return ListPlan::RawListing;
        }

        let predicate = if options.all_versions {
            None
        } else if capabilities.supports_is_absolute_latest_version
            && options.filter.include_prerelease
        {
            Some(SearchFilterType::IsAbsoluteLatestVersion)
        } else {
            Some(SearchFilterType::IsLatestVersion)
        };

        ListPlan::Search(
            options
                .filter
                .clone()
                .with_filter(predicate)
                .with_order_by(SearchOrderBy::Id),
        )
    }
}

/// Exposes listing and search results as a lazy stream.
pub struct PackageLister {
    engine: Arc<QueryEngine>,
    capabilities: Arc<CapabilityResource>,
}

impl PackageLister {
    pub fn new(engine: Arc<QueryEngine>, capabilities: Arc<CapabilityResource>) -> Self {
        Self {
            engine,
            capabilities,
        }
    }

    /// Streams the packages of `source` matching `options`.
    ///
    /// Nothing is fetched until the stream is polled. Capabilities are
    /// probed once, then windows of `options.take` entries are fetched one
    /// feed page at a time; continuation links are not followed. Each page
    /// is reduced to the highest version per id (unless `all_versions` is
    /// set) before its entries are yielded. A page shorter than `take` ends
    /// the stream.
    ///
    /// Errors from the engine are yielded as-is and end the stream.
    pub fn list(
        &self,
        source: FeedSource,
        options: ListOptions,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<PackageEntry, FeedError>> + Send + 'static {
        let engine = Arc::clone(&self.engine);
        let capabilities = Arc::clone(&self.capabilities);

        try_stream! {
            let caps = capabilities.capabilities(&source, &cancel).await?;
            let plan = ListPlan::choose(caps, &options);
            let take = options.take.max(1);
            tracing::debug!(feed = %source, plan = ?plan, take = take, "Starting package listing");

            let mut cursor = Some(Cursor::Offset { skip: 0, take });
            while let Some(Cursor::Offset { skip, take }) = cursor {
                let page = match &plan {
                    ListPlan::Search(filter) => {
                        engine.search_page(&source, &options.term, filter, skip, take, &cancel).await?
                    }
                    ListPlan::RawListing => {
                        engine.list_page(&source, skip, take, &cancel).await?
                    }
                };

                let fetched = page.len();
                let term = match &plan {
                    ListPlan::RawListing => Some(options.term.as_str()),
                    ListPlan::Search(_) => None,
                };
                for entry in reduce_page(page, &options.filter, term, options.all_versions) {
                    yield entry;
                }

                cursor = Cursor::Offset { skip, take }.advance(fetched, None);
            }
        }
    }
}

/// Applies client-side policy to one page, then keeps the highest version
/// per id in order of first appearance.
///
/// `term` is only set for raw listings, where the feed could not filter.
fn reduce_page(
    page: Vec<PackageEntry>,
    filter: &SearchFilter,
    term: Option<&str>,
    all_versions: bool,
) -> Vec<PackageEntry> {
    let term = term.map(str::trim).filter(|t| !t.is_empty()).map(str::to_lowercase);
    let kept = page.into_iter().filter(|e| {
        (filter.include_delisted || e.is_listed())
            && (filter.include_prerelease || !e.version().is_prerelease())
            && term.as_deref().map_or(true, |t| matches_term(e, t))
    });

    if all_versions {
        return kept.collect();
    }

    let mut order: Vec<String> = Vec::new();
    let mut best: HashMap<String, PackageEntry> = HashMap::new();
    for entry in kept {
        let key = entry.id().to_ascii_lowercase();
        match best.get(&key) {
            Some(current) if current.version() >= entry.version() => {}
            Some(_) => {
                best.insert(key, entry);
            }
            None => {
                order.push(key.clone());
                best.insert(key, entry);
            }
        }
    }
    order.into_iter().filter_map(|key| best.remove(&key)).collect()
}

fn matches_term(entry: &PackageEntry, term: &str) -> bool {
    [
        Some(entry.id()),
        entry.title.as_deref(),
        entry.tags.as_deref(),
        entry.description.as_deref(),
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(term))
}
