//! Legacy package feed client.
//!
//! This module talks to OData/Atom package feeds:
//!
//! - **Parsing**: Convert Atom pages into [`PackageEntry`] values
//! - **Endpoint discovery**: Resolve and cache each feed's base address
//! - **Querying**: Find, look up and search packages with retries and paging
//! - **Listing**: Stream results lazily, adapting to what each feed supports
//!
//! # Architecture
//!
//! - [`parser`] - Page, entry and continuation link parsing on top of a small
//!   namespace-aware element tree
//! - [`endpoint`] - [`ServiceEndpointCache`], TTL-bound single-flight discovery
//! - [`engine`] - [`QueryEngine`], the retrying pagination loop
//! - [`capabilities`] - `$metadata` probing and [`FeedProtocol`]
//! - [`lister`] - [`PackageLister`], the lazy per-page enumerator
//!
//! # Example
//!
//! ```ignore
//! let source = FeedSource::new("https://www.nuget.org/api/v2/")?;
//! let client = FeedClient::new(transport, ClientOptions::default());
//! let versions = client
//!     .engine()
//!     .find_by_id(&source, "Newtonsoft.Json", false, false, &cancel)
//!     .await?;
//! ```

pub mod capabilities;
pub mod endpoint;
pub mod engine;
pub mod lister;
mod package;
pub mod parser;
pub mod query;
mod source;
mod xml;

pub use capabilities::{CapabilityResource, FeedCapabilities, FeedProtocol};
pub use endpoint::{ServiceEndpoint, ServiceEndpointCache, DEFAULT_ENDPOINT_TTL};
pub use engine::{EngineOptions, QueryEngine};
pub use lister::{ListOptions, PackageLister, DEFAULT_PAGE_SIZE};
pub use package::{
    by_version_descending, parse_dependency_groups, DependencyGroup, ListingState,
    PackageDependency, PackageEntry, PackageIdentity,
};
pub use parser::{FeedPage, ParseError};
pub use query::{Cursor, SearchFilter, SearchFilterType, SearchOrderBy};
pub use source::{FeedCredentials, FeedSource, SourceError};
pub use xml::XmlError;

use crate::transport::Transport;
use chrono::TimeDelta;
use std::sync::Arc;

/// Settings for a [`FeedClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint_ttl: TimeDelta,
    pub engine: EngineOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint_ttl: DEFAULT_ENDPOINT_TTL,
            engine: EngineOptions::default(),
        }
    }
}

/// Wires the endpoint cache, query engine, capability resource and lister
/// around one transport.
pub struct FeedClient {
    engine: Arc<QueryEngine>,
    capabilities: Arc<CapabilityResource>,
    lister: PackageLister,
}

impl FeedClient {
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        let endpoints = Arc::new(ServiceEndpointCache::with_ttl(
            Arc::clone(&transport),
            options.endpoint_ttl,
        ));
        let engine = Arc::new(QueryEngine::new(transport, endpoints, options.engine));
        let capabilities = Arc::new(CapabilityResource::new(Arc::clone(&engine)));
        let lister = PackageLister::new(Arc::clone(&engine), Arc::clone(&capabilities));
        Self {
            engine,
            capabilities,
            lister,
        }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn capabilities(&self) -> &CapabilityResource {
        &self.capabilities
    }

    pub fn lister(&self) -> &PackageLister {
        &self.lister
    }
}
