use super::engine::QueryEngine;
use super::xml::{parse_document, XmlElement};
use super::FeedSource;
use crate::error::FeedError;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Optional query features a feed supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FeedCapabilities {
    /// The feed serves the `Search()` function.
    pub supports_search: bool,
    /// Packages expose `IsAbsoluteLatestVersion`, so prerelease-aware
    /// "latest" filtering works server side.
    pub supports_is_absolute_latest_version: bool,
}

impl FeedCapabilities {
    /// Reads capabilities from a `$metadata` (EDMX) document.
    ///
    /// Namespaces differ between EDM versions, so elements are matched by
    /// local name only. A document that does not parse has no capabilities.
    pub fn from_metadata(bytes: &[u8]) -> Self {
        let root = match parse_document(bytes) {
            Ok(root) => root,
            Err(e) => {
                tracing::debug!(error = %e, "Feed metadata is not valid XML");
                return Self::default();
            }
        };
        Self {
            supports_search: any_named(&root, "FunctionImport", "Search"),
            supports_is_absolute_latest_version: any_named(
                &root,
                "Property",
                "IsAbsoluteLatestVersion",
            ),
        }
    }
}

fn any_named(element: &XmlElement, local_name: &str, name: &str) -> bool {
    (element.local_name == local_name && element.attr("Name") == Some(name))
        || element
            .children
            .iter()
            .any(|child| any_named(child, local_name, name))
}

/// Protocol generation of a feed, carrying its capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeedProtocol {
    /// OData/Atom feed; capabilities come from its `$metadata` document.
    LegacyV2(FeedCapabilities),
    /// Index-based feed. Always supports every query feature.
    Indexed,
}

impl FeedProtocol {
    pub fn capabilities(&self) -> FeedCapabilities {
        match self {
            FeedProtocol::LegacyV2(capabilities) => *capabilities,
            FeedProtocol::Indexed => FeedCapabilities {
                supports_search: true,
                supports_is_absolute_latest_version: true,
            },
        }
    }
}

/// Probes and remembers each legacy feed's capabilities.
///
/// Results are kept for the lifetime of the resource. Two callers racing
/// on the first probe both fetch and store the same value; no lock is held
/// across the fetch.
pub struct CapabilityResource {
    engine: Arc<QueryEngine>,
    known: RwLock<HashMap<String, FeedProtocol>>,
}

impl CapabilityResource {
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self {
            engine,
            known: RwLock::new(HashMap::new()),
        }
    }

    /// The protocol of `source`, probing `$metadata` the first time.
    ///
    /// A feed without a metadata document is a legacy feed with no optional
    /// features.
    pub async fn protocol(
        &self,
        source: &FeedSource,
        cancel: &CancellationToken,
    ) -> Result<FeedProtocol, FeedError> {
        let key = source.key();
        let cached = self
            .known
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .copied();
        if let Some(protocol) = cached {
            return Ok(protocol);
        }

        let capabilities = match self.engine.fetch_metadata(source, cancel).await? {
            Some(body) => FeedCapabilities::from_metadata(&body),
            None => FeedCapabilities::default(),
        };
        tracing::debug!(
            feed = %source,
            search = capabilities.supports_search,
            absolute_latest = capabilities.supports_is_absolute_latest_version,
            "Probed feed capabilities"
        );

        let protocol = FeedProtocol::LegacyV2(capabilities);
        self.known
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, protocol);
        Ok(protocol)
    }

    pub async fn capabilities(
        &self,
        source: &FeedSource,
        cancel: &CancellationToken,
    ) -> Result<FeedCapabilities, FeedError> {
        Ok(self.protocol(source, cancel).await?.capabilities())
    }
}
