use super::parser::{parse_base_address, validate_xml};
use super::FeedSource;
use crate::transport::{CacheContext, FetchOutcome, FetchRequest, Transport, TransportError, XML_ACCEPT};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// How long a resolved base address is trusted.
pub const DEFAULT_ENDPOINT_TTL: TimeDelta = TimeDelta::minutes(40);

/// A feed's resolved base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Base address without a trailing separator; query paths are appended
    /// to it after a `/`.
    pub base_address: String,
    pub resolved_at: DateTime<Utc>,
}

type Slot = Arc<tokio::sync::Mutex<Option<ServiceEndpoint>>>;

/// Resolves and memoizes each feed's service endpoint.
///
/// One slot per source key. A refresh happens when the slot is empty or
/// older than the TTL, and only one refresh per source is in flight at a
/// time: concurrent callers wait on the slot's gate and then reuse the
/// result. A failed fetch leaves the slot untouched.
pub struct ServiceEndpointCache {
    transport: Arc<dyn Transport>,
    ttl: TimeDelta,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ServiceEndpointCache {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_ttl(transport, DEFAULT_ENDPOINT_TTL)
    }

    pub fn with_ttl(transport: Arc<dyn Transport>, ttl: TimeDelta) -> Self {
        Self {
            transport,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Resolves the endpoint using the wall clock.
    pub async fn resolve(
        &self,
        source: &FeedSource,
        cancel: &CancellationToken,
    ) -> Result<ServiceEndpoint, TransportError> {
        self.resolve_at(source, Utc::now(), cancel).await
    }

    /// Resolves the endpoint as of `now`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the service document fetch fails.
    /// A not-found response is not an error: the source URL is cached as the
    /// base address.
    pub async fn resolve_at(
        &self,
        source: &FeedSource,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ServiceEndpoint, TransportError> {
        let gate = self.slot(source);
        let mut slot = gate.lock().await;

        if let Some(endpoint) = slot.as_ref() {
            if !self.is_stale(endpoint, now) {
                return Ok(endpoint.clone());
            }
        }

        let request = FetchRequest::new(source.url())
            .accept(XML_ACCEPT)
            .cache_context(CacheContext::no_cache())
            .ignore_not_found(true)
            .credentials(source.credentials().cloned())
            .validate(validate_xml);

        let base_address = match self.transport.fetch(&request, cancel).await? {
            FetchOutcome::Found(body) => parse_base_address(&body)
                .map(|base| base.trim_end_matches('/').to_string())
                .filter(|base| !base.is_empty()),
            FetchOutcome::NotFound => {
                tracing::debug!(source = %source, "Service document not found, using source URL");
                None
            }
        }
        .unwrap_or_else(|| source.trimmed_url().to_string());

        tracing::debug!(source = %source, base = %base_address, "Resolved service endpoint");

        let endpoint = ServiceEndpoint {
            base_address,
            resolved_at: now,
        };
        *slot = Some(endpoint.clone());
        Ok(endpoint)
    }

    /// Drops the cached endpoint for a source.
    pub async fn invalidate(&self, source: &FeedSource) {
        let gate = self.slot(source);
        *gate.lock().await = None;
    }

    fn is_stale(&self, endpoint: &ServiceEndpoint, now: DateTime<Utc>) -> bool {
        endpoint.resolved_at < now - self.ttl
    }

    fn slot(&self, source: &FeedSource) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(source.key()).or_default())
    }
}
