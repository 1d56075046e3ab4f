//! The transport boundary used by every feed query.
//!
//! A [`Transport`] performs a single GET and reports one of three outcomes:
//! the body was found, the resource was deliberately reported missing
//! (only when the request asked to ignore not-found), or the fetch failed.
//! Retrying is the caller's job; a transport makes exactly one attempt.

mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::{HttpTransport, HttpTransportOptions};

use crate::feed::FeedCredentials;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Boxed future used to keep [`Transport`] object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Hook run against the raw response body before it is handed back.
///
/// Returning `Err` turns the fetch into [`TransportError::InvalidContent`].
pub type ContentValidator = fn(&[u8]) -> Result<(), String>;

/// Media types accepted for Atom feed pages.
pub const ATOM_ACCEPT: &[&str] = &["application/atom+xml", "application/xml"];

/// Media types accepted for service and metadata documents.
pub const XML_ACCEPT: &[&str] = &["application/xml", "text/xml"];

/// Errors raised by a transport. All of them are transient from the
/// engine's point of view.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response with a status the protocol does not expect
    #[error("The feed at '{url}' returned an unexpected status code '{status}'")]
    HttpStatus { url: String, status: u16 },
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The content validation hook rejected the body
    #[error("Invalid content from '{url}': {reason}")]
    InvalidContent { url: String, reason: String },
    /// The request was abandoned because its cancellation token fired
    #[error("Request cancelled")]
    Cancelled,
}

/// How a cached response may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheContext {
    /// Oldest cached response that may be served.
    pub max_age: Duration,
    /// Bypass the cache for reads; fresh responses are still stored.
    pub no_cache: bool,
}

impl Default for CacheContext {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(30 * 60),
            no_cache: false,
        }
    }
}

impl CacheContext {
    /// A context that always goes to the network.
    pub fn no_cache() -> Self {
        Self {
            no_cache: true,
            ..Self::default()
        }
    }
}

/// One GET request as seen by a [`Transport`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub accept: &'static [&'static str],
    /// Key under which the response may be cached. `None` disables caching.
    pub cache_key: Option<String>,
    pub cache_context: CacheContext,
    /// Report 404 as [`FetchOutcome::NotFound`] instead of an error.
    pub ignore_not_found: bool,
    pub validate: Option<ContentValidator>,
    /// Basic auth for this request only, taken from the feed being queried.
    pub credentials: Option<Arc<FeedCredentials>>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            accept: ATOM_ACCEPT,
            cache_key: None,
            cache_context: CacheContext::default(),
            ignore_not_found: false,
            validate: None,
            credentials: None,
        }
    }

    pub fn accept(mut self, accept: &'static [&'static str]) -> Self {
        self.accept = accept;
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn cache_context(mut self, context: CacheContext) -> Self {
        self.cache_context = context;
        self
    }

    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.ignore_not_found = ignore;
        self
    }

    pub fn credentials(mut self, credentials: Option<Arc<FeedCredentials>>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn validate(mut self, validator: ContentValidator) -> Self {
        self.validate = Some(validator);
        self
    }

    /// Runs the validation hook, if any, over a response body.
    pub fn check(&self, body: &[u8]) -> Result<(), TransportError> {
        match self.validate {
            Some(validator) => validator(body).map_err(|reason| TransportError::InvalidContent {
                url: self.url.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Successful transport outcomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(Vec<u8>),
    NotFound,
}

/// A single-attempt HTTP GET facade.
///
/// Implementations own connection reuse and response caching, and send each
/// request's credentials with that request only.
/// They must honor `cancel` at least before sending and should abandon an
/// in-flight request when it fires.
pub trait Transport: Send + Sync {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchOutcome, TransportError>>;
}
