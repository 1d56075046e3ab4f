use super::{BoxFuture, FetchOutcome, FetchRequest, Transport, TransportError};
use futures::StreamExt;
use lru::LruCache;
use secrecy::ExposeSecret;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_CACHE_ENTRIES: usize = 256;

/// Tunables for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportOptions {
    pub timeout: Duration,
    pub max_response_bytes: usize,
    /// Number of cached responses kept. Zero disables the response cache.
    pub cache_entries: usize,
}

impl Default for HttpTransportOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            cache_entries: DEFAULT_CACHE_ENTRIES,
        }
    }
}

struct CachedBody {
    body: Vec<u8>,
    stored_at: Instant,
}

/// [`Transport`] backed by `reqwest`.
///
/// Each fetch is a single attempt bounded by the configured timeout and
/// response size. Successful bodies are kept in an in-memory LRU cache
/// keyed by the request's cache key.
pub struct HttpTransport {
    client: reqwest::Client,
    options: HttpTransportOptions,
    cache: Option<Mutex<LruCache<String, CachedBody>>>,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, options: HttpTransportOptions) -> Self {
        let cache = NonZeroUsize::new(options.cache_entries).map(|n| Mutex::new(LruCache::new(n)));
        Self {
            client,
            options,
            cache,
        }
    }

    fn cached(&self, request: &FetchRequest) -> Option<Vec<u8>> {
        if request.cache_context.no_cache {
            return None;
        }
        let key = request.cache_key.as_ref()?;
        let mut cache = self.cache.as_ref()?.lock().ok()?;
        let expired = match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= request.cache_context.max_age => {
                return Some(entry.body.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    fn store(&self, request: &FetchRequest, body: &[u8]) {
        let (Some(key), Some(cache)) = (&request.cache_key, &self.cache) else {
            return;
        };
        if let Ok(mut cache) = cache.lock() {
            cache.put(
                key.clone(),
                CachedBody {
                    body: body.to_vec(),
                    stored_at: Instant::now(),
                },
            );
        }
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<FetchOutcome, TransportError> {
        if let Some(body) = self.cached(request) {
            tracing::debug!(url = %request.url, "Serving response from cache");
            return Ok(FetchOutcome::Found(body));
        }

        let mut builder = self
            .client
            .get(&request.url)
            .header(reqwest::header::ACCEPT, request.accept.join(", "));
        if let Some(creds) = &request.credentials {
            builder = builder.basic_auth(&creds.username, Some(creds.password.expose_secret()));
        }

        let response = tokio::time::timeout(self.options.timeout, builder.send())
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && request.ignore_not_found {
            return Ok(FetchOutcome::NotFound);
        }
        // An empty reply carries no document; the engine treats it as an empty page.
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = tokio::time::timeout(
            self.options.timeout,
            read_limited_bytes(response, self.options.max_response_bytes),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;

        request.check(&body)?;
        self.store(request, &body);
        Ok(FetchOutcome::Found(body))
    }
}

impl Transport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchOutcome, TransportError>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.fetch_once(request) => result,
            }
        })
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(TransportError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(TransportError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(TransportError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(TransportError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
