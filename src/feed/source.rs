use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors that can occur when constructing a [`FeedSource`].
#[derive(Debug, Error)]
pub enum SourceError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
}

/// Username and password sent as HTTP basic auth.
#[derive(Debug)]
pub struct FeedCredentials {
    pub username: String,
    pub password: SecretString,
}

impl FeedCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// A configured package feed.
///
/// Immutable once built. Two sources with URLs differing only in case
/// share a [`key`](FeedSource::key) and therefore a cache slot.
#[derive(Debug, Clone)]
pub struct FeedSource {
    url: String,
    credentials: Option<Arc<FeedCredentials>>,
}

impl FeedSource {
    /// Validates and wraps a feed URL.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the URL does not parse or is not
    /// `http`/`https`.
    pub fn new(url: &str) -> Result<Self, SourceError> {
        let parsed = Url::parse(url.trim())?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => return Err(SourceError::UnsupportedScheme(scheme.to_owned())),
        }
        Ok(Self {
            url: url.trim().to_string(),
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: FeedCredentials) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    /// The URL as configured.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL without trailing separators, used as a fallback base address.
    pub fn trimmed_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Case-insensitive cache key.
    pub fn key(&self) -> String {
        self.url.to_lowercase()
    }

    pub fn credentials(&self) -> Option<&Arc<FeedCredentials>> {
        self.credentials.as_ref()
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
