use thiserror::Error;

/// Errors surfaced by the query engine and everything layered above it.
///
/// Transport and parse failures are classified inside the engine. Only these
/// variants cross its boundary, so callers can tell "no results" apart from
/// "query failed".
#[derive(Debug, Error)]
pub enum FeedError {
    /// Retries were exhausted, or the feed answered with something the
    /// protocol does not allow. Carries the feed and the offending URL.
    #[error("Failed to fetch results from feed '{feed}' at '{url}': {message}")]
    Fatal {
        feed: String,
        url: String,
        message: String,
    },
    /// A package entry had an unparseable version or no resolvable id.
    /// Never retried.
    #[error("Malformed package entry in '{url}': {message}")]
    MalformedEntry { url: String, message: String },
    /// A continuation link pointed back at a page already downloaded.
    #[error("'{url}' is a duplicate url which has already been downloaded and would lead to a cycle")]
    DuplicateNextLink { url: String },
    /// A required argument was empty or otherwise unusable.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The caller's cancellation token fired before the query completed.
    #[error("Operation was cancelled")]
    Cancelled,
}

impl FeedError {
    /// Whether this error reflects a caller-side cancellation rather than a
    /// feed problem.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Cancelled)
    }
}
