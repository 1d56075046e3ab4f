//! In-memory transport and fixture builders for unit tests.

use super::{BoxFuture, FetchOutcome, FetchRequest, Transport, TransportError};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Serves canned replies by URL and records every request.
///
/// Replies queued for a URL are served in order and the last one repeats
/// forever. Unknown URLs answer 404, or not-found when the request ignores
/// it.
#[derive(Default)]
pub(crate) struct FakeFeed {
    replies: Mutex<HashMap<String, Vec<Result<FetchOutcome, TransportError>>>>,
    pub(crate) requests: Mutex<Vec<FetchRequest>>,
}

impl FakeFeed {
    pub(crate) fn reply(&self, url: &str, outcome: Result<FetchOutcome, TransportError>) {
        self.replies
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(outcome);
    }

    pub(crate) fn body(&self, url: &str, body: String) {
        self.reply(url, Ok(FetchOutcome::Found(body.into_bytes())));
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }
}

impl Transport for FakeFeed {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<FetchOutcome, TransportError>> {
        self.requests.lock().unwrap().push(request.clone());
        let outcome = if cancel.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&request.url) {
                Some(queue) if queue.len() > 1 => queue.remove(0),
                Some(queue) => match &queue[0] {
                    Ok(outcome) => Ok(outcome.clone()),
                    Err(_) => Err(TransportError::Timeout),
                },
                None if request.ignore_not_found => Ok(FetchOutcome::NotFound),
                None => Err(TransportError::HttpStatus {
                    url: request.url.clone(),
                    status: 404,
                }),
            }
        };
        Box::pin(async move { outcome })
    }
}

pub(crate) fn entry_xml(id: &str, version: &str) -> String {
    format!(
        r#"<entry><title>{id}</title><m:properties><d:Id>{id}</d:Id><d:Version>{version}</d:Version></m:properties></entry>"#
    )
}

pub(crate) fn page_xml(entries: &[String], next: Option<&str>) -> String {
    let link = next
        .map(|n| format!(r#"<link rel="next" href="{}"/>"#, n.replace('&', "&amp;")))
        .unwrap_or_default();
    format!(
        r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:d="http://schemas.microsoft.com/ado/2007/08/dataservices" xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">{}{}</feed>"#,
        entries.join(""),
        link
    )
}
