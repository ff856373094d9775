//! Certificate sources.
//!
//! A source yields one integer candidate per call. The reconciler treats it as
//! a black box that may be slow, nondeterministic, or failing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Endpoint queried when no source URL is configured.
pub const DEFAULT_SOURCE_URL: &str =
    "http://www.randomnumberapi.com/api/v1.0/random?min=100&max=110&count=1";

/// Default per-request timeout for [`HttpCertificateSource`].
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Trait for obtaining a certificate candidate.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// Fetch a candidate value.
    async fn fetch_candidate(&self) -> Result<i64>;
}

/// Source that reads a JSON array of integers over HTTP and takes the first one.
pub struct HttpCertificateSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpCertificateSource {
    /// Create a source for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the HTTP client cannot be built.
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::invalid_config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    /// The queried endpoint.
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl CertificateSource for HttpCertificateSource {
    async fn fetch_candidate(&self) -> Result<i64> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| Error::fetch(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("{} responded with {status}", self.url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(format!("reading body from {} failed: {e}", self.url)))?;

        let candidate = parse_candidate(&body)?;
        debug!(url = %self.url, candidate, "Fetched certificate candidate");
        Ok(candidate)
    }
}

/// Parse a response body of the form `[n, ...]` and return `n`.
///
/// # Errors
///
/// Returns `Error::Fetch` if the body is not a JSON array of integers or is empty.
pub fn parse_candidate(body: &[u8]) -> Result<i64> {
    let numbers: Vec<i64> = serde_json::from_slice(body)
        .map_err(|e| Error::fetch(format!("malformed payload: {e}")))?;
    numbers
        .first()
        .copied()
        .ok_or_else(|| Error::fetch("payload contained no candidates"))
}

/// Source that always returns the same result.
pub struct FixedCertificateSource {
    result: std::result::Result<i64, String>,
    calls: AtomicUsize,
}

impl FixedCertificateSource {
    /// Always return `certificate`.
    pub const fn new(certificate: i64) -> Self {
        Self {
            result: Ok(certificate),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fail with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            result: Err(reason.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateSource for FixedCertificateSource {
    async fn fetch_candidate(&self) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(Error::fetch)
    }
}

/// Source that replays a scripted sequence of results.
///
/// Once the script runs out, the last entry repeats.
pub struct SequenceCertificateSource {
    script: Mutex<VecDeque<std::result::Result<i64, String>>>,
    last: Mutex<Option<std::result::Result<i64, String>>>,
    calls: AtomicUsize,
}

impl SequenceCertificateSource {
    /// Create a source from a script.
    pub fn new(script: impl IntoIterator<Item = std::result::Result<i64, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of fetches made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateSource for SequenceCertificateSource {
    async fn fetch_candidate(&self) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().await.pop_front();
        let mut last = self.last.lock().await;
        if let Some(entry) = next {
            *last = Some(entry);
        }
        match last.clone() {
            Some(entry) => entry.map_err(Error::fetch),
            None => Err(Error::fetch("script is empty")),
        }
    }
}
