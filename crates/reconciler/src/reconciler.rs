//! Reconciler implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sempex_core::ObjectKey;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::error::{Error, Result};
use crate::source::CertificateSource;
use crate::store::ResourceStore;
use crate::types::{PassAction, ReconcileOutcome, RequeueDirective};

/// Configuration for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay before a successfully reconciled resource is checked again.
    pub resync_interval: Duration,
    /// Upper bound on a single pass, covering load, fetch and update.
    pub pass_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(60),
            pass_timeout: Duration::from_secs(30),
        }
    }
}

impl ReconcilerConfig {
    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if either duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.resync_interval.is_zero() {
            return Err(Error::invalid_config("resync interval must be positive"));
        }
        if self.pass_timeout.is_zero() {
            return Err(Error::invalid_config("pass timeout must be positive"));
        }
        Ok(())
    }
}

/// Level-triggered reconciler for `Cluster` certificates.
///
/// Each pass loads the object fresh, fetches a candidate, and writes the whole
/// observed object back only when the candidate differs. It keeps no state
/// between passes and never retries internally.
pub struct Reconciler {
    /// Where `Cluster` objects are read and written.
    store: Arc<dyn ResourceStore>,
    /// Where candidates come from.
    source: Arc<dyn CertificateSource>,
    /// Configuration.
    config: ReconcilerConfig,
    /// Parent span for every pass.
    span: Span,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        source: Arc<dyn CertificateSource>,
        config: ReconcilerConfig,
        span: Span,
    ) -> Self {
        Self {
            store,
            source,
            config,
            span,
        }
    }

    /// Run one reconciliation pass for `key`.
    ///
    /// # Errors
    ///
    /// Fails with `Error::Fetch` if no candidate could be obtained,
    /// `Error::Conflict` if the object changed since it was loaded,
    /// `Error::Store` for other store failures, `Error::TimedOut` if the pass
    /// overran `pass_timeout`, and `Error::Cancelled` if `cancel` fired. A
    /// missing object is not an error.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome> {
        let span = info_span!(parent: &self.span, "reconcile", key = %key);
        async { self.run_pass(key, cancel).await.inspect_err(log_failure) }
            .instrument(span)
            .await
    }

    async fn run_pass(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<ReconcileOutcome> {
        let Some(deadline) = Instant::now().checked_add(self.config.pass_timeout) else {
            return Err(Error::invalid_config("pass timeout is too large to schedule"));
        };

        let Some(cluster) = self
            .bounded(key, cancel, deadline, self.store.get(key))
            .await?
        else {
            info!("Cluster not found, nothing to reconcile");
            return Ok(ReconcileOutcome::deleted(key.clone()));
        };

        let candidate = self
            .bounded(key, cancel, deadline, self.source.fetch_candidate())
            .await?;

        let current = cluster.certificate();
        let action = if candidate == current {
            debug!(certificate = current, "No update required for the certificate");
            PassAction::Unchanged {
                certificate: current,
            }
        } else {
            info!(old = current, new = candidate, "Updating certificate");
            let next = cluster.with_certificate(candidate);
            self.bounded(key, cancel, deadline, self.store.update(&next))
                .await?;
            PassAction::Updated {
                from: current,
                to: candidate,
            }
        };

        Ok(ReconcileOutcome {
            key: key.clone(),
            action,
            directive: RequeueDirective::RequeueAfter(self.config.resync_interval),
        })
    }

    /// Await `fut` unless the pass is cancelled or its deadline passes first.
    async fn bounded<T, F>(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
        deadline: Instant,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::cancelled(key)),
            res = tokio::time::timeout_at(deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(Error::timed_out(key, self.config.pass_timeout)),
            },
        }
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

fn log_failure(err: &Error) {
    match err {
        Error::Cancelled { .. } => debug!(error = %err, "Reconciliation abandoned"),
        Error::Conflict { .. } => warn!(error = %err, "Cluster changed during reconciliation"),
        Error::Fetch { .. } => error!(error = %err, "Failed to check for a new certificate"),
        _ => error!(error = %err, "Reconciliation failed"),
    }
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    store: Option<Arc<dyn ResourceStore>>,
    source: Option<Arc<dyn CertificateSource>>,
    config: ReconcilerConfig,
    span: Option<Span>,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            store: None,
            source: None,
            config: ReconcilerConfig::default(),
            span: None,
        }
    }

    /// Set the resource store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ResourceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the certificate source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn CertificateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub const fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the resync interval.
    #[must_use]
    pub const fn resync_interval(mut self, interval: Duration) -> Self {
        self.config.resync_interval = interval;
        self
    }

    /// Set the per-pass timeout.
    #[must_use]
    pub const fn pass_timeout(mut self, timeout: Duration) -> Self {
        self.config.pass_timeout = timeout;
        self
    }

    /// Set the parent span passes are logged under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the store or source is missing or the
    /// configuration is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let store = self
            .store
            .ok_or_else(|| Error::invalid_config("Resource store is required"))?;
        let source = self
            .source
            .ok_or_else(|| Error::invalid_config("Certificate source is required"))?;
        self.config.validate()?;

        let span = self
            .span
            .unwrap_or_else(|| info_span!("cluster_controller"));

        Ok(Reconciler::new(store, source, self.config, span))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::source::FixedCertificateSource;
    use crate::store::InMemoryResourceStore;
    use async_trait::async_trait;
    use sempex_core::{Cluster, ClusterSpec};

    struct SlowSource {
        delay: Duration,
        certificate: i64,
    }

    #[async_trait]
    impl CertificateSource for SlowSource {
        async fn fetch_candidate(&self) -> Result<i64> {
            tokio::time::sleep(self.delay).await;
            Ok(self.certificate)
        }
    }

    async fn seeded_store(certificate: i64) -> (Arc<InMemoryResourceStore>, ObjectKey) {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut cluster = Cluster::new("edge", ClusterSpec { certificate });
        cluster.metadata.namespace = Some("infra".to_string());
        let key = store.insert(cluster).await.unwrap();
        (store, key)
    }

    fn build(
        store: Arc<InMemoryResourceStore>,
        source: Arc<dyn CertificateSource>,
        config: ReconcilerConfig,
    ) -> Reconciler {
        ReconcilerBuilder::new()
            .with_store(store)
            .with_source(source)
            .with_config(config)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder() {
        let result = ReconcilerBuilder::new()
            .with_store(Arc::new(InMemoryResourceStore::new()))
            .with_source(Arc::new(FixedCertificateSource::new(1)))
            .resync_interval(Duration::from_secs(5))
            .pass_timeout(Duration::from_secs(2))
            .build();

        assert!(result.is_ok());
        let reconciler = result.ok();
        assert_eq!(
            reconciler.as_ref().map(|r| r.config().resync_interval),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            reconciler.map(|r| r.config().pass_timeout),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let missing_store = ReconcilerBuilder::new()
            .with_source(Arc::new(FixedCertificateSource::new(1)))
            .build();
        assert!(matches!(missing_store, Err(Error::InvalidConfig { .. })));

        let missing_source = ReconcilerBuilder::new()
            .with_store(Arc::new(InMemoryResourceStore::new()))
            .build();
        assert!(matches!(missing_source, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_rejects_zero_durations() {
        let result = ReconcilerBuilder::new()
            .with_store(Arc::new(InMemoryResourceStore::new()))
            .with_source(Arc::new(FixedCertificateSource::new(1)))
            .resync_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));

        let config = ReconcilerConfig {
            pass_timeout: Duration::ZERO,
            ..ReconcilerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_unschedulable_pass_timeout_is_rejected() {
        let (store, key) = seeded_store(5).await;
        let config = ReconcilerConfig {
            pass_timeout: Duration::MAX,
            ..ReconcilerConfig::default()
        };
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FixedCertificateSource::new(9)),
            config,
            Span::none(),
        );

        let err = reconciler
            .reconcile(&key, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(!err.is_retryable());
        assert_eq!(store.gets(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_writes_whole_object() {
        let (store, key) = seeded_store(5).await;
        let before = store.snapshot(&key).await.unwrap();
        let reconciler = build(
            store.clone(),
            Arc::new(FixedCertificateSource::new(9)),
            ReconcilerConfig::default(),
        );

        let outcome = reconciler
            .reconcile(&key, &CancellationToken::new())
            .await
            .unwrap();

        let after = store.snapshot(&key).await.unwrap();
        assert_eq!(outcome.action, PassAction::Updated { from: 5, to: 9 });
        assert_eq!(after.certificate(), 9);
        assert_eq!(after.metadata.name, before.metadata.name);
        assert_eq!(after.metadata.namespace, before.metadata.namespace);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let (store, key) = seeded_store(5).await;
        let source = Arc::new(FixedCertificateSource::new(9));
        let reconciler = build(store.clone(), source.clone(), ReconcilerConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reconciler.reconcile(&key, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(store.gets(), 0);
        assert_eq!(source.calls(), 0);
        assert_eq!(store.updates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_during_fetch_does_not_write() {
        let (store, key) = seeded_store(5).await;
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(20),
            certificate: 9,
        });
        let reconciler = build(store.clone(), source, ReconcilerConfig::default());

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = reconciler.reconcile(&key, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(store.updates(), 0);
        assert_eq!(store.snapshot(&key).await.unwrap().certificate(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let (store, key) = seeded_store(5).await;
        let source = Arc::new(SlowSource {
            delay: Duration::from_secs(120),
            certificate: 9,
        });
        let config = ReconcilerConfig {
            pass_timeout: Duration::from_secs(1),
            ..ReconcilerConfig::default()
        };
        let reconciler = build(store.clone(), source, config);

        let err = reconciler
            .reconcile(&key, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TimedOut { .. }));
        assert!(err.is_retryable());
        assert_eq!(store.updates(), 0);
    }
}
