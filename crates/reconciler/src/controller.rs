//! Kubernetes controller wiring.
//!
//! `kube::runtime::Controller` is the watch and queue layer: it delivers each
//! changed or requeued `Cluster`, keeps at most one pass in flight per object,
//! and applies the `Action` returned here.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{self, Action};
use kube::runtime::{Controller, watcher};
use kube::Client;
use sempex_core::{Cluster, ObjectKey};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::error::{Error, Result};
use crate::reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
use crate::source::CertificateSource;
use crate::store::KubeResourceStore;
use crate::types::RequeueDirective;

/// Per-object exponential backoff for failed passes.
///
/// The delay doubles with each consecutive failure of the same object, capped
/// at `max`, and resets once a pass succeeds. Entries that have not failed
/// again for twice `max` are dropped, so objects deleted while failing do not
/// accumulate.
#[derive(Debug)]
pub struct ErrorBackoff {
    base: Duration,
    max: Duration,
    failures: DashMap<ObjectKey, Failures>,
}

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last: Instant,
}

impl Default for ErrorBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
            failures: DashMap::new(),
        }
    }
}

impl ErrorBackoff {
    /// Create a backoff policy.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `base` is zero or greater than `max`.
    pub fn new(base: Duration, max: Duration) -> Result<Self> {
        if base.is_zero() {
            return Err(Error::invalid_config("backoff base must be positive"));
        }
        if base > max {
            return Err(Error::invalid_config(format!(
                "backoff base {base:?} exceeds maximum {max:?}"
            )));
        }
        Ok(Self {
            base,
            max,
            failures: DashMap::new(),
        })
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let now = Instant::now();
        // Must run before `entry` takes a shard lock.
        self.prune(now);

        let mut failures = self.failures.entry(key.clone()).or_insert(Failures {
            count: 0,
            last: now,
        });
        let attempt = failures.count;
        failures.count = attempt.saturating_add(1);
        failures.last = now;

        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Forget past failures of `key`.
    pub fn reset(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for `key`.
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map_or(0, |f| f.count)
    }

    /// Number of objects with recorded failures.
    pub fn tracked(&self) -> usize {
        self.failures.len()
    }

    fn prune(&self, now: Instant) {
        let horizon = self.max.saturating_mul(2);
        self.failures
            .retain(|_, f| now.saturating_duration_since(f.last) <= horizon);
    }
}

/// Shared state handed to every pass.
pub struct Context {
    reconciler: Reconciler,
    backoff: ErrorBackoff,
    cancel: CancellationToken,
}

impl Context {
    /// Create a new context.
    pub const fn new(reconciler: Reconciler, backoff: ErrorBackoff, cancel: CancellationToken) -> Self {
        Self {
            reconciler,
            backoff,
            cancel,
        }
    }

    /// Get the backoff policy.
    pub const fn backoff(&self) -> &ErrorBackoff {
        &self.backoff
    }
}

/// Translate a pass directive into a controller action.
pub fn to_action(directive: RequeueDirective) -> Action {
    match directive {
        RequeueDirective::NoRequeue => Action::await_change(),
        RequeueDirective::RequeueAfter(delay) => Action::requeue(delay),
    }
}

/// Controller entry point for one delivered `Cluster`.
///
/// Only the identity of the delivered object is used; the pass reloads it.
///
/// # Errors
///
/// Propagates any pass failure to [`error_policy`].
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action> {
    let key = ObjectKey::from_resource(&cluster)?;
    let outcome = ctx
        .reconciler
        .reconcile(&key, &ctx.cancel.child_token())
        .await?;
    ctx.backoff.reset(&key);
    Ok(to_action(outcome.directive))
}

/// Decide when to retry after a failed pass.
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    if error.is_cancelled() {
        return Action::await_change();
    }

    let Ok(key) = ObjectKey::from_resource(&cluster) else {
        error!(error = %error, "Reconciliation failed for an unnamed cluster");
        return Action::await_change();
    };

    if error.is_retryable() {
        let delay = ctx.backoff.next_delay(&key);
        warn!(
            key = %key,
            error = %error,
            failures = ctx.backoff.failures(&key),
            retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconciliation failed, retrying"
        );
        Action::requeue(delay)
    } else {
        error!(key = %key, error = %error, "Reconciliation failed, waiting for a change");
        Action::await_change()
    }
}

/// Settings for [`run`].
#[derive(Debug, Default)]
pub struct ControllerSettings {
    /// Watch only this namespace; all namespaces when `None`.
    pub namespace: Option<String>,
    /// Reconciler configuration.
    pub reconciler: ReconcilerConfig,
    /// Retry policy for failed passes.
    pub backoff: ErrorBackoff,
}

/// Run the `Cluster` controller until `cancel` fires.
///
/// # Errors
///
/// Returns `Error::InvalidConfig` if the reconciler cannot be built.
pub async fn run(
    client: Client,
    settings: ControllerSettings,
    source: Arc<dyn CertificateSource>,
    cancel: CancellationToken,
) -> Result<()> {
    let reconciler = ReconcilerBuilder::new()
        .with_store(Arc::new(KubeResourceStore::new(client.clone())))
        .with_source(source)
        .with_config(settings.reconciler)
        .with_span(info_span!("cluster_controller"))
        .build()?;

    let api: Api<Cluster> = match &settings.namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let ctx = Arc::new(Context::new(reconciler, settings.backoff, cancel.clone()));
    let observer = ctx.clone();

    info!(
        namespace = settings.namespace.as_deref().unwrap_or("*"),
        resync_secs = settings.reconciler.resync_interval.as_secs(),
        "Starting cluster controller"
    );

    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            let ctx = observer.clone();
            async move {
                match res {
                    Ok((obj, action)) => debug!(cluster = %obj, ?action, "Reconciled"),
                    Err(controller::Error::ObjectNotFound(obj)) => {
                        debug!(cluster = %obj, "Cluster is gone, dropping its retry state");
                        ctx.backoff.reset(&ObjectKey {
                            namespace: obj.namespace,
                            name: obj.name,
                        });
                    }
                    Err(e) => debug!(error = %e, "Reconcile attempt did not complete"),
                }
            }
        })
        .await;

    info!("Cluster controller stopped");
    Ok(())
}
