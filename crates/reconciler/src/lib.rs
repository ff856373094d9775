//! Level-triggered reconciliation of `Cluster` certificates.
//!
//! Each pass works from current observed state rather than from the event
//! that triggered it:
//!
//! 1. Load the `Cluster` fresh from the store (gone means nothing to do)
//! 2. Fetch a certificate candidate from the external source
//! 3. Compare it with `spec.certificate`
//! 4. Write the whole observed object back only if they differ
//! 5. Ask to be run again after the resync interval
//!
//! Failures are returned, never retried in place. Retry timing belongs to the
//! caller; [`controller::error_policy`] applies a per-object exponential backoff.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sempex_core::ObjectKey;
//! use sempex_reconciler::{FixedCertificateSource, InMemoryResourceStore, ReconcilerBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! let reconciler = ReconcilerBuilder::new()
//!     .with_store(Arc::new(InMemoryResourceStore::new()))
//!     .with_source(Arc::new(FixedCertificateSource::new(104)))
//!     .build()?;
//!
//! let outcome = reconciler
//!     .reconcile(&ObjectKey::new("infra", "edge"), &CancellationToken::new())
//!     .await?;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod controller;
pub mod error;
pub mod reconciler;
pub mod source;
pub mod store;
pub mod types;

// Re-export main types
pub use controller::{Context, ControllerSettings, ErrorBackoff};
pub use error::{Error, Result};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use source::{
    CertificateSource, FixedCertificateSource, HttpCertificateSource, SequenceCertificateSource,
};
pub use store::{InMemoryResourceStore, KubeResourceStore, ResourceStore, UpdateFault};
pub use types::{PassAction, ReconcileOutcome, RequeueDirective};
