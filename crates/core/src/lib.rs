//! Resource model for the sempex `Cluster` operator.
//!
//! A `Cluster` carries a single reconciled field, `spec.certificate`. The
//! controller in `sempex-reconciler` drives that field toward a value
//! obtained from an external source.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod resource;

pub use error::{Error, Result};
pub use resource::{Cluster, ClusterSpec, ObjectKey};
