//! The `Cluster` custom resource and its identity.

use std::fmt;
use std::str::FromStr;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Desired state of a `Cluster`.
///
/// `certificate` is the only reconciled field. It is written by the
/// controller, or by an operator editing desired state directly.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "cluster.sempex",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub certificate: i64,
}

impl Cluster {
    /// Current value of `spec.certificate`.
    #[inline]
    pub const fn certificate(&self) -> i64 {
        self.spec.certificate
    }

    /// Copy of the whole observed object with `spec.certificate` replaced.
    ///
    /// Metadata, including `resourceVersion`, is carried over unchanged so the
    /// store can reject the write if the object moved on since it was read.
    #[must_use]
    pub fn with_certificate(&self, certificate: i64) -> Self {
        let mut next = self.clone();
        next.spec.certificate = certificate;
        next
    }

    /// Stored `resourceVersion`, if the object has been persisted.
    #[inline]
    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// Identity of a resource: optional namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced resource.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key without a namespace.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Derive the key of a stored object.
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingMetadata` if the object has no name.
    pub fn from_resource(cluster: &Cluster) -> Result<Self> {
        let name = cluster
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::missing_metadata(".metadata.name"))?;
        Ok(Self {
            namespace: cluster.namespace(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    /// Parses `namespace/name` or a bare `name`.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) if !name.is_empty() => Ok(Self::cluster_scoped(name)),
            (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::new(ns, name))
            }
            (_, _, Some(_)) => Err(Error::invalid_key(s, "expected at most one '/'")),
            _ => Err(Error::invalid_key(s, "namespace and name must be non-empty")),
        }
    }
}
