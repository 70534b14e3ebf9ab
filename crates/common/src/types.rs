//! Core types for imagetest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an externally managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Container,
    Image,
    Pod,
    Build,
    ImageStream,
    ImageStreamTag,
    Deployment,
    Application,
    Project,
    ClusterObject,
    HelmRelease,
    Address,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Container => write!(f, "container"),
            ResourceKind::Image => write!(f, "image"),
            ResourceKind::Pod => write!(f, "pod"),
            ResourceKind::Build => write!(f, "build"),
            ResourceKind::ImageStream => write!(f, "image stream"),
            ResourceKind::ImageStreamTag => write!(f, "image stream tag"),
            ResourceKind::Deployment => write!(f, "deployment"),
            ResourceKind::Application => write!(f, "application"),
            ResourceKind::Project => write!(f, "project"),
            ResourceKind::ClusterObject => write!(f, "cluster object"),
            ResourceKind::HelmRelease => write!(f, "helm release"),
            ResourceKind::Address => write!(f, "address"),
        }
    }
}

/// Identifies a resource created by the harness.
///
/// Handles are never mutated after creation; they are appended to the
/// session's cleanup registry and consumed by teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub id: String,
    /// Project the resource lives in, for cluster-scoped resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            namespace: None,
            created_at: Utc::now(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Same resource, regardless of when the handle was minted
    pub fn same_resource(&self, other: &ResourceHandle) -> bool {
        self.kind == other.kind && self.id == other.id && self.namespace == other.namespace
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.id),
            None => write!(f, "{} {}", self.kind, self.id),
        }
    }
}

/// Generate a unique, DNS-safe resource name with the given prefix
pub fn unique_name(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}
