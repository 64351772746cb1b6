//! Typed references to externally-reconciled objects

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::validation;

/// API group of extension resources (Network, ControlPlane, ...)
pub const EXTENSIONS_GROUP: &str = "extensions.gardener.cloud";

/// API group of ManagedResource bundles
pub const RESOURCES_GROUP: &str = "resources.gardener.cloud";

/// Version shared by both groups
pub const V1ALPHA1: &str = "v1alpha1";

/// Kinds whose plural is not derivable from the simple rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("dnsrecord", "dnsrecords"),
    ("backupentry", "backupentries"),
    ("backupbucket", "backupbuckets"),
];

/// Group, version, kind and plural of a resource type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

impl ResourceKind {
    /// Create a kind with an explicit plural
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            plural: plural.into(),
        }
    }

    /// An extension resource kind, e.g. `Network` or `ControlPlane`
    pub fn extension(kind: &str) -> Self {
        Self::new(EXTENSIONS_GROUP, V1ALPHA1, kind, pluralize_kind(kind))
    }

    /// The ManagedResource bundle kind
    pub fn managed_resource() -> Self {
        Self::new(RESOURCES_GROUP, V1ALPHA1, "ManagedResource", "managedresources")
    }

    /// Core v1 Secret
    pub fn secret() -> Self {
        Self::new("", "v1", "Secret", "secrets")
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)
    }
}

/// Pluralize a resource kind the way the API server names its endpoints
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Identity of one object: `(kind, namespace, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an extension resource
    pub fn extension(kind: &str, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::extension(kind), namespace, name)
    }

    /// Key of a ManagedResource bundle
    pub fn managed_resource(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::managed_resource(), namespace, name)
    }

    /// Key of a Secret
    pub fn secret(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::secret(), namespace, name)
    }

    /// Same kind and namespace, different name
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.kind.clone(), self.namespace.clone(), name)
    }

    /// Reject keys the API server would refuse before any request is made
    pub fn validate(&self) -> Result<()> {
        validation::validate_namespace(&self.namespace)?;
        validation::validate_name(&self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind.kind, self.namespace, self.name)
    }
}
