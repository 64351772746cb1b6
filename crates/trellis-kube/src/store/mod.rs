//! Object store abstraction over the Kubernetes API
//!
//! All lifecycle operations go through [`ObjectStore`], so they can run
//! against a real cluster ([`KubeStore`]) or an in-memory fake
//! ([`MockStore`]) that tests drive like a downstream controller would.
//!
//! Objects are handled as [`DynamicObject`]s: this crate only ever touches
//! metadata, `spec` and `status`, and never needs compiled-in types for the
//! extension or bundle kinds.

mod cluster;
mod mock;

pub use cluster::KubeStore;
pub use mock::{MockStore, OperationCounts};

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use std::collections::BTreeMap;

use crate::error::Result;
use trellis_core::{ObjectKey, ResourceKind};

/// Labels used as an equality selector
pub type Labels = BTreeMap<String, String>;

/// CRUD access to namespaced objects
///
/// Implementations must be Send + Sync for use across async tasks.
/// Errors must distinguish `NotFound`, `Conflict` (stale resourceVersion on
/// update) and `AlreadyExists` (create lost a race).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read one object
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject>;

    /// List objects of `kind` in `namespace` carrying every label in `labels`
    async fn list(&self, kind: &ResourceKind, namespace: &str, labels: &Labels) -> Result<Vec<DynamicObject>>;

    /// Create an object; fails with `AlreadyExists` if the name is taken
    async fn create(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an object; fails with `Conflict` if its resourceVersion is stale
    async fn update(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to the main resource
    async fn patch(&self, key: &ObjectKey, patch: &serde_json::Value) -> Result<DynamicObject>;

    /// Apply a JSON merge patch to the status subresource
    async fn patch_status(&self, key: &ObjectKey, patch: &serde_json::Value) -> Result<DynamicObject>;

    /// Request deletion; the object may linger while finalizers run
    async fn delete(&self, key: &ObjectKey) -> Result<()>;

    /// Read one object, mapping NotFound to `None`
    async fn get_opt(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        match self.get(key).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// API resource description for a kind
pub fn api_resource(kind: &ResourceKind) -> ApiResource {
    let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
    ApiResource::from_gvk_with_plural(&gvk, &kind.plural)
}

/// An empty object with type and identity filled in
pub fn new_object(key: &ObjectKey) -> DynamicObject {
    DynamicObject::new(&key.name, &api_resource(&key.kind)).within(&key.namespace)
}

/// Annotations of an object, empty if it has none
pub fn annotations(object: &DynamicObject) -> BTreeMap<String, String> {
    object.metadata.annotations.clone().unwrap_or_default()
}

/// Labels of an object, empty if it has none
pub fn labels(object: &DynamicObject) -> Labels {
    object.metadata.labels.clone().unwrap_or_default()
}

/// The `status` field, if the controller wrote one
pub fn status(object: &DynamicObject) -> Option<&serde_json::Value> {
    object.data.get("status").filter(|value| !value.is_null())
}

/// The `spec` field, if present
pub fn spec(object: &DynamicObject) -> Option<&serde_json::Value> {
    object.data.get("spec").filter(|value| !value.is_null())
}

/// Render labels as an equality selector (`a=b,c=d`)
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check whether `labels` contain every pair of `selector`
pub fn matches_labels(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_object_identity() {
        let key = ObjectKey::extension("Network", "shoot--foo", "bar");
        let object = new_object(&key);
        assert_eq!(object.metadata.name.as_deref(), Some("bar"));
        assert_eq!(object.metadata.namespace.as_deref(), Some("shoot--foo"));
        let types = object.types.unwrap();
        assert_eq!(types.api_version, "extensions.gardener.cloud/v1alpha1");
        assert_eq!(types.kind, "Network");
    }

    #[test]
    fn test_api_resource_core_group() {
        let ar = api_resource(&ResourceKind::secret());
        assert_eq!(ar.api_version, "v1");
        assert_eq!(ar.plural, "secrets");
    }

    #[test]
    fn test_label_selector() {
        let labels: Labels = [("b", "2"), ("a", "1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(label_selector(&labels), "a=1,b=2");
        assert_eq!(label_selector(&Labels::new()), "");
    }

    #[test]
    fn test_matches_labels() {
        let labels: Labels = [("pool", "a"), ("version", "v1"), ("role", "pool")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut selector = Labels::new();
        selector.insert("pool".to_string(), "a".to_string());
        assert!(matches_labels(&labels, &selector));
        selector.insert("version".to_string(), "v2".to_string());
        assert!(!matches_labels(&labels, &selector));
        assert!(matches_labels(&labels, &Labels::new()));
    }

    #[test]
    fn test_status_ignores_null() {
        let mut object = new_object(&ObjectKey::managed_resource("ns1", "n1"));
        assert!(status(&object).is_none());
        object.data["status"] = serde_json::Value::Null;
        assert!(status(&object).is_none());
        object.data["status"] = serde_json::json!({"observedGeneration": 1});
        assert!(status(&object).is_some());
    }
}
