//! ManagedResource bundle lifecycle
//!
//! A bundle is a ManagedResource pointing at one or more immutable payload
//! Secrets. Secret names are derived from the payload content, so a deploy
//! with unchanged manifests reuses the existing Secrets and a deploy with new
//! manifests switches the bundle over to fresh ones:
//!
//! ```text
//! deploy(payload) ──▶ Secret managedresource-<name>-<hash> (create if absent)
//!                 ──▶ ManagedResource <name> { secretRefs: [...] } (upsert)
//!                 ──▶ delete Secrets the previous revision referenced
//! ```
//!
//! Stale bundles are found by their discriminator labels: a bundle matching
//! the selector that is not covered by any desired label set is deleted,
//! everything else is left alone.

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use futures::FutureExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::Result;
use crate::fanout::run_all;
use crate::health::{HealthCheck, wait_for};
use crate::store::{Labels, ObjectStore, annotations, labels, matches_labels, spec};
use crate::upsert::UpsertOperator;
use trellis_core::bundle::LABEL_ORIGIN;
use trellis_core::payload::MAX_SECRET_PAYLOAD;
use trellis_core::validation::{validate_label_key, validate_label_value};
use trellis_core::{BundleClass, ManagedResourceSpec, ObjectKey, Payload, ResourceKind, RetryPolicy, SecretRef, content_name};

/// Prefix of payload Secret names
pub const SECRET_PREFIX: &str = "managedresource";

/// Marks payload Secrets the resource manager may garbage collect once unreferenced
pub const LABEL_GC_REFERENCE: &str = "resources.gardener.cloud/garbage-collectable-reference";

/// Name of the bundle a payload Secret was created for
pub const LABEL_BUNDLE: &str = "trellis.io/bundle";

/// Comma-separated discriminator label keys the last deploy put on a bundle
pub const ANNOTATION_OWNED_LABELS: &str = "trellis.io/owned-labels";

/// Default value of the `origin` label
pub const DEFAULT_ORIGIN: &str = "trellis";

/// Desired state of one bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSpec {
    pub namespace: String,
    pub name: String,
    pub class: BundleClass,
    pub payload: Payload,
    /// Discriminator labels put on the bundle itself
    pub labels: Labels,
    /// Labels the resource manager injects into every applied object
    pub inject_labels: Labels,
    /// Leave applied objects behind when the bundle is deleted
    pub keep_objects: bool,
}

impl BundleSpec {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, payload: Payload) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            class: BundleClass::default(),
            payload,
            labels: Labels::new(),
            inject_labels: Labels::new(),
            keep_objects: false,
        }
    }

    pub fn with_class(mut self, class: BundleClass) -> Self {
        self.class = class;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_inject_labels(mut self, labels: Labels) -> Self {
        self.inject_labels.extend(labels);
        self
    }

    pub fn keep_objects(mut self, keep: bool) -> Self {
        self.keep_objects = keep;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::managed_resource(&self.namespace, &self.name)
    }

    /// Reject specs the API server would refuse before any request is made
    pub fn validate(&self) -> Result<()> {
        self.key().validate()?;
        self.payload.validate()?;
        for (key, value) in self.labels.iter().chain(&self.inject_labels) {
            validate_label_key(key)?;
            validate_label_value(value)?;
        }
        Ok(())
    }
}

/// What a deploy wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Payload Secrets the bundle now references
    pub secret_names: Vec<String>,
    /// The bundle references different Secrets than before
    pub payload_changed: bool,
}

/// Deploy, wait for and delete ManagedResource bundles
#[derive(Clone)]
pub struct BundleReconciler {
    operator: UpsertOperator,
    policy: RetryPolicy,
    origin: String,
    max_secret_size: usize,
}

impl BundleReconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            operator: UpsertOperator::new(store),
            policy: RetryPolicy::bundle_default(),
            origin: DEFAULT_ORIGIN.to_string(),
            max_secret_size: MAX_SECRET_PAYLOAD,
        }
    }

    /// Use `policy` for every wait
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Value of the `origin` label put on every bundle
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Bytes stored in one payload Secret before the payload is split
    pub fn with_max_secret_size(mut self, max: usize) -> Self {
        self.max_secret_size = max;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        self.operator.store()
    }

    /// Write the payload Secrets and point the bundle at them
    pub async fn deploy(&self, ctx: &Context, bundle: &BundleSpec) -> Result<DeployOutcome> {
        bundle.validate()?;
        validate_label_value(&self.origin)?;
        validate_label_value(&bundle.name)?;
        let key = bundle.key();

        let prefix = format!("{}-{}", SECRET_PREFIX, bundle.name);
        let partitions = bundle.payload.partition(self.max_secret_size)?;
        let secret_keys = partitions
            .iter()
            .map(|partition| {
                let secret_key = ObjectKey::secret(&bundle.namespace, content_name(&prefix, partition));
                secret_key.validate()?;
                Ok(secret_key)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut secret_names = Vec::with_capacity(partitions.len());
        for (secret_key, partition) in secret_keys.into_iter().zip(&partitions) {
            self.ensure_secret(ctx, &secret_key, &bundle.name, partition).await?;
            secret_names.push(secret_key.name);
        }

        let desired = ManagedResourceSpec {
            class: bundle.class.spec_value(),
            secret_refs: secret_names.iter().map(|name| SecretRef { name: name.clone() }).collect(),
            inject_labels: bundle.inject_labels.clone(),
            keep_objects: Some(bundle.keep_objects),
        };
        let desired = serde_json::to_value(&desired)?;

        let mut previous: Vec<String> = Vec::new();
        self.operator
            .upsert(ctx, &key, None, |object| {
                previous = ManagedResourceSpec::from_value(spec(object))?.secret_names();

                let mut current = labels(object);
                for dropped in owned_labels(object) {
                    if !bundle.labels.contains_key(&dropped) {
                        current.remove(&dropped);
                    }
                }
                current.extend(bundle.labels.clone());
                current.insert(LABEL_ORIGIN.to_string(), self.origin.clone());
                object.metadata.labels = Some(current);

                let annotations = object.metadata.annotations.get_or_insert_with(Default::default);
                if bundle.labels.is_empty() {
                    annotations.remove(ANNOTATION_OWNED_LABELS);
                } else {
                    let owned: Vec<&str> = bundle.labels.keys().map(String::as_str).collect();
                    annotations.insert(ANNOTATION_OWNED_LABELS.to_string(), owned.join(","));
                }
                if annotations.is_empty() {
                    object.metadata.annotations = None;
                }
                object.data["spec"] = desired.clone();
                Ok(())
            })
            .await?;

        let current: BTreeSet<&String> = secret_names.iter().collect();
        let payload_changed = previous.iter().collect::<BTreeSet<_>>() != current;

        for name in previous.iter().filter(|name| !current.contains(name)) {
            let secret_key = ObjectKey::secret(&bundle.namespace, name.as_str());
            match self.store().delete(&secret_key).await {
                Ok(()) => debug!(resource = %secret_key, "deleted unreferenced payload"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(resource = %secret_key, error = %e, "could not delete unreferenced payload"),
            }
        }

        info!(
            resource = %key,
            secrets = secret_names.len(),
            payload_changed,
            "bundle deployed"
        );
        Ok(DeployOutcome {
            secret_names,
            payload_changed,
        })
    }

    async fn ensure_secret(&self, ctx: &Context, key: &ObjectKey, bundle: &str, payload: &Payload) -> Result<()> {
        ctx.check()?;
        if self.store().get_opt(key).await?.is_some() {
            debug!(resource = %key, "payload unchanged, reusing");
            return Ok(());
        }

        let secret = payload_secret(key, bundle, payload)?;
        match self.store().create(key, &secret).await {
            Ok(_) => {
                debug!(resource = %key, entries = payload.len(), bytes = payload.size(), "payload stored");
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wait until the bundle is applied and healthy
    pub async fn wait(&self, ctx: &Context, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::managed_resource(namespace, name);
        wait_for(ctx, self.store().as_ref(), &self.policy, &key, HealthCheck::BundleReady).await?;
        info!(resource = %key, "bundle healthy");
        Ok(())
    }

    /// Delete the bundle and its payload Secrets; an absent bundle counts as deleted
    pub async fn destroy(&self, ctx: &Context, namespace: &str, name: &str) -> Result<()> {
        ctx.check()?;
        let key = ObjectKey::managed_resource(namespace, name);
        let store = self.store();

        let Some(object) = store.get_opt(&key).await? else {
            debug!(resource = %key, "already gone");
            return Ok(());
        };
        let secret_names = ManagedResourceSpec::from_value(spec(&object))?.secret_names();

        match store.delete(&key).await {
            Ok(()) => info!(resource = %key, "deletion requested"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        for secret in secret_names {
            let secret_key = ObjectKey::secret(namespace, secret);
            match store.delete(&secret_key).await {
                Ok(()) => debug!(resource = %secret_key, "payload deleted"),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Wait until the API reports the bundle gone
    pub async fn wait_cleanup(&self, ctx: &Context, namespace: &str, name: &str) -> Result<()> {
        let key = ObjectKey::managed_resource(namespace, name);
        wait_for(ctx, self.store().as_ref(), &self.policy, &key, HealthCheck::Deleted).await?;
        debug!(resource = %key, "bundle gone");
        Ok(())
    }

    /// Bundles in `namespace` carrying every label of `selector`
    pub async fn list(&self, ctx: &Context, namespace: &str, selector: &Labels) -> Result<Vec<DynamicObject>> {
        ctx.check()?;
        self.store()
            .list(&ResourceKind::managed_resource(), namespace, selector)
            .await
    }

    /// Names of bundles matching `selector` that no desired label set covers
    pub async fn stale(&self, ctx: &Context, namespace: &str, selector: &Labels, desired: &[Labels]) -> Result<Vec<String>> {
        let bundles = self.list(ctx, namespace, selector).await?;
        Ok(partition_stale(&bundles, desired).1)
    }

    /// Delete every stale bundle concurrently, returning their names
    pub async fn delete_stale(
        &self,
        ctx: &Context,
        namespace: &str,
        selector: &Labels,
        desired: &[Labels],
    ) -> Result<Vec<String>> {
        let stale = self.stale(ctx, namespace, selector, desired).await?;
        if !stale.is_empty() {
            info!(namespace, stale = ?stale, "deleting stale bundles");
        }
        run_all(
            stale
                .iter()
                .map(|name| self.destroy(ctx, namespace, name).boxed())
                .collect(),
        )
        .await?;
        Ok(stale)
    }

    /// Wait concurrently until every stale bundle is gone
    pub async fn wait_cleanup_stale(
        &self,
        ctx: &Context,
        namespace: &str,
        selector: &Labels,
        desired: &[Labels],
    ) -> Result<()> {
        let stale = self.stale(ctx, namespace, selector, desired).await?;
        run_all(
            stale
                .iter()
                .map(|name| self.wait_cleanup(ctx, namespace, name).boxed())
                .collect(),
        )
        .await
    }
}

/// Split bundles into `(still desired, stale)` names
///
/// A bundle is still desired when its labels contain every pair of at least
/// one desired label set.
pub fn partition_stale(bundles: &[DynamicObject], desired: &[Labels]) -> (Vec<String>, Vec<String>) {
    let mut keep = Vec::new();
    let mut stale = Vec::new();
    for bundle in bundles {
        let Some(name) = bundle.metadata.name.clone() else {
            continue;
        };
        let bundle_labels = labels(bundle);
        if desired.iter().any(|set| matches_labels(&bundle_labels, set)) {
            keep.push(name);
        } else {
            stale.push(name);
        }
    }
    (keep, stale)
}

/// Discriminator label keys recorded by the previous deploy
fn owned_labels(object: &DynamicObject) -> BTreeSet<String> {
    annotations(object)
        .get(ANNOTATION_OWNED_LABELS)
        .map(|keys| {
            keys.split(',')
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build the immutable Secret holding one payload partition
fn payload_secret(key: &ObjectKey, bundle: &str, payload: &Payload) -> Result<DynamicObject> {
    let labels: Labels = [
        (LABEL_GC_REFERENCE.to_string(), "true".to_string()),
        (LABEL_BUNDLE.to_string(), bundle.to_string()),
    ]
    .into_iter()
    .collect();

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        immutable: Some(true),
        data: Some(
            payload
                .iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    };

    Ok(serde_json::from_value(serde_json::to_value(&secret)?)?)
}

/// Decode the payload stored in a Secret
pub fn secret_payload(object: &DynamicObject) -> Result<Payload> {
    let secret: Secret = serde_json::from_value(serde_json::to_value(object)?)?;
    Ok(secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}
