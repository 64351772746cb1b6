//! Idempotent create-or-update with an operation trigger
//!
//! The upsert reads the current object (or starts from an empty one), lets
//! the caller apply its desired state, stamps the operation annotation and a
//! fresh timestamp, and writes the result back. A write that loses a race
//! against another writer is retried from a fresh read:
//!
//! ```text
//! get ──▶ mutate ──▶ stamp ──▶ create | update
//!  ▲                              │
//!  └──── Conflict / AlreadyExists ┘   (at most MAX_CONFLICT_RETRIES attempts)
//! ```

use chrono::Utc;
use kube::api::DynamicObject;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{KubeError, Result};
use crate::store::{ObjectStore, annotations, new_object};
use trellis_core::annotations::stamp;
use trellis_core::{ObjectKey, Operation};

/// Write attempts before an upsert gives up on conflicts
pub const MAX_CONFLICT_RETRIES: usize = 5;

/// Create-or-update against an [`ObjectStore`]
#[derive(Clone)]
pub struct UpsertOperator {
    store: Arc<dyn ObjectStore>,
}

impl UpsertOperator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Create or update `key`, returning the object as written
    ///
    /// `mutate` receives the current object (or an empty one carrying only
    /// type and identity) and applies the desired state. It may run once per
    /// attempt, so it must not have side effects beyond the object. When
    /// `operation` is set, the operation annotation and a timestamp newer than
    /// any previous one are written too.
    pub async fn upsert<F>(
        &self,
        ctx: &Context,
        key: &ObjectKey,
        operation: Option<Operation>,
        mut mutate: F,
    ) -> Result<DynamicObject>
    where
        F: FnMut(&mut DynamicObject) -> Result<()> + Send,
    {
        key.validate()?;

        for attempt in 1..=MAX_CONFLICT_RETRIES {
            ctx.check()?;

            let existing = self.store.get_opt(key).await?;
            let exists = existing.is_some();
            let mut object = existing.unwrap_or_else(|| new_object(key));

            mutate(&mut object)?;
            if let Some(operation) = operation {
                let mut current = annotations(&object);
                stamp(&mut current, operation, Utc::now());
                object.metadata.annotations = Some(current);
            }

            let written = if exists {
                self.store.update(key, &object).await
            } else {
                self.store.create(key, &object).await
            };

            match written {
                Ok(written) => {
                    debug!(
                        resource = %key,
                        created = !exists,
                        operation = operation.map(|op| op.as_str()),
                        attempt,
                        "upserted"
                    );
                    return Ok(written);
                }
                Err(e) if e.is_conflict() || e.is_already_exists() => {
                    debug!(resource = %key, attempt, error = %e, "write lost a race, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(resource = %key, attempts = MAX_CONFLICT_RETRIES, "giving up after repeated conflicts");
        Err(KubeError::ConflictRetriesExhausted {
            key: key.to_string(),
            attempts: MAX_CONFLICT_RETRIES,
        })
    }

    /// Stamp `operation` on an existing object without touching its spec
    ///
    /// Returns `None` when the object does not exist.
    pub async fn annotate(&self, ctx: &Context, key: &ObjectKey, operation: Operation) -> Result<Option<DynamicObject>> {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            ctx.check()?;

            let Some(mut object) = self.store.get_opt(key).await? else {
                debug!(resource = %key, operation = %operation, "nothing to annotate");
                return Ok(None);
            };

            let mut current = annotations(&object);
            stamp(&mut current, operation, Utc::now());
            object.metadata.annotations = Some(current);

            match self.store.update(key, &object).await {
                Ok(written) => {
                    debug!(resource = %key, operation = %operation, attempt, "annotated");
                    return Ok(Some(written));
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) if e.is_conflict() => {
                    debug!(resource = %key, attempt, error = %e, "write lost a race, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(resource = %key, attempts = MAX_CONFLICT_RETRIES, "giving up after repeated conflicts");
        Err(KubeError::ConflictRetriesExhausted {
            key: key.to_string(),
            attempts: MAX_CONFLICT_RETRIES,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockStore;
    use serde_json::json;
    use trellis_core::annotations::{OPERATION, TIMESTAMP, pending_operation};

    fn setup() -> (MockStore, UpsertOperator) {
        let store = MockStore::new();
        let operator = UpsertOperator::new(Arc::new(store.clone()));
        (store, operator)
    }

    fn network() -> ObjectKey {
        ObjectKey::extension("Network", "ns1", "n1")
    }

    fn set_spec(spec: serde_json::Value) -> impl FnMut(&mut DynamicObject) -> Result<()> + Send {
        move |object| {
            object.data["spec"] = spec.clone();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_with_operation() {
        let (store, operator) = setup();
        let ctx = Context::background();

        let written = operator
            .upsert(&ctx, &network(), Some(Operation::Reconcile), set_spec(json!({"type": "calico"})))
            .await
            .unwrap();

        let annotations = written.metadata.annotations.unwrap();
        assert_eq!(pending_operation(&annotations), Some("reconcile"));
        assert!(annotations.contains_key(TIMESTAMP));
        assert_eq!(written.data["spec"]["type"], "calico");

        let counts = store.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.updates, 0);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_once() {
        let (store, operator) = setup();
        let ctx = Context::background();
        operator
            .upsert(&ctx, &network(), Some(Operation::Reconcile), set_spec(json!({"type": "calico"})))
            .await
            .unwrap();
        store.set_status(&network(), json!({"observedGeneration": 1}));
        store.reset_counts();

        let written = operator
            .upsert(&ctx, &network(), Some(Operation::Reconcile), set_spec(json!({"type": "calico"})))
            .await
            .unwrap();

        let counts = store.operation_counts();
        assert_eq!(counts.writes(), 1);
        assert_eq!(counts.updates, 1);
        assert_eq!(written.metadata.generation, Some(1));
        assert_eq!(written.data["status"]["observedGeneration"], 1);
    }

    #[tokio::test]
    async fn test_upsert_without_operation_leaves_annotations_alone() {
        let (_, operator) = setup();
        let written = operator
            .upsert(&Context::background(), &network(), None, set_spec(json!({})))
            .await
            .unwrap();
        let has_operation = written
            .metadata
            .annotations
            .is_some_and(|a| a.contains_key(OPERATION));
        assert!(!has_operation);
    }

    #[tokio::test]
    async fn test_upsert_retries_conflicts() {
        let (store, operator) = setup();
        let ctx = Context::background();
        operator
            .upsert(&ctx, &network(), Some(Operation::Reconcile), set_spec(json!({"v": 1})))
            .await
            .unwrap();
        store.inject_conflicts(&network(), 2);
        store.reset_counts();

        let written = operator
            .upsert(&ctx, &network(), Some(Operation::Reconcile), set_spec(json!({"v": 2})))
            .await
            .unwrap();

        assert_eq!(written.data["spec"]["v"], 2);
        let counts = store.operation_counts();
        assert_eq!(counts.updates, 3);
        assert_eq!(counts.conflicts, 2);
    }

    #[tokio::test]
    async fn test_upsert_gives_up_after_max_conflicts() {
        let (store, operator) = setup();
        let ctx = Context::background();
        operator
            .upsert(&ctx, &network(), None, set_spec(json!({})))
            .await
            .unwrap();
        store.inject_conflicts(&network(), 100);
        store.reset_counts();

        let err = operator
            .upsert(&ctx, &network(), None, set_spec(json!({"v": 2})))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KubeError::ConflictRetriesExhausted { attempts, .. } if attempts == MAX_CONFLICT_RETRIES
        ));
        assert_eq!(store.operation_counts().updates, MAX_CONFLICT_RETRIES);
    }

    #[tokio::test]
    async fn test_racing_creates_both_succeed() {
        let (store, operator) = setup();
        let ctx = Context::background();
        let key = network();

        let (a, b) = tokio::join!(
            operator.upsert(&ctx, &key, Some(Operation::Reconcile), set_spec(json!({"v": 1}))),
            operator.upsert(&ctx, &key, Some(Operation::Reconcile), set_spec(json!({"v": 1}))),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
        let counts = store.operation_counts();
        assert_eq!(counts.creates, 2);
        assert_eq!(counts.conflicts, 1);
        assert_eq!(counts.updates, 1);
    }

    #[tokio::test]
    async fn test_mutate_error_aborts_without_writing() {
        let (store, operator) = setup();
        let err = operator
            .upsert(&Context::background(), &network(), None, |_| {
                Err(KubeError::InvalidConfig("empty provider type".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::InvalidConfig(_)));
        assert_eq!(store.operation_counts().writes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected_before_any_call() {
        let (store, operator) = setup();
        let key = ObjectKey::extension("Network", "ns1", "Not_Valid");
        let err = operator
            .upsert(&Context::background(), &key, None, set_spec(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Core(_)));
        assert_eq!(store.operation_counts().gets, 0);
    }

    #[tokio::test]
    async fn test_cancelled_context_is_rejected() {
        let (store, operator) = setup();
        let ctx = Context::background();
        ctx.cancel();
        let err = operator
            .upsert(&ctx, &network(), None, set_spec(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, KubeError::Cancelled));
        assert_eq!(store.operation_counts().gets, 0);
    }

    #[tokio::test]
    async fn test_annotate() {
        let (store, operator) = setup();
        let ctx = Context::background();
        assert!(operator.annotate(&ctx, &network(), Operation::Migrate).await.unwrap().is_none());

        operator
            .upsert(&ctx, &network(), None, set_spec(json!({"type": "calico"})))
            .await
            .unwrap();
        let annotated = operator
            .annotate(&ctx, &network(), Operation::Migrate)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            pending_operation(&annotated.metadata.annotations.unwrap()),
            Some("migrate")
        );
        assert_eq!(annotated.metadata.generation, Some(1));
        assert!(store.contains(&network()));
    }
}
