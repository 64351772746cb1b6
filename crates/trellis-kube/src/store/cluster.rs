//! Object store backed by a live cluster

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams},
};

use super::{Labels, ObjectStore, api_resource, label_selector};
use crate::error::{KubeError, Result};
use trellis_core::{ObjectKey, ResourceKind};

/// [`ObjectStore`] talking to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the default kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, kind: &ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(kind))
    }
}

/// Map API status codes to the error variants callers branch on
fn map_error(error: kube::Error, key: &ObjectKey) -> KubeError {
    match &error {
        kube::Error::Api(resp) if resp.code == 404 => KubeError::NotFound { key: key.to_string() },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            KubeError::AlreadyExists { key: key.to_string() }
        }
        kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict { key: key.to_string() },
        _ => KubeError::Api(error),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<DynamicObject> {
        self.api(&key.kind, &key.namespace)
            .get(&key.name)
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn list(&self, kind: &ResourceKind, namespace: &str, labels: &Labels) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&label_selector(labels));
        }
        let list = self.api(kind, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn create(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject> {
        self.api(&key.kind, &key.namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn update(&self, key: &ObjectKey, object: &DynamicObject) -> Result<DynamicObject> {
        self.api(&key.kind, &key.namespace)
            .replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn patch(&self, key: &ObjectKey, patch: &serde_json::Value) -> Result<DynamicObject> {
        self.api(&key.kind, &key.namespace)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn patch_status(&self, key: &ObjectKey, patch: &serde_json::Value) -> Result<DynamicObject> {
        self.api(&key.kind, &key.namespace)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.api(&key.kind, &key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
            .map_err(|e| map_error(e, key))?;
        Ok(())
    }
}
