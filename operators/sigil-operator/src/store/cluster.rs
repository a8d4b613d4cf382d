//! 基于 Kubernetes API Server 的对象存储

use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    client::Client,
    core::{ApiResource, DynamicObject},
};
use tracing::debug;

use super::Store;
use crate::error::{ObjectKey, StoreError};

/// Kubernetes 对象存储
#[derive(Clone)]
pub struct KubeStore {
    /// Kubernetes 客户端
    client: Client,
}

impl KubeStore {
    /// 创建新的存储
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

/// 将 kube 错误映射为存储错误
fn map_error(error: kube::Error, key: ObjectKey) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound(key),
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key)
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict(key),
        kube::Error::Api(response) => StoreError::Api {
            code: response.code,
            reason: response.reason,
            message: response.message,
        },
        kube::Error::SerdeError(e) => StoreError::Serialization(e),
        other => StoreError::Transport(other.to_string()),
    }
}

fn object_key(resource: &ApiResource, namespace: &str, object: &DynamicObject) -> ObjectKey {
    ObjectKey::new(
        resource.kind.clone(),
        namespace,
        object.metadata.name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl Store for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        self.api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error(e, ObjectKey::new(resource.kind.clone(), namespace, name)))
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = object_key(resource, namespace, object);
        debug!(object = %key, "创建对象");
        self.api(resource, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn update(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = object_key(resource, namespace, object);
        debug!(object = %key, "更新对象");
        self.api(resource, namespace)
            .replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = object_key(resource, namespace, object);
        let body = serde_json::to_vec(object)?;
        self.api(resource, namespace)
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_error(e, key))
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, ObjectKey::new(resource.kind.clone(), namespace, name)))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let params = ListParams::default().labels(selector);
        self.api(resource, namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| map_error(e, ObjectKey::new(resource.kind.clone(), namespace, "")))
    }
}
