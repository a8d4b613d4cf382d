//! 对象存储抽象
//!
//! [`Store`] 是对外部对象存储（Kubernetes API Server）的最小抽象：按命名空间与名称读写对象、
//! 更新状态子资源、按标签选择器列举。写操作依靠 `resourceVersion` 做乐观并发校验。
//!
//! 动作不会直接持有 [`Store`]，而是通过 [`ScopedStore`] 访问：它提供类型化接口，
//! 并把每次调用绑定到本轮协调的取消令牌上。

pub mod cluster;
#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{ObjectKey, StoreError};

pub use self::cluster::KubeStore;

/// 可以存入存储的类型化对象
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
}

/// 外部对象存储
#[async_trait]
pub trait Store: Send + Sync {
    /// 读取对象，不存在时返回 `None`
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    /// 创建对象，同名对象已存在时返回 [`StoreError::AlreadyExists`]
    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// 替换对象，`resourceVersion` 不匹配时返回 [`StoreError::Conflict`]
    async fn update(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// 替换状态子资源，`resourceVersion` 不匹配时返回 [`StoreError::Conflict`]
    async fn update_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError>;

    /// 删除对象，其属主引用指向它的子对象随之回收
    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// 按标签选择器（`k=v,k2=v2`）列举对象
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError>;
}

/// 类型化对象转换为动态对象
pub fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// 动态对象转换为类型化对象
pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// 绑定取消令牌的类型化存储访问
#[derive(Clone, Copy)]
pub struct ScopedStore<'a> {
    store: &'a dyn Store,
    cancel: &'a CancellationToken,
}

impl<'a> ScopedStore<'a> {
    /// 创建绑定到取消令牌的存储访问
    pub fn new(store: &'a dyn Store, cancel: &'a CancellationToken) -> Self {
        Self { store, cancel }
    }

    async fn guard<T>(&self, operation: impl Future<Output = Result<T, StoreError>>) -> Result<T, StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            result = operation => result,
        }
    }

    /// 读取对象
    pub async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let resource = ApiResource::erase::<K>(&());
        self.guard(self.store.get(&resource, namespace, name))
            .await?
            .map(from_dynamic)
            .transpose()
    }

    /// 创建对象
    pub async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let resource = ApiResource::erase::<K>(&());
        let namespace = namespace_of(object)?;
        let dynamic = to_dynamic(object)?;
        from_dynamic(self.guard(self.store.create(&resource, &namespace, &dynamic)).await?)
    }

    /// 替换对象
    pub async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let resource = ApiResource::erase::<K>(&());
        let namespace = namespace_of(object)?;
        let dynamic = to_dynamic(object)?;
        from_dynamic(self.guard(self.store.update(&resource, &namespace, &dynamic)).await?)
    }

    /// 替换状态子资源
    pub async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let resource = ApiResource::erase::<K>(&());
        let namespace = namespace_of(object)?;
        let dynamic = to_dynamic(object)?;
        from_dynamic(
            self.guard(self.store.update_status(&resource, &namespace, &dynamic))
                .await?,
        )
    }

    /// 删除对象
    pub async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let resource = ApiResource::erase::<K>(&());
        self.guard(self.store.delete(&resource, namespace, name)).await
    }

    /// 按标签选择器列举对象
    pub async fn list<K: StoreObject>(&self, namespace: &str, selector: &str) -> Result<Vec<K>, StoreError> {
        let resource = ApiResource::erase::<K>(&());
        self.guard(self.store.list(&resource, namespace, selector))
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }
}

/// 对象的存储标识
pub fn key_of<K: StoreObject>(object: &K) -> ObjectKey {
    ObjectKey::new(
        K::kind(&()),
        object.meta().namespace.clone().unwrap_or_default(),
        object.meta().name.clone().unwrap_or_default(),
    )
}

fn namespace_of<K: StoreObject>(object: &K) -> Result<String, StoreError> {
    object.meta().namespace.clone().ok_or_else(|| StoreError::Api {
        code: 422,
        reason: "Invalid".to_string(),
        message: format!("{} 缺少命名空间", key_of(object)),
    })
}
