//! 内存对象存储
//!
//! 仅用于测试：模拟 API Server 的乐观并发（`resourceVersion`）、状态子资源、
//! 基于属主引用的级联删除，并支持对下一次指定操作注入故障。

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{from_dynamic, to_dynamic, Store, StoreObject};
use crate::error::{ObjectKey, StoreError};

/// 存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
    UpdateStatus,
    Delete,
    List,
}

/// 注入的故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Conflict,
    AlreadyExists,
    Transient,
}

#[derive(Debug)]
struct InjectedFault {
    operation: Operation,
    kind: String,
    fault: Fault,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    version: u64,
    writes: usize,
    faults: Vec<InjectedFault>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_fault(&mut self, operation: Operation, key: &ObjectKey) -> Result<(), StoreError> {
        let Some(index) = self
            .faults
            .iter()
            .position(|f| f.operation == operation && f.kind == key.kind)
        else {
            return Ok(());
        };
        let injected = self.faults.remove(index);
        Err(match injected.fault {
            Fault::Conflict => StoreError::Conflict(key.clone()),
            Fault::AlreadyExists => StoreError::AlreadyExists(key.clone()),
            Fault::Transient => StoreError::Api {
                code: 500,
                reason: "InternalError".to_string(),
                message: "注入的瞬时错误".to_string(),
            },
        })
    }

    fn insert_new(&mut self, key: ObjectKey, resource: &ApiResource, object: &DynamicObject) -> DynamicObject {
        let mut stored = object.clone();
        stored.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
        stored.metadata.namespace = Some(key.namespace.clone());
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(self.next_version());
        stored.metadata.generation = Some(1);
        self.objects.insert(key, stored.clone());
        stored
    }

    fn collect_garbage(&mut self, owner_uid: &str) {
        let orphans: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|(_, object)| {
                object
                    .metadata
                    .owner_references
                    .iter()
                    .flatten()
                    .any(|owner| owner.uid == owner_uid)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in orphans {
            if let Some(removed) = self.objects.remove(&key) {
                if let Some(uid) = removed.metadata.uid {
                    self.collect_garbage(&uid);
                }
            }
        }
    }
}

/// 内存对象存储
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key_for(resource: &ApiResource, namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::new(resource.kind.clone(), namespace, name)
}

fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let labels = object.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}

fn without_status(data: &serde_json::Value) -> serde_json::Value {
    let mut data = data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

impl MemoryStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 对下一次指定种类、指定操作注入故障
    pub fn fail_next(&self, operation: Operation, kind: &str, fault: Fault) {
        self.lock().faults.push(InjectedFault {
            operation,
            kind: kind.to_string(),
            fault,
        });
    }

    /// 成功写操作的累计次数
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// 存储中的对象总数
    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    /// 直接写入对象，不计入写次数，不触发故障
    pub fn seed<K: StoreObject + Serialize>(&self, object: &K) -> K {
        let resource = ApiResource::erase::<K>(&());
        let dynamic = to_dynamic(object).unwrap();
        let namespace = dynamic.metadata.namespace.clone().unwrap();
        let name = dynamic.metadata.name.clone().unwrap();
        let key = key_for(&resource, &namespace, &name);
        let stored = self.lock().insert_new(key, &resource, &dynamic);
        from_dynamic(stored).unwrap()
    }

    /// 直接读取对象
    pub fn fetch<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let resource = ApiResource::erase::<K>(&());
        let key = key_for(&resource, namespace, name);
        self.lock()
            .objects
            .get(&key)
            .cloned()
            .map(|object| from_dynamic(object).unwrap())
    }

    /// 直接修改对象（含状态），模拟其他写入方或子对象自身的状态变化
    pub fn modify<K: StoreObject>(&self, namespace: &str, name: &str, change: impl FnOnce(&mut K)) {
        let resource = ApiResource::erase::<K>(&());
        let key = key_for(&resource, namespace, name);
        let mut inner = self.lock();
        let stored = inner.objects.get(&key).cloned().unwrap();
        let mut typed: K = from_dynamic(stored.clone()).unwrap();
        change(&mut typed);
        let mut updated = to_dynamic(&typed).unwrap();
        updated.metadata.uid = stored.metadata.uid;
        updated.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(key, updated);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_version(live: &DynamicObject, incoming: &DynamicObject, key: &ObjectKey) -> Result<(), StoreError> {
        match &incoming.metadata.resource_version {
            Some(version) if Some(version) != live.metadata.resource_version.as_ref() => {
                Err(StoreError::Conflict(key.clone()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        let key = key_for(resource, namespace, name);
        let mut inner = self.lock();
        inner.take_fault(Operation::Get, &key)?;
        Ok(inner.objects.get(&key).cloned())
    }

    async fn create(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_for(resource, namespace, &object.metadata.name.clone().unwrap_or_default());
        let mut inner = self.lock();
        inner.take_fault(Operation::Create, &key)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        inner.writes += 1;
        Ok(inner.insert_new(key, resource, object))
    }

    async fn update(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_for(resource, namespace, &object.metadata.name.clone().unwrap_or_default());
        let mut inner = self.lock();
        inner.take_fault(Operation::Update, &key)?;
        let live = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Self::check_version(&live, object, &key)?;

        let mut updated = object.clone();
        updated.types = live.types.clone();
        updated.metadata.uid = live.metadata.uid.clone();
        updated.metadata.namespace = live.metadata.namespace.clone();
        let spec_changed = without_status(&updated.data) != without_status(&live.data);
        updated.metadata.generation = live
            .metadata
            .generation
            .map(|generation| if spec_changed { generation + 1 } else { generation });
        if let Some(map) = updated.data.as_object_mut() {
            match live.data.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        updated.metadata.resource_version = Some(inner.next_version());
        inner.writes += 1;
        inner.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn update_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let key = key_for(resource, namespace, &object.metadata.name.clone().unwrap_or_default());
        let mut inner = self.lock();
        inner.take_fault(Operation::UpdateStatus, &key)?;
        let mut live = inner
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        Self::check_version(&live, object, &key)?;

        if let Some(map) = live.data.as_object_mut() {
            match object.data.get("status") {
                Some(status) => {
                    map.insert("status".to_string(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        live.metadata.resource_version = Some(inner.next_version());
        inner.writes += 1;
        inner.objects.insert(key, live.clone());
        Ok(live)
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = key_for(resource, namespace, name);
        let mut inner = self.lock();
        inner.take_fault(Operation::Delete, &key)?;
        let removed = inner
            .objects
            .remove(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        inner.writes += 1;
        if let Some(uid) = removed.metadata.uid {
            inner.collect_garbage(&uid);
        }
        Ok(())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let list_key = key_for(resource, namespace, "");
        let mut inner = self.lock();
        inner.take_fault(Operation::List, &list_key)?;
        Ok(inner
            .objects
            .iter()
            .filter(|(key, _)| key.kind == resource.kind && key.namespace == namespace)
            .filter(|(_, object)| matches_selector(object, selector))
            .map(|(_, object)| object.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScopedStore;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use tokio_util::sync::CancellationToken;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("sigstore".to_string()),
                labels: Some([("app".to_string(), "rekor".to_string())].into()),
                ..Default::default()
            },
            data: Some([("k".to_string(), "v".to_string())].into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_optimistic_concurrency() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let scoped = ScopedStore::new(&store, &cancel);

        let created = scoped.create(&config_map("a")).await.unwrap();
        let mut first = created.clone();
        let mut second = created;

        first.data = Some([("k".to_string(), "first".to_string())].into());
        scoped.update(&first).await.unwrap();

        second.data = Some([("k".to_string(), "second".to_string())].into());
        let err = scoped.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let scoped = ScopedStore::new(&store, &cancel);

        scoped.create(&config_map("a")).await.unwrap();
        assert!(scoped.create(&config_map("a")).await.unwrap_err().is_already_exists());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_owner_garbage_collection() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let scoped = ScopedStore::new(&store, &cancel);

        let owner = scoped.create(&config_map("owner")).await.unwrap();
        let mut child = config_map("child");
        child.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            name: "owner".to_string(),
            uid: owner.metadata.uid.clone().unwrap(),
            ..Default::default()
        }]);
        scoped.create(&child).await.unwrap();
        assert_eq!(store.len(), 2);

        scoped.delete::<ConfigMap>("sigstore", "owner").await.unwrap();
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_list_by_selector() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let scoped = ScopedStore::new(&store, &cancel);
        scoped.create(&config_map("a")).await.unwrap();
        let mut other = config_map("b");
        other.metadata.labels = Some([("app".to_string(), "fulcio".to_string())].into());
        scoped.create(&other).await.unwrap();

        let found: Vec<ConfigMap> = scoped.list("sigstore", "app=rekor").await.unwrap();
        assert_eq!(found.len(), 1);
        let all: Vec<ConfigMap> = scoped.list("sigstore", "").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scope_rejects_calls() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scoped = ScopedStore::new(&store, &cancel);
        let err = scoped.get::<ConfigMap>("sigstore", "a").await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
