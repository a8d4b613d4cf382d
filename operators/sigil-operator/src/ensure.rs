//! 幂等的"确保存在且一致"原语
//!
//! [`ensure`] 读取实际对象：不存在则创建，存在则用种类比较器检测漂移，
//! 只在有漂移时写回，且只替换参与比较的子状态。创建时的 `AlreadyExists`
//! 视为另一个协调者已经完成创建，按未变更处理。永远不会删除对象。

use tracing::{debug, info};

use crate::drift::{diff, merge, Compared, Drift};
use crate::error::StoreError;
use crate::store::{key_of, ScopedStore, StoreObject};

/// 一次 ensure 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Ensured {
    /// 对象不存在，已创建
    Created,
    /// 检测到漂移并已更新
    Updated(Vec<Drift>),
    /// 无需写入
    Unchanged,
}

impl Ensured {
    /// 是否发生了写入
    pub fn changed(&self) -> bool {
        !matches!(self, Ensured::Unchanged)
    }
}

/// 确保对象存在并与期望一致
pub async fn ensure<K: Compared>(store: ScopedStore<'_>, expected: &K) -> Result<Ensured, StoreError> {
    let key = key_of(expected);
    let Some(live) = store.get::<K>(&key.namespace, &key.name).await? else {
        return create_absorbing(store, expected).await;
    };

    let drifts = diff(expected, &live);
    if drifts.is_empty() {
        return Ok(Ensured::Unchanged);
    }

    debug!(object = %key, drifts = drifts.len(), "检测到漂移");
    store.update(&merge(expected, &live)).await?;
    info!(object = %key, "已修正对象漂移");
    Ok(Ensured::Updated(drifts))
}

/// 仅确保对象存在，已存在的对象不做比较
///
/// 用于生成型数据（密钥、密码）：一旦创建就不能被覆盖。
pub async fn ensure_created<K: StoreObject>(store: ScopedStore<'_>, expected: &K) -> Result<Ensured, StoreError> {
    let key = key_of(expected);
    if store.get::<K>(&key.namespace, &key.name).await?.is_some() {
        return Ok(Ensured::Unchanged);
    }
    create_absorbing(store, expected).await
}

async fn create_absorbing<K: StoreObject>(store: ScopedStore<'_>, expected: &K) -> Result<Ensured, StoreError> {
    match store.create(expected).await {
        Ok(_) => {
            info!(object = %key_of(expected), "已创建对象");
            Ok(Ensured::Created)
        }
        Err(e) if e.is_already_exists() => {
            debug!(object = %key_of(expected), "对象已由其他协调者创建");
            Ok(Ensured::Unchanged)
        }
        Err(e) => Err(e),
    }
}
