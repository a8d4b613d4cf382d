//! 审计事件
//!
//! 动作通过 [`EventSink`] 记录人类可读的事件；集群实现基于 kube-runtime 的 `Recorder`。

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;

/// 事件级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    /// 常规
    Normal,
    /// 警告
    Warning,
}

/// 一条审计事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// 级别
    pub level: EventLevel,
    /// 机器可读原因，例如 `Created`
    pub reason: String,
    /// 事件说明
    pub note: String,
    /// 触发事件的动作
    pub action: String,
}

impl EventRecord {
    /// 常规事件
    pub fn normal(action: &str, reason: &str, note: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Normal,
            reason: reason.to_string(),
            note: note.into(),
            action: action.to_string(),
        }
    }

    /// 警告事件
    pub fn warning(action: &str, reason: &str, note: impl Into<String>) -> Self {
        Self {
            level: EventLevel::Warning,
            ..Self::normal(action, reason, note)
        }
    }
}

/// 事件记录接口
#[async_trait]
pub trait EventSink: Send + Sync {
    /// 为对象记录事件
    async fn publish(&self, reference: ObjectReference, event: EventRecord) -> Result<(), String>;
}

/// 写入 Kubernetes Event 的记录器
pub struct KubeEventSink {
    client: Client,
    reporter: Reporter,
}

impl KubeEventSink {
    /// 创建新的事件记录器
    pub fn new(client: Client, controller: &str) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance: std::env::var("POD_NAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, reference: ObjectReference, event: EventRecord) -> Result<(), String> {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference);
        recorder
            .publish(Event {
                type_: match event.level {
                    EventLevel::Normal => EventType::Normal,
                    EventLevel::Warning => EventType::Warning,
                },
                reason: event.reason,
                note: Some(event.note),
                action: event.action,
                secondary: None,
            })
            .await
            .map_err(|e| e.to_string())
    }
}

/// 在内存中保存事件，供测试断言
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<(String, EventRecord)>>,
}

#[cfg(test)]
impl RecordingSink {
    /// 已记录的事件：（对象名，事件）
    pub fn events(&self) -> Vec<(String, EventRecord)> {
        self.events.lock().unwrap().clone()
    }

    /// 指定原因的事件数量
    pub fn count(&self, reason: &str) -> usize {
        self.events().iter().filter(|(_, e)| e.reason == reason).count()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, reference: ObjectReference, event: EventRecord) -> Result<(), String> {
        self.events
            .lock()
            .unwrap()
            .push((reference.name.unwrap_or_default(), event));
        Ok(())
    }
}
