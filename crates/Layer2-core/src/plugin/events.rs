//! Extension Events - 설치/제거 결과 알림

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

// ============================================================================
// ExtensionEvent
// ============================================================================

/// 확장 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionEvent {
    pub event_type: EventType,

    /// 대상 (카탈로그 이름 또는 아카이브 경로)
    pub subject: String,

    /// 이벤트 데이터
    pub data: Value,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ExtensionEvent {
    pub fn new(event_type: EventType, subject: impl Into<String>, data: Value) -> Self {
        Self {
            event_type,
            subject: subject.into(),
            data,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn simple(event_type: EventType, subject: impl Into<String>) -> Self {
        Self::new(event_type, subject, Value::Null)
    }
}

/// 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // 설치
    Installed,
    InstallFailed,
    PhaseChanged,

    // 제거
    Removed,
    RemovalPending,

    // 활성화
    Enabled,
    Disabled,

    // 시작 시 탐색
    Discovered,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::InstallFailed => write!(f, "install_failed"),
            Self::PhaseChanged => write!(f, "phase_changed"),
            Self::Removed => write!(f, "removed"),
            Self::RemovalPending => write!(f, "removal_pending"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Discovered => write!(f, "discovered"),
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// 이벤트 버스 - 브로드캐스트 + 최근 이벤트 히스토리
pub struct EventBus {
    sender: broadcast::Sender<ExtensionEvent>,
    history: RwLock<VecDeque<ExtensionEvent>>,
    history_size: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256, 100)
    }

    pub fn with_capacity(channel_capacity: usize, history_size: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            sender,
            history: RwLock::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// 이벤트 발행
    pub async fn publish(&self, event: ExtensionEvent) {
        debug!("Publishing event: {} {}", event.event_type, event.subject);

        {
            let mut history = self.history.write().await;
            while history.len() >= self.history_size.max(1) {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // 구독자가 없어도 OK
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExtensionEvent> {
        self.sender.subscribe()
    }

    pub async fn history(&self) -> Vec<ExtensionEvent> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn history_by_type(&self, event_type: EventType) -> Vec<ExtensionEvent> {
        self.history
            .read()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(ExtensionEvent::simple(EventType::Installed, "cxx"))
            .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Installed);
        assert_eq!(event.subject, "cxx");
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::with_capacity(16, 2);
        bus.publish(ExtensionEvent::simple(EventType::Installed, "a")).await;
        bus.publish(ExtensionEvent::simple(EventType::Removed, "a")).await;
        bus.publish(ExtensionEvent::simple(EventType::Installed, "b")).await;

        let history = bus.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_type, EventType::Removed);
        assert_eq!(bus.history_by_type(EventType::Installed).await.len(), 1);

        bus.clear_history().await;
        assert!(bus.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_latest_after_many_events() {
        let bus = EventBus::with_capacity(16, 3);
        for i in 0..50 {
            bus.publish(ExtensionEvent::simple(EventType::Discovered, format!("m{}", i)))
                .await;
        }

        let subjects: Vec<String> = bus.history().await.into_iter().map(|e| e.subject).collect();
        assert_eq!(subjects, vec!["m47", "m48", "m49"]);
    }
}
