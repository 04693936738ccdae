//! Notification sink — best-effort push of structured payloads to whatever
//! is watching a tenant (typically dashboard WebSocket sessions, which live
//! outside this service).
//!
//! Payload kinds produced by the core: `broadcast_progress`,
//! `broadcast_complete`, `poll_progress`, `poll_complete`,
//! `settings_progress`, `settings_complete`, `qr`, `authenticated`,
//! `ready`, `disconnected`, `new_message`, `member_join`, `member_leave`,
//! `certificate`, `welcome_sent`, `agent_response`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

/// Best-effort per-tenant push. Implementations must never block on a slow
/// consumer and must swallow delivery failures.
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn send_to_tenant(&self, tenant_id: i64, payload: Value);
}

/// In-process fan-out hub. The transport layer subscribes a channel per
/// connected session; dead receivers are pruned on the next send.
pub struct NotifyHub {
    subscribers: Mutex<HashMap<i64, Vec<mpsc::UnboundedSender<Value>>>>,
}

impl NotifyHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(HashMap::new()),
        })
    }

    /// Register a new consumer for a tenant. The returned receiver yields
    /// every payload pushed for that tenant until it is dropped.
    pub async fn subscribe(&self, tenant_id: i64) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .await
            .entry(tenant_id)
            .or_default()
            .push(tx);
        rx
    }

    /// Number of live subscriptions for a tenant (closed channels count
    /// until the next send prunes them).
    pub async fn subscriber_count(&self, tenant_id: i64) -> usize {
        self.subscribers
            .lock()
            .await
            .get(&tenant_id)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl NotifySink for NotifyHub {
    async fn send_to_tenant(&self, tenant_id: i64, payload: Value) {
        let mut subs = self.subscribers.lock().await;
        if let Some(senders) = subs.get_mut(&tenant_id) {
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
            if senders.is_empty() {
                subs.remove(&tenant_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(7).await;

        hub.send_to_tenant(7, json!({"type": "ready"})).await;
        let got = rx.recv().await.unwrap();
        assert_eq!(got["type"], "ready");
    }

    #[tokio::test]
    async fn test_tenant_isolation() {
        let hub = NotifyHub::new();
        let mut rx_a = hub.subscribe(1).await;
        let mut rx_b = hub.subscribe(2).await;

        hub.send_to_tenant(1, json!({"type": "qr"})).await;
        assert_eq!(rx_a.recv().await.unwrap()["type"], "qr");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_receiver_pruned() {
        let hub = NotifyHub::new();
        let rx = hub.subscribe(3).await;
        drop(rx);

        hub.send_to_tenant(3, json!({"type": "ready"})).await;
        assert_eq!(hub.subscriber_count(3).await, 0);
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // Must not panic or error.
        hub.send_to_tenant(99, json!({"type": "disconnected"})).await;
    }
}
