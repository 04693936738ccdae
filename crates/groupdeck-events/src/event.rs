//! Inbound event payloads as the bridge emits them.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One event for one tenant's session. The transport layer pairs these with
/// the tenant id it received them on.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TenantEvent {
    /// A QR code is ready to be scanned.
    Qr { qr: String },
    /// The scan was accepted; the session is authenticating.
    Authenticated {
        #[serde(default)]
        phone_number: Option<String>,
    },
    /// The session is fully connected and usable.
    Ready {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    Message(IncomingMessage),
    MemberJoin(MemberEvent),
    MemberLeave(MemberEvent),
    Certificate(MemberEvent),
}

/// A chat message observed in a group.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Upstream message id; the idempotence key for storage.
    pub id: String,
    pub group_id: String,
    pub group_name: String,
    #[serde(default)]
    pub sender_id: Option<String>,
    pub sender_name: String,
    #[serde(default)]
    pub sender_phone: Option<String>,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    /// Member ids the sender explicitly mentioned.
    #[serde(default)]
    pub mentioned_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

fn default_message_type() -> String {
    "text".into()
}

/// A member joining, leaving, or earning a certificate in a group.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberEvent {
    pub group_id: String,
    pub group_name: String,
    pub member_id: String,
    pub member_name: String,
    #[serde(default)]
    pub member_phone: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_events_decode() {
        let ev: TenantEvent = serde_json::from_str(r#"{"type": "qr", "qr": "data:xyz"}"#).unwrap();
        assert!(matches!(ev, TenantEvent::Qr { qr } if qr == "data:xyz"));

        let ev: TenantEvent =
            serde_json::from_str(r#"{"type": "ready", "phone_number": "201112223"}"#).unwrap();
        assert!(matches!(
            ev,
            TenantEvent::Ready { phone_number: Some(p) } if p == "201112223"
        ));

        let ev: TenantEvent = serde_json::from_str(r#"{"type": "disconnected"}"#).unwrap();
        assert!(matches!(ev, TenantEvent::Disconnected { reason: None }));
    }

    #[test]
    fn test_message_event_decodes_with_defaults() {
        let ev: TenantEvent = serde_json::from_str(
            r#"{
                "type": "message",
                "id": "m-1",
                "group_id": "wa-a",
                "group_name": "Alpha",
                "sender_name": "Dina",
                "content": "hello",
                "timestamp": "2026-08-20T10:00:00Z"
            }"#,
        )
        .unwrap();
        let TenantEvent::Message(msg) = ev else {
            panic!("wrong variant");
        };
        assert_eq!(msg.id, "m-1");
        assert_eq!(msg.message_type, "text");
        assert!(msg.mentioned_ids.is_empty());
        assert!(msg.sender_phone.is_none());
    }

    #[test]
    fn test_member_events_decode() {
        let raw = r#"{
            "type": "member_join",
            "group_id": "wa-a",
            "group_name": "Alpha",
            "member_id": "111@c.us",
            "member_name": "New Member",
            "member_phone": "111",
            "timestamp": "2026-08-20T10:00:00Z"
        }"#;
        let ev: TenantEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(ev, TenantEvent::MemberJoin(m) if m.member_phone.as_deref() == Some("111")));

        let ev: TenantEvent =
            serde_json::from_str(&raw.replace("member_join", "certificate")).unwrap();
        assert!(matches!(ev, TenantEvent::Certificate(_)));
    }
}
