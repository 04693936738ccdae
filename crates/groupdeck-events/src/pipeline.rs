//! The event pipeline: consumes per-tenant events from the bridge transport
//! and turns them into store writes, dashboard notifications and workflow
//! side effects.
//!
//! One event failing is logged and dropped; the pipeline itself only stops
//! when the transport channel closes.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{error, info};

use groupdeck_bridge::BridgeClient;
use groupdeck_core::error::Result;
use groupdeck_core::notify::NotifySink;
use groupdeck_store::{MessageRecord, NewEvent, Store};

use crate::event::{IncomingMessage, MemberEvent, TenantEvent};
use crate::responder::ResponseBackend;
use crate::{mention, welcome};

pub struct EventPipeline {
    store: Arc<Store>,
    bridge: Arc<dyn BridgeClient>,
    sink: Arc<dyn NotifySink>,
    responder: Arc<dyn ResponseBackend>,
}

impl EventPipeline {
    pub fn new(
        store: Arc<Store>,
        bridge: Arc<dyn BridgeClient>,
        sink: Arc<dyn NotifySink>,
        responder: Arc<dyn ResponseBackend>,
    ) -> Self {
        Self {
            store,
            bridge,
            sink,
            responder,
        }
    }

    /// Drain the transport channel until it closes.
    pub async fn run(&self, mut rx: mpsc::UnboundedReceiver<(i64, TenantEvent)>) {
        info!("🔔 Event pipeline started");
        while let Some((tenant_id, event)) = rx.recv().await {
            if let Err(e) = self.handle(tenant_id, event).await {
                error!("⚠️ Event for tenant {tenant_id} failed: {e}");
            }
        }
        info!("Event pipeline stopped");
    }

    /// Dispatch one event.
    pub async fn handle(&self, tenant_id: i64, event: TenantEvent) -> Result<()> {
        match event {
            TenantEvent::Qr { qr } => {
                self.store.ensure_session(tenant_id)?;
                self.store.set_session_status(tenant_id, "qr_ready")?;
                self.sink
                    .send_to_tenant(tenant_id, json!({ "type": "qr", "qr": qr }))
                    .await;
            }
            TenantEvent::Authenticated { phone_number } => {
                self.store.ensure_session(tenant_id)?;
                self.store.set_session_status(tenant_id, "authenticated")?;
                self.sink
                    .send_to_tenant(
                        tenant_id,
                        json!({ "type": "authenticated", "phone_number": phone_number }),
                    )
                    .await;
            }
            TenantEvent::Ready { phone_number } => {
                self.store.ensure_session(tenant_id)?;
                self.store
                    .set_session_ready(tenant_id, phone_number.as_deref())?;
                info!("✅ Session ready for tenant {tenant_id}");
                self.sink
                    .send_to_tenant(
                        tenant_id,
                        json!({ "type": "ready", "phone_number": phone_number }),
                    )
                    .await;
            }
            TenantEvent::Disconnected { reason } => {
                self.store.ensure_session(tenant_id)?;
                self.store.set_session_disconnected(tenant_id)?;
                info!("⚠️ Session disconnected for tenant {tenant_id}");
                self.sink
                    .send_to_tenant(
                        tenant_id,
                        json!({ "type": "disconnected", "reason": reason }),
                    )
                    .await;
            }
            TenantEvent::Message(msg) => self.handle_message(tenant_id, msg).await?,
            TenantEvent::MemberJoin(ev) => self.handle_join(tenant_id, ev).await?,
            TenantEvent::MemberLeave(ev) => self.handle_leave(tenant_id, ev).await?,
            TenantEvent::Certificate(ev) => self.handle_certificate(tenant_id, ev).await?,
        }
        Ok(())
    }

    async fn handle_message(&self, tenant_id: i64, msg: IncomingMessage) -> Result<()> {
        // Messages from groups nobody monitors are dropped silently.
        let Some(group) = self
            .store
            .active_group_by_bridge_id(tenant_id, &msg.group_id)?
        else {
            return Ok(());
        };

        let record = MessageRecord {
            id: msg.id.clone(),
            tenant_id,
            group_id: group.id,
            bridge_group_id: group.bridge_group_id.clone(),
            group_name: group.group_name.clone(),
            sender_id: msg.sender_id.clone(),
            sender_name: msg.sender_name.clone(),
            sender_phone: msg.sender_phone.clone(),
            content: msg.content.clone(),
            message_type: msg.message_type.clone(),
            timestamp: msg.timestamp,
        };
        // Redelivered events are recognized by the upstream message id and
        // produce no second notification and no second agent reply.
        if !self.store.insert_message(&record)? {
            return Ok(());
        }

        self.sink
            .send_to_tenant(
                tenant_id,
                json!({
                    "type": "new_message",
                    "group_id": group.id,
                    "group_name": group.group_name.clone(),
                    "sender_name": record.sender_name,
                    "content": record.content,
                    "message_type": record.message_type,
                    "timestamp": record.timestamp,
                }),
            )
            .await;

        mention::maybe_respond(
            &self.store,
            &self.bridge,
            &self.sink,
            &self.responder,
            tenant_id,
            &group,
            &msg,
        )
        .await
    }

    async fn handle_join(&self, tenant_id: i64, ev: MemberEvent) -> Result<()> {
        let Some(group) = self
            .store
            .active_group_by_bridge_id(tenant_id, &ev.group_id)?
        else {
            return Ok(());
        };

        self.store.insert_event(&NewEvent {
            tenant_id,
            group_id: group.id,
            bridge_group_id: group.bridge_group_id.clone(),
            group_name: group.group_name.clone(),
            member_id: ev.member_id.clone(),
            member_name: ev.member_name.clone(),
            member_phone: ev.member_phone.clone(),
            event_type: "join".into(),
            event_date: ev.timestamp.date_naive(),
            timestamp: ev.timestamp,
        })?;

        self.sink
            .send_to_tenant(
                tenant_id,
                json!({
                    "type": "member_join",
                    "group_id": group.id,
                    "group_name": group.group_name.clone(),
                    "member_name": ev.member_name,
                    "member_phone": ev.member_phone.clone(),
                }),
            )
            .await;

        if group.welcome_enabled {
            if let Some(phone) = &ev.member_phone {
                welcome::process_join(&self.store, &self.bridge, &self.sink, &group, phone)
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_leave(&self, tenant_id: i64, ev: MemberEvent) -> Result<()> {
        let Some(group) = self
            .store
            .active_group_by_bridge_id(tenant_id, &ev.group_id)?
        else {
            return Ok(());
        };

        self.store.insert_event(&NewEvent {
            tenant_id,
            group_id: group.id,
            bridge_group_id: group.bridge_group_id.clone(),
            group_name: group.group_name.clone(),
            member_id: ev.member_id.clone(),
            member_name: ev.member_name.clone(),
            member_phone: ev.member_phone.clone(),
            event_type: "leave".into(),
            event_date: ev.timestamp.date_naive(),
            timestamp: ev.timestamp,
        })?;

        self.sink
            .send_to_tenant(
                tenant_id,
                json!({
                    "type": "member_leave",
                    "group_id": group.id,
                    "group_name": group.group_name,
                    "member_name": ev.member_name,
                    "member_phone": ev.member_phone,
                }),
            )
            .await;
        Ok(())
    }

    async fn handle_certificate(&self, tenant_id: i64, ev: MemberEvent) -> Result<()> {
        let Some(group) = self
            .store
            .active_group_by_bridge_id(tenant_id, &ev.group_id)?
        else {
            return Ok(());
        };
        let Some(phone) = ev.member_phone.clone() else {
            return Ok(());
        };

        let day = ev.timestamp.date_naive();
        // One certificate per member per group per calendar day.
        if self
            .store
            .certificate_exists(tenant_id, group.id, &phone, day)?
        {
            return Ok(());
        }

        self.store.insert_event(&NewEvent {
            tenant_id,
            group_id: group.id,
            bridge_group_id: group.bridge_group_id.clone(),
            group_name: group.group_name.clone(),
            member_id: ev.member_id.clone(),
            member_name: ev.member_name.clone(),
            member_phone: Some(phone.clone()),
            event_type: "certificate".into(),
            event_date: day,
            timestamp: ev.timestamp,
        })?;

        self.sink
            .send_to_tenant(
                tenant_id,
                json!({
                    "type": "certificate",
                    "group_id": group.id,
                    "group_name": group.group_name,
                    "member_name": ev.member_name,
                    "member_phone": phone,
                }),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use groupdeck_bridge::{BridgeOutcome, BridgeStatus};
    use groupdeck_core::error::DeckError;
    use groupdeck_store::{AgentRecord, NewGroup};
    use serde_json::Value;
    use std::sync::Mutex as StdMutex;

    struct RecordingBridge {
        sends: StdMutex<Vec<(String, String, Vec<String>)>>,
    }

    impl RecordingBridge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sends: StdMutex::new(Vec::new()),
            })
        }

        fn sends(&self) -> Vec<(String, String, Vec<String>)> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BridgeClient for RecordingBridge {
        async fn init_session(&self, _tenant_id: i64) -> BridgeOutcome {
            BridgeOutcome::ok()
        }
        async fn get_status(&self, _tenant_id: i64) -> BridgeStatus {
            BridgeStatus {
                ready: true,
                ..Default::default()
            }
        }
        async fn send_text(
            &self,
            _tenant_id: i64,
            bridge_group_id: &str,
            text: &str,
            _mention_all: bool,
            mentions: &[String],
        ) -> BridgeOutcome {
            self.sends.lock().unwrap().push((
                bridge_group_id.to_string(),
                text.to_string(),
                mentions.to_vec(),
            ));
            BridgeOutcome::ok()
        }
        async fn send_welcome(
            &self,
            _tenant_id: i64,
            bridge_group_id: &str,
            text: &str,
            joiner_ids: &[String],
            extra_mention_ids: &[String],
        ) -> BridgeOutcome {
            let mut mentions = joiner_ids.to_vec();
            mentions.extend(extra_mention_ids.iter().cloned());
            self.sends.lock().unwrap().push((
                bridge_group_id.to_string(),
                text.to_string(),
                mentions,
            ));
            BridgeOutcome::ok()
        }
        async fn send_media(
            &self,
            _tenant_id: i64,
            bridge_group_id: &str,
            text: &str,
            media_reference: &str,
            _mentions: &[String],
        ) -> BridgeOutcome {
            self.sends.lock().unwrap().push((
                bridge_group_id.to_string(),
                format!("{text}+{media_reference}"),
                Vec::new(),
            ));
            BridgeOutcome::ok()
        }
        async fn send_poll(
            &self,
            _tenant_id: i64,
            _bridge_group_id: &str,
            _question: &str,
            _options: &[String],
            _allow_multiple: bool,
            _mention_all: bool,
            _mentions: &[String],
        ) -> BridgeOutcome {
            BridgeOutcome::ok()
        }
        async fn set_group_mode(
            &self,
            _tenant_id: i64,
            _bridge_group_id: &str,
            _open: bool,
        ) -> BridgeOutcome {
            BridgeOutcome::ok()
        }
        async fn delete_media(&self, _tenant_id: i64, _media_reference: &str) -> BridgeOutcome {
            BridgeOutcome::ok()
        }
    }

    struct RecordingSink {
        payloads: StdMutex<Vec<Value>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                payloads: StdMutex::new(Vec::new()),
            })
        }

        fn of_type(&self, kind: &str) -> Vec<Value> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p["type"] == kind)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl NotifySink for RecordingSink {
        async fn send_to_tenant(&self, _tenant_id: i64, payload: Value) {
            self.payloads.lock().unwrap().push(payload);
        }
    }

    struct CannedResponder {
        reply: Option<String>,
    }

    #[async_trait]
    impl ResponseBackend for CannedResponder {
        async fn complete(&self, _agent: &AgentRecord, prompt: &str) -> Result<String> {
            match &self.reply {
                Some(r) => Ok(format!("{r} (to: {prompt})")),
                None => Err(DeckError::Agent("backend down".into())),
            }
        }
    }

    struct Fixture {
        store: Arc<Store>,
        bridge: Arc<RecordingBridge>,
        sink: Arc<RecordingSink>,
        pipeline: EventPipeline,
        group_id: i64,
    }

    fn fixture_with(reply: Option<&str>, welcome: NewGroup) -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let group_id = store.create_group(welcome).unwrap().id;
        let bridge = RecordingBridge::new();
        let sink = RecordingSink::new();
        let responder: Arc<dyn ResponseBackend> = Arc::new(CannedResponder {
            reply: reply.map(String::from),
        });
        let pipeline = EventPipeline::new(
            store.clone(),
            bridge.clone(),
            sink.clone(),
            responder,
        );
        Fixture {
            store,
            bridge,
            sink,
            pipeline,
            group_id,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            Some("Sure!"),
            NewGroup {
                tenant_id: 1,
                bridge_group_id: "wa-a".into(),
                group_name: "Alpha".into(),
                welcome_threshold: 1,
                ..Default::default()
            },
        )
    }

    fn message(id: &str, content: &str, mentioned: Vec<&str>) -> TenantEvent {
        TenantEvent::Message(IncomingMessage {
            id: id.into(),
            group_id: "wa-a".into(),
            group_name: "Alpha".into(),
            sender_id: Some("sender@c.us".into()),
            sender_name: "Dina".into(),
            sender_phone: Some("20999".into()),
            content: content.into(),
            message_type: "text".into(),
            mentioned_ids: mentioned.into_iter().map(String::from).collect(),
            timestamp: Utc::now(),
        })
    }

    fn member(kind: &str, phone: &str) -> TenantEvent {
        let ev = MemberEvent {
            group_id: "wa-a".into(),
            group_name: "Alpha".into(),
            member_id: format!("{phone}@c.us"),
            member_name: "Member".into(),
            member_phone: Some(phone.into()),
            timestamp: Utc::now(),
        };
        match kind {
            "join" => TenantEvent::MemberJoin(ev),
            "leave" => TenantEvent::MemberLeave(ev),
            _ => TenantEvent::Certificate(ev),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle_updates_and_forwards() {
        let fx = fixture();
        fx.pipeline
            .handle(1, TenantEvent::Qr { qr: "data:abc".into() })
            .await
            .unwrap();
        assert_eq!(
            fx.store.get_session(1).unwrap().unwrap().auth_status,
            "qr_ready"
        );
        assert_eq!(fx.sink.of_type("qr")[0]["qr"], "data:abc");

        fx.pipeline
            .handle(
                1,
                TenantEvent::Ready {
                    phone_number: Some("20123".into()),
                },
            )
            .await
            .unwrap();
        let session = fx.store.get_session(1).unwrap().unwrap();
        assert!(session.is_authenticated);
        assert_eq!(session.phone_number.as_deref(), Some("20123"));
        assert_eq!(fx.sink.of_type("ready").len(), 1);

        fx.pipeline
            .handle(1, TenantEvent::Disconnected { reason: None })
            .await
            .unwrap();
        assert!(!fx.store.get_session(1).unwrap().unwrap().is_authenticated);
        assert_eq!(fx.sink.of_type("disconnected").len(), 1);
    }

    #[tokio::test]
    async fn test_message_stored_once_and_forwarded_once() {
        let fx = fixture();
        fx.pipeline.handle(1, message("m-1", "hello", vec![])).await.unwrap();
        fx.pipeline.handle(1, message("m-1", "hello", vec![])).await.unwrap();

        assert_eq!(fx.store.message_count(1).unwrap(), 1);
        assert_eq!(fx.sink.of_type("new_message").len(), 1);
    }

    #[tokio::test]
    async fn test_unmonitored_group_message_dropped() {
        let fx = fixture();
        let ev = TenantEvent::Message(IncomingMessage {
            id: "m-x".into(),
            group_id: "wa-unknown".into(),
            group_name: "Elsewhere".into(),
            sender_id: None,
            sender_name: "Dina".into(),
            sender_phone: None,
            content: "hi".into(),
            message_type: "text".into(),
            mentioned_ids: vec![],
            timestamp: Utc::now(),
        });
        fx.pipeline.handle(1, ev).await.unwrap();
        assert_eq!(fx.store.message_count(1).unwrap(), 0);
        assert!(fx.sink.of_type("new_message").is_empty());
    }

    #[tokio::test]
    async fn test_mention_triggers_agent_reply() {
        let fx = fixture();
        fx.store.ensure_session(1).unwrap();
        fx.store.set_session_ready(1, Some("20123")).unwrap();
        fx.store
            .create_agent(1, "helper", "https://api.example/v1", "k", None, true, &[fx.group_id])
            .unwrap();

        fx.pipeline
            .handle(1, message("m-1", "@20123 opening hours?", vec!["20123@c.us"]))
            .await
            .unwrap();

        let sends = fx.bridge.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].0, "wa-a");
        assert!(sends[0].1.contains("Sure!"));
        assert!(sends[0].1.contains("opening hours?"));
        // Reply mentions the original sender.
        assert_eq!(sends[0].2, vec!["sender@c.us"]);
        assert_eq!(fx.sink.of_type("agent_response").len(), 1);
    }

    #[tokio::test]
    async fn test_bare_number_in_text_counts_as_mention() {
        let fx = fixture();
        fx.store.ensure_session(1).unwrap();
        fx.store.set_session_ready(1, Some("20123")).unwrap();
        fx.store
            .create_agent(1, "helper", "https://api.example/v1", "k", None, true, &[fx.group_id])
            .unwrap();

        // No explicit mention list, but the number appears in the text.
        fx.pipeline
            .handle(1, message("m-1", "hey 20123 are you there", vec![]))
            .await
            .unwrap();

        assert_eq!(fx.bridge.sends().len(), 1);
    }

    #[tokio::test]
    async fn test_mention_without_agent_is_silent() {
        let fx = fixture();
        fx.store.ensure_session(1).unwrap();
        fx.store.set_session_ready(1, Some("20123")).unwrap();

        fx.pipeline
            .handle(1, message("m-1", "@20123 hi", vec!["20123@c.us"]))
            .await
            .unwrap();
        assert!(fx.bridge.sends().is_empty());
    }

    #[tokio::test]
    async fn test_agent_disabled_for_group_is_silent() {
        let fx = fixture();
        fx.store.ensure_session(1).unwrap();
        fx.store.set_session_ready(1, Some("20123")).unwrap();
        // Enabled only for a different group id.
        fx.store
            .create_agent(1, "helper", "https://api.example/v1", "k", None, true, &[fx.group_id + 100])
            .unwrap();

        fx.pipeline
            .handle(1, message("m-1", "@20123 hi", vec!["20123@c.us"]))
            .await
            .unwrap();
        assert!(fx.bridge.sends().is_empty());
    }

    #[tokio::test]
    async fn test_agent_failure_does_not_fail_the_event() {
        let fx = fixture_with(
            None,
            NewGroup {
                tenant_id: 1,
                bridge_group_id: "wa-a".into(),
                group_name: "Alpha".into(),
                welcome_threshold: 1,
                ..Default::default()
            },
        );
        fx.store.ensure_session(1).unwrap();
        fx.store.set_session_ready(1, Some("20123")).unwrap();
        fx.store
            .create_agent(1, "helper", "https://api.example/v1", "k", None, true, &[fx.group_id])
            .unwrap();

        fx.pipeline
            .handle(1, message("m-1", "@20123 hi", vec!["20123@c.us"]))
            .await
            .unwrap();
        // Message itself was still stored and forwarded.
        assert_eq!(fx.store.message_count(1).unwrap(), 1);
        assert!(fx.bridge.sends().is_empty());
    }

    #[tokio::test]
    async fn test_join_below_threshold_accumulates() {
        let fx = fixture_with(
            Some("x"),
            NewGroup {
                tenant_id: 1,
                bridge_group_id: "wa-a".into(),
                group_name: "Alpha".into(),
                welcome_enabled: true,
                welcome_threshold: 3,
                welcome_text: Some("Welcome everyone!".into()),
                ..Default::default()
            },
        );

        fx.pipeline.handle(1, member("join", "111")).await.unwrap();
        fx.pipeline.handle(1, member("join", "222")).await.unwrap();

        let g = fx.store.get_group(fx.group_id).unwrap();
        assert_eq!(g.welcome_join_count, 2);
        assert_eq!(g.welcome_pending_joiners, vec!["111", "222"]);
        assert!(fx.bridge.sends().is_empty());
        assert_eq!(fx.store.event_count(1, "join").unwrap(), 2);
        assert_eq!(fx.sink.of_type("member_join").len(), 2);
    }

    #[tokio::test]
    async fn test_join_at_threshold_sends_welcome_and_resets() {
        let fx = fixture_with(
            Some("x"),
            NewGroup {
                tenant_id: 1,
                bridge_group_id: "wa-a".into(),
                group_name: "Alpha".into(),
                welcome_enabled: true,
                welcome_threshold: 2,
                welcome_text: Some("Welcome everyone!".into()),
                welcome_extra_mentions: vec!["admin-1".into()],
                ..Default::default()
            },
        );

        fx.pipeline.handle(1, member("join", "111")).await.unwrap();
        fx.pipeline.handle(1, member("join", "222")).await.unwrap();

        let sends = fx.bridge.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1, "Welcome everyone!");
        assert_eq!(sends[0].2, vec!["111", "222", "admin-1"]);

        let g = fx.store.get_group(fx.group_id).unwrap();
        assert_eq!(g.welcome_join_count, 0);
        assert!(g.welcome_pending_joiners.is_empty());
        assert_eq!(fx.sink.of_type("welcome_sent").len(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_counts_but_does_not_duplicate_mention() {
        let fx = fixture_with(
            Some("x"),
            NewGroup {
                tenant_id: 1,
                bridge_group_id: "wa-a".into(),
                group_name: "Alpha".into(),
                welcome_enabled: true,
                welcome_threshold: 2,
                welcome_text: Some("Hi!".into()),
                ..Default::default()
            },
        );

        fx.pipeline.handle(1, member("join", "111")).await.unwrap();
        fx.pipeline.handle(1, member("join", "111")).await.unwrap();

        // The second join of the same member still advances the counter but
        // the batch mentions them once.
        let sends = fx.bridge.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].2, vec!["111"]);
    }

    #[tokio::test]
    async fn test_welcome_part2_follows_part1() {
        let fx = fixture_with(
            Some("x"),
            NewGroup {
                tenant_id: 1,
                bridge_group_id: "wa-a".into(),
                group_name: "Alpha".into(),
                welcome_enabled: true,
                welcome_threshold: 1,
                welcome_text: Some("Hi!".into()),
                welcome_part2_enabled: true,
                welcome_part2_text: Some("House rules:".into()),
                welcome_part2_image: Some("/srv/rules.png".into()),
                ..Default::default()
            },
        );

        fx.pipeline.handle(1, member("join", "111")).await.unwrap();

        let sends = fx.bridge.sends();
        assert_eq!(sends.len(), 2);
        assert_eq!(sends[0].1, "Hi!");
        assert_eq!(sends[1].1, "House rules:+/srv/rules.png");
    }

    #[tokio::test]
    async fn test_leave_logged_and_forwarded() {
        let fx = fixture();
        fx.pipeline.handle(1, member("leave", "111")).await.unwrap();
        assert_eq!(fx.store.event_count(1, "leave").unwrap(), 1);
        assert_eq!(fx.sink.of_type("member_leave").len(), 1);
    }

    #[tokio::test]
    async fn test_certificate_deduped_per_day() {
        let fx = fixture();
        fx.pipeline.handle(1, member("cert", "555")).await.unwrap();
        fx.pipeline.handle(1, member("cert", "555")).await.unwrap();

        assert_eq!(fx.store.event_count(1, "certificate").unwrap(), 1);
        assert_eq!(fx.sink.of_type("certificate").len(), 1);
    }

    #[tokio::test]
    async fn test_certificate_different_members_both_logged() {
        let fx = fixture();
        fx.pipeline.handle(1, member("cert", "555")).await.unwrap();
        fx.pipeline.handle(1, member("cert", "666")).await.unwrap();
        assert_eq!(fx.store.event_count(1, "certificate").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_close() {
        let fx = fixture();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send((1, message("m-1", "one", vec![]))).unwrap();
        tx.send((1, message("m-2", "two", vec![]))).unwrap();
        drop(tx);

        fx.pipeline.run(rx).await;
        assert_eq!(fx.store.message_count(1).unwrap(), 2);
    }
}
