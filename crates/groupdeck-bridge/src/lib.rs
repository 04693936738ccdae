//! Client for the bridge service — the external process that owns the real
//! messaging sessions and performs every group action on our behalf.
//!
//! Every call returns a [`BridgeOutcome`] instead of an `Err`: transport
//! failures, timeouts and bridge-side rejections are all folded into
//! `success: false` with a human-readable error string, because callers
//! account per-group outcomes rather than abort on the first failure.

pub mod retry;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

/// Result of a single bridge call.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeOutcome {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Extra payload the bridge attached (message id, qr string, etc).
    #[serde(flatten)]
    pub extra: Value,
}

impl BridgeOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            extra: Value::Null,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
            extra: Value::Null,
        }
    }

    /// Whether the failure looks like a timeout. Timeouts are the only
    /// failures worth retrying — the action may still land, anything else
    /// will fail the same way again.
    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .map(|e| e.to_ascii_lowercase().contains("timeout") || e.contains("timed out"))
            .unwrap_or(false)
    }
}

/// Session status as the bridge reports it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Operations the bridge exposes per tenant session. One implementation
/// talks HTTP; tests substitute their own.
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Ask the bridge to (re)initialize the tenant's session. Fire-and-forget;
    /// progress arrives through the event pipeline.
    async fn init_session(&self, tenant_id: i64) -> BridgeOutcome;

    /// Current session health.
    async fn get_status(&self, tenant_id: i64) -> BridgeStatus;

    /// Plain text message, optionally mentioning everyone or a member list.
    async fn send_text(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        text: &str,
        mention_all: bool,
        mentions: &[String],
    ) -> BridgeOutcome;

    /// Text plus a media attachment already staged on the bridge host.
    async fn send_media(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        text: &str,
        media_reference: &str,
        mentions: &[String],
    ) -> BridgeOutcome;

    async fn send_poll(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        question: &str,
        options: &[String],
        allow_multiple: bool,
        mention_all: bool,
        mentions: &[String],
    ) -> BridgeOutcome;

    /// Toggle who may post in the group: everyone (open) or admins only.
    async fn set_group_mode(&self, tenant_id: i64, bridge_group_id: &str, open: bool)
        -> BridgeOutcome;

    /// Welcome message mentioning a batch of joiners plus the group's
    /// always-mentioned members. The bridge renders the mention markup.
    async fn send_welcome(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        text: &str,
        joiner_ids: &[String],
        extra_mention_ids: &[String],
    ) -> BridgeOutcome;

    /// Remove staged media after a broadcast completes.
    async fn delete_media(&self, tenant_id: i64, media_reference: &str) -> BridgeOutcome;
}

/// Per-endpoint timeouts. Media and group-settings calls involve uploads and
/// member-list scans on the bridge side, so they get far more headroom.
const TIMEOUT_INIT: Duration = Duration::from_secs(30);
const TIMEOUT_STATUS: Duration = Duration::from_secs(10);
const TIMEOUT_SEND: Duration = Duration::from_secs(60);
const TIMEOUT_MEDIA: Duration = Duration::from_secs(120);
const TIMEOUT_SETTINGS: Duration = Duration::from_secs(120);
const TIMEOUT_DELETE: Duration = Duration::from_secs(30);

/// Bridge client over HTTP.
pub struct HttpBridge {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBridge {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value, timeout: Duration) -> BridgeOutcome {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await;
        match resp {
            Ok(r) => {
                let status = r.status();
                match r.json::<BridgeOutcome>().await {
                    Ok(outcome) if status.is_success() => outcome,
                    Ok(outcome) => BridgeOutcome::err(
                        outcome
                            .error
                            .unwrap_or_else(|| format!("Bridge returned HTTP {status}")),
                    ),
                    Err(_) if status.is_success() => BridgeOutcome::ok(),
                    Err(_) => BridgeOutcome::err(format!("Bridge returned HTTP {status}")),
                }
            }
            Err(e) if e.is_timeout() => {
                warn!("⏰ Bridge call {path} timed out after {timeout:?}");
                BridgeOutcome::err(format!("Request timeout after {}s", timeout.as_secs()))
            }
            Err(e) => BridgeOutcome::err(format!("Bridge request failed: {e}")),
        }
    }
}

#[async_trait]
impl BridgeClient for HttpBridge {
    async fn init_session(&self, tenant_id: i64) -> BridgeOutcome {
        self.post(
            "/session/init",
            json!({ "tenantId": tenant_id }),
            TIMEOUT_INIT,
        )
        .await
    }

    async fn get_status(&self, tenant_id: i64) -> BridgeStatus {
        let url = format!("{}/session/status/{tenant_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(TIMEOUT_STATUS)
            .send()
            .await;
        match resp {
            Ok(r) if r.status().is_success() => r.json::<BridgeStatus>().await.unwrap_or_default(),
            Ok(r) => {
                warn!("Bridge status for tenant {tenant_id} returned HTTP {}", r.status());
                BridgeStatus::default()
            }
            Err(e) => {
                warn!("Bridge status for tenant {tenant_id} failed: {e}");
                BridgeStatus::default()
            }
        }
    }

    async fn send_text(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        text: &str,
        mention_all: bool,
        mentions: &[String],
    ) -> BridgeOutcome {
        self.post(
            "/message/send",
            json!({
                "tenantId": tenant_id,
                "groupId": bridge_group_id,
                "message": text,
                "mentionAll": mention_all,
                "mentions": mentions,
            }),
            TIMEOUT_SEND,
        )
        .await
    }

    async fn send_media(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        text: &str,
        media_reference: &str,
        mentions: &[String],
    ) -> BridgeOutcome {
        self.post(
            "/message/send-media",
            json!({
                "tenantId": tenant_id,
                "groupId": bridge_group_id,
                "message": text,
                "mediaPath": media_reference,
                "mentions": mentions,
            }),
            TIMEOUT_MEDIA,
        )
        .await
    }

    async fn send_poll(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        question: &str,
        options: &[String],
        allow_multiple: bool,
        mention_all: bool,
        mentions: &[String],
    ) -> BridgeOutcome {
        self.post(
            "/message/send-poll",
            json!({
                "tenantId": tenant_id,
                "groupId": bridge_group_id,
                "question": question,
                "options": options,
                "allowMultipleAnswers": allow_multiple,
                "mentionAll": mention_all,
                "mentions": mentions,
            }),
            TIMEOUT_SEND,
        )
        .await
    }

    async fn set_group_mode(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        open: bool,
    ) -> BridgeOutcome {
        self.post(
            "/group/settings",
            json!({
                "tenantId": tenant_id,
                "groupId": bridge_group_id,
                "messagesAdminsOnly": !open,
            }),
            TIMEOUT_SETTINGS,
        )
        .await
    }

    async fn send_welcome(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
        text: &str,
        joiner_ids: &[String],
        extra_mention_ids: &[String],
    ) -> BridgeOutcome {
        self.post(
            "/message/send-welcome",
            json!({
                "tenantId": tenant_id,
                "groupId": bridge_group_id,
                "message": text,
                "joinerIds": joiner_ids,
                "extraMentionIds": extra_mention_ids,
            }),
            TIMEOUT_SEND,
        )
        .await
    }

    async fn delete_media(&self, tenant_id: i64, media_reference: &str) -> BridgeOutcome {
        self.post(
            "/media/delete",
            json!({ "tenantId": tenant_id, "mediaPath": media_reference }),
            TIMEOUT_DELETE,
        )
        .await
    }
}
