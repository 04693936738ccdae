//! Agent autoresponses to mentions of the tenant's own number.
//!
//! When a group message mentions the session's phone number and the tenant
//! has an active agent enabled for that group, the message text (with the
//! mention tokens stripped) is sent to the agent and the reply is posted
//! back to the group. Failures are logged and swallowed: a broken agent
//! must never stall the event pipeline.

use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::{info, warn};

use groupdeck_bridge::BridgeClient;
use groupdeck_core::error::Result;
use groupdeck_core::notify::NotifySink;
use groupdeck_store::{GroupRecord, Store};

use crate::event::IncomingMessage;
use crate::responder::ResponseBackend;

/// Handle a possible mention of the session's number in `msg`.
pub async fn maybe_respond(
    store: &Store,
    bridge: &Arc<dyn BridgeClient>,
    sink: &Arc<dyn NotifySink>,
    responder: &Arc<dyn ResponseBackend>,
    tenant_id: i64,
    group: &GroupRecord,
    msg: &IncomingMessage,
) -> Result<()> {
    let Some(session) = store.get_session(tenant_id)? else {
        return Ok(());
    };
    let Some(phone) = session.phone_number else {
        return Ok(());
    };
    // Explicit mention list first, bare number in the text as fallback.
    let mentioned = msg.mentioned_ids.iter().any(|m| m.contains(&phone))
        || msg.content.contains(&phone);
    if !mentioned {
        return Ok(());
    }

    let Some(agent) = store.active_agent(tenant_id)? else {
        return Ok(());
    };
    if !agent.enabled_group_ids.contains(&group.id) {
        return Ok(());
    }

    let prompt = strip_mentions(&msg.content, &phone);
    info!(
        "🤖 Agent '{}' answering a mention in {}",
        agent.name, group.group_name
    );

    let reply = match responder.complete(&agent, &prompt).await {
        Ok(r) => r,
        Err(e) => {
            warn!("⚠️ Agent '{}' failed: {e}", agent.name);
            return Ok(());
        }
    };
    if reply.is_empty() {
        return Ok(());
    }

    let mentions: Vec<String> = msg.sender_id.iter().cloned().collect();
    let out = bridge
        .send_text(tenant_id, &group.bridge_group_id, &reply, false, &mentions)
        .await;
    if !out.success {
        warn!(
            "⚠️ Agent reply to {} failed: {}",
            group.group_name,
            out.error.unwrap_or_default()
        );
        return Ok(());
    }

    let preview: String = reply.chars().take(120).collect();
    sink.send_to_tenant(
        tenant_id,
        json!({
            "type": "agent_response",
            "group_id": group.id,
            "group_name": group.group_name,
            "agent_name": agent.name,
            "reply": preview,
        }),
    )
    .await;
    Ok(())
}

/// Remove every way the session number can appear as a mention token:
/// `@Display Name(123)`, `@123`, then the bare number. Falls back to
/// "Hello" when nothing but the mention was sent.
pub fn strip_mentions(content: &str, phone: &str) -> String {
    let escaped = regex::escape(phone);
    let mut text = content.to_string();
    if let Ok(re) = Regex::new(&format!(r"@[^@\n]+\({escaped}\)")) {
        text = re.replace_all(&text, "").into_owned();
    }
    if let Ok(re) = Regex::new(&format!(r"@{escaped}")) {
        text = re.replace_all(&text, "").into_owned();
    }
    if let Ok(re) = Regex::new(&escaped) {
        text = re.replace_all(&text, "").into_owned();
    }
    let trimmed = text.trim();
    if trimmed.is_empty() {
        "Hello".to_string()
    } else {
        trimmed.to_string()
    }
}
