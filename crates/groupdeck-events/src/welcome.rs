//! Threshold-batched welcome messages.
//!
//! Joins accumulate on the group row until the configured threshold is hit,
//! then every pending joiner gets greeted in one message. The counter and
//! joiner list are reset and persisted BEFORE the send goes out: a crash or
//! bridge failure may lose one greeting, but can never greet the same batch
//! twice.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use groupdeck_bridge::BridgeClient;
use groupdeck_core::error::Result;
use groupdeck_core::notify::NotifySink;
use groupdeck_store::{GroupRecord, Store};

/// Record one join for a welcome-enabled group, firing the batched welcome
/// if this join reaches the threshold.
pub async fn process_join(
    store: &Store,
    bridge: &Arc<dyn BridgeClient>,
    sink: &Arc<dyn NotifySink>,
    group: &GroupRecord,
    member_phone: &str,
) -> Result<()> {
    // Re-read so concurrent joins observed between events are not clobbered.
    let fresh = store.get_group(group.id)?;

    let mut pending = fresh.welcome_pending_joiners.clone();
    if !pending.iter().any(|p| p == member_phone) {
        pending.push(member_phone.to_string());
    }
    let count = fresh.welcome_join_count + 1;
    store.update_welcome_state(fresh.id, count, &pending)?;

    if count < fresh.welcome_threshold {
        info!(
            "👋 Group {}: {} of {} joins toward welcome",
            fresh.group_name, count, fresh.welcome_threshold
        );
        return Ok(());
    }

    // Threshold reached: take the batch and reset durably before sending,
    // so a slow or failing send cannot re-trigger on the next join.
    store.update_welcome_state(fresh.id, 0, &[])?;
    send_welcome(bridge, sink, &fresh, &pending).await;
    Ok(())
}

async fn send_welcome(
    bridge: &Arc<dyn BridgeClient>,
    sink: &Arc<dyn NotifySink>,
    group: &GroupRecord,
    joiners: &[String],
) {
    let text = group
        .welcome_text
        .clone()
        .unwrap_or_else(|| "Welcome!".to_string());
    // A joiner who is also an always-mentioned member gets mentioned from
    // the extra list only.
    let joiner_ids: Vec<String> = joiners
        .iter()
        .filter(|j| !group.welcome_extra_mentions.contains(*j))
        .cloned()
        .collect();

    let out = bridge
        .send_welcome(
            group.tenant_id,
            &group.bridge_group_id,
            &text,
            &joiner_ids,
            &group.welcome_extra_mentions,
        )
        .await;
    if !out.success {
        // The batch state is already reset; the greeting for these joiners
        // is lost rather than repeated.
        warn!(
            "⚠️ Welcome for group {} failed: {}",
            group.group_name,
            out.error.unwrap_or_default()
        );
        return;
    }
    info!(
        "✅ Welcomed {} member(s) in {}",
        joiners.len(),
        group.group_name
    );

    if group.welcome_part2_enabled {
        let part2 = group.welcome_part2_text.clone().unwrap_or_default();
        let out2 = match &group.welcome_part2_image {
            Some(image) => {
                bridge
                    .send_media(group.tenant_id, &group.bridge_group_id, &part2, image, &[])
                    .await
            }
            None => {
                bridge
                    .send_text(group.tenant_id, &group.bridge_group_id, &part2, false, &[])
                    .await
            }
        };
        if !out2.success {
            warn!(
                "⚠️ Welcome part 2 for group {} failed: {}",
                group.group_name,
                out2.error.unwrap_or_default()
            );
        }
    }

    sink.send_to_tenant(
        group.tenant_id,
        json!({
            "type": "welcome_sent",
            "group_id": group.id,
            "group_name": group.group_name.clone(),
            "joiners": joiners,
        }),
    )
    .await;
}

