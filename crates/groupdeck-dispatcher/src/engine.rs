//! The task dispatcher.
//!
//! A single background loop polls the store for due tasks and executes them
//! sequentially: claim the row, then walk the target groups with a fixed
//! pause between sends, verifying before each send that the tenant's
//! session is usable (one recovery attempt when it is not) and accounting
//! success and failure per group. A task never aborts on a failing group;
//! the terminal status reflects the tally. Daily recurring tasks regenerate
//! their next occurrence whatever the outcome of this one.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use groupdeck_bridge::{retry, BridgeClient, BridgeOutcome};
use groupdeck_core::error::Result;
use groupdeck_core::notify::NotifySink;
use groupdeck_store::{NewTask, Store, TaskRecord, TaskStatus, TaskType};

use crate::timing::DispatchTiming;

/// Tally of one task's walk over its target groups.
struct DeliveryTally {
    sent: i64,
    failed: i64,
    errors: Vec<String>,
}

impl DeliveryTally {
    fn new() -> Self {
        Self {
            sent: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    fn status(&self) -> TaskStatus {
        if self.failed == 0 {
            TaskStatus::Sent
        } else if self.sent == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::PartiallySent
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

pub struct Dispatcher {
    store: Arc<Store>,
    bridge: Arc<dyn BridgeClient>,
    sink: Arc<dyn NotifySink>,
    timing: DispatchTiming,
    /// Hours ahead of UTC for converting recurring wall-clock times.
    timezone_offset_hours: i64,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        bridge: Arc<dyn BridgeClient>,
        sink: Arc<dyn NotifySink>,
        timing: DispatchTiming,
        timezone_offset_hours: i64,
    ) -> Self {
        Self {
            store,
            bridge,
            sink,
            timing,
            timezone_offset_hours,
        }
    }

    /// Run the polling loop until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "📅 Dispatcher started (poll every {:?})",
            self.timing.poll_interval
        );
        let mut tick = tokio::time::interval(self.timing.poll_interval.max(
            std::time::Duration::from_millis(10),
        ));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!("⚠️ Dispatch cycle failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Dispatcher stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One polling cycle: recover rows stranded by a crash, then execute
    /// everything that is due.
    pub async fn poll_once(&self) -> Result<()> {
        let stale_cutoff = Utc::now()
            - ChronoDuration::from_std(self.timing.poll_interval * 2)
                .unwrap_or_else(|_| ChronoDuration::seconds(120));
        let requeued = self.store.requeue_stale_sending(stale_cutoff)?;
        if requeued > 0 {
            warn!("⚠️ Requeued {requeued} task(s) stranded in 'sending'");
        }

        let due = self.store.due_tasks(Utc::now())?;
        if due.is_empty() {
            return Ok(());
        }
        info!("🔔 {} due task(s)", due.len());
        for task in due {
            let id = task.id;
            if let Err(e) = self.execute(task).await {
                error!("⚠️ Task {id} aborted: {e}");
                // The row is already claimed; stamp it failed so it does not
                // sit in 'sending' until the stale sweep.
                let _ = self.store.complete_task(
                    id,
                    TaskStatus::Failed,
                    0,
                    0,
                    Some(&e.to_string()),
                    Utc::now(),
                );
            }
        }
        Ok(())
    }

    /// Execute one due task end to end.
    async fn execute(&self, task: TaskRecord) -> Result<()> {
        if !self.store.claim_task(task.id)? {
            // Another cycle got here first, or the user cancelled it
            // between the query and now.
            return Ok(());
        }
        info!(
            "📨 Task {} ({}) for tenant {}: {} group(s)",
            task.id,
            task.task_type.as_str(),
            task.tenant_id,
            task.target_group_ids.len()
        );

        let tally = self.deliver_to_groups(&task).await?;
        let status = tally.status();
        self.store.complete_task(
            task.id,
            status,
            tally.sent,
            tally.failed,
            tally.error_message().as_deref(),
            Utc::now(),
        )?;
        info!(
            "✅ Task {} finished: {} sent, {} failed → {}",
            task.id,
            tally.sent,
            tally.failed,
            status.as_str()
        );

        if task.task_type == TaskType::Broadcast {
            if let Some(media) = &task.media_reference {
                let out = self.bridge.delete_media(task.tenant_id, media).await;
                if !out.success {
                    warn!(
                        "⚠️ Task {}: media cleanup failed: {}",
                        task.id,
                        out.error.unwrap_or_default()
                    );
                }
            }
        }

        self.notify_complete(&task, status, &tally).await;
        self.regenerate_recurrence(&task)?;
        Ok(())
    }

    /// Walk the task's groups in stored order with pacing between sends.
    /// The session is health-checked before every send; a recovery that
    /// fails condemns every remaining group and ends the walk.
    async fn deliver_to_groups(&self, task: &TaskRecord) -> Result<DeliveryTally> {
        let mut tally = DeliveryTally::new();
        let total = task.target_group_ids.len();

        for (idx, group_id) in task.target_group_ids.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.timing.group_pacing).await;
            }
            let display_name = task
                .group_names
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("group {group_id}"));

            if !self.ensure_session_ready(task.tenant_id).await {
                warn!(
                    "⚠️ Task {}: session unrecoverable, failing {} remaining group(s)",
                    task.id,
                    total - idx
                );
                for rest in idx..total {
                    let name = task
                        .group_names
                        .get(rest)
                        .cloned()
                        .unwrap_or_else(|| format!("group {}", task.target_group_ids[rest]));
                    tally.failed += 1;
                    tally.errors.push(format!("{name}: session not ready"));
                }
                break;
            }

            let group = match self.store.group_for_tenant(*group_id, task.tenant_id)? {
                Some(g) => g,
                None => {
                    // Data error, not transient: count it and move on.
                    warn!("⚠️ Task {}: group {group_id} not found", task.id);
                    tally.failed += 1;
                    tally.errors.push(format!("{display_name}: group not found"));
                    self.notify_progress(task, &display_name, idx + 1, total, false)
                        .await;
                    continue;
                }
            };

            let outcome = self.perform_action(task, &group.bridge_group_id).await;
            let delivered = outcome.success;
            if delivered {
                tally.sent += 1;
                info!("✅ Task {} → {} delivered", task.id, group.group_name);
            } else {
                let err = outcome.error.unwrap_or_else(|| "unknown error".into());
                warn!("⚠️ Task {} → {} failed: {err}", task.id, group.group_name);
                tally.failed += 1;
                tally.errors.push(format!("{}: {err}", group.group_name));
            }
            self.notify_progress(task, &group.group_name, idx + 1, total, delivered)
                .await;
        }
        Ok(tally)
    }

    /// The bridge call for one group, with timeout-only retry.
    async fn perform_action(&self, task: &TaskRecord, bridge_group_id: &str) -> BridgeOutcome {
        let schedule = self.timing.retry_backoff;
        match task.task_type {
            TaskType::Broadcast => {
                let text = task.content.clone().unwrap_or_default();
                let mention_all = task.mention_mode == groupdeck_store::MentionMode::All;
                let mentions = self.mentions_for(task);
                if let Some(media) = task.media_reference.clone() {
                    retry::with_backoff(&schedule, || {
                        self.bridge.send_media(
                            task.tenant_id,
                            bridge_group_id,
                            &text,
                            &media,
                            &mentions,
                        )
                    })
                    .await
                } else {
                    retry::with_backoff(&schedule, || {
                        self.bridge.send_text(
                            task.tenant_id,
                            bridge_group_id,
                            &text,
                            mention_all,
                            &mentions,
                        )
                    })
                    .await
                }
            }
            TaskType::Poll => {
                let question = task.content.clone().unwrap_or_default();
                let mention_all = task.mention_mode == groupdeck_store::MentionMode::All;
                let mentions = self.mentions_for(task);
                retry::with_backoff(&schedule, || {
                    self.bridge.send_poll(
                        task.tenant_id,
                        bridge_group_id,
                        &question,
                        &task.poll_options,
                        task.poll_allow_multiple,
                        mention_all,
                        &mentions,
                    )
                })
                .await
            }
            TaskType::OpenGroup | TaskType::CloseGroup => {
                let open = task.task_type == TaskType::OpenGroup;
                let outcome = retry::with_backoff(&schedule, || {
                    self.bridge.set_group_mode(task.tenant_id, bridge_group_id, open)
                })
                .await;
                // An attached announcement goes out right after a successful
                // mode change; its failure does not undo the change.
                if outcome.success {
                    if let Some(text) = task.content.as_deref().filter(|t| !t.is_empty()) {
                        let sent = self
                            .bridge
                            .send_text(task.tenant_id, bridge_group_id, text, false, &[])
                            .await;
                        if !sent.success {
                            warn!(
                                "⚠️ Task {}: announcement after mode change failed: {}",
                                task.id,
                                sent.error.unwrap_or_default()
                            );
                        }
                    }
                }
                outcome
            }
        }
    }

    fn mentions_for(&self, task: &TaskRecord) -> Vec<String> {
        match task.mention_mode {
            groupdeck_store::MentionMode::Selected => task.mention_ids.clone(),
            _ => Vec::new(),
        }
    }

    /// Check the session once; if it is not ready, kick one recovery,
    /// give the bridge time to settle, and check again.
    async fn ensure_session_ready(&self, tenant_id: i64) -> bool {
        if self.bridge.get_status(tenant_id).await.ready {
            return true;
        }
        warn!("⚠️ Session for tenant {tenant_id} not ready, attempting recovery");
        let init = self.bridge.init_session(tenant_id).await;
        if !init.success {
            warn!(
                "⚠️ Session recovery for tenant {tenant_id} failed: {}",
                init.error.unwrap_or_default()
            );
            return false;
        }
        tokio::time::sleep(self.timing.stabilization).await;
        self.bridge.get_status(tenant_id).await.ready
    }

    /// Insert tomorrow's occurrence of a daily recurring task. Runs whatever
    /// this occurrence's outcome was.
    fn regenerate_recurrence(&self, task: &TaskRecord) -> Result<()> {
        let Some(time_str) = &task.recurring_time else {
            return Ok(());
        };
        if !task.is_recurring {
            return Ok(());
        }
        let Some(next_run) = next_daily_run(time_str, self.timezone_offset_hours) else {
            warn!(
                "⚠️ Task {}: bad recurring time '{time_str}', recurrence dropped",
                task.id
            );
            return Ok(());
        };
        let next = self.store.create_task(NewTask {
            tenant_id: task.tenant_id,
            task_type: Some(task.task_type),
            is_recurring: true,
            recurring_time: Some(time_str.clone()),
            parent_schedule_id: Some(task.parent_schedule_id.unwrap_or(task.id)),
            content: task.content.clone(),
            media_reference: task.media_reference.clone(),
            poll_options: task.poll_options.clone(),
            poll_allow_multiple: task.poll_allow_multiple,
            target_group_ids: task.target_group_ids.clone(),
            group_names: task.group_names.clone(),
            mention_mode: Some(task.mention_mode),
            mention_ids: task.mention_ids.clone(),
            scheduled_at: Some(next_run),
            status: None,
        })?;
        info!(
            "📅 Task {} recurs daily at {time_str}: next occurrence is task {} at {next_run}",
            task.id, next.id
        );
        Ok(())
    }

    // ── notifications ──────────────────────────────

    fn payload_prefix(task_type: TaskType) -> &'static str {
        match task_type {
            TaskType::Broadcast => "broadcast",
            TaskType::Poll => "poll",
            TaskType::OpenGroup | TaskType::CloseGroup => "settings",
        }
    }

    async fn notify_progress(
        &self,
        task: &TaskRecord,
        group_name: &str,
        current: usize,
        total: usize,
        success: bool,
    ) {
        self.sink
            .send_to_tenant(
                task.tenant_id,
                json!({
                    "type": format!("{}_progress", Self::payload_prefix(task.task_type)),
                    "task_id": task.id,
                    "group_name": group_name,
                    "current": current,
                    "total": total,
                    "success": success,
                }),
            )
            .await;
    }

    async fn notify_complete(&self, task: &TaskRecord, status: TaskStatus, tally: &DeliveryTally) {
        self.sink
            .send_to_tenant(
                task.tenant_id,
                json!({
                    "type": format!("{}_complete", Self::payload_prefix(task.task_type)),
                    "task_id": task.id,
                    "status": status.as_str(),
                    "groups_sent": tally.sent,
                    "groups_failed": tally.failed,
                    "error_message": tally.error_message(),
                }),
            )
            .await;
    }
}

/// Next UTC instant for a daily "HH:MM" wall-clock time that is
/// `offset_hours` ahead of UTC. Always tomorrow's occurrence, never today's.
pub fn next_daily_run(time_str: &str, offset_hours: i64) -> Option<chrono::DateTime<Utc>> {
    let local_time = NaiveTime::parse_from_str(time_str, "%H:%M").ok()?;
    let tomorrow = Utc::now().date_naive() + ChronoDuration::days(1);
    let naive = tomorrow.and_time(local_time);
    Some(naive.and_utc() - ChronoDuration::hours(offset_hours))
}
