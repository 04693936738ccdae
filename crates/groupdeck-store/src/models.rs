//! Row types and enums for the persistent store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// What kind of outbound work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Broadcast,
    Poll,
    OpenGroup,
    CloseGroup,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Broadcast => "broadcast",
            TaskType::Poll => "poll",
            TaskType::OpenGroup => "open_group",
            TaskType::CloseGroup => "close_group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "broadcast" => Some(TaskType::Broadcast),
            "poll" => Some(TaskType::Poll),
            "open_group" => Some(TaskType::OpenGroup),
            "close_group" => Some(TaskType::CloseGroup),
            _ => None,
        }
    }
}

/// Task lifecycle. Transitions: pending → sending → {sent, partially_sent,
/// failed}, or pending → cancelled. Terminal rows are never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Sending,
    Sent,
    PartiallySent,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Sending => "sending",
            TaskStatus::Sent => "sent",
            TaskStatus::PartiallySent => "partially_sent",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "sending" => Some(TaskStatus::Sending),
            "sent" => Some(TaskStatus::Sent),
            "partially_sent" => Some(TaskStatus::PartiallySent),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Sent | TaskStatus::PartiallySent | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Who gets mentioned when the task content is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionMode {
    None,
    All,
    Selected,
}

impl MentionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentionMode::None => "none",
            MentionMode::All => "all",
            MentionMode::Selected => "selected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(MentionMode::None),
            "all" => Some(MentionMode::All),
            "selected" => Some(MentionMode::Selected),
            _ => None,
        }
    }
}

/// A scheduled outbound task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub task_type: TaskType,
    pub is_recurring: bool,
    /// "HH:MM" wall-clock time in the tenant's local zone, daily recurrence.
    pub recurring_time: Option<String>,
    /// Links paired open/close tasks to their originating schedule.
    pub parent_schedule_id: Option<i64>,
    /// Message text, or the poll question for poll tasks.
    pub content: Option<String>,
    /// Bridge-side media path attached to the broadcast.
    pub media_reference: Option<String>,
    pub poll_options: Vec<String>,
    pub poll_allow_multiple: bool,
    /// Store-level group ids, order preserved, duplicates kept.
    pub target_group_ids: Vec<i64>,
    pub group_names: Vec<String>,
    pub mention_mode: MentionMode,
    pub mention_ids: Vec<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub groups_sent: i64,
    pub groups_failed: i64,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to insert a task (the CRUD layer and the recurrence
/// regenerator both go through this).
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub tenant_id: i64,
    pub task_type: Option<TaskType>,
    pub is_recurring: bool,
    pub recurring_time: Option<String>,
    pub parent_schedule_id: Option<i64>,
    pub content: Option<String>,
    pub media_reference: Option<String>,
    pub poll_options: Vec<String>,
    pub poll_allow_multiple: bool,
    pub target_group_ids: Vec<i64>,
    pub group_names: Vec<String>,
    pub mention_mode: Option<MentionMode>,
    pub mention_ids: Vec<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
}

/// A monitored external group with its welcome-automation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: i64,
    pub tenant_id: i64,
    /// The remote service's own id for this group.
    pub bridge_group_id: String,
    pub group_name: String,
    pub member_count: i64,
    pub is_active: bool,
    pub welcome_enabled: bool,
    pub welcome_threshold: i64,
    pub welcome_join_count: i64,
    pub welcome_pending_joiners: Vec<String>,
    pub welcome_text: Option<String>,
    pub welcome_extra_mentions: Vec<String>,
    pub welcome_part2_enabled: bool,
    pub welcome_part2_text: Option<String>,
    pub welcome_part2_image: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub tenant_id: i64,
    pub bridge_group_id: String,
    pub group_name: String,
    pub welcome_enabled: bool,
    pub welcome_threshold: i64,
    pub welcome_text: Option<String>,
    pub welcome_extra_mentions: Vec<String>,
    pub welcome_part2_enabled: bool,
    pub welcome_part2_text: Option<String>,
    pub welcome_part2_image: Option<String>,
}

/// Per-tenant connection/auth state to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub auth_status: String,
    pub is_authenticated: bool,
    pub phone_number: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Durable log entry for a join/leave/certificate occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub group_id: i64,
    pub bridge_group_id: String,
    pub group_name: String,
    pub member_id: String,
    pub member_name: String,
    pub member_phone: Option<String>,
    pub event_type: String,
    pub event_date: NaiveDate,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tenant_id: i64,
    pub group_id: i64,
    pub bridge_group_id: String,
    pub group_name: String,
    pub member_id: String,
    pub member_name: String,
    pub member_phone: Option<String>,
    pub event_type: String,
    pub event_date: NaiveDate,
    pub timestamp: DateTime<Utc>,
}

/// Durable log entry for an inbound chat message, keyed by the upstream
/// message id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub tenant_id: i64,
    pub group_id: i64,
    pub bridge_group_id: String,
    pub group_name: String,
    pub sender_id: Option<String>,
    pub sender_name: String,
    pub sender_phone: Option<String>,
    pub content: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
}

/// Autoresponder configuration; at most one active per tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub name: String,
    pub api_url: String,
    pub api_key: String,
    pub output_token_limit: i64,
    pub system_prompt: Option<String>,
    pub is_active: bool,
    pub enabled_group_ids: Vec<i64>,
}
