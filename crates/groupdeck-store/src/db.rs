//! GroupDeck persistent store.
//!
//! One SQLite database holds everything the dispatcher and the event
//! pipeline read or write: tasks, monitored groups, bridge sessions,
//! message/event logs and agent configurations. Both background loops share
//! this store with the request-serving path, so every write goes through a
//! single connection guarded by a mutex and WAL mode keeps readers cheap.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use groupdeck_core::error::{DeckError, Result};

use crate::models::*;

/// Persistent store handle; cheap to share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

// ── time / json column helpers ──────────────────────────────

/// Fixed-width UTC timestamp format so string comparison orders correctly.
fn ts_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn parse_ts_opt(s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

fn parse_day(s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn json_list<T: serde::Serialize>(items: &[T]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn from_json_list<T: serde::de::DeserializeOwned>(s: &str) -> Vec<T> {
    serde_json::from_str(s).unwrap_or_default()
}

fn db_err(e: impl std::fmt::Display) -> DeckError {
    DeckError::Store(e.to_string())
}

// ── row mappers (single source of truth per table) ──────────

const TASK_SELECT: &str = "SELECT id,tenant_id,task_type,is_recurring,recurring_time,\
parent_schedule_id,content,media_reference,poll_options_json,poll_allow_multiple,\
target_group_ids_json,group_names_json,mention_mode,mention_ids_json,scheduled_at,\
status,groups_sent,groups_failed,error_message,sent_at,created_at,updated_at FROM tasks";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
    let task_type: String = row.get(2)?;
    let mention_mode: String = row.get(12)?;
    let status: String = row.get(15)?;
    Ok(TaskRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        task_type: TaskType::parse(&task_type).unwrap_or(TaskType::Broadcast),
        is_recurring: row.get::<_, i64>(3)? != 0,
        recurring_time: row.get(4)?,
        parent_schedule_id: row.get(5)?,
        content: row.get(6)?,
        media_reference: row.get(7)?,
        poll_options: from_json_list(&row.get::<_, String>(8)?),
        poll_allow_multiple: row.get::<_, i64>(9)? != 0,
        target_group_ids: from_json_list(&row.get::<_, String>(10)?),
        group_names: from_json_list(&row.get::<_, String>(11)?),
        mention_mode: MentionMode::parse(&mention_mode).unwrap_or(MentionMode::None),
        mention_ids: from_json_list(&row.get::<_, String>(13)?),
        scheduled_at: parse_ts(&row.get::<_, String>(14)?)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        groups_sent: row.get(16)?,
        groups_failed: row.get(17)?,
        error_message: row.get(18)?,
        sent_at: parse_ts_opt(row.get(19)?)?,
        created_at: parse_ts(&row.get::<_, String>(20)?)?,
        updated_at: parse_ts(&row.get::<_, String>(21)?)?,
    })
}

const GROUP_SELECT: &str = "SELECT id,tenant_id,bridge_group_id,group_name,member_count,\
is_active,welcome_enabled,welcome_threshold,welcome_join_count,welcome_pending_joiners_json,\
welcome_text,welcome_extra_mentions_json,welcome_part2_enabled,welcome_part2_text,\
welcome_part2_image FROM groups";

fn row_to_group(row: &rusqlite::Row) -> rusqlite::Result<GroupRecord> {
    Ok(GroupRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        bridge_group_id: row.get(2)?,
        group_name: row.get(3)?,
        member_count: row.get(4)?,
        is_active: row.get::<_, i64>(5)? != 0,
        welcome_enabled: row.get::<_, i64>(6)? != 0,
        welcome_threshold: row.get(7)?,
        welcome_join_count: row.get(8)?,
        welcome_pending_joiners: from_json_list(&row.get::<_, String>(9)?),
        welcome_text: row.get(10)?,
        welcome_extra_mentions: from_json_list(&row.get::<_, String>(11)?),
        welcome_part2_enabled: row.get::<_, i64>(12)? != 0,
        welcome_part2_text: row.get(13)?,
        welcome_part2_image: row.get(14)?,
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        auth_status: row.get(2)?,
        is_authenticated: row.get::<_, i64>(3)? != 0,
        phone_number: row.get(4)?,
        last_connected_at: parse_ts_opt(row.get(5)?)?,
    })
}

fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        group_id: row.get(2)?,
        bridge_group_id: row.get(3)?,
        group_name: row.get(4)?,
        member_id: row.get(5)?,
        member_name: row.get(6)?,
        member_phone: row.get(7)?,
        event_type: row.get(8)?,
        event_date: parse_day(&row.get::<_, String>(9)?)?,
        timestamp: parse_ts(&row.get::<_, String>(10)?)?,
    })
}

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        api_url: row.get(3)?,
        api_key: row.get(4)?,
        output_token_limit: row.get(5)?,
        system_prompt: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        enabled_group_ids: from_json_list(&row.get::<_, String>(8)?),
    })
}

impl Store {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| db_err(format!("DB open error: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .ok();
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| db_err(format!("Lock: {e}")))
    }

    /// Run schema migrations (idempotent).
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                task_type TEXT NOT NULL DEFAULT 'broadcast',
                is_recurring INTEGER NOT NULL DEFAULT 0,
                recurring_time TEXT,
                parent_schedule_id INTEGER,
                content TEXT,
                media_reference TEXT,
                poll_options_json TEXT NOT NULL DEFAULT '[]',
                poll_allow_multiple INTEGER NOT NULL DEFAULT 0,
                target_group_ids_json TEXT NOT NULL DEFAULT '[]',
                group_names_json TEXT NOT NULL DEFAULT '[]',
                mention_mode TEXT NOT NULL DEFAULT 'none',
                mention_ids_json TEXT NOT NULL DEFAULT '[]',
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                groups_sent INTEGER NOT NULL DEFAULT 0,
                groups_failed INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_status_time ON tasks(status, scheduled_at);
            CREATE INDEX IF NOT EXISTS idx_tasks_tenant ON tasks(tenant_id);

            CREATE TABLE IF NOT EXISTS groups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                bridge_group_id TEXT NOT NULL,
                group_name TEXT NOT NULL,
                member_count INTEGER NOT NULL DEFAULT 0,
                is_active INTEGER NOT NULL DEFAULT 1,
                welcome_enabled INTEGER NOT NULL DEFAULT 0,
                welcome_threshold INTEGER NOT NULL DEFAULT 1,
                welcome_join_count INTEGER NOT NULL DEFAULT 0,
                welcome_pending_joiners_json TEXT NOT NULL DEFAULT '[]',
                welcome_text TEXT,
                welcome_extra_mentions_json TEXT NOT NULL DEFAULT '[]',
                welcome_part2_enabled INTEGER NOT NULL DEFAULT 0,
                welcome_part2_text TEXT,
                welcome_part2_image TEXT,
                added_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_groups_tenant ON groups(tenant_id);
            CREATE INDEX IF NOT EXISTS idx_groups_bridge ON groups(tenant_id, bridge_group_id);

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL UNIQUE,
                auth_status TEXT NOT NULL DEFAULT 'not_initialized',
                is_authenticated INTEGER NOT NULL DEFAULT 0,
                phone_number TEXT,
                last_connected_at TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                tenant_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                bridge_group_id TEXT NOT NULL,
                group_name TEXT NOT NULL,
                sender_id TEXT,
                sender_name TEXT NOT NULL,
                sender_phone TEXT,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_tenant ON messages(tenant_id);

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                group_id INTEGER NOT NULL,
                bridge_group_id TEXT NOT NULL,
                group_name TEXT NOT NULL,
                member_id TEXT NOT NULL,
                member_name TEXT NOT NULL,
                member_phone TEXT,
                event_type TEXT NOT NULL,
                event_date TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_type_date ON events(event_type, event_date);
            CREATE INDEX IF NOT EXISTS idx_events_tenant_group ON events(tenant_id, group_id);

            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                api_url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                output_token_limit INTEGER NOT NULL DEFAULT 1024,
                system_prompt TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                enabled_group_ids_json TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_agents_tenant ON agents(tenant_id);
            ",
        )
        .map_err(|e| db_err(format!("Migration error: {e}")))?;
        Ok(())
    }

    // ── Tasks ──────────────────────────────

    /// Insert a new task row.
    pub fn create_task(&self, new: NewTask) -> Result<TaskRecord> {
        let conn = self.lock()?;
        let now = ts_str(Utc::now());
        let scheduled_at = ts_str(new.scheduled_at.unwrap_or_else(Utc::now));
        conn.execute(
            "INSERT INTO tasks (tenant_id, task_type, is_recurring, recurring_time,
                parent_schedule_id, content, media_reference, poll_options_json,
                poll_allow_multiple, target_group_ids_json, group_names_json,
                mention_mode, mention_ids_json, scheduled_at, status, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?16)",
            params![
                new.tenant_id,
                new.task_type.unwrap_or(TaskType::Broadcast).as_str(),
                new.is_recurring as i64,
                new.recurring_time,
                new.parent_schedule_id,
                new.content,
                new.media_reference,
                json_list(&new.poll_options),
                new.poll_allow_multiple as i64,
                json_list(&new.target_group_ids),
                json_list(&new.group_names),
                new.mention_mode.unwrap_or(MentionMode::None).as_str(),
                json_list(&new.mention_ids),
                scheduled_at,
                new.status.unwrap_or(TaskStatus::Pending).as_str(),
                now,
            ],
        )
        .map_err(|e| db_err(format!("Insert task: {e}")))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_task(id)
    }

    /// Fetch one task by id.
    pub fn get_task(&self, id: i64) -> Result<TaskRecord> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{TASK_SELECT} WHERE id=?1"),
            params![id],
            row_to_task,
        )
        .map_err(|e| db_err(format!("Get task {id}: {e}")))
    }

    /// All tasks that are pending and due at `now`, oldest first. Cancelled
    /// and in-flight rows are never returned.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT} WHERE status='pending' AND scheduled_at <= ?1 ORDER BY scheduled_at"
            ))
            .map_err(db_err)?;
        let tasks = stmt
            .query_map(params![ts_str(now)], row_to_task)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    /// Claim a task for execution: pending → sending. Returns false if the
    /// row was no longer pending (claimed by another cycle, or cancelled).
    pub fn claim_task(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='sending', updated_at=?1 WHERE id=?2 AND status='pending'",
                params![ts_str(Utc::now()), id],
            )
            .map_err(|e| db_err(format!("Claim task {id}: {e}")))?;
        Ok(changed == 1)
    }

    /// Stamp the terminal outcome of a task. Rejects non-terminal statuses;
    /// `claim_task` and `requeue_stale_sending` own those transitions.
    pub fn complete_task(
        &self,
        id: i64,
        status: TaskStatus,
        groups_sent: i64,
        groups_failed: i64,
        error_message: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(db_err(format!(
                "Complete task {id}: '{}' is not a terminal status",
                status.as_str()
            )));
        }
        let conn = self.lock()?;
        conn.execute(
            "UPDATE tasks SET status=?1, groups_sent=?2, groups_failed=?3,
                error_message=?4, sent_at=?5, updated_at=?6 WHERE id=?7",
            params![
                status.as_str(),
                groups_sent,
                groups_failed,
                error_message,
                ts_str(sent_at),
                ts_str(Utc::now()),
                id,
            ],
        )
        .map_err(|e| db_err(format!("Complete task {id}: {e}")))?;
        Ok(())
    }

    /// Cancel a pending task. Returns false if it was not pending.
    pub fn cancel_task(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='cancelled', updated_at=?1 WHERE id=?2 AND status='pending'",
                params![ts_str(Utc::now()), id],
            )
            .map_err(|e| db_err(format!("Cancel task {id}: {e}")))?;
        Ok(changed == 1)
    }

    /// Requeue tasks stuck in `sending` since before `cutoff` back to
    /// `pending` — crash recovery, see DESIGN.md.
    pub fn requeue_stale_sending(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE tasks SET status='pending', updated_at=?1
                 WHERE status='sending' AND updated_at < ?2",
                params![ts_str(Utc::now()), ts_str(cutoff)],
            )
            .map_err(|e| db_err(format!("Requeue stale: {e}")))?;
        Ok(changed)
    }

    /// Tasks for a tenant with a given status (test/inspection helper).
    pub fn tasks_with_status(&self, tenant_id: i64, status: TaskStatus) -> Result<Vec<TaskRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT} WHERE tenant_id=?1 AND status=?2 ORDER BY id"
            ))
            .map_err(db_err)?;
        let tasks = stmt
            .query_map(params![tenant_id, status.as_str()], row_to_task)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    // ── Groups ──────────────────────────────

    pub fn create_group(&self, new: NewGroup) -> Result<GroupRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO groups (tenant_id, bridge_group_id, group_name, welcome_enabled,
                welcome_threshold, welcome_text, welcome_extra_mentions_json,
                welcome_part2_enabled, welcome_part2_text, welcome_part2_image, added_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                new.tenant_id,
                new.bridge_group_id,
                new.group_name,
                new.welcome_enabled as i64,
                new.welcome_threshold.max(1),
                new.welcome_text,
                json_list(&new.welcome_extra_mentions),
                new.welcome_part2_enabled as i64,
                new.welcome_part2_text,
                new.welcome_part2_image,
                ts_str(Utc::now()),
            ],
        )
        .map_err(|e| db_err(format!("Insert group: {e}")))?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_group(id)
    }

    pub fn get_group(&self, id: i64) -> Result<GroupRecord> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{GROUP_SELECT} WHERE id=?1"),
            params![id],
            row_to_group,
        )
        .map_err(|e| db_err(format!("Get group {id}: {e}")))
    }

    /// Group lookup scoped to its owning tenant; None when the row does not
    /// exist or belongs to a different tenant.
    pub fn group_for_tenant(&self, id: i64, tenant_id: i64) -> Result<Option<GroupRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{GROUP_SELECT} WHERE id=?1 AND tenant_id=?2"),
            params![id, tenant_id],
            row_to_group,
        )
        .optional()
        .map_err(|e| db_err(format!("Group for tenant: {e}")))
    }

    /// Resolve an actively monitored group by the remote service's id.
    pub fn active_group_by_bridge_id(
        &self,
        tenant_id: i64,
        bridge_group_id: &str,
    ) -> Result<Option<GroupRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{GROUP_SELECT} WHERE tenant_id=?1 AND bridge_group_id=?2 AND is_active=1"),
            params![tenant_id, bridge_group_id],
            row_to_group,
        )
        .optional()
        .map_err(|e| db_err(format!("Group by bridge id: {e}")))
    }

    /// Write the welcome counter/pending-joiner pair in one statement.
    pub fn update_welcome_state(
        &self,
        group_id: i64,
        join_count: i64,
        pending_joiners: &[String],
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE groups SET welcome_join_count=?1, welcome_pending_joiners_json=?2 WHERE id=?3",
            params![join_count, json_list(pending_joiners), group_id],
        )
        .map_err(|e| db_err(format!("Update welcome state: {e}")))?;
        Ok(())
    }

    // ── Sessions ──────────────────────────────

    pub fn get_session(&self, tenant_id: i64) -> Result<Option<SessionRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id,tenant_id,auth_status,is_authenticated,phone_number,last_connected_at
             FROM sessions WHERE tenant_id=?1",
            params![tenant_id],
            row_to_session,
        )
        .optional()
        .map_err(|e| db_err(format!("Get session: {e}")))
    }

    /// Create the session row for a tenant if it does not exist yet.
    pub fn ensure_session(&self, tenant_id: i64) -> Result<SessionRecord> {
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT OR IGNORE INTO sessions (tenant_id, updated_at) VALUES (?1, ?2)",
                params![tenant_id, ts_str(Utc::now())],
            )
            .map_err(|e| db_err(format!("Ensure session: {e}")))?;
        }
        self.get_session(tenant_id)?
            .ok_or_else(|| DeckError::Store("session row missing after insert".to_string()))
    }

    /// Update the auth status only (qr_ready, authenticated, initializing…).
    pub fn set_session_status(&self, tenant_id: i64, auth_status: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET auth_status=?1, updated_at=?2 WHERE tenant_id=?3",
            params![auth_status, ts_str(Utc::now()), tenant_id],
        )
        .map_err(|e| db_err(format!("Set session status: {e}")))?;
        Ok(())
    }

    /// Mark the session fully connected.
    pub fn set_session_ready(&self, tenant_id: i64, phone_number: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let now = ts_str(Utc::now());
        conn.execute(
            "UPDATE sessions SET auth_status='ready', is_authenticated=1,
                phone_number=COALESCE(?1, phone_number), last_connected_at=?2, updated_at=?2
             WHERE tenant_id=?3",
            params![phone_number, now, tenant_id],
        )
        .map_err(|e| db_err(format!("Set session ready: {e}")))?;
        Ok(())
    }

    pub fn set_session_disconnected(&self, tenant_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET auth_status='disconnected', is_authenticated=0, updated_at=?1
             WHERE tenant_id=?2",
            params![ts_str(Utc::now()), tenant_id],
        )
        .map_err(|e| db_err(format!("Set session disconnected: {e}")))?;
        Ok(())
    }

    // ── Messages ──────────────────────────────

    /// Idempotent insert keyed by the upstream message id. Returns true if
    /// a new row was written, false for a duplicate delivery.
    pub fn insert_message(&self, msg: &MessageRecord) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO messages (id, tenant_id, group_id, bridge_group_id,
                    group_name, sender_id, sender_name, sender_phone, content, message_type, timestamp)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    msg.id,
                    msg.tenant_id,
                    msg.group_id,
                    msg.bridge_group_id,
                    msg.group_name,
                    msg.sender_id,
                    msg.sender_name,
                    msg.sender_phone,
                    msg.content,
                    msg.message_type,
                    ts_str(msg.timestamp),
                ],
            )
            .map_err(|e| db_err(format!("Insert message: {e}")))?;
        Ok(changed == 1)
    }

    pub fn message_count(&self, tenant_id: i64) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE tenant_id=?1",
            params![tenant_id],
            |r| r.get(0),
        )
        .map_err(db_err)
    }

    // ── Events ──────────────────────────────

    pub fn insert_event(&self, ev: &NewEvent) -> Result<EventRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO events (tenant_id, group_id, bridge_group_id, group_name,
                member_id, member_name, member_phone, event_type, event_date, timestamp)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                ev.tenant_id,
                ev.group_id,
                ev.bridge_group_id,
                ev.group_name,
                ev.member_id,
                ev.member_name,
                ev.member_phone,
                ev.event_type,
                ev.event_date.format("%Y-%m-%d").to_string(),
                ts_str(ev.timestamp),
            ],
        )
        .map_err(|e| db_err(format!("Insert event: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id,tenant_id,group_id,bridge_group_id,group_name,member_id,member_name,
                member_phone,event_type,event_date,timestamp FROM events WHERE id=?1",
            params![id],
            row_to_event,
        )
        .map_err(|e| db_err(format!("Read back event: {e}")))
    }

    /// Whether a certificate was already recorded for this member in this
    /// group on the given calendar day.
    pub fn certificate_exists(
        &self,
        tenant_id: i64,
        group_id: i64,
        member_phone: &str,
        day: NaiveDate,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE tenant_id=?1 AND group_id=?2
                    AND member_phone=?3 AND event_type='certificate' AND event_date=?4",
                params![
                    tenant_id,
                    group_id,
                    member_phone,
                    day.format("%Y-%m-%d").to_string()
                ],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        Ok(count > 0)
    }

    pub fn event_count(&self, tenant_id: i64, event_type: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM events WHERE tenant_id=?1 AND event_type=?2",
            params![tenant_id, event_type],
            |r| r.get(0),
        )
        .map_err(db_err)
    }

    // ── Agents ──────────────────────────────

    pub fn create_agent(
        &self,
        tenant_id: i64,
        name: &str,
        api_url: &str,
        api_key: &str,
        system_prompt: Option<&str>,
        is_active: bool,
        enabled_group_ids: &[i64],
    ) -> Result<AgentRecord> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO agents (tenant_id, name, api_url, api_key, system_prompt,
                is_active, enabled_group_ids_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                tenant_id,
                name,
                api_url,
                api_key,
                system_prompt,
                is_active as i64,
                json_list(enabled_group_ids),
            ],
        )
        .map_err(|e| db_err(format!("Insert agent: {e}")))?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            "SELECT id,tenant_id,name,api_url,api_key,output_token_limit,system_prompt,
                is_active,enabled_group_ids_json FROM agents WHERE id=?1",
            params![id],
            row_to_agent,
        )
        .map_err(|e| db_err(format!("Read back agent: {e}")))
    }

    /// The tenant's single currently-active autoresponder, if any.
    pub fn active_agent(&self, tenant_id: i64) -> Result<Option<AgentRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id,tenant_id,name,api_url,api_key,output_token_limit,system_prompt,
                is_active,enabled_group_ids_json FROM agents
             WHERE tenant_id=?1 AND is_active=1 LIMIT 1",
            params![tenant_id],
            row_to_agent,
        )
        .optional()
        .map_err(|e| db_err(format!("Active agent: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    fn simple_task(store: &Store, scheduled_at: DateTime<Utc>) -> TaskRecord {
        store
            .create_task(NewTask {
                tenant_id: 1,
                content: Some("hello".into()),
                target_group_ids: vec![10, 11],
                group_names: vec!["A".into(), "B".into()],
                scheduled_at: Some(scheduled_at),
                ..Default::default()
            })
            .unwrap()
    }

    #[test]
    fn test_task_roundtrip() {
        let s = store();
        let t = simple_task(&s, Utc::now());
        assert_eq!(t.task_type, TaskType::Broadcast);
        assert_eq!(t.status, TaskStatus::Pending);
        assert_eq!(t.target_group_ids, vec![10, 11]);
        let fetched = s.get_task(t.id).unwrap();
        assert_eq!(fetched.content.as_deref(), Some("hello"));
        assert_eq!(fetched.mention_mode, MentionMode::None);
    }

    #[test]
    fn test_due_tasks_excludes_future_and_cancelled() {
        let s = store();
        let now = Utc::now();
        let due = simple_task(&s, now - Duration::minutes(1));
        let _future = simple_task(&s, now + Duration::hours(1));
        let cancelled = simple_task(&s, now - Duration::minutes(5));
        assert!(s.cancel_task(cancelled.id).unwrap());

        let found = s.due_tasks(now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }

    #[test]
    fn test_claim_is_exclusive() {
        let s = store();
        let t = simple_task(&s, Utc::now());
        assert!(s.claim_task(t.id).unwrap());
        // Second claim must lose: the row is no longer pending.
        assert!(!s.claim_task(t.id).unwrap());
        assert_eq!(s.get_task(t.id).unwrap().status, TaskStatus::Sending);
    }

    #[test]
    fn test_cancel_only_pending() {
        let s = store();
        let t = simple_task(&s, Utc::now());
        assert!(s.claim_task(t.id).unwrap());
        assert!(!s.cancel_task(t.id).unwrap());
    }

    #[test]
    fn test_complete_task() {
        let s = store();
        let t = simple_task(&s, Utc::now());
        s.claim_task(t.id).unwrap();
        s.complete_task(t.id, TaskStatus::PartiallySent, 1, 1, Some("B: boom"), Utc::now())
            .unwrap();
        let done = s.get_task(t.id).unwrap();
        assert_eq!(done.status, TaskStatus::PartiallySent);
        assert_eq!(done.groups_sent + done.groups_failed, 2);
        assert!(done.error_message.unwrap().contains("boom"));
        assert!(done.sent_at.is_some());
    }

    #[test]
    fn test_complete_task_rejects_non_terminal_status() {
        let s = store();
        let t = simple_task(&s, Utc::now());
        s.claim_task(t.id).unwrap();
        assert!(s
            .complete_task(t.id, TaskStatus::Pending, 0, 0, None, Utc::now())
            .is_err());
        // The row is untouched.
        assert_eq!(s.get_task(t.id).unwrap().status, TaskStatus::Sending);
    }

    #[test]
    fn test_requeue_stale_sending() {
        let s = store();
        let t = simple_task(&s, Utc::now());
        s.claim_task(t.id).unwrap();
        // Nothing is stale yet.
        assert_eq!(s.requeue_stale_sending(Utc::now() - Duration::minutes(2)).unwrap(), 0);
        // Everything touched before a future cutoff is stale.
        assert_eq!(s.requeue_stale_sending(Utc::now() + Duration::minutes(2)).unwrap(), 1);
        assert_eq!(s.get_task(t.id).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_group_welcome_state() {
        let s = store();
        let g = s
            .create_group(NewGroup {
                tenant_id: 1,
                bridge_group_id: "g-1".into(),
                group_name: "Test".into(),
                welcome_enabled: true,
                welcome_threshold: 3,
                ..Default::default()
            })
            .unwrap();
        s.update_welcome_state(g.id, 2, &["111".into(), "222".into()]).unwrap();
        let g2 = s.get_group(g.id).unwrap();
        assert_eq!(g2.welcome_join_count, 2);
        assert_eq!(g2.welcome_pending_joiners, vec!["111", "222"]);

        s.update_welcome_state(g.id, 0, &[]).unwrap();
        let g3 = s.get_group(g.id).unwrap();
        assert_eq!(g3.welcome_join_count, 0);
        assert!(g3.welcome_pending_joiners.is_empty());
    }

    #[test]
    fn test_group_lookup_scoping() {
        let s = store();
        let g = s
            .create_group(NewGroup {
                tenant_id: 1,
                bridge_group_id: "g-1".into(),
                group_name: "Test".into(),
                welcome_threshold: 1,
                ..Default::default()
            })
            .unwrap();
        assert!(s.group_for_tenant(g.id, 1).unwrap().is_some());
        assert!(s.group_for_tenant(g.id, 2).unwrap().is_none());
        assert!(s.active_group_by_bridge_id(1, "g-1").unwrap().is_some());
        assert!(s.active_group_by_bridge_id(1, "g-404").unwrap().is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let s = store();
        let sess = s.ensure_session(9).unwrap();
        assert_eq!(sess.auth_status, "not_initialized");
        assert!(!sess.is_authenticated);

        s.set_session_status(9, "qr_ready").unwrap();
        assert_eq!(s.get_session(9).unwrap().unwrap().auth_status, "qr_ready");

        s.set_session_ready(9, Some("201234567")).unwrap();
        let ready = s.get_session(9).unwrap().unwrap();
        assert!(ready.is_authenticated);
        assert_eq!(ready.phone_number.as_deref(), Some("201234567"));
        assert!(ready.last_connected_at.is_some());

        s.set_session_disconnected(9).unwrap();
        let gone = s.get_session(9).unwrap().unwrap();
        assert_eq!(gone.auth_status, "disconnected");
        assert!(!gone.is_authenticated);
    }

    #[test]
    fn test_message_idempotent_insert() {
        let s = store();
        let msg = MessageRecord {
            id: "m-1".into(),
            tenant_id: 1,
            group_id: 2,
            bridge_group_id: "g-1".into(),
            group_name: "Test".into(),
            sender_id: Some("s-1".into()),
            sender_name: "Sender".into(),
            sender_phone: None,
            content: "hi".into(),
            message_type: "text".into(),
            timestamp: Utc::now(),
        };
        assert!(s.insert_message(&msg).unwrap());
        assert!(!s.insert_message(&msg).unwrap());
        assert_eq!(s.message_count(1).unwrap(), 1);
    }

    #[test]
    fn test_certificate_dedup_query() {
        let s = store();
        let today = Utc::now().date_naive();
        let ev = NewEvent {
            tenant_id: 1,
            group_id: 2,
            bridge_group_id: "g-1".into(),
            group_name: "Test".into(),
            member_id: "m".into(),
            member_name: "Member".into(),
            member_phone: Some("555".into()),
            event_type: "certificate".into(),
            event_date: today,
            timestamp: Utc::now(),
        };
        assert!(!s.certificate_exists(1, 2, "555", today).unwrap());
        s.insert_event(&ev).unwrap();
        assert!(s.certificate_exists(1, 2, "555", today).unwrap());
        // Next calendar day is a fresh slate.
        assert!(!s
            .certificate_exists(1, 2, "555", today.succ_opt().unwrap())
            .unwrap());
    }

    #[test]
    fn test_active_agent() {
        let s = store();
        assert!(s.active_agent(1).unwrap().is_none());
        s.create_agent(1, "idle", "https://api.example/v1", "k", None, false, &[])
            .unwrap();
        assert!(s.active_agent(1).unwrap().is_none());
        let a = s
            .create_agent(1, "live", "https://api.example/v1", "k", Some("be nice"), true, &[5])
            .unwrap();
        let active = s.active_agent(1).unwrap().unwrap();
        assert_eq!(active.id, a.id);
        assert_eq!(active.enabled_group_ids, vec![5]);
    }
}
