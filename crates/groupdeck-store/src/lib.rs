//! SQLite-backed persistence for GroupDeck.

pub mod db;
pub mod models;

pub use db::Store;
pub use models::{
    AgentRecord, EventRecord, GroupRecord, MentionMode, MessageRecord, NewEvent, NewGroup,
    NewTask, SessionRecord, TaskRecord, TaskStatus, TaskType,
};
