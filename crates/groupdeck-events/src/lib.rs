//! Inbound event handling for GroupDeck.

pub mod event;
pub mod mention;
pub mod pipeline;
pub mod responder;
pub mod welcome;

pub use event::{IncomingMessage, MemberEvent, TenantEvent};
pub use pipeline::EventPipeline;
pub use responder::{HttpBackend, ResponseBackend};
