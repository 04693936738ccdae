//! GroupDeck core — shared error type, configuration and the notification
//! sink used by the dispatcher and the event pipeline.

pub mod config;
pub mod error;
pub mod notify;

pub use config::DeckConfig;
pub use error::{DeckError, Result};
