//! IMAP connection supervision for tidemail
//!
//! Provides the IDLE state machine and a backend wrapper that pauses idle
//! mode while actions run.

mod config;
mod error;
mod guard;
mod idler;

pub use config::IdleConfig;
pub use error::{ImapError, ImapResult};
pub use guard::IdleGuard;
pub use idler::{IdleClient, IdleState, Idler};
