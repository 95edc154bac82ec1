//! Worker protocol for Tidemail
//!
//! Typed actions and responses, the dispatch table that routes each response
//! to the callback of the action it answers, and the sequential task that
//! drives a mailbox backend.

mod backend;
mod criteria;
mod error;
mod message;
mod models;
mod worker;

pub use backend::{run_backend, terminal_response, Backend};
pub use criteria::{SearchCriteria, SortCriterion, SortField};
pub use error::{WorkerError, WorkerResult};
pub use message::{Action, ActionKind, InResponseTo, Message, MessageId, Response};
pub use models::{
    Address, BodyStructure, Capabilities, DirectoryInfo, Envelope, Flags, FullMessage, MessageInfo,
    ThreadTree,
};
pub use worker::{
    channel, ActionSender, Callback, MessagePoster, MessageReceiver, Worker, WorkerContext,
    WorkerEndpoint, WorkerInteractor,
};
