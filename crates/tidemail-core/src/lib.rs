//! Folder view logic for tidemail
//!
//! Provides the message store, reply threading, marking and the display
//! order policy shared by every frontend.

mod config;
mod error;
mod iterator;
mod marker;
mod rfc822;
mod sort;
mod store;
mod thread;

pub use config::StoreConfig;
pub use error::{CoreError, CoreResult};
pub use iterator::{fix_bounds, move_index, wrap_bounds, BoundsCheck, DisplayIter, IterFactory};
pub use marker::Marker;
pub use rfc822::parse_message_info;
pub use sort::{sort_by_order, sort_messages};
pub use store::{BodyCallback, BodyPartCallback, MessageStore, SearchCallback, StoreHooks};
pub use thread::{Children, NodeId, ThreadBuilder, ThreadForest, ThreadNode};
