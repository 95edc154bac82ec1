//! Backend seam and the task that drives it

use crate::message::{Action, Message, Response};
use crate::models::Capabilities;
use crate::worker::{MessagePoster, WorkerEndpoint, WorkerInteractor};
use crate::{WorkerError, WorkerResult};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// A mailbox implementation driven by one worker task
#[async_trait]
pub trait Backend: Send {
    /// Native features of this backend
    fn capabilities(&self) -> Capabilities;

    /// Execute one action.
    ///
    /// Data-bearing responses are posted through `poster`; the terminal
    /// response is derived from the returned result.
    async fn handle(&mut self, action: &Message<Action>, poster: &MessagePoster) -> WorkerResult<()>;
}

/// Terminal response for the outcome of an action
pub fn terminal_response(result: WorkerResult<()>) -> Response {
    match result {
        Ok(()) => Response::Done,
        Err(WorkerError::Unsupported) => Response::Unsupported,
        Err(WorkerError::Cancelled) => Response::Cancelled,
        Err(e) => Response::Error(e.to_string()),
    }
}

/// Run a backend until the store side of the bus is dropped.
///
/// Actions execute strictly one at a time, in the order they were posted,
/// and each ends with exactly one terminal response.
pub async fn run_backend<B: Backend>(mut backend: B, mut endpoint: WorkerEndpoint) {
    info!("Backend worker started");
    let poster = endpoint.poster();

    while let Some(action) = endpoint.next_action().await {
        debug!(action = ?action.kind(), id = %action.id, "Handling action");
        let result = backend.handle(&action, &poster).await;
        if let Err(e) = &result {
            warn!(action = ?action.kind(), id = %action.id, "Action failed: {}", e);
        }
        endpoint.respond(&action, terminal_response(result));
    }

    info!("Backend worker stopped");
}
