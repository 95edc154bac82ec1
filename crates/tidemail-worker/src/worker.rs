//! Asynchronous command bus between a store and one backend
//!
//! The store side posts actions and never blocks; the backend side receives
//! them in order and posts any number of responses per action, ending with
//! exactly one terminal response.

use crate::message::{Action, ActionKind, InResponseTo, Message, MessageId, Response};
use crate::models::Capabilities;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Continuation invoked for each response to one action
pub type Callback<C> = Box<dyn FnMut(&mut C, &Message<Response>)>;

/// Receiver of every message the backend posts
pub type MessageReceiver = mpsc::UnboundedReceiver<Message<Response>>;

/// Create a connected store/backend pair.
///
/// Returns the store-side worker, the receiver the store's owner drains into
/// [`Worker::process_message`], and the backend endpoint.
pub fn channel<C>(capabilities: Capabilities) -> (Worker<C>, MessageReceiver, WorkerEndpoint) {
    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let ids = Arc::new(AtomicU64::new(1));

    let poster = MessagePoster {
        tx: message_tx,
        ids: ids.clone(),
    };
    let worker = Worker {
        sender: ActionSender {
            tx: action_tx,
            loopback: poster.clone(),
        },
        callbacks: HashMap::new(),
        capabilities,
    };
    let endpoint = WorkerEndpoint {
        actions: action_rx,
        poster,
    };
    (worker, message_rx, endpoint)
}

/// Anything that can post responses toward the store
pub trait WorkerInteractor: Send + Sync {
    /// Post a message; delivery is fire and forget
    fn post_message(&self, response: Response, in_response_to: Option<InResponseTo>);

    /// Post a response to a received action
    fn respond(&self, action: &Message<Action>, response: Response) {
        self.post_message(response, Some(action.reply_ref()));
    }

    /// Post a reply that no posted action is waiting for, such as a
    /// connection-state change
    fn post_unsolicited(&self, kind: ActionKind, response: Response) {
        self.post_message(
            response,
            Some(InResponseTo {
                id: MessageId::UNSOLICITED,
                kind,
            }),
        );
    }
}

/// Cloneable handle that posts responses
#[derive(Debug, Clone)]
pub struct MessagePoster {
    tx: mpsc::UnboundedSender<Message<Response>>,
    ids: Arc<AtomicU64>,
}

impl WorkerInteractor for MessagePoster {
    fn post_message(&self, response: Response, in_response_to: Option<InResponseTo>) {
        let message = Message {
            id: MessageId(self.ids.fetch_add(1, Ordering::Relaxed)),
            in_response_to,
            body: response,
        };
        if self.tx.send(message).is_err() {
            debug!("Dropping response: store is gone");
        }
    }
}

/// Cloneable handle that posts actions without registering a callback.
///
/// Debounce timers use this from outside the store's context.
#[derive(Debug, Clone)]
pub struct ActionSender {
    tx: mpsc::UnboundedSender<Message<Action>>,
    loopback: MessagePoster,
}

impl ActionSender {
    /// Enqueue an action and return its id immediately
    pub fn post(&self, action: Action) -> MessageId {
        let id = MessageId(self.loopback.ids.fetch_add(1, Ordering::Relaxed));
        let message = Message {
            id,
            in_response_to: None,
            body: action,
        };
        let reply = message.reply_ref();
        if self.tx.send(message).is_err() {
            // Deliver the failure through the normal path so callbacks and
            // rollbacks still run
            warn!("Backend is gone; failing action {}", id);
            self.loopback.post_message(
                Response::Error(crate::WorkerError::Disconnected.to_string()),
                Some(reply),
            );
        }
        id
    }

    /// Check whether the backend endpoint has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Store-side end of the bus, holding one callback slot per pending action
pub struct Worker<C> {
    sender: ActionSender,
    callbacks: HashMap<MessageId, Callback<C>>,
    capabilities: Capabilities,
}

/// A type that owns a [`Worker`] and receives its callbacks
pub trait WorkerContext: Sized {
    fn worker_mut(&mut self) -> &mut Worker<Self>;
}

impl<C> Worker<C> {
    /// Enqueue an action for asynchronous execution.
    ///
    /// `callback` is invoked once per response to this action, in delivery
    /// order, until a terminal response; never afterwards.
    pub fn post_action(&mut self, action: Action, callback: Option<Callback<C>>) -> MessageId {
        let kind = action.kind();
        let id = self.sender.post(action);
        debug!(action = ?kind, %id, "Posted action");
        if let Some(cb) = callback {
            self.callbacks.insert(id, cb);
        }
        id
    }

    /// Handle for posting callback-less actions from other contexts
    pub fn sender(&self) -> ActionSender {
        self.sender.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Number of actions still waiting for a terminal response
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }
}

impl<C: WorkerContext> Worker<C> {
    /// Deliver a response to the callback of the action it answers.
    ///
    /// The callback runs with full access to the context and is dropped once
    /// a terminal response has been delivered.
    pub fn process_message(ctx: &mut C, message: &Message<Response>) {
        let Some(id) = message.action_id() else {
            return;
        };
        let Some(mut callback) = ctx.worker_mut().callbacks.remove(&id) else {
            return;
        };
        callback(ctx, message);
        if !message.body.is_terminal() {
            ctx.worker_mut().callbacks.insert(id, callback);
        }
    }
}

/// Backend-side end of the bus
pub struct WorkerEndpoint {
    actions: mpsc::UnboundedReceiver<Message<Action>>,
    poster: MessagePoster,
}

impl WorkerEndpoint {
    /// Wait for the next action; `None` once the store side is dropped
    pub async fn next_action(&mut self) -> Option<Message<Action>> {
        self.actions.recv().await
    }

    /// Take an already-queued action without waiting
    pub fn try_next_action(&mut self) -> Option<Message<Action>> {
        self.actions.try_recv().ok()
    }

    /// Handle for posting responses from other tasks
    pub fn poster(&self) -> MessagePoster {
        self.poster.clone()
    }
}

impl WorkerInteractor for WorkerEndpoint {
    fn post_message(&self, response: Response, in_response_to: Option<InResponseTo>) {
        self.poster.post_message(response, in_response_to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        worker: Worker<Recorder>,
        seen: Vec<(MessageId, Response)>,
    }

    impl WorkerContext for Recorder {
        fn worker_mut(&mut self) -> &mut Worker<Self> {
            &mut self.worker
        }
    }

    fn drain(rx: &mut MessageReceiver, ctx: &mut Recorder) {
        while let Ok(message) = rx.try_recv() {
            Worker::process_message(ctx, &message);
        }
    }

    fn recording() -> Callback<Recorder> {
        Box::new(|ctx: &mut Recorder, msg: &Message<Response>| {
            ctx.seen.push((msg.action_id().unwrap(), msg.body.clone()));
        })
    }

    #[test]
    fn test_callback_stops_after_terminal() {
        let (worker, mut rx, mut endpoint) = channel::<Recorder>(Capabilities::default());
        let mut ctx = Recorder {
            worker,
            seen: Vec::new(),
        };

        let id = ctx.worker.post_action(Action::FetchMessageHeaders { uids: vec![1, 2] }, Some(recording()));
        let action = endpoint.try_next_action().unwrap();
        assert_eq!(action.id, id);

        endpoint.respond(&action, Response::MessageInfo {
            info: crate::MessageInfo::new(1),
            needs_flags: false,
        });
        endpoint.respond(&action, Response::Done);
        // Anything after the terminal response is ignored
        endpoint.respond(&action, Response::Error("late".into()));
        drain(&mut rx, &mut ctx);

        assert_eq!(ctx.seen.len(), 2);
        assert!(matches!(ctx.seen[0].1, Response::MessageInfo { .. }));
        assert_eq!(ctx.seen[1].1, Response::Done);
        assert_eq!(ctx.worker.pending_callbacks(), 0);
    }

    #[test]
    fn test_responses_routed_per_action() {
        let (worker, mut rx, mut endpoint) = channel::<Recorder>(Capabilities::default());
        let mut ctx = Recorder {
            worker,
            seen: Vec::new(),
        };

        let first = ctx.worker.post_action(Action::Connect, Some(recording()));
        let second = ctx.worker.post_action(Action::ListDirectories, Some(recording()));
        let a1 = endpoint.try_next_action().unwrap();
        let a2 = endpoint.try_next_action().unwrap();

        // Completion order across actions is up to the backend
        endpoint.respond(&a2, Response::Unsupported);
        endpoint.respond(&a1, Response::Done);
        drain(&mut rx, &mut ctx);

        assert_eq!(ctx.seen, vec![(second, Response::Unsupported), (first, Response::Done)]);
    }

    #[test]
    fn test_post_to_closed_backend_fails_through_callback() {
        let (worker, mut rx, endpoint) = channel::<Recorder>(Capabilities::default());
        drop(endpoint);
        let mut ctx = Recorder {
            worker,
            seen: Vec::new(),
        };

        let id = ctx.worker.post_action(Action::DeleteMessages { uids: vec![4] }, Some(recording()));
        drain(&mut rx, &mut ctx);

        assert_eq!(ctx.seen.len(), 1);
        assert_eq!(ctx.seen[0].0, id);
        assert!(matches!(ctx.seen[0].1, Response::Error(_)));
    }

    #[test]
    fn test_unsolicited_reply_has_no_callback() {
        let (worker, mut rx, endpoint) = channel::<Recorder>(Capabilities::default());
        let mut ctx = Recorder {
            worker,
            seen: Vec::new(),
        };
        endpoint.post_unsolicited(ActionKind::Disconnect, Response::Done);

        let message = rx.try_recv().unwrap();
        assert!(message.responds_to(ActionKind::Disconnect));
        assert_eq!(message.action_id(), Some(MessageId::UNSOLICITED));
        Worker::process_message(&mut ctx, &message);
        assert!(ctx.seen.is_empty());
    }
}
