//! Backend wrapper that keeps idle mode out of the way of actions

use crate::idler::{IdleClient, Idler};
use async_trait::async_trait;
use tidemail_worker::{Action, Backend, Capabilities, Message, MessagePoster, WorkerError, WorkerResult};
use tracing::warn;

/// Leaves idle before each action and re-enters it afterwards.
///
/// When idle cannot be left the connection is dropped from the idler and the
/// action fails with the idle error; the wrapped backend reconnects by
/// handing a new client to [`Idler::set_client`].
pub struct IdleGuard<B, C> {
    backend: B,
    idler: Idler<C>,
}

impl<B: Backend, C: IdleClient> IdleGuard<B, C> {
    pub fn new(backend: B, idler: Idler<C>) -> Self {
        Self { backend, idler }
    }

    pub fn idler(&self) -> &Idler<C> {
        &self.idler
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: Backend, C: IdleClient> Backend for IdleGuard<B, C> {
    fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    async fn handle(&mut self, action: &Message<Action>, poster: &MessagePoster) -> WorkerResult<()> {
        if let Err(e) = self.idler.stop().await {
            warn!(action = ?action.kind(), "Dropping connection: {}", e);
            self.idler.set_client(None);
            return Err(WorkerError::from(e));
        }
        let result = self.backend.handle(action, poster).await;
        self.idler.start();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdleConfig, IdleState, ImapResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tidemail_worker::{channel, MessageId, Response, WorkerInteractor};
    use tokio::sync::oneshot;

    struct Connection {
        idles: AtomicUsize,
    }

    #[async_trait]
    impl IdleClient for Connection {
        fn is_selected(&self) -> bool {
            true
        }

        async fn idle(&self, stop: oneshot::Receiver<()>) -> ImapResult<()> {
            self.idles.fetch_add(1, Ordering::SeqCst);
            let _ = stop.await;
            Ok(())
        }
    }

    /// Counts the actions it runs and checks idle is off meanwhile
    struct Counter {
        idler: Idler<Connection>,
        handled: usize,
    }

    #[async_trait]
    impl Backend for Counter {
        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        async fn handle(&mut self, action: &Message<Action>, poster: &MessagePoster) -> WorkerResult<()> {
            assert_ne!(self.idler.state(), IdleState::Idling);
            self.handled += 1;
            poster.respond(action, Response::LabelList { labels: Vec::new() });
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_run_outside_idle() {
        let (_worker, mut rx, endpoint) = channel::<()>(Capabilities::default());
        let poster = endpoint.poster();
        let idler: Idler<Connection> = Idler::new(IdleConfig::default(), Arc::new(poster.clone()));
        let connection = Arc::new(Connection {
            idles: AtomicUsize::new(0),
        });
        idler.set_client(Some(connection.clone()));

        let mut guard = IdleGuard::new(
            Counter {
                idler: idler.clone(),
                handled: 0,
            },
            idler.clone(),
        );
        idler.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(idler.state(), IdleState::Idling);

        let action = Message {
            id: MessageId(1),
            in_response_to: None,
            body: Action::ListDirectories,
        };
        guard.handle(&action, &poster).await.unwrap();
        assert_eq!(guard.backend().handled, 1);
        assert_eq!(rx.try_recv().unwrap().body, Response::LabelList { labels: Vec::new() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(guard.idler().state(), IdleState::Idling);
        assert_eq!(connection.idles.load(Ordering::SeqCst), 2);
    }
}
