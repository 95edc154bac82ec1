//! IMAP IDLE supervision
//!
//! Idle mode is entered only when the connection has a selected mailbox and
//! no action is running, after a short debounce. Leaving idle waits a bounded
//! time; if the connection does not come back, the owning worker is told it
//! disconnected and idle restarts by itself once the connection unblocks.

use crate::config::IdleConfig;
use crate::error::{ImapError, ImapResult};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tidemail_worker::{ActionKind, Response, WorkerInteractor};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A connection that supports IMAP IDLE
#[async_trait]
pub trait IdleClient: Send + Sync + 'static {
    /// Whether a mailbox is selected and the connection is usable
    fn is_selected(&self) -> bool;

    /// Stay in idle mode until `stop` fires or the server ends it
    async fn idle(&self, stop: oneshot::Receiver<()>) -> ImapResult<()>;
}

/// Observable state of an [`Idler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    /// No usable connection
    NotReady,
    /// Usable and not idling
    Ready,
    /// Blocked inside the idle command
    Idling,
    /// Exit was requested but the connection has not returned
    Waiting,
}

struct Flags<C> {
    client: Option<Arc<C>>,
    idling: bool,
    waiting: bool,
    /// Stop signal and outcome of the running attempt
    stop: Option<oneshot::Sender<()>>,
    done: Option<oneshot::Receiver<ImapResult<()>>>,
}

struct Inner<C> {
    config: IdleConfig,
    worker: Arc<dyn WorkerInteractor>,
    flags: Mutex<Flags<C>>,
}

impl<C> Inner<C> {
    fn lock(&self) -> MutexGuard<'_, Flags<C>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log(&self, msg: &str) {
        let flags = self.lock();
        debug!(idling = flags.idling, waiting = flags.waiting, "idler: {}", msg);
    }
}

/// Enters and leaves IDLE around the actions of one connection.
///
/// Clones share the same state.
pub struct Idler<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Idler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: IdleClient> Idler<C> {
    /// Create an idler reporting connection changes to `worker`
    pub fn new(config: IdleConfig, worker: Arc<dyn WorkerInteractor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                worker,
                flags: Mutex::new(Flags {
                    client: None,
                    idling: false,
                    waiting: false,
                    stop: None,
                    done: None,
                }),
            }),
        }
    }

    /// Replace the connection, or drop it with `None`
    pub fn set_client(&self, client: Option<Arc<C>>) {
        self.inner.lock().client = client;
    }

    pub fn state(&self) -> IdleState {
        let flags = self.inner.lock();
        if flags.waiting {
            IdleState::Waiting
        } else if flags.idling {
            IdleState::Idling
        } else if flags.client.as_ref().is_some_and(|c| c.is_selected()) {
            IdleState::Ready
        } else {
            IdleState::NotReady
        }
    }

    /// Schedule idle mode after the debounce period.
    ///
    /// Does nothing unless the idler is ready and no attempt is running.
    pub fn start(&self) {
        let mut flags = self.inner.lock();
        if flags.waiting {
            drop(flags);
            self.inner.log("not started: wait for idle to exit");
            return;
        }
        let client = flags.client.as_ref().filter(|c| c.is_selected()).cloned();
        let Some(client) = client else {
            drop(flags);
            self.inner.log("not started: client not ready");
            return;
        };
        if flags.stop.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        flags.stop = Some(stop_tx);
        flags.done = Some(done_rx);
        drop(flags);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let debounced = tokio::select! {
                _ = &mut stop_rx => true,
                _ = tokio::time::sleep(inner.config.idle_debounce()) => false,
            };
            if debounced {
                let _ = done_tx.send(Ok(()));
                return;
            }

            inner.lock().idling = true;
            inner.log("=>(idle)");
            let started = Instant::now();
            let result = client.idle(stop_rx).await;
            inner.lock().idling = false;
            inner.log(&format!("elapsed idle time: {:?}", started.elapsed()));
            let _ = done_tx.send(result);
        });
    }

    /// Leave idle mode before running an action.
    ///
    /// Fails with [`ImapError::IdleTimeout`] when idle does not exit in time,
    /// after reporting a disconnect, and with [`ImapError::IdleModeHangs`]
    /// while such a stuck idle is still pending.
    pub async fn stop(&self) -> ImapResult<()> {
        let (stop, done) = {
            let mut flags = self.inner.lock();
            if flags.waiting {
                return Err(ImapError::IdleModeHangs);
            }
            (flags.stop.take(), flags.done.take())
        };
        let (Some(stop), Some(mut done)) = (stop, done) else {
            return Ok(());
        };
        let _ = stop.send(());

        match tokio::time::timeout(self.inner.config.idle_timeout(), &mut done).await {
            Ok(Ok(Err(e))) => {
                self.inner.log(&format!("<=(idle) with err: {}", e));
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(_) => {
                warn!("Idle did not exit within {:?}", self.inner.config.idle_timeout());
                self.inner
                    .worker
                    .post_unsolicited(ActionKind::Disconnect, Response::Done);
                self.wait_on_idle(done);
                Err(ImapError::IdleTimeout)
            }
        }
    }

    /// Wait in the background for a stuck idle, then report the connection
    /// back and idle again
    fn wait_on_idle(&self, done: oneshot::Receiver<ImapResult<()>>) {
        self.inner.lock().waiting = true;
        let idler = self.clone();
        tokio::spawn(async move {
            match done.await {
                Ok(Ok(())) => idler
                    .inner
                    .worker
                    .post_unsolicited(ActionKind::Connect, Response::Done),
                Ok(Err(e)) => idler.inner.log(&format!("<=(idle) waited; with err: {}", e)),
                Err(_) => idler.inner.log("<=(idle) waited; attempt vanished"),
            }
            idler.inner.lock().waiting = false;
            idler.start();
        });
    }
}
