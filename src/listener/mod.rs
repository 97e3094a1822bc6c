//! Change listener: subscribes to order inserts and dispatches each new order.
//!
//! The [`ListenerSupervisor`] owns a [`ListenerMachine`] and performs the side
//! effects of its transitions. Every subscription runs in its own task under a
//! session [`CancellationToken`]; a failed subscription is retried with
//! exponential backoff from a separate timer task with its own token.

mod state;

pub use state::{BackoffPolicy, ListenerEvent, ListenerMachine, ListenerState, Transition};

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::order::Order;
use crate::store::ChangeFeed;

/// Receives orders from the listener.
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Starts handling `order` without waiting for it to finish.
    fn dispatch(self: Arc<Self>, order: Order);

    /// Called once after the listener has been stopped. Work that was already
    /// dispatched must not outlive it.
    async fn halt(&self) {}

    /// Called when the listener starts, undoing a previous [`halt`](Self::halt).
    fn resume(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    pub running: bool,
    pub state: ListenerState,
    pub retry_count: u32,
}

struct Inner {
    machine: ListenerMachine,
    session: Option<CancellationToken>,
    reconnect: Option<CancellationToken>,
}

pub struct ListenerSupervisor {
    feed: Arc<dyn ChangeFeed>,
    dispatcher: Arc<dyn Dispatch>,
    inner: Mutex<Inner>,
}

impl ListenerSupervisor {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        dispatcher: Arc<dyn Dispatch>,
        policy: BackoffPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            feed,
            dispatcher,
            inner: Mutex::new(Inner {
                machine: ListenerMachine::new(policy),
                session: None,
                reconnect: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> ListenerStatus {
        let inner = self.lock();
        let state = inner.machine.state();
        ListenerStatus {
            running: state == ListenerState::Running,
            state,
            retry_count: inner.machine.retry_count(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().running
    }

    /// Opens a subscription. Returns `false` when already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut inner = self.lock();
        match inner.machine.next(ListenerEvent::StartRequested) {
            Transition::Open => {
                if let Some(timer) = inner.reconnect.take() {
                    timer.cancel();
                }
                self.dispatcher.resume();
                self.open_session(&mut inner);
                info!("Change listener started");
                true
            }
            _ => {
                debug!(state = %inner.machine.state(), "Change listener already running");
                false
            }
        }
    }

    /// Closes the subscription, drops any scheduled reconnect and halts the
    /// dispatcher. Returns `false` when already stopped.
    pub async fn stop(&self) -> bool {
        {
            let mut inner = self.lock();
            if inner.machine.next(ListenerEvent::StopRequested) != Transition::Close {
                debug!("Change listener already stopped");
                return false;
            }
            if let Some(session) = inner.session.take() {
                session.cancel();
            }
            if let Some(timer) = inner.reconnect.take() {
                timer.cancel();
            }
        }

        info!("Change listener stopped");
        self.dispatcher.halt().await;
        true
    }

    /// Stops the listener and halts the dispatcher even when the listener
    /// had already stopped on its own, e.g. after giving up on reconnects.
    pub async fn shutdown(&self) {
        if !self.stop().await {
            self.dispatcher.halt().await;
        }
    }

    fn open_session(self: &Arc<Self>, inner: &mut Inner) {
        if let Some(previous) = inner.session.take() {
            previous.cancel();
        }
        let session = CancellationToken::new();
        inner.session = Some(session.clone());
        tokio::spawn(Arc::clone(self).run_session(session));
    }

    async fn run_session(self: Arc<Self>, session: CancellationToken) {
        let subscribed = tokio::select! {
            biased;
            _ = session.cancelled() => return,
            result = self.feed.subscribe() => result,
        };
        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(e) => {
                self.on_failure(&session, e.to_string());
                return;
            }
        };
        info!("Subscribed to order inserts");

        loop {
            let item = tokio::select! {
                biased;
                _ = session.cancelled() => return,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(order)) => {
                    self.lock().machine.next(ListenerEvent::EventReceived);
                    info!(order_id = %order.id, "New order received");
                    Arc::clone(&self.dispatcher).dispatch(order);
                }
                Some(Err(e)) => {
                    self.on_failure(&session, e.to_string());
                    return;
                }
                None => {
                    self.on_failure(&session, "change stream ended".to_string());
                    return;
                }
            }
        }
    }

    fn on_failure(self: &Arc<Self>, session: &CancellationToken, reason: String) {
        let mut inner = self.lock();
        // Stopped or replaced while the failure was in flight.
        if session.is_cancelled() {
            return;
        }
        session.cancel();
        inner.session = None;

        let err = PipelineError::Listener(reason);
        match inner.machine.next(ListenerEvent::SubscriptionFailed) {
            Transition::Reconnect { attempt, delay } => {
                warn!(
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Change stream failed, scheduling reconnect"
                );
                let timer = CancellationToken::new();
                inner.reconnect = Some(timer.clone());
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        _ = timer.cancelled() => {}
                        _ = tokio::time::sleep(delay) => this.reconnect(&timer),
                    }
                });
            }
            Transition::GiveUp => {
                error!(
                    error = %err,
                    retries = inner.machine.retry_count(),
                    "Change stream failed and retries are exhausted, listener stopped"
                );
            }
            _ => {}
        }
    }

    fn reconnect(self: &Arc<Self>, timer: &CancellationToken) {
        let mut inner = self.lock();
        if timer.is_cancelled() {
            return;
        }
        inner.reconnect = None;
        if inner.machine.next(ListenerEvent::ReconnectDue) == Transition::Open {
            info!(attempt = inner.machine.retry_count(), "Reconnecting change stream");
            self.open_session(&mut inner);
        }
    }
}
