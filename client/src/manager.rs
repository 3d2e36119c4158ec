//! The reconnection manager: owner of the single logical connection.
//!
//! One tokio task drives an explicit state machine
//! (`Idle → Connecting → Open → Reconnecting → Idle`) with a single mutation
//! point, so the "at most one transport or timer outstanding" invariant is
//! enforced by construction rather than by scattered flags. Identity arrives
//! on a watch channel: it becoming `None` (logout) is the only cancellation
//! trigger, and it is handled in every state.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use url::Url;

use gather_wire::{ClientFrame, NORMAL_CLOSURE};

use crate::backoff::{reconnect_delay, MAX_RECONNECT_ATTEMPTS};
use crate::cache::{CacheRouter, QueryCache};
use crate::transport::{Connector, Transport, TransportEvent};

/// Externally observable connection state. Consumers read it from the
/// handle's watch channel; only the manager task writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
}

/// Internal phase. `Dormant` is observable as `Idle` (disconnected); the
/// distinction only changes what wakes the manager. Dormant sessions
/// (reconnection budget exhausted, or a deliberate normal closure from the
/// server) wait for an identity transition instead of reconnecting on
/// their own.
enum Phase<T> {
    Idle,
    Dormant,
    Connecting,
    Open(T),
    Reconnecting(Duration),
}

impl<T> Phase<T> {
    fn observable(&self) -> ConnectionState {
        match self {
            Phase::Idle | Phase::Dormant => ConnectionState::Idle,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Open(_) => ConnectionState::Open,
            Phase::Reconnecting(_) => ConnectionState::Reconnecting,
        }
    }
}

/// Handle to the manager task. Dropping it does not stop the task; call
/// [`ClientHandle::abort`] or close the identity channel for teardown.
pub struct ClientHandle {
    cmd_tx: mpsc::UnboundedSender<ClientFrame>,
    state_rx: watch::Receiver<ConnectionState>,
    task: tokio::task::JoinHandle<()>,
}

impl ClientHandle {
    /// Fire-and-forget send. A no-op with a warning unless the connection is
    /// open right now: nothing is queued, nothing throws, at most once from
    /// this side too.
    pub fn send(&self, frame: ClientFrame) {
        if *self.state_rx.borrow() != ConnectionState::Open {
            tracing::warn!("Dropping outbound frame: connection not open");
            return;
        }
        let _ = self.cmd_tx.send(frame);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A watch receiver for consumers that want to react to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Hard-stop the manager task. Prefer logging out (identity → None) for
    /// a graceful close; this exists for process teardown.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawn the manager task. It connects whenever `identity` holds a user and
/// tears down when it doesn't; inbound frames flow into `router`.
pub fn spawn<C, Q>(
    connector: C,
    url: Url,
    identity: watch::Receiver<Option<String>>,
    router: CacheRouter<Q>,
) -> ClientHandle
where
    C: Connector,
    Q: QueryCache + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

    let task = tokio::spawn(run(
        connector, url, identity, router, cmd_rx, state_tx,
    ));

    ClientHandle {
        cmd_tx,
        state_rx,
        task,
    }
}

/// What woke the manager while a transport was open.
enum OpenEvent {
    Transport(TransportEvent),
    Cmd(Option<ClientFrame>),
    Logout,
}

async fn run<C, Q>(
    mut connector: C,
    url: Url,
    mut identity: watch::Receiver<Option<String>>,
    router: CacheRouter<Q>,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientFrame>,
    state_tx: watch::Sender<ConnectionState>,
) where
    C: Connector,
    Q: QueryCache + 'static,
{
    let mut phase: Phase<C::Transport> = Phase::Idle;
    let mut attempt: u32 = 0;

    loop {
        let _ = state_tx.send(phase.observable());

        phase = match phase {
            Phase::Idle => {
                if identity.borrow_and_update().is_some() {
                    attempt = 0;
                    Phase::Connecting
                } else if identity.changed().await.is_err() {
                    // Identity source dropped: the owning context unmounted.
                    tracing::debug!("Identity channel closed, manager stopping");
                    return;
                } else {
                    Phase::Idle
                }
            }

            Phase::Dormant => {
                // Only an identity transition (re-login, page reload) gets
                // us out of here; re-evaluate it through Idle.
                if identity.changed().await.is_err() {
                    return;
                }
                Phase::Idle
            }

            Phase::Connecting => {
                if identity.borrow().is_none() {
                    // Logged out between scheduling and connecting
                    Phase::Idle
                } else {
                    tokio::select! {
                        result = connector.connect(&url) => match result {
                            Ok(transport) => {
                                tracing::info!("Connection open");
                                attempt = 0;
                                Phase::Open(transport)
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Connect failed");
                                failure_phase(&mut attempt)
                            }
                        },
                        _ = wait_logout(&mut identity) => Phase::Idle,
                    }
                }
            }

            Phase::Open(mut transport) => {
                let event = tokio::select! {
                    event = transport.next_event() => OpenEvent::Transport(event),
                    cmd = cmd_rx.recv() => OpenEvent::Cmd(cmd),
                    _ = wait_logout(&mut identity) => OpenEvent::Logout,
                };

                match event {
                    OpenEvent::Transport(TransportEvent::Frame(text)) => {
                        // Synchronous dispatch into the cache router
                        router.handle_frame(&text);
                        Phase::Open(transport)
                    }
                    OpenEvent::Transport(TransportEvent::Closed { code }) => {
                        router.reset_authenticated();
                        if code == NORMAL_CLOSURE {
                            // Deliberate closure (logout or server shutdown):
                            // reconnection is suppressed until identity moves.
                            tracing::info!("Connection closed normally");
                            Phase::Dormant
                        } else {
                            tracing::warn!(code = code, "Connection lost");
                            failure_phase(&mut attempt)
                        }
                    }
                    OpenEvent::Cmd(Some(frame)) => {
                        match serde_json::to_string(&frame) {
                            Ok(text) => {
                                if let Err(e) = transport.send(text).await {
                                    // The read side will surface the close;
                                    // the frame itself is simply lost.
                                    tracing::warn!(error = %e, "Send failed");
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "Frame serialization failed"),
                        }
                        Phase::Open(transport)
                    }
                    OpenEvent::Cmd(None) => {
                        // Every handle is gone; close out and stop.
                        transport.close(NORMAL_CLOSURE).await;
                        router.reset_authenticated();
                        let _ = state_tx.send(ConnectionState::Idle);
                        return;
                    }
                    OpenEvent::Logout => {
                        transport.close(NORMAL_CLOSURE).await;
                        router.reset_authenticated();
                        tracing::info!("Logged out, connection closed");
                        Phase::Idle
                    }
                }
            }

            Phase::Reconnecting(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Phase::Connecting,
                    _ = wait_logout(&mut identity) => Phase::Idle,
                }
            }
        };
    }
}

/// Next phase after a failed connection or an abnormal close: schedule a
/// backoff retry, or give up once the budget is spent.
fn failure_phase<T>(attempt: &mut u32) -> Phase<T> {
    if *attempt >= MAX_RECONNECT_ATTEMPTS {
        tracing::warn!(
            attempts = *attempt,
            "Reconnection attempts exhausted, staying disconnected"
        );
        return Phase::Dormant;
    }
    let delay = reconnect_delay(*attempt);
    *attempt += 1;
    tracing::info!(
        attempt = *attempt,
        delay_ms = delay.as_millis() as u64,
        "Scheduling reconnect"
    );
    Phase::Reconnecting(delay)
}

/// Completes when identity becomes `None` (or the identity source goes
/// away); pends for as long as a user is logged in.
async fn wait_logout(identity: &mut watch::Receiver<Option<String>>) {
    let _ = identity.wait_for(|id| id.is_none()).await;
}
