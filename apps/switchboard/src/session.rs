//! Per-connection read loop and registration state machine.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use switchboard_proto::{decode, decode_bytes, CodecError, Envelope, EnvelopeKind, Identity};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, RouteId};
use crate::worker::{self, SharedSink, WorkerExit, WorkerHandle};

/// Why a session's read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Close frame or end of stream.
    PeerClosed,
    /// Transport-level read error.
    ReadFailed,
    /// `sdp`/`candidate` arrived before `register`.
    UnregisteredSender(EnvelopeKind),
    /// Forwarding a delivered envelope to this connection failed.
    WriteFailed,
}

impl SessionEnd {
    pub fn metric_label(&self) -> &'static str {
        match self {
            SessionEnd::PeerClosed => "peer_closed",
            SessionEnd::ReadFailed => "read_failed",
            SessionEnd::UnregisteredSender(_) => "unregistered_sender",
            SessionEnd::WriteFailed => "write_failed",
        }
    }
}

enum SessionState {
    Unregistered,
    Registered(Registration),
}

struct Registration {
    identity: Identity,
    route: RouteId,
    worker: Option<WorkerHandle>,
}

impl Registration {
    fn identity(&self) -> &Identity {
        &self.identity
    }
}

enum Flow {
    Continue,
    End(SessionEnd),
}

enum Event {
    Frame(Option<Message>),
    ReadError(String),
    Worker(WorkerExit),
}

/// One duplex connection to the hub.
pub struct ConnectionSession<S> {
    connection_id: Uuid,
    dispatcher: Dispatcher,
    outbound: SharedSink<S>,
    state: SessionState,
}

impl<S> ConnectionSession<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    pub fn new(connection_id: Uuid, dispatcher: Dispatcher, outbound: S) -> Self {
        Self {
            connection_id,
            dispatcher,
            outbound: Arc::new(Mutex::new(outbound)),
            state: SessionState::Unregistered,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            SessionState::Registered(registration) => Some(registration.identity()),
            SessionState::Unregistered => None,
        }
    }

    /// Drive the session until the peer goes away or the session becomes fatal,
    /// then release the registration and close the outbound half.
    pub async fn run<St, E>(mut self, mut inbound: St) -> SessionEnd
    where
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let end = loop {
            let event = {
                let worker = self.active_worker();
                tokio::select! {
                    frame = inbound.next() => match frame {
                        Some(Ok(message)) => Event::Frame(Some(message)),
                        Some(Err(err)) => Event::ReadError(err.to_string()),
                        None => Event::Frame(None),
                    },
                    exit = wait_for(worker) => Event::Worker(exit),
                }
            };

            let flow = match event {
                Event::Frame(Some(message)) => self.handle_frame(message).await,
                Event::Frame(None) => Flow::End(SessionEnd::PeerClosed),
                Event::ReadError(err) => {
                    warn!(connection_id = %self.connection_id, error = %err, "read error");
                    Flow::End(SessionEnd::ReadFailed)
                }
                Event::Worker(exit) => self.on_worker_exit(exit),
            };

            if let Flow::End(end) = flow {
                break end;
            }
        };

        self.shutdown(end).await;
        end
    }

    async fn handle_frame(&mut self, message: Message) -> Flow {
        let decoded = match message {
            Message::Text(text) => decode(&text),
            Message::Binary(bytes) => decode_bytes(&bytes),
            Message::Close(frame) => {
                debug!(
                    connection_id = %self.connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "peer closed websocket"
                );
                return Flow::End(SessionEnd::PeerClosed);
            }
            Message::Ping(_) | Message::Pong(_) => return Flow::Continue,
        };

        match decoded {
            Ok(envelope) => self.handle_envelope(envelope).await,
            Err(err) => {
                self.skip_malformed(err);
                Flow::Continue
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) -> Flow {
        match envelope.kind() {
            EnvelopeKind::Register => {
                self.register(envelope.caller().clone());
                Flow::Continue
            }
            EnvelopeKind::Sdp | EnvelopeKind::Candidate => self.forward(envelope).await,
        }
    }

    fn skip_malformed(&self, err: CodecError) {
        warn!(
            connection_id = %self.connection_id,
            identity = ?self.identity().map(Identity::as_str),
            error = %err,
            "error parsing message; skipping frame"
        );
        counter!("switchboard_frames_malformed_total", 1);
    }

    /// Bind `identity` to this connection. A connection carries at most one
    /// registration; re-registering releases the previous one first.
    fn register(&mut self, identity: Identity) {
        self.release();

        let (queue_tx, queue_rx) = self.dispatcher.open_queue();
        let route = self.dispatcher.register(identity.clone(), queue_tx);
        let worker = worker::spawn(identity.clone(), route, queue_rx, self.outbound.clone());
        info!(
            connection_id = %self.connection_id,
            identity = %identity,
            %route,
            "registered {} with the dispatcher", identity
        );
        counter!("switchboard_registrations_total", 1);
        self.state = SessionState::Registered(Registration {
            identity,
            route,
            worker: Some(worker),
        });
    }

    async fn forward(&mut self, envelope: Envelope) -> Flow {
        let SessionState::Registered(registration) = &self.state else {
            warn!(
                connection_id = %self.connection_id,
                kind = %envelope.kind(),
                callee = %envelope.callee(),
                "{} from unregistered connection; closing", envelope.kind()
            );
            return Flow::End(SessionEnd::UnregisteredSender(envelope.kind()));
        };

        let caller = registration.identity.clone();
        let outcome = self.dispatcher.send(envelope.with_caller(&caller)).await;
        debug!(
            connection_id = %self.connection_id,
            caller = %caller,
            callee = %envelope.callee(),
            kind = %envelope.kind(),
            ?outcome,
            "forwarded envelope"
        );
        Flow::Continue
    }

    fn on_worker_exit(&mut self, exit: WorkerExit) -> Flow {
        match exit {
            WorkerExit::WriteFailed | WorkerExit::Aborted => Flow::End(SessionEnd::WriteFailed),
            WorkerExit::QueueClosed | WorkerExit::Stopped => {
                // Identity was taken over by another connection; this session
                // keeps sending under it but receives nothing further.
                if let SessionState::Registered(registration) = &mut self.state {
                    debug!(
                        connection_id = %self.connection_id,
                        identity = %registration.identity,
                        "delivery queue closed; registration superseded"
                    );
                    registration.worker = None;
                }
                Flow::Continue
            }
        }
    }

    fn active_worker(&mut self) -> Option<&mut WorkerHandle> {
        match &mut self.state {
            SessionState::Registered(registration) => registration.worker.as_mut(),
            SessionState::Unregistered => None,
        }
    }

    /// Stop this connection's worker and drop its route if nobody replaced it.
    fn release(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Unregistered);
        if let SessionState::Registered(mut registration) = previous {
            if let Some(worker) = registration.worker.as_mut() {
                worker.stop();
            }
            self.dispatcher
                .unregister_if_current(&registration.identity, registration.route);
        }
    }

    async fn shutdown(mut self, end: SessionEnd) {
        let identity = self.identity().cloned();
        self.release();
        if let Err(err) = self.outbound.lock().await.close().await {
            debug!(connection_id = %self.connection_id, error = %err, "close failed");
        }
        counter!(
            "switchboard_sessions_closed_total",
            1,
            "reason" => end.metric_label()
        );
        debug!(
            connection_id = %self.connection_id,
            identity = ?identity.as_ref().map(Identity::as_str),
            ?end,
            "session ended"
        );
    }
}

async fn wait_for(worker: Option<&mut WorkerHandle>) -> WorkerExit {
    match worker {
        Some(worker) => worker.exited().await,
        None => std::future::pending().await,
    }
}
