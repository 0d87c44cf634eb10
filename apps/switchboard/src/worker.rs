use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use switchboard_proto::{encode, Envelope, Identity};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::dispatcher::RouteId;

/// Outbound half of a connection, shared by every worker bound to it.
pub type SharedSink<S> = Arc<Mutex<S>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Every sender for the queue is gone and the queue is drained.
    QueueClosed,
    /// The owning session asked the worker to stop.
    Stopped,
    /// Writing to the connection failed.
    WriteFailed,
    /// The worker task panicked or was cancelled.
    Aborted,
}

/// Handle to a running delivery worker.
pub struct WorkerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<WorkerExit>,
    finished: Option<WorkerExit>,
}

impl WorkerHandle {
    /// Ask the worker to stop. Envelopes still queued are abandoned.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Wait for the worker to exit. Safe to call again after it returned.
    pub async fn exited(&mut self) -> WorkerExit {
        if let Some(exit) = self.finished {
            return exit;
        }
        let exit = match (&mut self.task).await {
            Ok(exit) => exit,
            Err(_) => WorkerExit::Aborted,
        };
        self.finished = Some(exit);
        exit
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some() || self.task.is_finished()
    }
}

/// Spawn a worker draining `queue` onto `outbound` as JSON text frames.
pub fn spawn<S>(
    identity: Identity,
    route: RouteId,
    queue: mpsc::Receiver<Envelope>,
    outbound: SharedSink<S>,
) -> WorkerHandle
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(deliver(identity, route, queue, outbound, stop_rx));
    WorkerHandle {
        stop: Some(stop_tx),
        task,
        finished: None,
    }
}

async fn deliver<S>(
    identity: Identity,
    route: RouteId,
    mut queue: mpsc::Receiver<Envelope>,
    outbound: SharedSink<S>,
    mut stop: oneshot::Receiver<()>,
) -> WorkerExit
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let exit = loop {
        let envelope = tokio::select! {
            biased;
            _ = &mut stop => break WorkerExit::Stopped,
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break WorkerExit::QueueClosed,
            },
        };

        let text = match encode(&envelope) {
            Ok(text) => text,
            Err(err) => {
                warn!(identity = %identity, error = %err, "failed to encode envelope; skipping");
                continue;
            }
        };

        let mut sink = outbound.lock().await;
        if let Err(err) = sink.send(Message::Text(text)).await {
            warn!(identity = %identity, %route, error = %err, "write error");
            break WorkerExit::WriteFailed;
        }
    };
    debug!(identity = %identity, %route, ?exit, "delivery worker finished");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;
    use switchboard_proto::decode;

    fn route() -> RouteId {
        RouteId::from_raw(7)
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn writes_envelopes_as_text_frames_in_order() {
        let (sink, mut frames) = fmpsc::channel::<Message>(16);
        let (tx, rx) = mpsc::channel(8);
        let mut handle = spawn(Identity::from("1002"), route(), rx, Arc::new(Mutex::new(sink)));

        let offer = Envelope::sdp("1001", "1002", "offer");
        let candidate = Envelope::candidate("1001", "1002", "candidate:1");
        tx.send(offer.clone()).await.expect("queue offer");
        tx.send(candidate.clone()).await.expect("queue candidate");

        for expected in [offer, candidate] {
            match frames.next().await {
                Some(Message::Text(text)) => assert_eq!(decode(&text).expect("decode"), expected),
                other => panic!("unexpected frame: {other:?}"),
            }
        }

        drop(tx);
        assert_eq!(handle.exited().await, WorkerExit::QueueClosed);
        assert_eq!(handle.exited().await, WorkerExit::QueueClosed);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn stops_on_request() {
        let (sink, _frames) = fmpsc::channel::<Message>(16);
        let (_tx, rx) = mpsc::channel(8);
        let mut handle = spawn(Identity::from("1002"), route(), rx, Arc::new(Mutex::new(sink)));
        handle.stop();
        assert_eq!(handle.exited().await, WorkerExit::Stopped);
        assert!(handle.is_finished());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn exits_when_the_connection_rejects_writes() {
        let (sink, frames) = fmpsc::channel::<Message>(16);
        drop(frames);
        let (tx, rx) = mpsc::channel(8);
        let mut handle = spawn(Identity::from("1002"), route(), rx, Arc::new(Mutex::new(sink)));
        tx.send(Envelope::sdp("1001", "1002", "offer"))
            .await
            .expect("queue offer");
        assert_eq!(handle.exited().await, WorkerExit::WriteFailed);
    }
}
