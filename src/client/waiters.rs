use crate::wire::MessageId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Client-side table of messages awaiting a `SERVER_ACK`. The sender task
/// arms a waiter before transmitting and blocks on it (with a timeout); the
/// receiver task completes it when the ack arrives. One waiter stays armed
/// across every retry of the same message id.
#[derive(Clone, Default)]
pub(crate) struct AckTable {
    pending: Arc<Mutex<HashMap<MessageId, oneshot::Sender<()>>>>,
}

impl AckTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn arm(&self, id: MessageId) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);

        rx
    }

    /// Complete the waiter for `id`. Returns false when no waiter is armed
    /// (already acked, or given up on); duplicate acks land here.
    pub(crate) fn complete(&self, id: &MessageId) -> bool {
        match self.lock().remove(id) {
            Some(waiter) => waiter.send(()).is_ok(),
            None => false,
        }
    }

    pub(crate) fn disarm(&self, id: &MessageId) {
        self.lock().remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, oneshot::Sender<()>>> {
        self.pending.lock().expect("AckTable mutex poisoned")
    }
}

/// Reply to a synchronous client request (registration or leader probe).
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum ControlReply {
    Leader,
    NotLeader,
    Accepted(String),
    Rejected(String),
}

/// Whoever is blocked on a control request parks one of these; the receiver
/// task completes it with the reply from the expected server.
#[derive(Debug)]
pub(crate) struct ControlWaiter {
    pub(crate) from: SocketAddr,
    pub(crate) reply: oneshot::Sender<ControlReply>,
}
