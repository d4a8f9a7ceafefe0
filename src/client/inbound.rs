use crate::client::waiters::{AckTable, ControlReply, ControlWaiter};
use crate::sync::{SharedSlot, ShutdownSignal};
use crate::wire::{Frame, FrameError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// A chat line fanned out by the leader, delivered verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChatMessage {
    pub text: String,
    pub from: SocketAddr,
}

/// Stream of inbound chat lines. `next()` returns `None` once the client and
/// its receiver task have shut down.
pub struct MessageStream {
    receiver: mpsc::UnboundedReceiver<ChatMessage>,
}

impl MessageStream {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<ChatMessage>) -> Self {
        MessageStream { receiver }
    }

    pub async fn next(&mut self) -> Option<ChatMessage> {
        self.receiver.recv().await
    }
}

/// The client's receiver task: drains the socket and routes each datagram to
/// whoever is waiting on it: the ack table, the parked control waiter, or
/// the chat message stream.
pub(crate) async fn run_receive_loop(
    logger: slog::Logger,
    socket: Arc<UdpSocket>,
    acks: AckTable,
    control: SharedSlot<ControlWaiter>,
    inbound: mpsc::UnboundedSender<ChatMessage>,
    mut shutdown: ShutdownSignal,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let received = tokio::select! {
            _ = &mut shutdown => {
                slog::debug!(logger, "Client receiver stopping");
                return;
            }
            received = socket.recv_from(&mut buf) => received,
        };

        match received {
            Ok((len, from)) => dispatch_inbound(&logger, &buf[..len], from, &acks, &control, &inbound),
            Err(e) => slog::warn!(logger, "Receive error: {}", e),
        }
    }
}

fn dispatch_inbound(
    logger: &slog::Logger,
    datagram: &[u8],
    from: SocketAddr,
    acks: &AckTable,
    control: &SharedSlot<ControlWaiter>,
    inbound: &mpsc::UnboundedSender<ChatMessage>,
) {
    match Frame::parse(datagram) {
        Ok(Frame::ServerAck(id)) => {
            if !acks.complete(&id) {
                slog::debug!(logger, "Ack for already-settled message {}", id);
            }
        }
        Ok(Frame::Accepted(name)) => deliver_control(logger, control, from, ControlReply::Accepted(name)),
        Ok(Frame::Rejected(name)) => deliver_control(logger, control, from, ControlReply::Rejected(name)),
        Ok(Frame::Leader) => deliver_control(logger, control, from, ControlReply::Leader),
        Ok(Frame::NotLeader) => deliver_control(logger, control, from, ControlReply::NotLeader),
        Ok(other) => {
            slog::debug!(logger, "Ignoring server-bound frame {:?} from {}", other, from);
        }
        Err(FrameError::NotUtf8) => {
            slog::debug!(logger, "Dropping non-text datagram from {}", from);
        }
        Err(_) => {
            // Not a protocol frame: a fanned-out chat line. Surface verbatim.
            let text = String::from_utf8_lossy(datagram).into_owned();
            let _ = inbound.send(ChatMessage { text, from });
        }
    }
}

fn deliver_control(logger: &slog::Logger, control: &SharedSlot<ControlWaiter>, from: SocketAddr, reply: ControlReply) {
    match control.take() {
        Some(waiter) if waiter.from == from => {
            let _ = waiter.reply.send(reply);
        }
        Some(waiter) => {
            slog::debug!(
                logger,
                "Control reply {:?} from {} while waiting on {}; ignoring",
                reply,
                from,
                waiter.from
            );
            control.put(waiter);
        }
        None => {
            slog::debug!(logger, "Unsolicited control reply {:?} from {}", reply, from);
        }
    }
}
