use crate::actor::WeakActorClient;
use crate::sync::ShutdownSignal;
use crate::wire::Frame;
use std::sync::Arc;
use tokio::net::UdpSocket;

const MAX_DATAGRAM: usize = 2048;

/// Reads datagrams off one socket, parses them, and feeds them to the server
/// actor. Used for both the chat socket and the discovery socket; the router
/// dispatches by frame type, not by which socket a frame arrived on.
///
/// Each datagram is handed off without waiting for its handling to finish, so
/// a slow side effect never blocks the listener.
pub(crate) struct FrameListener {
    logger: slog::Logger,
    socket: Arc<UdpSocket>,
    actor: WeakActorClient,
}

impl FrameListener {
    pub(crate) fn new(logger: slog::Logger, socket: Arc<UdpSocket>, actor: WeakActorClient) -> Self {
        FrameListener { logger, socket, actor }
    }

    pub(crate) async fn run(self, mut shutdown: ShutdownSignal) {
        let local = self.socket.local_addr().ok();
        slog::info!(self.logger, "Listening on {:?}", local);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = &mut shutdown => {
                    slog::info!(self.logger, "Listener on {:?} stopping", local);
                    return;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            let (len, from) = match received {
                Ok(pair) => pair,
                Err(e) => {
                    // Transient; keep serving.
                    slog::warn!(self.logger, "Receive error: {}", e);
                    continue;
                }
            };

            match Frame::parse(&buf[..len]) {
                Ok(frame) => {
                    if !self.actor.inbound(frame, from).await {
                        slog::info!(self.logger, "Server actor is gone; listener exiting");
                        return;
                    }
                }
                Err(e) => {
                    slog::warn!(self.logger, "Dropping malformed datagram from {}: {}", from, e);
                }
            }
        }
    }
}
