use crate::api::ChatOptionsValidated;
use crate::client::waiters::{AckTable, ControlReply, ControlWaiter};
use crate::clock::LamportClock;
use crate::sync::{SharedSlot, ShutdownGuard};
use crate::transport::Datagram;
use crate::wire::{ChatFrame, Frame, MessageId};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("No server answered the leader probe")]
    NoLeader,
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("Display name {0:?} is already taken")]
    NameTaken(String),
    #[error("No leader could be found to register with")]
    NoLeader,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Client has not registered a display name yet")]
    NotRegistered,
    #[error("No leader could be found")]
    NoLeader,
    #[error("No acknowledgement, even after retrying against a freshly discovered leader")]
    NoAck,
}

/// The client half of the delivery protocol: locates the leader, registers a
/// display name, and sends chat messages with at-least-once delivery (retry
/// until acked, rediscovering the leader on every timeout). Inbound chat
/// lines arrive on the `MessageStream` returned next to this handle.
pub struct ChatClient {
    logger: slog::Logger,
    transport: Arc<dyn Datagram>,
    servers: Vec<SocketAddr>,
    leader: Option<SocketAddr>,
    name: Option<String>,
    clock: LamportClock,
    acks: AckTable,
    control: SharedSlot<ControlWaiter>,
    options: ChatOptionsValidated,
    _receiver_guard: ShutdownGuard,
}

impl ChatClient {
    pub(crate) fn new(
        logger: slog::Logger,
        transport: Arc<dyn Datagram>,
        servers: Vec<SocketAddr>,
        options: ChatOptionsValidated,
        acks: AckTable,
        control: SharedSlot<ControlWaiter>,
        receiver_guard: ShutdownGuard,
    ) -> Self {
        ChatClient {
            logger,
            transport,
            servers,
            leader: None,
            name: None,
            clock: LamportClock::new(),
            acks,
            control,
            options,
            _receiver_guard: receiver_guard,
        }
    }

    /// The leader we currently believe in, if any.
    pub fn known_leader(&self) -> Option<SocketAddr> {
        self.leader
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Ask each known server in turn whether it is the leader and adopt the
    /// first that says yes. Silent or non-leader servers are skipped after
    /// `probe_timeout`.
    pub async fn probe_for_leader(&mut self) -> Result<SocketAddr, ProbeError> {
        self.leader = None;

        let candidates = self.servers.clone();
        for candidate in candidates {
            let (tx, rx) = oneshot::channel();
            self.control.put(ControlWaiter {
                from: candidate,
                reply: tx,
            });

            if let Err(e) = self.transport.send_to(Frame::IsLeader.encode(), candidate).await {
                slog::warn!(self.logger, "Leader probe to {} failed to send: {}", candidate, e);
                continue;
            }

            match tokio::time::timeout(self.options.probe_timeout, rx).await {
                Ok(Ok(ControlReply::Leader)) => {
                    slog::info!(self.logger, "Found leader at {}", candidate);
                    self.leader = Some(candidate);
                    return Ok(candidate);
                }
                Ok(Ok(_)) => { /* not the leader; next candidate */ }
                Ok(Err(_)) => { /* waiter was displaced; next candidate */ }
                Err(_) => {
                    slog::debug!(self.logger, "Leader probe to {} timed out", candidate);
                }
            }
        }

        self.control.take();
        Err(ProbeError::NoLeader)
    }

    /// Claim a display name with the leader. Reacts to `NOT_LEADER` and to
    /// reply timeouts by rediscovering the leader and trying again, up to the
    /// configured attempt limit.
    pub async fn register(&mut self, name: &str) -> Result<(), RegisterError> {
        for _ in 0..self.options.send_attempts {
            let leader = match self.current_or_probed_leader().await {
                Some(leader) => leader,
                None => continue,
            };

            let (tx, rx) = oneshot::channel();
            self.control.put(ControlWaiter { from: leader, reply: tx });

            let frame = Frame::Register(name.to_string());
            if let Err(e) = self.transport.send_to(frame.encode(), leader).await {
                slog::warn!(self.logger, "Registration send to {} failed: {}", leader, e);
                self.leader = None;
                continue;
            }

            match tokio::time::timeout(self.options.register_timeout, rx).await {
                Ok(Ok(ControlReply::Accepted(accepted))) if accepted == name => {
                    slog::info!(self.logger, "Registered as {:?} with leader {}", name, leader);
                    self.name = Some(name.to_string());
                    return Ok(());
                }
                Ok(Ok(ControlReply::Rejected(_))) => {
                    return Err(RegisterError::NameTaken(name.to_string()));
                }
                Ok(Ok(ControlReply::NotLeader)) => {
                    slog::info!(self.logger, "{} is not the leader anymore; rediscovering", leader);
                    self.leader = None;
                }
                Ok(Ok(_)) | Ok(Err(_)) => { /* stray reply; try again */ }
                Err(_) => {
                    slog::warn!(self.logger, "No registration reply from {}; rediscovering", leader);
                    self.leader = None;
                }
            }
        }

        self.control.take();
        Err(RegisterError::NoLeader)
    }

    /// Reliable send: mint a message id, then retry the same frame until the
    /// leader acks it. Each timeout re-runs leader discovery, so the message
    /// survives a leader change mid-session. Returns the message's Lamport
    /// timestamp.
    pub async fn send_message(&mut self, text: &str) -> Result<u64, SendError> {
        let sender = self.name.clone().ok_or(SendError::NotRegistered)?;

        let lamport_time = self.clock.increment();
        let message_id = MessageId::generate();
        let payload = Frame::Chat(ChatFrame {
            message_id: message_id.clone(),
            lamport_time,
            sender,
            text: text.to_string(),
        })
        .encode();

        let mut ack = self.acks.arm(message_id.clone());
        let mut ever_sent = false;

        for attempt in 1..=self.options.send_attempts {
            let leader = match self.current_or_probed_leader().await {
                Some(leader) => leader,
                None => continue,
            };

            if let Err(e) = self.transport.send_to(payload.clone(), leader).await {
                slog::warn!(self.logger, "Send to leader {} failed: {}", leader, e);
                self.leader = None;
                continue;
            }
            ever_sent = true;

            match tokio::time::timeout(self.options.ack_timeout, &mut ack).await {
                Ok(Ok(())) => {
                    slog::debug!(self.logger, "Message {} acked on attempt {}", message_id, attempt);
                    return Ok(lamport_time);
                }
                Ok(Err(_)) => break, // receiver side vanished; give up
                Err(_) => {
                    slog::warn!(
                        self.logger,
                        "No ack for message {} (attempt {}); re-electing our view of the leader",
                        message_id,
                        attempt
                    );
                    self.leader = None;
                }
            }
        }

        self.acks.disarm(&message_id);
        if ever_sent {
            Err(SendError::NoAck)
        } else {
            Err(SendError::NoLeader)
        }
    }

    async fn current_or_probed_leader(&mut self) -> Option<SocketAddr> {
        match self.leader {
            Some(leader) => Some(leader),
            None => self.probe_for_leader().await.ok(),
        }
    }
}
