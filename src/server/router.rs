use crate::actor::WeakActorClient;
use crate::clock::LamportClock;
use crate::detector::FailureDetector;
use crate::election::elect_leader;
use crate::membership::{MembershipTracker, ServerRecord, SubnetFilter};
use crate::server::{ClientRegistry, ProcessedMessages};
use crate::transport::Datagram;
use crate::wire::{chat_display_line, ChatFrame, Frame, LeaderAnnouncement};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;

/// MessageRouter classifies every inbound frame and performs its side effect:
/// membership bookkeeping, leader probes and elections, client registration,
/// and the dedup'd chat fan-out. It runs entirely on the server actor task
/// and owns all of the server's mutable state.
pub(crate) struct MessageRouter {
    logger: slog::Logger,
    me: SocketAddr,
    membership: MembershipTracker,
    registry: ClientRegistry,
    processed: ProcessedMessages,
    clock: LamportClock,
    detector: FailureDetector,
    filter: SubnetFilter,
    transport: Arc<dyn Datagram>,
    actor: WeakActorClient,
    probe_timeout: Duration,
}

impl MessageRouter {
    pub(crate) fn new(
        logger: slog::Logger,
        membership: MembershipTracker,
        filter: SubnetFilter,
        transport: Arc<dyn Datagram>,
        actor: WeakActorClient,
        probe_timeout: Duration,
        processed_history_limit: usize,
    ) -> Self {
        let me = membership.me();
        let detector = FailureDetector::new(logger.clone());

        MessageRouter {
            logger,
            me,
            membership,
            registry: ClientRegistry::new(),
            processed: ProcessedMessages::with_capacity(processed_history_limit),
            clock: LamportClock::new(),
            detector,
            filter,
            transport,
            actor,
            probe_timeout,
        }
    }

    /// Cold-start election over the seeded membership, before any traffic
    /// flows. Every seeded process computes the same winner locally, so no
    /// announcements are needed.
    pub(crate) fn bootstrap_election(&mut self) {
        self.run_election("cold start", false);
    }

    pub(crate) fn server_snapshot(&self) -> Vec<ServerRecord> {
        self.membership.snapshot()
    }

    pub(crate) fn current_leader(&self) -> Option<SocketAddr> {
        self.membership.leader()
    }

    pub(crate) fn handle_frame(&mut self, frame: Frame, from: SocketAddr) {
        match frame {
            Frame::ServiceDiscovery => self.handle_presence(from),
            Frame::NewServer(addr) => self.handle_new_server(addr),
            Frame::LeaderAnnouncement(announcement) => self.handle_leader_announcement(announcement),
            Frame::IsLeader => {
                let reply = if self.i_am_leader() { Frame::Leader } else { Frame::NotLeader };
                self.send_frame(reply, from);
            }
            Frame::Heartbeat => self.send_frame(Frame::HeartbeatAck, from),
            Frame::HeartbeatAck => {
                if self.detector.note_probe_ack(from) {
                    slog::debug!(self.logger, "Leader {} answered the liveness probe", from);
                }
            }
            Frame::Register(name) => self.handle_register(&name, from),
            Frame::Chat(chat) => self.handle_chat(chat, from),
            // Client-bound frames have no business arriving at a server.
            other @ Frame::Leader
            | other @ Frame::NotLeader
            | other @ Frame::Accepted(_)
            | other @ Frame::Rejected(_)
            | other @ Frame::ServerAck(_) => {
                slog::debug!(self.logger, "Ignoring client-bound frame {:?} from {}", other, from);
            }
        }
    }

    /// A presence broadcast. The sender's chat endpoint is its source IP plus
    /// the deployment-wide chat port.
    fn handle_presence(&mut self, from: SocketAddr) {
        if !self.filter.is_valid_source(from.ip()) {
            slog::debug!(self.logger, "Ignoring presence marker from outside the subnet: {}", from);
            return;
        }

        let newcomer = SocketAddr::new(from.ip(), self.me.port());
        if newcomer == self.me {
            return; // our own broadcast echoed back
        }
        if !self.membership.record_peer(newcomer) {
            return;
        }

        slog::info!(self.logger, "Discovered server: {}", newcomer);

        // Tell every previously-known peer about the newcomer, point-to-point
        // so a broadcast storm cannot amplify.
        let relay = Frame::NewServer(newcomer);
        for peer in self.membership.other_addrs() {
            if peer != newcomer {
                self.send_frame(relay.clone(), peer);
            }
        }
    }

    /// A peer relayed a newcomer to us. Topology just changed, so recompute
    /// leadership immediately instead of waiting for the next tick. Every
    /// peer recomputes the same winner locally; no announcements needed.
    fn handle_new_server(&mut self, addr: SocketAddr) {
        if !self.membership.record_peer(addr) {
            return;
        }

        slog::info!(self.logger, "New server added: {}", addr);
        self.run_election("new server joined", false);
    }

    fn handle_leader_announcement(&mut self, announcement: LeaderAnnouncement) {
        if announcement.is_leader {
            slog::info!(self.logger, "Peer announcement: {} is the leader", announcement.member);
            self.membership.set_leader(announcement.member);
            self.detector.enter_monitoring();
        } else if self.membership.leader() == Some(announcement.member) {
            slog::info!(self.logger, "Peer announcement: {} stood down", announcement.member);
            self.membership.clear_leader();
        } else {
            self.membership.record_peer(announcement.member);
        }
    }

    fn handle_register(&mut self, name: &str, from: SocketAddr) {
        if !self.i_am_leader() {
            self.send_frame(Frame::NotLeader, from);
            return;
        }

        if self.registry.register(name, from) {
            slog::info!(self.logger, "Client {:?} has joined from {}", name, from);
            self.send_frame(Frame::Accepted(name.to_string()), from);
        } else {
            slog::info!(self.logger, "Rejecting duplicate client name {:?} from {}", name, from);
            self.send_frame(Frame::Rejected(name.to_string()), from);
        }
    }

    fn handle_chat(&mut self, chat: ChatFrame, from: SocketAddr) {
        if !self.i_am_leader() {
            // The sender's ack timeout will push it to rediscover the leader.
            slog::debug!(
                self.logger,
                "Dropping chat message {} from {}: not the leader",
                chat.message_id,
                from
            );
            return;
        }

        if self.processed.record(chat.message_id.clone()) {
            let stamped = self.clock.update(chat.lamport_time);
            let line = chat_display_line(&chat.sender, &chat.text, stamped);

            slog::debug!(
                self.logger,
                "Broadcasting message {} from {:?} to {} clients",
                chat.message_id,
                chat.sender,
                self.registry.len().saturating_sub(1)
            );
            for recipient in self.registry.recipients_except(from) {
                self.send_raw(Bytes::from(line.clone()), recipient);
            }
        } else {
            slog::debug!(self.logger, "Duplicate message {}; re-acking without fan-out", chat.message_id);
        }

        // Ack unconditionally, duplicates included: a lost ack must be the
        // only reason a client ever retries.
        self.send_frame(Frame::ServerAck(chat.message_id), from);
    }

    pub(crate) fn handle_heartbeat_tick(&mut self) {
        slog::debug!(
            self.logger,
            "Heartbeat tick ({:?}); leader: {:?}",
            self.detector.state(),
            self.membership.leader()
        );

        match self.membership.leader() {
            None => {
                self.detector.enter_electing();
                self.run_election("no live leader", true);
            }
            Some(leader) if leader == self.me => {
                // We are the leader; nothing to probe.
            }
            Some(leader) => {
                self.detector.note_probe_sent(leader);
                self.send_frame(Frame::Heartbeat, leader);

                let actor = self.actor.clone();
                let deadline = self.probe_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(deadline).await;
                    actor.probe_deadline(leader).await;
                });
            }
        }
    }

    pub(crate) fn handle_probe_deadline(&mut self, leader: SocketAddr) {
        if !self.detector.probe_expired(leader) {
            return;
        }

        slog::warn!(self.logger, "Leader {} missed the probe deadline; evicting and re-electing", leader);
        self.membership.remove(leader);
        self.detector.enter_electing();
        self.run_election("leader unresponsive", true);
    }

    fn run_election(&mut self, reason: &str, announce: bool) {
        match elect_leader(self.membership.addrs(), self.me) {
            Some(winner) => {
                self.membership.set_leader(winner);
                self.detector.enter_monitoring();
                if winner == self.me {
                    slog::info!(self.logger, "Elected ({}): I am the leader", reason);
                } else {
                    slog::info!(self.logger, "Elected ({}): leader is {}", reason, winner);
                }

                if announce {
                    let announcement = Frame::LeaderAnnouncement(LeaderAnnouncement {
                        member: winner,
                        is_leader: true,
                    });
                    for peer in self.membership.other_addrs() {
                        self.send_frame(announcement.clone(), peer);
                    }
                }
            }
            None => {
                slog::warn!(self.logger, "Election failed ({}): no candidates; will retry", reason);
            }
        }
    }

    fn i_am_leader(&self) -> bool {
        self.membership.leader() == Some(self.me)
    }

    fn send_frame(&self, frame: Frame, dest: SocketAddr) {
        self.send_raw(frame.encode(), dest);
    }

    // Fire-and-forget. A lost datagram is the protocol's problem (retries,
    // re-probes), not the router's.
    fn send_raw(&self, payload: Bytes, dest: SocketAddr) {
        let transport = Arc::clone(&self.transport);
        let logger = self.logger.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.send_to(payload, dest).await {
                slog::warn!(logger, "Failed to send datagram to {}: {}", dest, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor;
    use crate::transport::testing::{mock_transport, SentDatagrams};
    use crate::wire::MessageId;

    fn addr(last_octet: u8) -> SocketAddr {
        format!("192.168.0.{}:10001", last_octet).parse().unwrap()
    }

    fn client_addr(port: u16) -> SocketAddr {
        format!("192.168.0.200:{}", port).parse().unwrap()
    }

    fn discard_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    /// Router for 192.168.0.1 with the given peers seeded. Returns the sent-
    /// datagram recorder alongside.
    fn router_with_peers(peers: &[SocketAddr]) -> (MessageRouter, SentDatagrams) {
        let (transport, sent) = mock_transport();
        let (actor_client, _queue) = actor::create(8);

        let mut membership = MembershipTracker::new(addr(1));
        for &peer in peers {
            membership.record_peer(peer);
        }

        let router = MessageRouter::new(
            discard_logger(),
            membership,
            SubnetFilter::for_prefix("192.168."),
            transport,
            actor_client.weak(),
            Duration::from_millis(50),
            64,
        );

        (router, sent)
    }

    fn make_leader(router: &mut MessageRouter, leader: SocketAddr) {
        router.handle_frame(
            Frame::LeaderAnnouncement(LeaderAnnouncement {
                member: leader,
                is_leader: true,
            }),
            leader,
        );
    }

    async fn next_frame(sent: &mut SentDatagrams) -> (Frame, SocketAddr) {
        let (payload, dest) = sent.next_sent().await;
        (Frame::parse(&payload).expect("sent datagram should be a frame"), dest)
    }

    #[tokio::test]
    async fn heartbeat_tick_without_leader_elects_the_greatest_address() {
        let (mut router, mut sent) = router_with_peers(&[addr(2), addr(3)]);

        router.handle_heartbeat_tick();

        assert_eq!(router.current_leader(), Some(addr(3)));

        // Both peers are told, point-to-point.
        let mut announced_to = vec![next_frame(&mut sent).await, next_frame(&mut sent).await];
        announced_to.sort_by_key(|(_, dest)| *dest);
        for (frame, _) in &announced_to {
            assert_eq!(
                *frame,
                Frame::LeaderAnnouncement(LeaderAnnouncement {
                    member: addr(3),
                    is_leader: true,
                })
            );
        }
        let destinations: Vec<SocketAddr> = announced_to.into_iter().map(|(_, dest)| dest).collect();
        assert_eq!(destinations, vec![addr(2), addr(3)]);
    }

    #[tokio::test]
    async fn probe_deadline_evicts_leader_and_re_elects() {
        let (mut router, mut sent) = router_with_peers(&[addr(2), addr(3)]);
        make_leader(&mut router, addr(3));

        // Tick probes the remote leader.
        router.handle_heartbeat_tick();
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::Heartbeat);
        assert_eq!(dest, addr(3));

        // No ack before the deadline: 3 is evicted, 2 wins the re-election.
        router.handle_probe_deadline(addr(3));
        assert_eq!(router.current_leader(), Some(addr(2)));

        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(
            frame,
            Frame::LeaderAnnouncement(LeaderAnnouncement {
                member: addr(2),
                is_leader: true,
            })
        );
        assert_eq!(dest, addr(2));
    }

    #[tokio::test]
    async fn acked_probe_keeps_the_leader() {
        let (mut router, mut sent) = router_with_peers(&[addr(3)]);
        make_leader(&mut router, addr(3));

        router.handle_heartbeat_tick();
        let (frame, _) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::Heartbeat);

        router.handle_frame(Frame::HeartbeatAck, addr(3));
        router.handle_probe_deadline(addr(3));

        assert_eq!(router.current_leader(), Some(addr(3)));
        sent.assert_nothing_sent().await;
    }

    #[tokio::test]
    async fn leader_probe_is_answered_regardless_of_role() {
        let (mut router, mut sent) = router_with_peers(&[]);

        router.handle_frame(Frame::IsLeader, client_addr(5000));
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::NotLeader);
        assert_eq!(dest, client_addr(5000));

        make_leader(&mut router, addr(1));
        router.handle_frame(Frame::IsLeader, client_addr(5000));
        let (frame, _) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::Leader);

        router.handle_frame(Frame::Heartbeat, addr(2));
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::HeartbeatAck);
        assert_eq!(dest, addr(2));
    }

    #[tokio::test]
    async fn registration_is_first_come_first_served() {
        let (mut router, mut sent) = router_with_peers(&[]);
        make_leader(&mut router, addr(1));

        router.handle_frame(Frame::Register("alice".into()), client_addr(5000));
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::Accepted("alice".into()));
        assert_eq!(dest, client_addr(5000));

        router.handle_frame(Frame::Register("alice".into()), client_addr(5001));
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::Rejected("alice".into()));
        assert_eq!(dest, client_addr(5001));
    }

    #[tokio::test]
    async fn non_leader_redirects_registration() {
        let (mut router, mut sent) = router_with_peers(&[addr(3)]);
        make_leader(&mut router, addr(3));

        router.handle_frame(Frame::Register("alice".into()), client_addr(5000));
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::NotLeader);
        assert_eq!(dest, client_addr(5000));
    }

    #[tokio::test]
    async fn retransmissions_are_acked_but_fanned_out_once() {
        let (mut router, mut sent) = router_with_peers(&[]);
        make_leader(&mut router, addr(1));

        router.handle_frame(Frame::Register("alice".into()), client_addr(5000));
        router.handle_frame(Frame::Register("bob".into()), client_addr(5001));
        next_frame(&mut sent).await; // ACCEPTED:alice
        next_frame(&mut sent).await; // ACCEPTED:bob

        let chat = Frame::Chat(ChatFrame {
            message_id: MessageId::from("m1"),
            lamport_time: 4,
            sender: "alice".into(),
            text: "hello".into(),
        });

        // First delivery: one fan-out to bob plus the ack.
        router.handle_frame(chat.clone(), client_addr(5000));
        let mut first: Vec<(Bytes, SocketAddr)> = vec![sent.next_sent().await, sent.next_sent().await];
        first.sort_by_key(|(_, dest)| *dest);

        let (ack, dest) = &first[0];
        assert_eq!(*dest, client_addr(5000));
        assert_eq!(Frame::parse(ack).unwrap(), Frame::ServerAck(MessageId::from("m1")));

        let (line, dest) = &first[1];
        assert_eq!(*dest, client_addr(5001));
        assert_eq!(&line[..], b"alice: hello (Lamport time: 5)" as &[u8]);

        // Two retransmissions: two more acks, zero additional fan-outs.
        router.handle_frame(chat.clone(), client_addr(5000));
        router.handle_frame(chat, client_addr(5000));
        for _ in 0..2 {
            let (frame, dest) = next_frame(&mut sent).await;
            assert_eq!(frame, Frame::ServerAck(MessageId::from("m1")));
            assert_eq!(dest, client_addr(5000));
        }
        sent.assert_nothing_sent().await;
    }

    #[tokio::test]
    async fn chat_at_a_non_leader_is_dropped_silently() {
        let (mut router, mut sent) = router_with_peers(&[addr(3)]);
        make_leader(&mut router, addr(3));

        router.handle_frame(
            Frame::Chat(ChatFrame {
                message_id: MessageId::from("m1"),
                lamport_time: 1,
                sender: "alice".into(),
                text: "hi".into(),
            }),
            client_addr(5000),
        );

        sent.assert_nothing_sent().await;
    }

    #[tokio::test]
    async fn fan_out_stamps_the_leaders_updated_lamport_time() {
        let (mut router, mut sent) = router_with_peers(&[]);
        make_leader(&mut router, addr(1));

        router.handle_frame(Frame::Register("alice".into()), client_addr(5000));
        router.handle_frame(Frame::Register("bob".into()), client_addr(5001));
        next_frame(&mut sent).await;
        next_frame(&mut sent).await;

        router.handle_frame(
            Frame::Chat(ChatFrame {
                message_id: MessageId::from("m-high"),
                lamport_time: 41,
                sender: "alice".into(),
                text: "hi".into(),
            }),
            client_addr(5000),
        );

        let mut deliveries = vec![sent.next_sent().await, sent.next_sent().await];
        deliveries.sort_by_key(|(_, dest)| *dest);
        let (line, _) = &deliveries[1];
        assert_eq!(&line[..], b"alice: hi (Lamport time: 42)" as &[u8]);
    }

    #[tokio::test]
    async fn presence_inserts_and_relays_to_existing_peers() {
        let (mut router, mut sent) = router_with_peers(&[addr(2)]);

        let newcomer_source: SocketAddr = "192.168.0.9:39000".parse().unwrap();
        router.handle_frame(Frame::ServiceDiscovery, newcomer_source);

        assert!(router.server_snapshot().iter().any(|r| r.addr == addr(9)));

        // Only the pre-existing peer is told, not the newcomer itself.
        let (frame, dest) = next_frame(&mut sent).await;
        assert_eq!(frame, Frame::NewServer(addr(9)));
        assert_eq!(dest, addr(2));
        sent.assert_nothing_sent().await;

        // A repeated marker changes nothing.
        router.handle_frame(Frame::ServiceDiscovery, newcomer_source);
        sent.assert_nothing_sent().await;
    }

    #[tokio::test]
    async fn presence_from_outside_the_subnet_is_ignored() {
        let (mut router, mut sent) = router_with_peers(&[addr(2)]);

        router.handle_frame(Frame::ServiceDiscovery, "10.1.1.1:39000".parse().unwrap());

        assert_eq!(router.server_snapshot().len(), 2);
        sent.assert_nothing_sent().await;
    }

    #[tokio::test]
    async fn new_server_relay_triggers_an_immediate_local_election() {
        let (mut router, mut sent) = router_with_peers(&[addr(2)]);
        make_leader(&mut router, addr(2));

        router.handle_frame(Frame::NewServer(addr(7)), addr(2));

        // 7 outranks 2, so leadership moves without waiting for a tick.
        assert_eq!(router.current_leader(), Some(addr(7)));
        sent.assert_nothing_sent().await;
    }

    #[tokio::test]
    async fn stand_down_announcement_clears_only_the_current_leader() {
        let (mut router, _sent) = router_with_peers(&[addr(2), addr(3)]);
        make_leader(&mut router, addr(3));

        router.handle_frame(
            Frame::LeaderAnnouncement(LeaderAnnouncement {
                member: addr(2),
                is_leader: false,
            }),
            addr(2),
        );
        assert_eq!(router.current_leader(), Some(addr(3)));

        router.handle_frame(
            Frame::LeaderAnnouncement(LeaderAnnouncement {
                member: addr(3),
                is_leader: false,
            }),
            addr(3),
        );
        assert_eq!(router.current_leader(), None);
    }
}
