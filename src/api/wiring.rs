use crate::actor::{self, ActorClient, ServerActor};
use crate::api::{ChatOptions, ChatOptionsValidated};
use crate::client::{self, AckTable, ChatClient, MessageStream};
use crate::detector;
use crate::membership::{MembershipTracker, PresenceAnnouncer, ServerRecord, SubnetFilter};
use crate::server::{FrameListener, MessageRouter};
use crate::sync::{self, SharedSlot, ShutdownGuard};
use crate::transport::{Datagram, UdpTransport};
use std::convert::TryFrom;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const ACTOR_QUEUE_DEPTH: usize = 32;

pub struct ServerConfig {
    /// This server's chat endpoint as peers should see it. The chat socket
    /// binds to the wildcard address on this port, and the port doubles as
    /// the deployment-wide chat port that discovered peers are assumed to
    /// listen on.
    pub my_addr: SocketAddr,
    /// Peers to pre-populate membership with, for deployments (and tests)
    /// where broadcast discovery is unavailable. When non-empty, a cold-start
    /// election runs over the seeds before the server starts serving.
    pub seed_peers: Vec<SocketAddr>,
    /// Broadcast discovery. `None` disables it entirely; peers then come only
    /// from `seed_peers` and point-to-point relays.
    pub discovery: Option<DiscoveryConfig>,
    pub logger: slog::Logger,
    pub options: ChatOptions,
}

pub struct DiscoveryConfig {
    /// Well-known port the presence broadcasts travel on.
    pub discovery_port: u16,
    /// Where presence markers are broadcast to.
    pub broadcast_ip: IpAddr,
    /// Which sources count as LAN peers.
    pub filter: SubnetFilter,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            discovery_port: 50000,
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            filter: SubnetFilter::default(),
        }
    }
}

pub struct ClientConfig {
    /// Chat endpoints of the known servers, probed in order during leader
    /// discovery.
    pub servers: Vec<SocketAddr>,
    pub logger: slog::Logger,
    pub options: ChatOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateServerError {
    #[error("Illegal options for configuring the server: {0}")]
    IllegalOptions(&'static str),
    #[error("Failed to bind the chat socket")]
    BindChatSocket(#[source] io::Error),
    #[error("Failed to set up the discovery sockets")]
    BindDiscoverySocket(#[source] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum CreateClientError {
    #[error("Illegal options for configuring the client: {0}")]
    IllegalOptions(&'static str),
    #[error("Failed to bind the client socket")]
    BindSocket(#[source] io::Error),
}

/// Wire up a chat server: bind its sockets, seed membership, run the
/// cold-start election, and spawn the actor, listeners, announcer, and
/// heartbeat timer. Dropping the returned handle shuts everything down.
pub async fn try_create_server(config: ServerConfig) -> Result<ServerHandle, CreateServerError> {
    let options = ChatOptionsValidated::try_from(config.options).map_err(CreateServerError::IllegalOptions)?;
    let logger = config.logger.new(slog::o!("me" => config.my_addr.to_string()));

    let chat_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.my_addr.port());
    let chat_socket = Arc::new(
        UdpSocket::bind(chat_bind)
            .await
            .map_err(CreateServerError::BindChatSocket)?,
    );
    let transport: Arc<dyn Datagram> = Arc::new(UdpTransport::new(Arc::clone(&chat_socket)));

    let mut membership = MembershipTracker::new(config.my_addr);
    for &peer in &config.seed_peers {
        membership.record_peer(peer);
    }

    let filter = config
        .discovery
        .as_ref()
        .map(|discovery| discovery.filter.clone())
        .unwrap_or_default();

    let (actor_client, actor_queue) = actor::create(ACTOR_QUEUE_DEPTH);

    let mut router = MessageRouter::new(
        logger.clone(),
        membership,
        filter,
        transport,
        actor_client.weak(),
        options.probe_timeout,
        options.processed_history_limit,
    );
    if !config.seed_peers.is_empty() {
        router.bootstrap_election();
    }

    tokio::spawn(ServerActor::new(logger.clone(), actor_queue, router).run_event_loop());

    let mut task_guards = Vec::new();

    let (chat_guard, chat_shutdown) = sync::shutdown_pair();
    task_guards.push(chat_guard);
    let chat_listener = FrameListener::new(
        logger.new(slog::o!("listener" => "chat")),
        chat_socket,
        actor_client.weak(),
    );
    tokio::spawn(chat_listener.run(chat_shutdown));

    if let Some(discovery) = config.discovery {
        let discovery_socket = Arc::new(
            UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), discovery.discovery_port))
                .await
                .map_err(CreateServerError::BindDiscoverySocket)?,
        );

        let (discovery_guard, discovery_shutdown) = sync::shutdown_pair();
        task_guards.push(discovery_guard);
        let discovery_listener = FrameListener::new(
            logger.new(slog::o!("listener" => "discovery")),
            discovery_socket,
            actor_client.weak(),
        );
        tokio::spawn(discovery_listener.run(discovery_shutdown));

        let announce_socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .await
            .map_err(CreateServerError::BindDiscoverySocket)?;
        announce_socket
            .set_broadcast(true)
            .map_err(CreateServerError::BindDiscoverySocket)?;

        let (announce_guard, announce_shutdown) = sync::shutdown_pair();
        task_guards.push(announce_guard);
        let announcer = PresenceAnnouncer::new(
            logger.new(slog::o!("task" => "announcer")),
            announce_socket,
            SocketAddr::new(discovery.broadcast_ip, discovery.discovery_port),
            options.broadcast_interval,
        );
        tokio::spawn(announcer.run(announce_shutdown));
    }

    detector::spawn_heartbeat_timer(
        logger.new(slog::o!("task" => "heartbeat")),
        actor_client.weak(),
        options.startup_grace,
        options.heartbeat_interval,
    );

    slog::info!(logger, "Chat server up and running on {}", config.my_addr);

    Ok(ServerHandle {
        my_addr: config.my_addr,
        actor: actor_client,
        _task_guards: task_guards,
    })
}

/// Wire up a chat client: bind an ephemeral socket and spawn the receiver
/// task. Returns the client handle plus the stream of inbound chat lines.
pub async fn try_create_client(config: ClientConfig) -> Result<(ChatClient, MessageStream), CreateClientError> {
    let options = ChatOptionsValidated::try_from(config.options).map_err(CreateClientError::IllegalOptions)?;
    let logger = config.logger.new(slog::o!("component" => "chat-client"));

    let socket = Arc::new(
        UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
            .await
            .map_err(CreateClientError::BindSocket)?,
    );
    if let Ok(local) = socket.local_addr() {
        slog::info!(logger, "Client bound to {}", local);
    }
    let transport: Arc<dyn Datagram> = Arc::new(UdpTransport::new(Arc::clone(&socket)));

    let acks = AckTable::new();
    let control = SharedSlot::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let (receiver_guard, receiver_shutdown) = sync::shutdown_pair();
    tokio::spawn(client::run_receive_loop(
        logger.new(slog::o!("task" => "receiver")),
        socket,
        acks.clone(),
        control.clone(),
        inbound_tx,
        receiver_shutdown,
    ));

    let chat_client = ChatClient::new(
        logger,
        transport,
        config.servers,
        options,
        acks,
        control,
        receiver_guard,
    );

    Ok((chat_client, MessageStream::new(inbound_rx)))
}

/// Live chat server. All queries go through the actor, so answers are
/// consistent with whatever the server was doing when they were asked.
pub struct ServerHandle {
    my_addr: SocketAddr,
    actor: ActorClient,
    _task_guards: Vec<ShutdownGuard>,
}

impl ServerHandle {
    pub fn my_addr(&self) -> SocketAddr {
        self.my_addr
    }

    /// Snapshot of the membership view; stale beyond the last broadcast
    /// interval.
    pub async fn servers(&self) -> Vec<ServerRecord> {
        self.actor.get_servers().await
    }

    pub async fn current_leader(&self) -> Option<SocketAddr> {
        self.actor.current_leader().await
    }

    pub async fn is_leader(&self) -> bool {
        self.actor.current_leader().await == Some(self.my_addr)
    }
}
