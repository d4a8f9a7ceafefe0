use crate::membership::ServerRecord;
use crate::server::MessageRouter;
use crate::wire::Frame;
use std::fmt::Debug;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

pub(crate) fn create(buffer_size: usize) -> (ActorClient, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer_size);

    (ActorClient { sender: tx }, rx)
}

/// Everything that can happen to a chat server. The actor owns all mutable
/// server state (membership, client registry, dedup history, Lamport clock),
/// so handling an event never contends with another task.
#[derive(Debug)]
pub(crate) enum Event {
    /// A parsed datagram from the chat or discovery socket.
    Inbound(Frame, SocketAddr),

    /// Periodic failure-detector tick: verify a live leader exists, probe it,
    /// or elect one.
    HeartbeatTick,

    /// The probe sent to this leader went unanswered past its deadline.
    ProbeDeadline(SocketAddr),

    /// Snapshot of the current membership view.
    GetServers(Callback<Vec<ServerRecord>>),

    /// Address of the member currently flagged as leader, if any.
    GetLeader(Callback<Option<SocketAddr>>),
}

#[derive(Debug)]
pub(crate) struct Callback<T: Debug>(oneshot::Sender<T>);

impl<T: Debug> Callback<T> {
    pub(crate) fn send(self, value: T) {
        // A caller that gave up waiting is not our problem.
        let _ = self.0.send(value);
    }
}

/// Strong handle to the actor queue. Held by the public `ServerHandle`;
/// dropping the last strong handle shuts the actor down.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

impl ActorClient {
    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn get_servers(&self) -> Vec<ServerRecord> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetServers(Callback(tx))).await;

        rx.await.expect("server actor dropped a GetServers callback")
    }

    pub(crate) async fn current_leader(&self) -> Option<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetLeader(Callback(tx))).await;

        rx.await.expect("server actor dropped a GetLeader callback")
    }

    async fn send(&self, event: Event) {
        self.sender
            .send(event)
            .await
            .expect("server actor event loop has exited");
    }
}

/// Handle for background tasks (listeners, timers, probe deadlines). Weak so
/// those tasks never keep a dead server alive; a failed send tells the task
/// to wind itself down.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl WeakActorClient {
    pub(crate) async fn inbound(&self, frame: Frame, from: SocketAddr) -> bool {
        self.send(Event::Inbound(frame, from)).await
    }

    pub(crate) async fn heartbeat_tick(&self) -> bool {
        self.send(Event::HeartbeatTick).await
    }

    pub(crate) async fn probe_deadline(&self, leader: SocketAddr) -> bool {
        self.send(Event::ProbeDeadline(leader)).await
    }

    async fn send(&self, event: Event) -> bool {
        match self.sender.upgrade() {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

/// ServerActor drains the event queue and delegates to the router. It exits
/// when every strong `ActorClient` is gone.
pub(crate) struct ServerActor {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    router: MessageRouter,
}

impl ServerActor {
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, router: MessageRouter) -> Self {
        ServerActor {
            logger,
            receiver,
            router,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }

        slog::info!(self.logger, "Server actor event loop exited");
    }

    // Must stay non-async: anything slow is spawned elsewhere and comes back
    // into the queue as another event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Inbound(frame, from) => self.router.handle_frame(frame, from),
            Event::HeartbeatTick => self.router.handle_heartbeat_tick(),
            Event::ProbeDeadline(leader) => self.router.handle_probe_deadline(leader),
            Event::GetServers(callback) => callback.send(self.router.server_snapshot()),
            Event::GetLeader(callback) => callback.send(self.router.current_leader()),
        }
    }
}
