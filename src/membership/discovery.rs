use crate::sync::ShutdownSignal;
use crate::wire::Frame;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::Duration;

/// Which source addresses count as LAN peers. Presence markers from outside
/// the configured prefix are ignored so a stray datagram from another segment
/// cannot join the overlay.
///
/// Loopback sources are rejected unless the prefix itself names loopback,
/// which single-host setups use.
#[derive(Clone, Debug)]
pub struct SubnetFilter {
    prefix: Option<String>,
}

impl SubnetFilter {
    pub fn for_prefix(prefix: impl Into<String>) -> Self {
        SubnetFilter {
            prefix: Some(prefix.into()),
        }
    }

    /// Accept any non-loopback source. For trusted or test environments.
    pub fn allow_any() -> Self {
        SubnetFilter { prefix: None }
    }

    pub fn is_valid_source(&self, source: IpAddr) -> bool {
        match &self.prefix {
            Some(prefix) => {
                if source.is_loopback() && !prefix.starts_with("127.") {
                    return false;
                }
                source.to_string().starts_with(prefix.as_str())
            }
            None => !source.is_loopback(),
        }
    }
}

impl Default for SubnetFilter {
    fn default() -> Self {
        SubnetFilter::for_prefix("192.168.0.")
    }
}

/// Periodically shouts `SERVICE_DISCOVERY` at the subnet broadcast address so
/// peers can find us. Fire-and-forget: a failed send is logged and the loop
/// carries on. Runs until the owning handle drops its shutdown guard.
pub(crate) struct PresenceAnnouncer {
    logger: slog::Logger,
    socket: UdpSocket,
    broadcast_dest: SocketAddr,
    interval: Duration,
}

impl PresenceAnnouncer {
    pub(crate) fn new(
        logger: slog::Logger,
        socket: UdpSocket,
        broadcast_dest: SocketAddr,
        interval: Duration,
    ) -> Self {
        PresenceAnnouncer {
            logger,
            socket,
            broadcast_dest,
            interval,
        }
    }

    pub(crate) async fn run(self, mut shutdown: ShutdownSignal) {
        let payload = Frame::ServiceDiscovery.encode();
        slog::info!(
            self.logger,
            "Announcing presence to {} every {:?}",
            self.broadcast_dest,
            self.interval
        );

        loop {
            if let Err(e) = self.socket.send_to(&payload, self.broadcast_dest).await {
                slog::warn!(self.logger, "Presence broadcast failed: {}", e);
            }

            tokio::select! {
                _ = &mut shutdown => {
                    slog::info!(self.logger, "Presence announcer stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
