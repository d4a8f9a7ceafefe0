use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// The narrow seam between the protocol core and the actual sockets. The core
/// only ever needs "send this datagram there"; receiving stays in the
/// listener tasks that own the sockets.
#[async_trait::async_trait]
pub(crate) trait Datagram: Send + Sync {
    async fn send_to(&self, payload: Bytes, dest: SocketAddr) -> io::Result<()>;
}

/// Sends through the server's (or client's) already-bound UDP socket, so
/// replies carry the well-known source port.
pub(crate) struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub(crate) fn new(socket: Arc<UdpSocket>) -> Self {
        UdpTransport { socket }
    }
}

#[async_trait::async_trait]
impl Datagram for UdpTransport {
    async fn send_to(&self, payload: Bytes, dest: SocketAddr) -> io::Result<()> {
        self.socket.send_to(&payload, dest).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    /// Records every datagram instead of touching the network. Tests await
    /// `next_sent()` to observe what the component under test emitted.
    pub(crate) struct MockTransport {
        sent: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
    }

    pub(crate) struct SentDatagrams {
        received: mpsc::UnboundedReceiver<(Bytes, SocketAddr)>,
    }

    pub(crate) fn mock_transport() -> (Arc<MockTransport>, SentDatagrams) {
        let (tx, rx) = mpsc::unbounded_channel();

        (Arc::new(MockTransport { sent: tx }), SentDatagrams { received: rx })
    }

    #[async_trait::async_trait]
    impl Datagram for MockTransport {
        async fn send_to(&self, payload: Bytes, dest: SocketAddr) -> io::Result<()> {
            self.sent.send((payload, dest)).expect("test dropped SentDatagrams");
            Ok(())
        }
    }

    impl SentDatagrams {
        pub(crate) async fn next_sent(&mut self) -> (Bytes, SocketAddr) {
            tokio::time::timeout(Duration::from_secs(5), self.received.recv())
                .await
                .expect("timed out waiting for a sent datagram")
                .expect("sender side dropped")
        }

        pub(crate) async fn assert_nothing_sent(&mut self) {
            let outcome = tokio::time::timeout(Duration::from_millis(20), self.received.recv()).await;
            if let Ok(Some((payload, dest))) = outcome {
                panic!("unexpected datagram {:?} to {}", payload, dest);
            }
        }
    }
}
