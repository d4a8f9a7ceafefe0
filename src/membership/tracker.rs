use std::collections::HashMap;
use std::net::SocketAddr;

/// A known peer server and whether we currently believe it is the leader.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerRecord {
    pub addr: SocketAddr,
    pub is_leader: bool,
}

/// The locally-owned view of the server overlay. One instance per process,
/// owned by the server actor; all mutation happens on the actor task.
///
/// Records are keyed by the peer's chat endpoint. The local server is always
/// a member of its own view. At most one record carries the leader flag;
/// `set_leader` maintains that invariant by construction.
pub(crate) struct MembershipTracker {
    me: SocketAddr,
    peers: HashMap<SocketAddr, bool>,
}

impl MembershipTracker {
    pub(crate) fn new(me: SocketAddr) -> Self {
        let mut peers = HashMap::new();
        peers.insert(me, false);

        MembershipTracker { me, peers }
    }

    pub(crate) fn me(&self) -> SocketAddr {
        self.me
    }

    /// Insert a newly observed peer with the leader flag unset. Returns true
    /// if the peer was previously unknown.
    pub(crate) fn record_peer(&mut self, addr: SocketAddr) -> bool {
        if self.peers.contains_key(&addr) {
            return false;
        }
        self.peers.insert(addr, false);
        true
    }

    /// Mark `addr` as the one leader, inserting it if unknown. Every other
    /// record's flag is cleared.
    pub(crate) fn set_leader(&mut self, addr: SocketAddr) {
        for flag in self.peers.values_mut() {
            *flag = false;
        }
        self.peers.insert(addr, true);
    }

    /// Demote whoever is currently flagged, if anyone.
    pub(crate) fn clear_leader(&mut self) {
        for flag in self.peers.values_mut() {
            *flag = false;
        }
    }

    /// Drop a peer from the view entirely (confirmed unresponsive). The local
    /// server cannot be removed from its own view.
    pub(crate) fn remove(&mut self, addr: SocketAddr) {
        if addr != self.me {
            self.peers.remove(&addr);
        }
    }

    pub(crate) fn contains(&self, addr: SocketAddr) -> bool {
        self.peers.contains_key(&addr)
    }

    pub(crate) fn leader(&self) -> Option<SocketAddr> {
        self.peers
            .iter()
            .find(|(_, &is_leader)| is_leader)
            .map(|(&addr, _)| addr)
    }

    pub(crate) fn addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().collect()
    }

    /// Peers other than the local server, e.g. for point-to-point fan-out.
    pub(crate) fn other_addrs(&self) -> Vec<SocketAddr> {
        self.peers.keys().copied().filter(|&addr| addr != self.me).collect()
    }

    /// A copy of the current view, sorted by address for stable output.
    /// Callers must not assume freshness beyond the last broadcast interval.
    pub(crate) fn snapshot(&self) -> Vec<ServerRecord> {
        let mut records: Vec<ServerRecord> = self
            .peers
            .iter()
            .map(|(&addr, &is_leader)| ServerRecord { addr, is_leader })
            .collect();
        records.sort_by_key(|record| record.addr);

        records
    }
}
