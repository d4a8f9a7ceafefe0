use std::net::SocketAddr;

/// Ring leader election. Candidates are arranged into a logical ring in
/// ascending address order and a token is passed one full cycle starting from
/// `me`, each hop keeping the greater of the token and its own address. After
/// the full cycle the token holds the maximum, which every correctly
/// participating node computes identically: the winner is the greatest
/// address in the ring.
///
/// `me` participates even when absent from `candidates`. Returns `None` only
/// for an empty ring. A single-node ring self-elects.
pub(crate) fn elect_leader(candidates: impl IntoIterator<Item = SocketAddr>, me: SocketAddr) -> Option<SocketAddr> {
    let mut ring: Vec<SocketAddr> = candidates.into_iter().collect();
    if !ring.contains(&me) {
        ring.push(me);
    }
    ring.sort_unstable();
    ring.dedup();

    if ring.is_empty() {
        return None;
    }

    let start = ring
        .iter()
        .position(|addr| *addr == me)
        .expect("me was inserted above");

    // One full token cycle. ring[start] initiates with its own address.
    let mut token = ring[start];
    for step in 1..=ring.len() {
        let hop = ring[(start + step) % ring.len()];
        if hop > token {
            token = hop;
        }
    }

    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last_octet: u8) -> SocketAddr {
        format!("192.168.0.{}:10001", last_octet).parse().unwrap()
    }

    #[test]
    fn greatest_address_wins() {
        let winner = elect_leader(vec![addr(1), addr(2), addr(3)], addr(1));
        assert_eq!(winner, Some(addr(3)));
    }

    #[test]
    fn result_is_independent_of_candidate_order_and_initiator() {
        let orderings: Vec<Vec<SocketAddr>> = vec![
            vec![addr(5), addr(9), addr(2), addr(7)],
            vec![addr(2), addr(5), addr(7), addr(9)],
            vec![addr(9), addr(7), addr(5), addr(2)],
            vec![addr(7), addr(2), addr(9), addr(5)],
        ];

        for ordering in orderings {
            for &initiator in &ordering {
                assert_eq!(elect_leader(ordering.clone(), initiator), Some(addr(9)));
            }
        }
    }

    #[test]
    fn single_candidate_self_elects() {
        assert_eq!(elect_leader(vec![addr(4)], addr(4)), Some(addr(4)));
        assert_eq!(elect_leader(Vec::new(), addr(4)), Some(addr(4)));
    }

    #[test]
    fn initiator_is_added_when_missing_from_candidates() {
        // me is greater than every listed candidate, so me must win.
        assert_eq!(elect_leader(vec![addr(1), addr(2)], addr(200)), Some(addr(200)));
    }

    #[test]
    fn duplicate_candidates_are_harmless() {
        let winner = elect_leader(vec![addr(3), addr(3), addr(1), addr(1)], addr(1));
        assert_eq!(winner, Some(addr(3)));
    }
}
