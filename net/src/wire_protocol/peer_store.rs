//! The persistent peer address book is an external collaborator (spec's
//! Design Notes, "Global mutable peer store"): the core never reaches for
//! global state, it only talks to this narrow trait.

use std::net::Ipv4Addr;
use std::sync::Mutex;

pub trait PeerStore: Send + Sync {
    fn add(&self, ip: Ipv4Addr, port: u16);
    fn list(&self) -> Vec<(Ipv4Addr, u16)>;
}

/// In-memory default, good enough for a lab session; a real deployment
/// would inject something backed by a file or database instead.
#[derive(Default)]
pub struct InMemoryPeerStore {
    entries: Mutex<Vec<(Ipv4Addr, u16)>>,
}

impl InMemoryPeerStore {
    pub fn new() -> Self {
        InMemoryPeerStore::default()
    }
}

impl PeerStore for InMemoryPeerStore {
    fn add(&self, ip: Ipv4Addr, port: u16) {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains(&(ip, port)) {
            entries.push((ip, port));
        }
    }

    fn list(&self) -> Vec<(Ipv4Addr, u16)> {
        self.entries.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let store = InMemoryPeerStore::new();
        store.add(Ipv4Addr::new(1, 2, 3, 4), 8333);
        store.add(Ipv4Addr::new(1, 2, 3, 4), 8333);
        assert_eq!(store.list(), vec![(Ipv4Addr::new(1, 2, 3, 4), 8333)]);
    }

    #[test]
    fn lists_in_insertion_order() {
        let store = InMemoryPeerStore::new();
        store.add(Ipv4Addr::new(1, 1, 1, 1), 1);
        store.add(Ipv4Addr::new(2, 2, 2, 2), 2);
        assert_eq!(store.list(), vec![(Ipv4Addr::new(1, 1, 1, 1), 1), (Ipv4Addr::new(2, 2, 2, 2), 2)]);
    }
}
