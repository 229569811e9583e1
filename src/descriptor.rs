//! Peer descriptors and the successor list.
//!
//! A [`PeerDescriptor`] is the immutable value-type view of a peer that
//! travels on the wire: its ring id (the hash of `ip:port`), the key range
//! it answers for, and its endpoint. The [`SuccessorList`] is the bounded,
//! clockwise-sorted list of the peers directly succeeding a node, which
//! both replication and routing fall back on.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::Key;

/// How many successors a peer tracks; also the replication factor, since
/// one fragment goes to each successor of a key.
pub const NUM_REPLICAS: usize = 14;

/// Wire representation of a peer.
///
/// `max_key` always equals the peer's id; `min_key` is one past its
/// predecessor's id (wrapping), so `[min_key, id]` is the arc of keys the
/// peer answers for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerDescriptor {
    #[serde(rename = "ID")]
    pub id: Key,
    #[serde(rename = "MIN_KEY")]
    pub min_key: Key,
    #[serde(rename = "MAX_KEY")]
    pub max_key: Key,
    #[serde(rename = "IP_ADDR")]
    pub ip_addr: String,
    #[serde(rename = "PORT")]
    pub port: u16,
    /// Round-trip estimate, not carried on the wire.
    #[serde(skip)]
    pub latency: u32,
}

impl PeerDescriptor {
    /// Descriptor for a peer at `ip:port`, covering only its own id until
    /// a predecessor is known.
    pub fn new(ip_addr: &str, port: u16) -> PeerDescriptor {
        let id = Key::from_plaintext(&format!("{ip_addr}:{port}"));
        PeerDescriptor {
            min_key: id.clone(),
            max_key: id.clone(),
            id,
            ip_addr: ip_addr.to_string(),
            port,
            latency: 0,
        }
    }

    /// The `ip:port` endpoint string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip_addr, self.port)
    }
}

impl PartialEq for PeerDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.min_key == other.min_key
            && self.max_key == other.max_key
            && self.ip_addr == other.ip_addr
            && self.port == other.port
    }
}

impl Eq for PeerDescriptor {}

impl PartialOrd for PeerDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.id, self.endpoint())
    }
}

/// Bounded list of peer descriptors kept in clockwise order around the
/// ring, starting from the owner.
///
/// A plain sorted set will not do here: each candidate position is judged
/// by the clockwise-between predicate against the neighbouring entries, so
/// insertion walks the list.
#[derive(Debug, Clone)]
pub struct SuccessorList {
    capacity: usize,
    peers: Vec<PeerDescriptor>,
}

impl SuccessorList {
    pub fn new(capacity: usize) -> SuccessorList {
        SuccessorList { capacity, peers: Vec::new() }
    }

    /// Adopt a freshly-resolved walk of the ring wholesale, trimmed to
    /// capacity. Used by stabilization.
    pub fn from_peers(capacity: usize, mut peers: Vec<PeerDescriptor>) -> SuccessorList {
        peers.truncate(capacity);
        SuccessorList { capacity, peers }
    }

    /// Insert a peer at its clockwise position.
    ///
    /// Walks adjacent pairs looking for the arc the new id falls on;
    /// duplicates (by id) are rejected, and an insertion that overflows
    /// capacity drops the farthest entry. Returns whether the list changed.
    pub fn insert(&mut self, new_peer: PeerDescriptor) -> bool {
        if self.peers.is_empty() {
            self.peers.push(new_peer);
            return true;
        }

        let mut previous = self.peers[self.peers.len() - 1].id.clone();
        let mut position = None;
        for (i, peer) in self.peers.iter().enumerate() {
            if new_peer.id == peer.id {
                return false;
            }
            if new_peer.id.in_between(&previous, &peer.id, true) {
                position = Some(i);
                break;
            }
            previous = peer.id.clone();
        }

        match position {
            Some(i) => {
                self.peers.insert(i, new_peer);
                if self.peers.len() > self.capacity {
                    self.peers.pop();
                }
                true
            }
            None => {
                if self.peers.len() < self.capacity {
                    self.peers.push(new_peer);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn get(&self, n: usize) -> Option<&PeerDescriptor> {
        self.peers.get(n)
    }

    /// The immediate successor.
    pub fn first(&self) -> Option<&PeerDescriptor> {
        self.peers.first()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerDescriptor> {
        self.peers.iter()
    }
}
