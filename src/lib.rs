//! # Chordal - Chord DHT with dispersed-fragment replication
//!
//! Chordal is a peer-to-peer distributed hash table. Peers sit on a ring of
//! 16^32 identifiers, each answering for the arc between its predecessor
//! and itself; lookups hop along finger tables in logarithmically shrinking
//! arcs. Stored values are never replicated whole: each value is dispersed
//! into 14 fragments, one per successor of its key, and any 10 of them
//! reconstruct it, so reads survive several peers disappearing at once.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `peer` | The peer: join/leave protocol, routing, replication, maintenance |
//! | `key` | Ring identifiers, SHA-1 name hashing, clockwise-between predicate |
//! | `ida` | (14, 10) information dispersal codec over 40-value blocks |
//! | `block` | Fragments and block assembly/serialization |
//! | `merkle` | Compact sparse Merkle index over each peer's key set |
//! | `store` | In-memory key-to-fragment database paired with the index |
//! | `descriptor` | Peer descriptors and the bounded successor list |
//! | `finger` | The 128-entry finger table |
//! | `messages` | JSON wire envelope and command payloads |
//! | `protocols` | `PeerRpc`, the outbound-network trait |
//! | `rpc` | TCP implementation of `PeerRpc` plus the server loop |
//!
//! ## Consistency model
//!
//! Only eventual convergence is promised. Maintenance sweeps the ring as a
//! walking tick: each peer stabilizes its routing state, offers its range
//! to its successors, evicts keys it no longer owns, and hands the walk to
//! its first successor. Between sweeps, routing tolerates stale tables by
//! detecting two-hop cycles and falling back through predecessors.

mod block;
mod descriptor;
mod finger;
mod ida;
mod key;
mod merkle;
mod messages;
mod peer;
mod protocols;
mod rpc;
mod store;

pub use block::{DataBlock, DataFragment};
pub use descriptor::{PeerDescriptor, SuccessorList, NUM_REPLICAS};
pub use finger::{Finger, FingerTable, FINGER_COUNT};
pub use ida::{CodecError, Ida, BLOCK_LENGTH, DECODE_THRESHOLD, FRAGMENT_COUNT};
pub use key::Key;
pub use merkle::{MerkleIndex, MerkleNode};
pub use messages::{Command, Request};
pub use peer::{Peer, PeerConfig};
pub use protocols::PeerRpc;
pub use rpc::{spawn_server, RpcClient};
pub use store::{Database, StoreError};
