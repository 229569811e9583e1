//! End-to-end ring scenarios over an in-process network.
//!
//! These tests drive real peers through the full protocol - join, notify,
//! routing, replication, maintenance, graceful leave - with the wire layer
//! replaced by a registry of in-process peers, so a whole ring runs
//! deterministically inside one test without sockets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};

use chordal::{
    DataFragment, Key, Peer, PeerConfig, PeerDescriptor, PeerRpc,
};

/// Generous ceiling for a single client operation; a routing loop shows up
/// as a timeout here instead of a hung test run.
const OP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Registry {
    peers: RwLock<HashMap<String, Peer<TestNetwork>>>,
}

impl Registry {
    async fn register(&self, peer: &Peer<TestNetwork>) {
        self.peers.write().await.insert(peer.endpoint(), peer.clone());
    }

    async fn get(&self, endpoint: &str) -> Option<Peer<TestNetwork>> {
        self.peers.read().await.get(endpoint).cloned()
    }
}

/// In-process stand-in for the TCP client: requests are delivered straight
/// to the target peer's handlers, with this network's owner as the sender.
#[derive(Clone)]
struct TestNetwork {
    registry: Arc<Registry>,
    self_id: Key,
}

impl TestNetwork {
    fn new(registry: Arc<Registry>, self_id: Key) -> TestNetwork {
        TestNetwork { registry, self_id }
    }

    async fn target(&self, to: &PeerDescriptor) -> Result<Peer<TestNetwork>> {
        let peer = self
            .registry
            .get(&to.endpoint())
            .await
            .ok_or_else(|| anyhow!("no peer at {}", to.endpoint()))?;
        if !peer.is_running() {
            return Err(anyhow!("peer at {} is not running", to.endpoint()));
        }
        Ok(peer)
    }
}

#[async_trait]
impl PeerRpc for TestNetwork {
    async fn join(&self, gateway: &str, joiner: &PeerDescriptor) -> Result<PeerDescriptor> {
        let gateway = self
            .registry
            .get(gateway)
            .await
            .ok_or_else(|| anyhow!("no gateway at {gateway}"))?;
        gateway.handle_join(joiner.clone()).await
    }

    async fn get_successor(&self, to: &PeerDescriptor, key: &Key) -> Result<PeerDescriptor> {
        self.target(to)
            .await?
            .handle_get_successor(Some(&self.self_id), key)
            .await
    }

    async fn get_predecessor(&self, to: &PeerDescriptor, key: &Key) -> Result<PeerDescriptor> {
        self.target(to)
            .await?
            .handle_get_predecessor(Some(&self.self_id), key)
            .await
    }

    async fn notify(&self, to: &PeerDescriptor, new_peer: &PeerDescriptor) -> Result<()> {
        self.target(to).await?.handle_notify(new_peer.clone()).await
    }

    async fn leave_to_successor(
        &self,
        to: &PeerDescriptor,
        new_pred: &PeerDescriptor,
        new_min: &Key,
    ) -> Result<()> {
        self.target(to)
            .await?
            .handle_leave(
                Some(&self.self_id),
                Some(new_pred.clone()),
                Some(new_min.clone()),
                None,
            )
            .await
    }

    async fn leave_to_predecessor(
        &self,
        to: &PeerDescriptor,
        new_succ: &PeerDescriptor,
    ) -> Result<()> {
        self.target(to)
            .await?
            .handle_leave(Some(&self.self_id), None, None, Some(new_succ.clone()))
            .await
    }

    async fn create_fragment(
        &self,
        to: &PeerDescriptor,
        key: &Key,
        fragment: &DataFragment,
    ) -> Result<()> {
        self.target(to)
            .await?
            .handle_create_fragment(key.clone(), fragment.clone())
            .await
    }

    async fn read_fragment(&self, to: &PeerDescriptor, key: &Key) -> Result<DataFragment> {
        self.target(to).await?.handle_read_fragment(key).await
    }

    async fn synchronize(&self, to: &PeerDescriptor, keys: &[Key]) -> Result<()> {
        self.target(to).await?.handle_synchronize(keys.to_vec()).await
    }

    async fn maintenance(&self, to: &PeerDescriptor) -> Result<()> {
        self.target(to).await?.handle_maintenance();
        Ok(())
    }
}

/// A ring of in-process peers behind one registry.
struct TestRing {
    registry: Arc<Registry>,
    peers: Vec<Peer<TestNetwork>>,
}

impl TestRing {
    fn config() -> PeerConfig {
        PeerConfig { maintenance_interval: Duration::from_millis(400) }
    }

    /// Start a chord with one peer at port 5055.
    async fn start() -> TestRing {
        let registry = Arc::new(Registry::default());
        let first = Self::spawn_peer(&registry, 5055).await;
        first.start_chord().await.expect("start_chord failed");
        TestRing { registry, peers: vec![first] }
    }

    /// Start a chord and have `count - 1` more peers join through the
    /// first, sequentially, as deployments do.
    async fn with_peers(count: usize) -> TestRing {
        let mut ring = Self::start().await;
        for i in 1..count {
            ring.join_peer(5000 + i as u16).await;
        }
        ring
    }

    async fn spawn_peer(registry: &Arc<Registry>, port: u16) -> Peer<TestNetwork> {
        let id = Key::from_plaintext(&format!("127.0.0.1:{port}"));
        let network = TestNetwork::new(registry.clone(), id);
        let peer = Peer::new("127.0.0.1", port, network, Self::config());
        registry.register(&peer).await;
        peer
    }

    async fn join_peer(&mut self, port: u16) {
        let gateway = self.peers[0].endpoint();
        let peer = Self::spawn_peer(&self.registry, port).await;
        timeout(OP_TIMEOUT, peer.join(&gateway))
            .await
            .expect("join timed out")
            .expect("join failed");
        self.peers.push(peer);
    }

    async fn create(&self, via: usize, key: &Key, value: &str) -> bool {
        timeout(OP_TIMEOUT, self.peers[via].create(key, value))
            .await
            .expect("create timed out")
            .expect("create errored")
    }

    async fn read(&self, via: usize, key: &Key) -> Result<String> {
        let block = timeout(OP_TIMEOUT, self.peers[via].read(key))
            .await
            .expect("read timed out")?;
        Ok(block.decode())
    }

    async fn shutdown(&self) {
        for peer in &self.peers {
            peer.shutdown().await;
        }
    }
}

#[tokio::test]
async fn lone_peer_write_and_read() {
    let ring = TestRing::start().await;
    let key = Key::from_plaintext("k1");

    assert!(ring.create(0, &key, "val").await);
    assert_eq!(ring.read(0, &key).await.unwrap(), "val");

    ring.shutdown().await;
}

#[tokio::test]
async fn value_written_in_a_full_ring_reads_from_a_non_owner() {
    let ring = TestRing::with_peers(14).await;
    let key = Key::from_plaintext("1");

    assert!(ring.create(0, &key, "val").await);
    assert_eq!(ring.read(0, &key).await.unwrap(), "val");
    assert_eq!(ring.read(7, &key).await.unwrap(), "val");

    ring.shutdown().await;
}

#[tokio::test]
async fn growth_preserves_stored_values() {
    let mut ring = TestRing::with_peers(14).await;
    let key = Key::from_plaintext("1");

    assert!(ring.create(0, &key, "val").await);
    assert_eq!(ring.read(7, &key).await.unwrap(), "val");

    sleep(Duration::from_secs(2)).await;

    for i in 14..28 {
        ring.join_peer(5000 + i as u16).await;
    }

    // Give maintenance a few sweeps to re-replicate onto the newcomers.
    sleep(Duration::from_secs(6)).await;

    assert_eq!(ring.read(0, &key).await.unwrap(), "val");
    assert_eq!(ring.read(7, &key).await.unwrap(), "val");
    assert_eq!(ring.read(14, &key).await.unwrap(), "val");
    assert_eq!(ring.read(27, &key).await.unwrap(), "val");

    ring.shutdown().await;
}

#[tokio::test]
async fn graceful_leave_preserves_availability() {
    let mut ring = TestRing::with_peers(14).await;
    let key = Key::from_plaintext("1");

    assert!(ring.create(0, &key, "val").await);

    sleep(Duration::from_secs(2)).await;

    for i in 14..28 {
        ring.join_peer(5000 + i as u16).await;
    }
    sleep(Duration::from_secs(6)).await;

    ring.peers[0].leave().await.expect("leave failed");
    ring.peers[1].leave().await.expect("leave failed");

    // The survivors hold at least the decode threshold of fragments, and
    // maintenance restores full replication.
    sleep(Duration::from_secs(6)).await;

    assert_eq!(ring.read(7, &key).await.unwrap(), "val");
    assert_eq!(ring.read(27, &key).await.unwrap(), "val");

    ring.shutdown().await;
}

#[tokio::test]
async fn create_fails_below_the_decode_threshold() {
    let ring = TestRing::with_peers(8).await;
    let key = Key::from_plaintext("undersized");

    // Eight peers cannot hold ten distinct placements.
    assert!(!ring.create(0, &key, "val").await);

    ring.shutdown().await;
}

#[tokio::test]
async fn values_are_fragmented_not_mirrored() {
    let ring = TestRing::with_peers(14).await;
    let key = Key::from_plaintext("spread");

    assert!(ring.create(0, &key, "val").await);

    // Every peer is a successor of the key in a 14-ring, so each holds
    // exactly one row of the block, not a full copy.
    let mut holders = 0;
    for peer in &ring.peers {
        if peer.holds(&key).await {
            holders += 1;
        }
    }
    assert!(holders >= 10, "only {holders} of 14 peers hold a fragment");

    ring.shutdown().await;
}
