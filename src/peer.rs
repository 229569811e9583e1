//! The peer.
//!
//! A [`Peer`] owns one slice of the ring: its identifier, the key range it
//! answers for, an optional predecessor, a bounded successor list, a finger
//! table, and the fragment database. Everything it knows about the rest of
//! the ring arrives through the handlers at the bottom of this file and
//! through the answers to its own outbound calls, made via the [`PeerRpc`]
//! network it was constructed with.
//!
//! ## Concurrency
//!
//! Mutable state lives behind `tokio::sync::RwLock`s inside a shared `Arc`,
//! so a `Peer` handle is cheap to clone into server sessions and background
//! tasks. Locks are taken for the duration of a local read or write only,
//! never across an outbound call; the call graph is reentrant across peers
//! (a handler may forward, and the forwarded-to peer may call back), and
//! holding state across the wire would deadlock the ring.
//!
//! ## Maintenance
//!
//! Every peer runs one periodic maintenance task, cancelled at shutdown.
//! A tick stabilizes the finger table and successor list, pushes keys in
//! our range to our successors, evicts keys that no longer belong here, and
//! then passes a `MAINTENANCE` message to the first successor, so a tick
//! anywhere sweeps the whole ring. The periodic timer on every peer means a
//! lost walk token costs one interval, not the ring's convergence.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::block::{DataBlock, DataFragment};
use crate::descriptor::{PeerDescriptor, SuccessorList, NUM_REPLICAS};
use crate::finger::{Finger, FingerTable};
use crate::ida::DECODE_THRESHOLD;
use crate::key::Key;
use crate::protocols::PeerRpc;
use crate::store::Database;

/// Tunables that differ between production and test rings.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Delay between maintenance ticks.
    pub maintenance_interval: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig { maintenance_interval: Duration::from_secs(10) }
    }
}

/// Where a routed request should go next.
enum RouteTarget {
    /// We are the responsible peer.
    Local,
    /// Forward to this peer.
    Remote(PeerDescriptor),
}

/// A handle to a locally-running peer. Clones share one peer.
pub struct Peer<N: PeerRpc> {
    shared: Arc<PeerShared<N>>,
}

impl<N: PeerRpc> Clone for Peer<N> {
    fn clone(&self) -> Self {
        Peer { shared: self.shared.clone() }
    }
}

struct PeerShared<N: PeerRpc> {
    id: Key,
    ip_addr: String,
    port: u16,
    min_key: RwLock<Key>,
    predecessor: RwLock<Option<PeerDescriptor>>,
    successors: RwLock<SuccessorList>,
    fingers: RwLock<FingerTable>,
    database: RwLock<Database>,
    network: N,
    config: PeerConfig,
    running: AtomicBool,
    maintaining: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<N: PeerRpc> Peer<N> {
    /// A peer at `ip:port`. Until it starts a chord or joins one, it covers
    /// only its own id and talks to nobody.
    pub fn new(ip_addr: &str, port: u16, network: N, config: PeerConfig) -> Peer<N> {
        let descriptor = PeerDescriptor::new(ip_addr, port);
        info!(id = %descriptor.id, port, "creating peer");
        Peer {
            shared: Arc::new(PeerShared {
                min_key: RwLock::new(descriptor.min_key),
                fingers: RwLock::new(FingerTable::new(descriptor.id.clone())),
                id: descriptor.id,
                ip_addr: ip_addr.to_string(),
                port,
                predecessor: RwLock::new(None),
                successors: RwLock::new(SuccessorList::new(NUM_REPLICAS)),
                database: RwLock::new(Database::new()),
                network,
                config,
                running: AtomicBool::new(false),
                maintaining: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// This peer's ring identifier, the hash of its endpoint.
    pub fn id(&self) -> &Key {
        &self.shared.id
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.shared.ip_addr, self.shared.port)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The current wire descriptor of this peer.
    pub async fn descriptor(&self) -> PeerDescriptor {
        PeerDescriptor {
            id: self.shared.id.clone(),
            min_key: self.shared.min_key.read().await.clone(),
            max_key: self.shared.id.clone(),
            ip_addr: self.shared.ip_addr.clone(),
            port: self.shared.port,
            latency: 0,
        }
    }

    /// Does this peer hold a fragment for `key`?
    pub async fn holds(&self, key: &Key) -> bool {
        self.shared.database.read().await.contains(key)
    }

    /// Keep a background task for this peer; it is aborted at shutdown.
    pub(crate) async fn register_task(&self, handle: JoinHandle<()>) {
        self.shared.tasks.lock().await.push(handle);
    }

    // ------------------------------------------------------------------
    // Join / leave
    // ------------------------------------------------------------------

    /// Become the sole peer of a new chord: our range is the whole ring,
    /// wrapping from just past our id back around to it.
    pub async fn start_chord(&self) -> Result<()> {
        info!(id = %self.id(), "starting a new chord");
        *self.shared.min_key.write().await = self.id() + 1;
        self.shared.running.store(true, Ordering::SeqCst);
        self.spawn_maintenance().await;
        Ok(())
    }

    /// Join an existing chord through any reachable member.
    ///
    /// The gateway resolves our would-be predecessor; we adopt it, build a
    /// cold-start finger table through it, and then announce ourselves to
    /// the peers whose successor lists we belong in.
    pub async fn join(&self, gateway: &str) -> Result<()> {
        info!(id = %self.id(), gateway, "joining chord");
        self.shared.running.store(true, Ordering::SeqCst);

        let ourselves = self.descriptor().await;
        let predecessor = self.shared.network.join(gateway, &ourselves).await?;
        info!(predecessor = %predecessor.id, "gateway resolved our predecessor");
        *self.shared.min_key.write().await = &predecessor.id + 1;
        *self.shared.predecessor.write().await = Some(predecessor);

        self.populate_finger_table(true).await?;

        // Announce ourselves to the peers that should now list us among
        // their successors, then to our own first successor.
        let ourselves = self.descriptor().await;
        let predecessors =
            self.get_n_predecessors(None, &ourselves.id, NUM_REPLICAS).await?;
        for peer in predecessors {
            if peer.id == ourselves.id {
                continue;
            }
            if let Err(error) = self.shared.network.notify(&peer, &ourselves).await {
                debug!(to = %peer.id, %error, "notify failed");
            }
        }

        let walk = self.get_n_successors(None, &ourselves.id, NUM_REPLICAS).await?;
        *self.shared.successors.write().await =
            SuccessorList::from_peers(NUM_REPLICAS, walk);

        let first = self.shared.successors.read().await.first().cloned();
        if let Some(first) = first {
            if first.id != ourselves.id {
                if let Err(error) = self.shared.network.notify(&first, &ourselves).await {
                    warn!(to = %first.id, %error, "successor notify failed");
                }
            }
        }

        self.spawn_maintenance().await;
        Ok(())
    }

    /// Leave gracefully: hand our range to our successor, hand our
    /// successor to our predecessor's finger table, and stop. Fragments are
    /// not migrated here; the next maintenance sweep re-replicates them.
    pub async fn leave(&self) -> Result<()> {
        info!(id = %self.id(), "leaving the chord");
        let predecessor = self.shared.predecessor.read().await.clone();
        let first = self.shared.successors.read().await.first().cloned();
        let min_key = self.shared.min_key.read().await.clone();

        if let (Some(predecessor), Some(first)) = (predecessor, first) {
            let new_min = &min_key + 1;
            if let Err(error) = self
                .shared
                .network
                .leave_to_successor(&first, &predecessor, &new_min)
                .await
            {
                warn!(to = %first.id, %error, "leave notice to successor failed");
            }

            let mut handoff = first.clone();
            handoff.min_key = min_key;
            if let Err(error) = self
                .shared
                .network
                .leave_to_predecessor(&predecessor, &handoff)
                .await
            {
                warn!(to = %predecessor.id, %error, "leave notice to predecessor failed");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop the server and maintenance tasks without notifying anyone; the
    /// ring sees this as a failure.
    pub async fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let mut tasks = self.shared.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    // ------------------------------------------------------------------
    // Put / get
    // ------------------------------------------------------------------

    /// Encode `value` and place one fragment on each of the key's
    /// successors. True iff enough placements succeeded that the value can
    /// be read back.
    pub async fn create(&self, key: &Key, value: &str) -> Result<bool> {
        let block = DataBlock::encode(value, true)?;
        let successors = self.get_n_successors(None, key, NUM_REPLICAS).await?;
        if successors.len() < DECODE_THRESHOLD {
            return Ok(false);
        }

        let mut placed = 0usize;
        for (fragment, successor) in block.fragments().iter().zip(successors.iter()) {
            if successor.id == *self.id() {
                // In rings smaller than the fragment count we occupy
                // several placement slots; keep each slot's row.
                let mut database = self.shared.database.write().await;
                if database.absorb(key.clone(), fragment.clone()).is_ok() {
                    placed += 1;
                }
            } else if self.create_fragment(None, successor, key, fragment).await {
                placed += 1;
            }
        }

        debug!(%key, placed, "create finished");
        Ok(placed >= DECODE_THRESHOLD)
    }

    /// Gather distinct fragments from the key's successors until the value
    /// can be reconstructed.
    pub async fn read(&self, key: &Key) -> Result<DataBlock> {
        let successors = self.get_n_successors(None, key, NUM_REPLICAS).await?;
        let mut fragments: BTreeSet<DataFragment> = BTreeSet::new();

        for successor in &successors {
            if fragments.len() >= DECODE_THRESHOLD {
                break;
            }
            if successor.id == *self.id() {
                let database = self.shared.database.read().await;
                for fragment in database.fragments(key) {
                    fragments.insert(fragment.clone());
                }
            } else {
                match self.shared.network.read_fragment(successor, key).await {
                    Ok(fragment) => {
                        fragments.insert(fragment);
                    }
                    Err(error) => {
                        // Not every successor holds the key; try the next.
                        debug!(to = %successor.id, %error, "fragment fetch failed");
                    }
                }
            }
        }

        if fragments.len() < DECODE_THRESHOLD {
            bail!(
                "Read failed: collected {} of {DECODE_THRESHOLD} fragments for {key}",
                fragments.len()
            );
        }
        let fragments: Vec<DataFragment> = fragments.into_iter().collect();
        Ok(DataBlock::from_fragments(&fragments)?)
    }

    /// Ask `recipient` to store one fragment. Refused without a wire call
    /// when the recipient is the requester we are serving or ourselves.
    async fn create_fragment(
        &self,
        requester: Option<&Key>,
        recipient: &PeerDescriptor,
        key: &Key,
        fragment: &DataFragment,
    ) -> bool {
        if requester == Some(&recipient.id) || recipient.id == *self.id() {
            return false;
        }
        self.shared
            .network
            .create_fragment(recipient, key, fragment)
            .await
            .is_ok()
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    /// Is `key` in the range this peer stores, `[min_key, id]` clockwise?
    async fn stored_locally(&self, key: &Key) -> bool {
        let min_key = self.shared.min_key.read().await;
        key.in_between(&min_key, self.id(), true)
    }

    /// Pick the next hop for a request about `key`.
    ///
    /// The finger table's answer is overridden when it would bounce the
    /// request straight back to the peer we are serving (or to ourselves):
    /// during joins the tables briefly disagree, and without this a lookup
    /// ping-pongs between two peers until their next stabilization.
    async fn route_target(&self, requester: Option<&Key>, key: &Key) -> RouteTarget {
        let target = { self.shared.fingers.read().await.lookup(key).cloned() };
        if let Some(target) = target {
            let bounces = requester == Some(&target.id) || target.id == *self.id();
            if !bounces {
                return RouteTarget::Remote(target);
            }
        }

        let predecessor = self.shared.predecessor.read().await.clone();
        match predecessor {
            // Alone in the ring: we are the answer.
            None => RouteTarget::Local,
            Some(predecessor) => {
                if requester == Some(&predecessor.id) {
                    let first = self.shared.successors.read().await.first().cloned();
                    match first {
                        Some(first)
                            if requester != Some(&first.id) && first.id != *self.id() =>
                        {
                            RouteTarget::Remote(first)
                        }
                        _ => RouteTarget::Local,
                    }
                } else {
                    RouteTarget::Remote(predecessor)
                }
            }
        }
    }

    /// The peer whose range contains `key`.
    async fn get_successor(&self, requester: Option<&Key>, key: &Key) -> Result<PeerDescriptor> {
        if self.stored_locally(key).await {
            return Ok(self.descriptor().await);
        }

        match self.route_target(requester, key).await {
            RouteTarget::Local => Ok(self.descriptor().await),
            RouteTarget::Remote(target) => {
                match self.shared.network.get_successor(&target, key).await {
                    Ok(successor) => Ok(successor),
                    Err(error) => {
                        debug!(%error, "forward failed, retrying via predecessor");
                        let predecessor = self.shared.predecessor.read().await.clone();
                        match predecessor {
                            Some(predecessor) if predecessor.id != target.id => {
                                self.shared.network.get_successor(&predecessor, key).await
                            }
                            _ => Err(error),
                        }
                    }
                }
            }
        }
    }

    /// Walk the ring clockwise from `key`, collecting `n` successors.
    /// Stops early if the walk returns to where it started, so a small ring
    /// yields a short list rather than repeating itself to length.
    async fn get_n_successors(
        &self,
        requester: Option<&Key>,
        key: &Key,
        n: usize,
    ) -> Result<Vec<PeerDescriptor>> {
        let mut successors = Vec::new();
        let mut previous = key.clone();
        for i in 0..n {
            let next = self.get_successor(requester, &(&previous + 1)).await?;
            let next_id = next.id.clone();
            successors.push(next);
            if previous == *key && i != 0 {
                break;
            }
            previous = next_id;
        }
        Ok(successors)
    }

    /// The peer immediately preceding `key` on the ring.
    async fn get_predecessor(
        &self,
        requester: Option<&Key>,
        key: &Key,
    ) -> Result<PeerDescriptor> {
        let predecessor = self.shared.predecessor.read().await.clone();
        let Some(predecessor) = predecessor else {
            // No predecessor means no other peer is known yet; the lone
            // peer is every key's predecessor.
            return Ok(self.descriptor().await);
        };

        if self.stored_locally(key).await {
            return Ok(predecessor);
        }

        match self.route_target(requester, key).await {
            RouteTarget::Local => Ok(predecessor),
            RouteTarget::Remote(target) => {
                self.shared.network.get_predecessor(&target, key).await
            }
        }
    }

    /// Counter-clockwise counterpart of [`Peer::get_n_successors`].
    async fn get_n_predecessors(
        &self,
        requester: Option<&Key>,
        key: &Key,
        n: usize,
    ) -> Result<Vec<PeerDescriptor>> {
        let mut predecessors = Vec::new();
        let mut previous = key.clone();
        for i in 0..n {
            let next = self.get_predecessor(requester, &(&previous - 1)).await?;
            let next_id = next.id.clone();
            predecessors.push(next);
            if previous == *key && i != 0 {
                break;
            }
            previous = next_id;
        }
        Ok(predecessors)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    async fn spawn_maintenance(&self) {
        let peer = self.clone();
        let interval = self.shared.config.maintenance_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !peer.is_running() {
                    break;
                }
                peer.run_general_maintenance().await;
            }
        });
        self.register_task(handle).await;
    }

    /// One maintenance tick: stabilize, push, evict, pass the walk on.
    /// Transient failures are logged and retried by the next tick.
    async fn run_general_maintenance(&self) {
        if !self.is_running() || self.shared.successors.read().await.is_empty() {
            return;
        }
        if self.shared.maintaining.swap(true, Ordering::SeqCst) {
            // A tick is already in flight; drop this walk token.
            return;
        }
        debug!(id = %self.id(), "maintenance tick");

        if let Err(error) = self.stabilize().await {
            debug!(%error, "stabilize failed");
        }
        if self.is_running() {
            if let Err(error) = self.run_local_maintenance().await {
                debug!(%error, "local maintenance failed");
            }
        }
        if self.is_running() {
            if let Err(error) = self.run_global_maintenance().await {
                debug!(%error, "global maintenance failed");
            }
        }

        let first = self.shared.successors.read().await.first().cloned();
        if let Some(first) = first {
            if first.id != *self.id() && self.is_running() {
                if let Err(error) = self.shared.network.maintenance(&first).await {
                    debug!(to = %first.id, %error, "maintenance handoff failed");
                }
            }
        }
        self.shared.maintaining.store(false, Ordering::SeqCst);
    }

    /// Rebuild the finger table and the successor list from the live ring.
    async fn stabilize(&self) -> Result<()> {
        self.populate_finger_table(false).await?;
        let id = self.id().clone();
        let walk = self.get_n_successors(None, &id, NUM_REPLICAS).await?;
        *self.shared.successors.write().await =
            SuccessorList::from_peers(NUM_REPLICAS, walk);
        Ok(())
    }

    /// Resolve every finger's successor.
    ///
    /// On the cold start (`initialize`) we cannot route for ourselves yet:
    /// in-range bounds resolve to us, finger 0 is asked of our predecessor,
    /// and each later finger of the previous finger's successor. On
    /// stabilization the same chain is used against the live ring, falling
    /// back to local routing when a queried peer does not answer.
    async fn populate_finger_table(&self, initialize: bool) -> Result<()> {
        let ourselves = self.descriptor().await;
        let predecessor = self.shared.predecessor.read().await.clone();
        let entry_count = { self.shared.fingers.read().await.entry_count() };

        let mut entries: Vec<Finger> = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let (lower_bound, upper_bound) = { self.shared.fingers.read().await.range(i) };

            let successor = if initialize {
                if lower_bound.in_between(&ourselves.min_key, &ourselves.id, true) {
                    ourselves.clone()
                } else {
                    let queried = if i == 0 {
                        predecessor
                            .clone()
                            .ok_or_else(|| anyhow!("cold start requires a predecessor"))?
                    } else {
                        entries[i - 1].successor.clone()
                    };
                    if queried.id == ourselves.id {
                        self.get_successor(None, &lower_bound).await?
                    } else {
                        self.shared.network.get_successor(&queried, &lower_bound).await?
                    }
                }
            } else if i == 0 {
                self.get_successor(None, &lower_bound).await?
            } else {
                let queried = entries[i - 1].successor.clone();
                if queried.id == ourselves.id {
                    self.get_successor(None, &lower_bound).await?
                } else {
                    match self.shared.network.get_successor(&queried, &lower_bound).await {
                        Ok(successor) => successor,
                        Err(_) => self.get_successor(None, &lower_bound).await?,
                    }
                }
            };

            entries.push(Finger { lower_bound, upper_bound, successor });
        }

        let mut fingers = self.shared.fingers.write().await;
        fingers.replace(entries);
        debug!(id = %self.id(), table = %*fingers, "finger table rebuilt");
        Ok(())
    }

    /// Offer every successor the keys in our range, so a successor that
    /// lacks one can fetch it.
    async fn run_local_maintenance(&self) -> Result<()> {
        let ourselves = self.descriptor().await;
        let successors: Vec<PeerDescriptor> =
            self.shared.successors.read().await.iter().cloned().collect();

        for successor in successors {
            if successor.id == ourselves.id {
                continue;
            }
            let keys = {
                self.shared
                    .database
                    .read()
                    .await
                    .keys_in_range(&ourselves.min_key, &ourselves.id)
            };
            if keys.is_empty() {
                continue;
            }
            if let Err(error) = self.shared.network.synchronize(&successor, &keys).await {
                debug!(to = %successor.id, %error, "synchronize failed");
            }
        }
        Ok(())
    }

    /// Walk the ring and push out every key we hold that we are no longer a
    /// successor of. The local copy is deleted only once another successor
    /// accepted it.
    async fn run_global_maintenance(&self) -> Result<()> {
        let ourselves = self.descriptor().await;
        let mut current = ourselves.id.clone();

        loop {
            let successors = self.get_n_successors(None, &current, NUM_REPLICAS).await?;
            let Some(first) = successors.first().cloned() else {
                break;
            };

            let placed_here = successors.iter().any(|peer| peer.id == ourselves.id);
            if !placed_here {
                // Everything from the walk key to its first successor is
                // misplaced on us.
                let misplaced = {
                    self.shared.database.read().await.read_range(&current, &first.id)
                };
                for (key, fragment) in misplaced {
                    for successor in &successors {
                        if self.create_fragment(None, successor, &key, &fragment).await {
                            let _ = self.shared.database.write().await.delete(&key);
                            debug!(%key, to = %successor.id, "relocated misplaced key");
                            break;
                        }
                    }
                }
            }

            if first.id == current {
                // Routing is not advancing the walk; give up until the next
                // tick.
                break;
            }
            current = first.id.clone();
            let min_key = self.shared.min_key.read().await.clone();
            if current.in_between(&min_key, &ourselves.id, true) {
                break;
            }
        }
        Ok(())
    }

    /// Rebuild a key we should hold but do not: read the block back from
    /// the other replicas and keep one of its fragments.
    async fn retrieve_missing(&self, key: &Key) -> Result<()> {
        debug!(%key, "retrieving missing key");
        let block = self.read(key).await?;
        let fragment = {
            let mut rng = rand::thread_rng();
            block.fragments().choose(&mut rng).cloned()
        };
        let fragment = fragment.ok_or_else(|| anyhow!("reconstructed block is empty"))?;
        self.shared.database.write().await.insert(key.clone(), fragment)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Request handlers
    // ------------------------------------------------------------------

    /// `JOIN`: resolve the joiner's would-be predecessor.
    pub async fn handle_join(&self, new_peer: PeerDescriptor) -> Result<PeerDescriptor> {
        info!(joiner = %new_peer.id, "join request");
        self.get_predecessor(None, &new_peer.id).await
    }

    /// `GET_SUCC`.
    pub async fn handle_get_successor(
        &self,
        requester: Option<&Key>,
        key: &Key,
    ) -> Result<PeerDescriptor> {
        self.get_successor(requester, key).await
    }

    /// `GET_PRED`.
    pub async fn handle_get_predecessor(
        &self,
        requester: Option<&Key>,
        key: &Key,
    ) -> Result<PeerDescriptor> {
        self.get_predecessor(requester, key).await
    }

    /// `NOTIFY`: a peer has entered the ring. If it lands between our
    /// predecessor and us it becomes our predecessor; either way it may
    /// capture finger entries and a successor slot.
    pub async fn handle_notify(&self, new_peer: PeerDescriptor) -> Result<()> {
        let predecessor = self.shared.predecessor.read().await.clone();
        let becomes_predecessor = match &predecessor {
            None => true,
            Some(current) => new_peer.id.in_between(&current.id, self.id(), false),
        };

        if becomes_predecessor {
            self.shared.fingers.write().await.adjust_fingers(&new_peer);
            info!(
                old = ?predecessor.as_ref().map(|p| p.id.to_hex()),
                new = %new_peer.id,
                "adopting new predecessor"
            );
            *self.shared.min_key.write().await = &new_peer.id + 1;
            *self.shared.predecessor.write().await = Some(new_peer);
            return Ok(());
        }

        if self.shared.fingers.read().await.is_empty() {
            // First sign of a second peer: we can finally route, so build
            // the table.
            self.populate_finger_table(true).await?;
        }
        self.shared.fingers.write().await.adjust_fingers(&new_peer);
        self.shared.successors.write().await.insert(new_peer);
        Ok(())
    }

    /// `LEAVE`, from either side of the leaver.
    pub async fn handle_leave(
        &self,
        sender: Option<&Key>,
        new_pred: Option<PeerDescriptor>,
        new_min: Option<Key>,
        new_succ: Option<PeerDescriptor>,
    ) -> Result<()> {
        if let (Some(new_pred), Some(new_min)) = (new_pred, new_min) {
            let from_our_predecessor = {
                let predecessor = self.shared.predecessor.read().await;
                matches!((&*predecessor, sender), (Some(p), Some(s)) if p.id == *s)
            };
            if from_our_predecessor {
                info!(new_predecessor = %new_pred.id, "predecessor left");
                *self.shared.min_key.write().await = new_min;
                *self.shared.predecessor.write().await = Some(new_pred);
            }
        }

        if let Some(new_succ) = new_succ {
            let from_our_successor = {
                let successors = self.shared.successors.read().await;
                matches!((successors.first(), sender), (Some(f), Some(s)) if f.id == *s)
            };
            if from_our_successor {
                info!(replacement = %new_succ.id, "successor left");
                self.shared.fingers.write().await.adjust_fingers(&new_succ);
            }
        }
        Ok(())
    }

    /// `CREATE_FRAG`: store a fragment we were assigned. A peer holds at
    /// most one entry per key, so a duplicate is refused.
    pub async fn handle_create_fragment(&self, key: Key, fragment: DataFragment) -> Result<()> {
        debug!(%key, "storing fragment");
        self.shared.database.write().await.insert(key, fragment)?;
        Ok(())
    }

    /// `READ_FRAG`: return our fragment of the key.
    pub async fn handle_read_fragment(&self, key: &Key) -> Result<DataFragment> {
        let database = self.shared.database.read().await;
        match database.lookup(key) {
            Ok(fragment) => Ok(fragment.clone()),
            Err(_) => bail!("Fragment not stored locally."),
        }
    }

    /// `SYNCHRONIZE`: fetch whichever of the offered keys we lack.
    pub async fn handle_synchronize(&self, keys: Vec<Key>) -> Result<()> {
        for key in keys {
            let missing = { !self.shared.database.read().await.contains(&key) };
            if missing {
                if let Err(error) = self.retrieve_missing(&key).await {
                    debug!(%key, %error, "could not retrieve missing key");
                }
            }
        }
        Ok(())
    }

    /// `MAINTENANCE`: run our tick of the ring walk in the background so
    /// the sender is not blocked on it.
    pub fn handle_maintenance(&self) {
        let peer = self.clone();
        tokio::spawn(async move {
            peer.run_general_maintenance().await;
        });
    }
}
