//! Protocol trait for the networking layer.
//!
//! The peer never talks to a socket directly: every outbound operation goes
//! through [`PeerRpc`], which the TCP client in [`crate::rpc`] implements
//! for production and which integration tests implement over an in-process
//! registry. Keeping the trait separate from both lets the whole
//! join/route/replicate/maintain protocol run unchanged against either.
//!
//! Application-level rejections (a `SUCCESS: false` response) and transport
//! failures both surface as errors here; routing treats any failure as
//! permission to fall back to its predecessor or first successor.

use anyhow::Result;
use async_trait::async_trait;

use crate::block::DataFragment;
use crate::descriptor::PeerDescriptor;
use crate::key::Key;

/// Outbound requests a peer can make of another peer.
#[async_trait]
pub trait PeerRpc: Send + Sync + 'static {
    /// Ask a gateway (addressed directly, since the joiner knows no ids
    /// yet) for the would-be predecessor of `joiner`.
    async fn join(&self, gateway: &str, joiner: &PeerDescriptor) -> Result<PeerDescriptor>;

    /// Ask `to` for the successor of `key`.
    async fn get_successor(&self, to: &PeerDescriptor, key: &Key) -> Result<PeerDescriptor>;

    /// Ask `to` for the predecessor of `key`.
    async fn get_predecessor(&self, to: &PeerDescriptor, key: &Key) -> Result<PeerDescriptor>;

    /// Tell `to` that `new_peer` has entered the ring.
    async fn notify(&self, to: &PeerDescriptor, new_peer: &PeerDescriptor) -> Result<()>;

    /// Tell our successor we are leaving: it adopts `new_pred` and the new
    /// lower bound of its range.
    async fn leave_to_successor(
        &self,
        to: &PeerDescriptor,
        new_pred: &PeerDescriptor,
        new_min: &Key,
    ) -> Result<()>;

    /// Tell our predecessor we are leaving: `new_succ` replaces us in its
    /// finger table.
    async fn leave_to_predecessor(
        &self,
        to: &PeerDescriptor,
        new_succ: &PeerDescriptor,
    ) -> Result<()>;

    /// Place one fragment of `key` on `to`. Fails if `to` already holds the
    /// key.
    async fn create_fragment(
        &self,
        to: &PeerDescriptor,
        key: &Key,
        fragment: &DataFragment,
    ) -> Result<()>;

    /// Fetch `to`'s fragment of `key`. Fails if `to` does not hold the key.
    async fn read_fragment(&self, to: &PeerDescriptor, key: &Key) -> Result<DataFragment>;

    /// Offer `to` the list of keys we hold in our range so it can fetch any
    /// it lacks.
    async fn synchronize(&self, to: &PeerDescriptor, keys: &[Key]) -> Result<()>;

    /// Pass the maintenance walk on to `to`.
    async fn maintenance(&self, to: &PeerDescriptor) -> Result<()>;
}
