//! TCP transport adapter.
//!
//! One side of this module is [`RpcClient`], the production implementation
//! of [`PeerRpc`]: it opens a fresh connection per request, writes the JSON
//! envelope, and reads back a single JSON response. The other side is the
//! server loop: [`spawn_server`] accepts connections and runs a session
//! task per connection, each session reading envelopes off the stream,
//! dispatching them to the peer's handlers, and writing the
//! `SUCCESS`/`ERRORS` response.
//!
//! Messages are plain concatenated JSON values over the stream, so framing
//! is a matter of incremental parsing: bytes accumulate in a session buffer
//! until a complete value parses, and whatever follows it stays buffered
//! for the next read. The buffer is capped at
//! [`MAX_REQUEST_BYTES`](crate::messages::MAX_REQUEST_BYTES).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::block::DataFragment;
use crate::descriptor::PeerDescriptor;
use crate::key::Key;
use crate::messages::{
    error_response, expect_success, ok_response, Command, FragmentResponse, JoinResponse,
    Request, MAX_REQUEST_BYTES,
};
use crate::peer::Peer;
use crate::protocols::PeerRpc;

/// Ceiling on a full request/response exchange. A peer that has silently
/// gone away must not wedge routing or maintenance.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound JSON-over-TCP client, one connection per request.
#[derive(Debug, Clone)]
pub struct RpcClient {
    self_id: Key,
}

impl RpcClient {
    /// A client whose requests are stamped with `self_id` as the sender.
    pub fn new(self_id: Key) -> RpcClient {
        RpcClient { self_id }
    }

    async fn call(&self, endpoint: &str, request: &Request) -> Result<Value> {
        let exchange = async {
            let mut stream = TcpStream::connect(endpoint)
                .await
                .with_context(|| format!("connecting to {endpoint}"))?;
            let encoded = serde_json::to_vec(request)?;
            stream.write_all(&encoded).await?;

            let mut buffer = Vec::new();
            read_value(&mut stream, &mut buffer).await
        };

        tokio::time::timeout(REQUEST_TIMEOUT, exchange)
            .await
            .map_err(|_| anyhow!("request to {endpoint} timed out"))?
    }

    /// Send an addressed command to a peer and unwrap the response body.
    async fn request(&self, to: &PeerDescriptor, command: Command) -> Result<Value> {
        let request = Request::addressed(&self.self_id, &to.id, command);
        let response = self.call(&to.endpoint(), &request).await?;
        expect_success(response)
    }
}

#[async_trait]
impl PeerRpc for RpcClient {
    async fn join(&self, gateway: &str, joiner: &PeerDescriptor) -> Result<PeerDescriptor> {
        let request = Request::bare(Command::Join { new_peer: joiner.clone() });
        let body = expect_success(self.call(gateway, &request).await?)?;
        let response: JoinResponse = serde_json::from_value(body)?;
        Ok(response.predecessor)
    }

    async fn get_successor(&self, to: &PeerDescriptor, key: &Key) -> Result<PeerDescriptor> {
        let body = self.request(to, Command::GetSuccessor { key: key.clone() }).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn get_predecessor(&self, to: &PeerDescriptor, key: &Key) -> Result<PeerDescriptor> {
        let body = self.request(to, Command::GetPredecessor { key: key.clone() }).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn notify(&self, to: &PeerDescriptor, new_peer: &PeerDescriptor) -> Result<()> {
        // Notifications carry the recipient inside the payload rather than
        // the envelope.
        let request = Request::bare(Command::Notify {
            new_peer: new_peer.clone(),
            recipient: to.id.clone(),
        });
        expect_success(self.call(&to.endpoint(), &request).await?)?;
        Ok(())
    }

    async fn leave_to_successor(
        &self,
        to: &PeerDescriptor,
        new_pred: &PeerDescriptor,
        new_min: &Key,
    ) -> Result<()> {
        self.request(
            to,
            Command::Leave {
                new_pred: Some(new_pred.clone()),
                new_min: Some(new_min.clone()),
                new_succ: None,
            },
        )
        .await?;
        Ok(())
    }

    async fn leave_to_predecessor(
        &self,
        to: &PeerDescriptor,
        new_succ: &PeerDescriptor,
    ) -> Result<()> {
        self.request(
            to,
            Command::Leave {
                new_pred: None,
                new_min: None,
                new_succ: Some(new_succ.clone()),
            },
        )
        .await?;
        Ok(())
    }

    async fn create_fragment(
        &self,
        to: &PeerDescriptor,
        key: &Key,
        fragment: &DataFragment,
    ) -> Result<()> {
        self.request(
            to,
            Command::CreateFragment {
                key: key.clone(),
                fragment: fragment.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    async fn read_fragment(&self, to: &PeerDescriptor, key: &Key) -> Result<DataFragment> {
        let body = self.request(to, Command::ReadFragment { key: key.clone() }).await?;
        let response: FragmentResponse = serde_json::from_value(body)?;
        Ok(response.fragment.parse()?)
    }

    async fn synchronize(&self, to: &PeerDescriptor, keys: &[Key]) -> Result<()> {
        self.request(to, Command::Synchronize { keys: keys.to_vec() }).await?;
        Ok(())
    }

    async fn maintenance(&self, to: &PeerDescriptor) -> Result<()> {
        self.request(to, Command::Maintenance).await?;
        Ok(())
    }
}

/// Accept connections for `peer` in a background task.
///
/// The task handle is registered with the peer, so a graceful leave stops
/// the acceptor; sessions already running finish their in-flight request
/// and drain.
pub async fn spawn_server<N: PeerRpc>(peer: Peer<N>, listener: TcpListener) {
    let acceptor = {
        let peer = peer.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(%remote, "accepted connection");
                        let peer = peer.clone();
                        tokio::spawn(async move {
                            if let Err(error) = handle_connection(peer, stream).await {
                                debug!(%remote, %error, "session ended");
                            }
                        });
                    }
                    Err(error) => {
                        warn!(%error, "accept failed");
                        break;
                    }
                }
            }
        })
    };

    peer.register_task(acceptor).await;
}

/// Run one session: read envelopes, dispatch, respond, until the client
/// hangs up or the stream turns to garbage.
async fn handle_connection<N: PeerRpc>(peer: Peer<N>, mut stream: TcpStream) -> Result<()> {
    let mut buffer = Vec::new();
    loop {
        let value = match read_value(&mut stream, &mut buffer).await {
            Ok(value) => value,
            Err(error) => {
                // EOF between requests is a normal hang-up; anything else
                // gets a failure envelope before the session closes.
                if !buffer.is_empty() {
                    let response = error_response(&error.to_string());
                    let _ = stream.write_all(&serde_json::to_vec(&response)?).await;
                }
                return Ok(());
            }
        };

        let response = match serde_json::from_value::<Request>(value) {
            Err(_) => error_response("Invalid command."),
            Ok(request) => match dispatch(&peer, request).await {
                Ok(body) => ok_response(body),
                Err(error) => error_response(&error.to_string()),
            },
        };

        stream.write_all(&serde_json::to_vec(&response)?).await?;
    }
}

/// Route one request to the matching peer handler and shape its response
/// body.
async fn dispatch<N: PeerRpc>(peer: &Peer<N>, request: Request) -> Result<Value> {
    // Envelope-addressed commands are dropped when they were meant for
    // someone else.
    if let Some(recipient) = &request.recipient {
        if recipient != peer.id() {
            bail!("request addressed to {recipient}, but this peer is {}", peer.id());
        }
    }
    let sender = request.sender;

    match request.command {
        Command::Join { new_peer } => {
            let predecessor = peer.handle_join(new_peer).await?;
            Ok(serde_json::to_value(JoinResponse { predecessor })?)
        }
        Command::GetSuccessor { key } => {
            let successor = peer.handle_get_successor(sender.as_ref(), &key).await?;
            Ok(serde_json::to_value(successor)?)
        }
        Command::GetPredecessor { key } => {
            let predecessor = peer.handle_get_predecessor(sender.as_ref(), &key).await?;
            Ok(serde_json::to_value(predecessor)?)
        }
        Command::Notify { new_peer, recipient } => {
            if &recipient != peer.id() {
                bail!("notification addressed to {recipient}, but this peer is {}", peer.id());
            }
            peer.handle_notify(new_peer).await?;
            Ok(Value::Null)
        }
        Command::Leave { new_pred, new_min, new_succ } => {
            peer.handle_leave(sender.as_ref(), new_pred, new_min, new_succ).await?;
            Ok(Value::Null)
        }
        Command::CreateFragment { key, fragment } => {
            peer.handle_create_fragment(key, fragment.parse()?).await?;
            Ok(Value::Null)
        }
        Command::ReadFragment { key } => {
            let fragment = peer.handle_read_fragment(&key).await?;
            Ok(serde_json::to_value(FragmentResponse {
                fragment: fragment.to_string(),
            })?)
        }
        Command::Synchronize { keys } => {
            peer.handle_synchronize(keys).await?;
            Ok(Value::Null)
        }
        Command::Maintenance => {
            peer.handle_maintenance();
            Ok(Value::Null)
        }
    }
}

/// Read one JSON value off the stream, buffering partial input.
///
/// Bytes past the value's end are left in `buffer` for the next call.
async fn read_value(stream: &mut TcpStream, buffer: &mut Vec<u8>) -> Result<Value> {
    loop {
        if !buffer.is_empty() {
            let mut values =
                serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => {
                    let consumed = values.byte_offset();
                    buffer.drain(..consumed);
                    return Ok(value);
                }
                Some(Err(error)) if error.is_eof() => {
                    // A prefix of a value; keep reading.
                }
                Some(Err(error)) => {
                    return Err(error).context("malformed request");
                }
                None => {}
            }
        }

        if buffer.len() > MAX_REQUEST_BYTES {
            bail!("request exceeds {MAX_REQUEST_BYTES} bytes");
        }

        let mut chunk = [0u8; 2048];
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            bail!("connection closed");
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}
