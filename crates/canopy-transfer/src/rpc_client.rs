//! JSON-RPC query client
//!
//! Calls are multiplexed over one channel. Each request gets the next id
//! from a counter; a background task reads responses and completes the
//! matching pending call. When the channel closes every outstanding call
//! fails with [`TransferError::Closed`].
//!
//! [`QueryPeer`] owns the connection to the query peer: it connects on
//! first use and again after the previous channel closed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use canopy_layout::GraphNode;
use canopy_protocol::rpc::{
    method, DiscoverParams, ImpactParams, NodeGetParams, NodeList, Outcome, Request, Response,
    SearchParams,
};
use canopy_protocol::ProtocolError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TransferError};
use crate::transport::{Channel, Transport};

/// Query client settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcConfig {
    /// How long a call waits for its response
    pub timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

type Reply = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct Pending {
    calls: HashMap<u64, Reply>,
    closed: bool,
}

fn lock(pending: &Mutex<Pending>) -> MutexGuard<'_, Pending> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Multiplexing JSON-RPC client over a [`Channel`].
pub struct RpcClient {
    next_id: AtomicU64,
    pending: Arc<Mutex<Pending>>,
    outbound: mpsc::UnboundedSender<String>,
    config: RpcConfig,
    task: JoinHandle<()>,
}

impl RpcClient {
    /// Open a channel with `transport` and start the client on it.
    pub async fn connect(transport: &dyn Transport, address: &str, config: RpcConfig) -> Result<Self> {
        let channel = transport.connect(address).await?;
        debug!(%address, "RPC channel open");
        Ok(Self::new(channel, config))
    }

    /// Start the client on an open channel.
    pub fn new(channel: Box<dyn Channel>, config: RpcConfig) -> Self {
        let pending = Arc::new(Mutex::new(Pending::default()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(channel, outbound_rx, pending.clone()));
        Self {
            next_id: AtomicU64::new(1),
            pending,
            outbound,
            config,
            task,
        }
    }

    /// Issue `method` and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = Request::new(id, method, params).encode()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(TransferError::Closed);
            }
            pending.calls.insert(id, tx);
        }
        if self.outbound.send(text).is_err() {
            self.forget(id);
            return Err(TransferError::Closed);
        }
        debug!(id, method, "RPC request");

        match tokio::time::timeout(self.config.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransferError::Closed),
            Err(_) => {
                self.forget(id);
                warn!(id, method, "RPC call timed out");
                Err(TransferError::Timeout {
                    method: method.to_string(),
                    after: self.config.timeout,
                })
            }
        }
    }

    async fn call_typed<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> Result<T> {
        let params = serde_json::to_value(params).map_err(ProtocolError::Encode)?;
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|source| {
            ProtocolError::InvalidPayload {
                kind: method.to_string(),
                source,
            }
            .into()
        })
    }

    /// Nodes relevant to a free-text query.
    pub async fn discover(&self, query: &str, limit: usize) -> Result<Vec<GraphNode>> {
        let params = DiscoverParams::new(query).limit(limit);
        let list: NodeList = self.call_typed(method::DISCOVER, params).await?;
        Ok(list.nodes)
    }

    /// Name search on the peer, optionally filtered by kind.
    pub async fn search(&self, params: SearchParams) -> Result<Vec<GraphNode>> {
        let list: NodeList = self.call_typed(method::SEARCH, params).await?;
        Ok(list.nodes)
    }

    /// Blast radius of a change to `node`, as the peer reports it.
    pub async fn impact(&self, params: ImpactParams) -> Result<Value> {
        self.call_typed(method::IMPACT, params).await
    }

    /// One node by id; `None` if the peer answers null.
    pub async fn node_get(&self, id: &str) -> Result<Option<GraphNode>> {
        let params = NodeGetParams { id: id.to_string() };
        self.call_typed(method::NODE_GET, params).await
    }

    /// Whether the channel has closed; every further call fails.
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// Number of calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        lock(&self.pending).calls.len()
    }

    fn forget(&self, id: u64) {
        lock(&self.pending).calls.remove(&id);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Lazily connected, reconnecting handle on the query peer.
pub struct QueryPeer {
    transport: Arc<dyn Transport>,
    address: String,
    config: RpcConfig,
    client: AsyncMutex<Option<Arc<RpcClient>>>,
}

impl QueryPeer {
    /// Nothing is connected until the first [`QueryPeer::client`] call.
    pub fn new(transport: Arc<dyn Transport>, address: impl Into<String>, config: RpcConfig) -> Self {
        Self {
            transport,
            address: address.into(),
            config,
            client: AsyncMutex::new(None),
        }
    }

    /// The live client, connecting first if there is none or the last one
    /// closed. Connecting is bounded by the call timeout.
    pub async fn client(&self) -> Result<Arc<RpcClient>> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref().filter(|c| !c.is_closed()) {
            return Ok(client.clone());
        }
        if slot.take().is_some() {
            debug!(address = %self.address, "Query peer channel closed, reconnecting");
        }

        let connect = RpcClient::connect(self.transport.as_ref(), &self.address, self.config);
        let client = match tokio::time::timeout(self.config.timeout, connect).await {
            Ok(client) => Arc::new(client?),
            Err(_) => {
                return Err(TransferError::Timeout {
                    method: "connect".to_string(),
                    after: self.config.timeout,
                })
            }
        };
        info!(address = %self.address, "Connected to query peer");
        *slot = Some(client.clone());
        Ok(client)
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

async fn serve(
    mut channel: Box<dyn Channel>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    pending: Arc<Mutex<Pending>>,
) {
    loop {
        tokio::select! {
            msg = channel.recv() => match msg {
                Ok(Some(text)) => route(&pending, &text),
                Ok(None) => {
                    debug!("RPC channel closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "RPC channel failed");
                    break;
                }
            },
            request = outbound.recv() => match request {
                Some(text) => {
                    if let Err(e) = channel.send(&text).await {
                        warn!(error = %e, "RPC send failed");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let orphaned: Vec<Reply> = {
        let mut pending = lock(&pending);
        pending.closed = true;
        pending.calls.drain().map(|(_, reply)| reply).collect()
    };
    if !orphaned.is_empty() {
        debug!(count = orphaned.len(), "Failing pending RPC calls");
    }
    for reply in orphaned {
        let _ = reply.send(Err(TransferError::Closed));
    }
    if let Err(e) = channel.close().await {
        debug!(error = %e, "RPC close failed");
    }
}

/// Complete the pending call a response belongs to.
fn route(pending: &Mutex<Pending>, text: &str) {
    let response = match Response::decode(text) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Discarding RPC response");
            return;
        }
    };
    let Some(id) = response.id else {
        warn!(error = ?response.error, "RPC response without id");
        return;
    };
    let Some(reply) = lock(pending).calls.remove(&id) else {
        warn!(id, "RPC response for unknown id, dropping");
        return;
    };

    let result = match response.into_outcome() {
        Ok(Outcome::Success(value)) => Ok(value),
        Ok(Outcome::Failure(error)) => Err(TransferError::Rpc(error)),
        Err(e) => Err(e.into()),
    };
    let _ = reply.send(result);
}
