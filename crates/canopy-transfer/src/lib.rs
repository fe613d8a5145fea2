//! Canopy Transfer
//!
//! Everything that talks to the graph peer over a socket:
//!
//! - [`Transport`] / [`Channel`]: the seam between policy and sockets, with a
//!   newline-delimited [`TcpTransport`]
//! - [`ConnectionManager`]: the single streaming session, reconnecting with
//!   exponential backoff until disposed
//! - [`RpcClient`]: JSON-RPC queries multiplexed over their own channel,
//!   with [`QueryPeer`] connecting it lazily and again after a close

mod connection;
mod error;
mod rpc_client;
mod transport;

pub use connection::{
    Backoff, ConnectionManager, ConnectionStatus, ReconnectPolicy, FRAME_BUFFER,
};
pub use error::{Result, TransferError};
pub use rpc_client::{QueryPeer, RpcClient, RpcConfig};
pub use transport::{Channel, TcpChannel, TcpTransport, Transport};
