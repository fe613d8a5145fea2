//! Canopy Protocol
//!
//! Messages exchanged with the graph peer.
//!
//! - **Frames**: `{type, payload}` text frames of the streaming session,
//!   decoded discriminator-first
//! - **Assembler**: turns a `graph_begin` .. `graph_end` session into one
//!   atomic [`GraphSnapshot`](canopy_layout::GraphSnapshot)
//! - **RPC**: JSON-RPC 2.0 request/response types for queries
//!
//! Nothing here does I/O; see `canopy-transfer` for the connection side.

mod assembler;
mod error;
mod frame;
pub mod rpc;

pub use assembler::{AssemblerState, AssemblerStats, Output, StreamAssembler};
pub use error::{ProtocolError, Result};
pub use frame::{
    Frame, Hello, OutboundFrame, TaggedMessage, EDGE_BATCH, GRAPH_BEGIN, GRAPH_END, HELLO,
    NODE_BATCH,
};
