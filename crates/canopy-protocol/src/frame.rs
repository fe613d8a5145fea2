//! Wire frames of the graph streaming protocol.
//!
//! Every frame is a JSON object `{"type": ..., "payload": ...}`. Decoding is
//! discriminator-first: the `type` string selects the payload shape, and
//! discriminators we do not model fall through to [`TaggedMessage`] so they
//! can be forwarded untouched.

use canopy_layout::{GraphEdge, GraphNode};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, Result};

/// Discriminator of the peer greeting.
pub const HELLO: &str = "hello";
/// Discriminator opening a streaming session.
pub const GRAPH_BEGIN: &str = "graph_begin";
/// Discriminator of a batch of nodes.
pub const NODE_BATCH: &str = "node_batch";
/// Discriminator of a batch of edges.
pub const EDGE_BATCH: &str = "edge_batch";
/// Discriminator closing a streaming session.
pub const GRAPH_END: &str = "graph_end";

/// Peer capability announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hello {
    #[serde(deserialize_with = "version_string")]
    pub version: String,
    pub node_count: usize,
    pub edge_count: usize,
}

/// Accept the version as either a string or a number.
fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Deserialize)]
struct NodeBatch {
    nodes: Vec<GraphNode>,
}

#[derive(Deserialize)]
struct EdgeBatch {
    edges: Vec<GraphEdge>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

/// A frame we do not interpret, kept with its own type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// An inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Peer greeting; answered with `ready_for_graph`
    Hello(Hello),
    /// Start of a streaming session
    GraphBegin,
    /// Nodes to append to the session
    NodeBatch(Vec<GraphNode>),
    /// Edges to append to the session
    EdgeBatch(Vec<GraphEdge>),
    /// End of the session
    GraphEnd,
    /// Any other tagged frame (focus, spotlight, status, ...)
    Other(TaggedMessage),
}

impl Frame {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let envelope: Envelope =
            serde_json::from_value(value).map_err(|_| ProtocolError::MissingType)?;
        Self::from_parts(envelope.kind, envelope.payload)
    }

    /// Interpret a payload against the shape selected by `kind`.
    pub fn from_parts(kind: String, payload: Value) -> Result<Self> {
        // Bracket frames and greetings may omit the payload entirely.
        let payload = match payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let invalid = |source| ProtocolError::InvalidPayload {
            kind: kind.clone(),
            source,
        };

        match kind.as_str() {
            HELLO => Ok(Frame::Hello(serde_json::from_value(payload).map_err(invalid)?)),
            GRAPH_BEGIN => Ok(Frame::GraphBegin),
            NODE_BATCH => {
                let batch: NodeBatch = serde_json::from_value(payload).map_err(invalid)?;
                Ok(Frame::NodeBatch(batch.nodes))
            }
            EDGE_BATCH => {
                let batch: EdgeBatch = serde_json::from_value(payload).map_err(invalid)?;
                Ok(Frame::EdgeBatch(batch.edges))
            }
            GRAPH_END => Ok(Frame::GraphEnd),
            _ => Ok(Frame::Other(TaggedMessage {
                kind: kind.clone(),
                payload,
            })),
        }
    }

    /// The frame's type tag.
    pub fn kind(&self) -> &str {
        match self {
            Frame::Hello(_) => HELLO,
            Frame::GraphBegin => GRAPH_BEGIN,
            Frame::NodeBatch(_) => NODE_BATCH,
            Frame::EdgeBatch(_) => EDGE_BATCH,
            Frame::GraphEnd => GRAPH_END,
            Frame::Other(msg) => &msg.kind,
        }
    }
}

/// Frames the engine sends to the peer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Acknowledges a `hello`; sent once, never awaited
    ReadyForGraph {},
}

impl OutboundFrame {
    /// Encode as a text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}
