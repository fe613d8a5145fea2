//! JSON-RPC 2.0 query messages.
//!
//! Queries run beside the streaming session on their own channel. Requests
//! carry a numeric id; the response with the same id completes the call.

use canopy_layout::GraphNode;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Protocol version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Method names understood by the query peer.
pub mod method {
    pub const DISCOVER: &str = "discover";
    pub const SEARCH: &str = "search";
    pub const IMPACT: &str = "impact";
    pub const NODE_GET: &str = "node.get";
}

/// Outbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Encode as a text message.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

/// Error object of a failed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Human-readable name of a standard code.
    pub fn code_name(&self) -> &'static str {
        match self.code {
            PARSE_ERROR => "parse error",
            INVALID_REQUEST => "invalid request",
            METHOD_NOT_FOUND => "method not found",
            INVALID_PARAMS => "invalid params",
            INTERNAL_ERROR => "internal error",
            _ => "application error",
        }
    }
}

/// Inbound response.
///
/// `result: null` is a valid success, so presence of the field is tracked
/// separately from its value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// `None` only for errors the peer could not attribute to a request
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Settled state of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(RpcError),
}

impl Response {
    /// Decode one text message.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::Malformed)
    }

    /// Resolve into an outcome. An error object wins over a result.
    pub fn into_outcome(self) -> Result<Outcome> {
        match (self.error, self.result) {
            (Some(error), _) => Ok(Outcome::Failure(error)),
            (None, Some(result)) => Ok(Outcome::Success(result)),
            (None, None) => Err(ProtocolError::EmptyResponse(self.id.map(Value::from))),
        }
    }
}

fn default_limit() -> usize {
    10
}

fn default_depth() -> usize {
    3
}

/// Params of `discover`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverParams {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl DiscoverParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Params of `search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Params of `impact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactParams {
    pub node: String,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

impl ImpactParams {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            depth: default_depth(),
        }
    }
}

/// Params of `node.get`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGetParams {
    pub id: String,
}

/// Result of `discover` and `search`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
}
