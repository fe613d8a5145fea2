//! Reassembly of streamed batches into atomic graph snapshots.
//!
//! # States
//!
//! - **Idle**: no session open
//! - **Streaming**: between `graph_begin` and `graph_end`
//! - **Aborted**: frames were lost; everything up to the next
//!   `graph_begin` is dropped
//!
//! `hello` is answered in any state without changing it. `graph_begin`
//! clears the buffers and opens a session; batches append; `graph_end`
//! emits one snapshot and returns to idle. Batches outside a session are
//! buffered best-effort since the peer does not guarantee strict ordering.
//!
//! Frames reach the assembler already decoded, so a malformed frame never
//! disturbs what earlier frames accumulated. When the caller knows frames
//! went missing it calls [`StreamAssembler::abort`]: a snapshot with holes
//! is never emitted.

use std::time::{SystemTime, UNIX_EPOCH};

use canopy_layout::{GraphEdge, GraphNode, GraphSnapshot};
use tracing::{debug, info, warn};

use crate::frame::{Frame, Hello, OutboundFrame, TaggedMessage};

/// Session state of the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssemblerState {
    #[default]
    Idle,
    Streaming,
    Aborted,
}

/// What the caller must act on after a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Send this frame back to the peer
    Reply(OutboundFrame),
    /// A session completed
    Snapshot(GraphSnapshot),
    /// Deliver to subscribers of `message.kind`
    Forward(TaggedMessage),
}

/// Frame accounting, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Frames applied
    pub frames: u64,
    /// Sessions abandoned after frames went missing
    pub aborted: u64,
    /// Batches that arrived outside a session
    pub out_of_session: u64,
    /// Snapshots emitted
    pub snapshots: u64,
}

/// Streaming-session state machine.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    state: AssemblerState,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    peer: Option<Hello>,
    stats: AssemblerStats,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded frame.
    pub fn apply(&mut self, frame: Frame) -> Option<Output> {
        self.stats.frames += 1;
        match frame {
            Frame::Hello(hello) => {
                info!(
                    version = %hello.version,
                    nodes = hello.node_count,
                    edges = hello.edge_count,
                    "Peer hello"
                );
                self.peer = Some(hello);
                Some(Output::Reply(OutboundFrame::ReadyForGraph {}))
            }
            Frame::GraphBegin => {
                if self.state == AssemblerState::Streaming {
                    debug!(
                        dropped_nodes = self.nodes.len(),
                        dropped_edges = self.edges.len(),
                        "Session restarted before end"
                    );
                }
                self.nodes.clear();
                self.edges.clear();
                self.state = AssemblerState::Streaming;
                None
            }
            Frame::NodeBatch(_) | Frame::EdgeBatch(_) | Frame::GraphEnd
                if self.state == AssemblerState::Aborted =>
            {
                if matches!(frame, Frame::GraphEnd) {
                    self.state = AssemblerState::Idle;
                    debug!("graph_end of an aborted session, ignoring");
                }
                None
            }
            Frame::NodeBatch(mut nodes) => {
                self.note_out_of_session("node_batch");
                for node in &mut nodes {
                    node.centrality = node.centrality.clamp(0.0, 1.0);
                }
                self.nodes.append(&mut nodes);
                None
            }
            Frame::EdgeBatch(mut edges) => {
                self.note_out_of_session("edge_batch");
                self.edges.append(&mut edges);
                None
            }
            Frame::GraphEnd => self.finish(),
            Frame::Other(message) => Some(Output::Forward(message)),
        }
    }

    /// Abandon the current session because frames were lost. Buffers are
    /// cleared and batches are dropped until the next `graph_begin`, so the
    /// previous snapshot stays in place. Returns whether anything was pending.
    pub fn abort(&mut self) -> bool {
        let pending = self.state == AssemblerState::Streaming
            || !self.nodes.is_empty()
            || !self.edges.is_empty();
        warn!(
            dropped_nodes = self.nodes.len(),
            dropped_edges = self.edges.len(),
            "Session aborted, waiting for the next graph_begin"
        );
        self.nodes.clear();
        self.edges.clear();
        self.state = AssemblerState::Aborted;
        self.stats.aborted += 1;
        pending
    }

    fn note_out_of_session(&mut self, kind: &'static str) {
        if self.state == AssemblerState::Idle {
            self.stats.out_of_session += 1;
            debug!(kind, "Batch outside a session, buffering");
        }
    }

    /// Close the session and emit the buffered graph.
    fn finish(&mut self) -> Option<Output> {
        let was_streaming = self.state == AssemblerState::Streaming;
        self.state = AssemblerState::Idle;
        if !was_streaming && self.nodes.is_empty() && self.edges.is_empty() {
            debug!("graph_end with no open session, ignoring");
            return None;
        }

        // Drain rather than take so the buffers keep their capacity.
        let nodes: Vec<GraphNode> = self.nodes.drain(..).collect();
        let edges: Vec<GraphEdge> = self.edges.drain(..).collect();
        let snapshot = GraphSnapshot::new(nodes, edges, now_millis());
        self.stats.snapshots += 1;
        info!(
            nodes = snapshot.node_count,
            edges = snapshot.edge_count,
            "Graph snapshot assembled"
        );
        Some(Output::Snapshot(snapshot))
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Whether a session is open.
    pub fn is_streaming(&self) -> bool {
        self.state == AssemblerState::Streaming
    }

    /// Capability info from the last `hello`.
    pub fn peer(&self) -> Option<&Hello> {
        self.peer.as_ref()
    }

    pub fn pending_nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn pending_edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_json(id: &str) -> serde_json::Value {
        json!({"id": id, "name": id, "kind": "function", "file": "lib.rs", "start_line": 1, "end_line": 2})
    }

    fn node_batch(ids: &[&str]) -> String {
        let nodes: Vec<_> = ids.iter().map(|id| node_json(id)).collect();
        json!({"type": "node_batch", "payload": {"nodes": nodes}}).to_string()
    }

    fn edge_batch(pairs: &[(&str, &str)]) -> String {
        let edges: Vec<_> = pairs
            .iter()
            .map(|(s, t)| json!({"source": s, "target": t, "kind": "calls"}))
            .collect();
        json!({"type": "edge_batch", "payload": {"edges": edges}}).to_string()
    }

    /// Decode and apply, the way the engine sees frames.
    fn feed(asm: &mut StreamAssembler, text: &str) -> Option<Output> {
        asm.apply(Frame::decode(text).ok()?)
    }

    const BEGIN: &str = r#"{"type":"graph_begin","payload":{}}"#;
    const END: &str = r#"{"type":"graph_end","payload":{}}"#;

    #[test]
    fn hello_replies_without_changing_state() {
        let mut asm = StreamAssembler::new();
        let out = feed(&mut asm, r#"{"type":"hello","payload":{"version":"1","node_count":3,"edge_count":1}}"#);

        assert_eq!(out, Some(Output::Reply(OutboundFrame::ReadyForGraph {})));
        assert_eq!(asm.state(), AssemblerState::Idle);
        assert_eq!(asm.peer().map(|h| h.node_count), Some(3));

        feed(&mut asm, BEGIN);
        feed(&mut asm, r#"{"type":"hello","payload":{}}"#);
        assert!(asm.is_streaming());
    }

    #[test]
    fn session_yields_one_snapshot_in_arrival_order() {
        let mut asm = StreamAssembler::new();
        assert_eq!(feed(&mut asm, BEGIN), None);
        assert_eq!(feed(&mut asm, &node_batch(&["n1", "n2"])), None);
        assert_eq!(feed(&mut asm, &node_batch(&["n3"])), None);
        assert_eq!(feed(&mut asm, &edge_batch(&[("n1", "n3")])), None);

        let Some(Output::Snapshot(snap)) = feed(&mut asm, END) else {
            panic!("expected snapshot");
        };
        assert!(!snap.is_delta);
        assert_eq!(snap.node_count, 3);
        assert_eq!(snap.edge_count, 1);
        let ids: Vec<_> = snap.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2", "n3"]);
        assert!(snap.timestamp > 0);

        assert_eq!(asm.state(), AssemblerState::Idle);
        assert!(asm.pending_nodes().is_empty());
        assert_eq!(asm.stats().snapshots, 1);
    }

    #[test]
    fn begin_clears_previous_buffers() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, BEGIN);
        feed(&mut asm, &node_batch(&["stale"]));
        feed(&mut asm, BEGIN);
        feed(&mut asm, &node_batch(&["fresh"]));

        let Some(Output::Snapshot(snap)) = feed(&mut asm, END) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.nodes[0].id, "fresh");
    }

    #[test]
    fn malformed_frames_do_not_disturb_buffers() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, BEGIN);
        feed(&mut asm, &node_batch(&["a", "b"]));

        assert_eq!(feed(&mut asm, "{{{ garbage"), None);
        assert_eq!(feed(&mut asm, r#"{"type":"node_batch","payload":{"nodes":"nope"}}"#), None);
        assert_eq!(feed(&mut asm, r#"{"payload":{}}"#), None);
        assert_eq!(asm.stats().frames, 2);
        assert!(asm.is_streaming());
        assert_eq!(asm.pending_nodes().len(), 2);

        feed(&mut asm, &node_batch(&["c"]));
        let Some(Output::Snapshot(snap)) = feed(&mut asm, END) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.node_count, 3);
    }

    #[test]
    fn batches_outside_session_are_buffered() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, &node_batch(&["early"]));
        assert_eq!(asm.stats().out_of_session, 1);
        assert_eq!(asm.pending_nodes().len(), 1);

        // An end without a begin still flushes what was buffered.
        let Some(Output::Snapshot(snap)) = feed(&mut asm, END) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.nodes[0].id, "early");

        // A second stray end has nothing to flush.
        assert_eq!(feed(&mut asm, END), None);
    }

    #[test]
    fn dangling_edges_survive_assembly() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, BEGIN);
        feed(&mut asm, &node_batch(&["a"]));
        feed(&mut asm, &edge_batch(&[("a", "missing")]));

        let Some(Output::Snapshot(snap)) = feed(&mut asm, END) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.edge_count, 1);
        assert!(snap.live_edges().is_empty());
    }

    #[test]
    fn unknown_frames_are_forwarded() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, BEGIN);
        let out = feed(&mut asm, r#"{"type":"focus","payload":{"node":"a"}}"#);

        let Some(Output::Forward(message)) = out else {
            panic!("expected forward");
        };
        assert_eq!(message.kind, "focus");
        assert_eq!(message.payload["node"], "a");
        assert!(asm.is_streaming());
    }

    #[test]
    fn centrality_is_clamped() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, BEGIN);
        let mut node = node_json("a");
        node["centrality"] = json!(3.5);
        feed(&mut asm, &json!({"type": "node_batch", "payload": {"nodes": [node]}}).to_string());
        assert_eq!(asm.pending_nodes()[0].centrality, 1.0);
    }

    #[test]
    fn aborted_session_never_emits_a_partial_snapshot() {
        let mut asm = StreamAssembler::new();
        feed(&mut asm, BEGIN);
        feed(&mut asm, &node_batch(&["a", "b"]));

        assert!(asm.abort());
        assert_eq!(asm.state(), AssemblerState::Aborted);
        assert!(!asm.is_streaming());
        assert!(asm.pending_nodes().is_empty());

        // The rest of the lost session is dropped, including its end.
        assert_eq!(feed(&mut asm, &node_batch(&["c"])), None);
        assert_eq!(feed(&mut asm, &edge_batch(&[("a", "c")])), None);
        assert_eq!(feed(&mut asm, END), None);
        assert!(asm.pending_nodes().is_empty());
        assert_eq!(asm.state(), AssemblerState::Idle);
        assert_eq!(asm.stats().snapshots, 0);
        assert_eq!(asm.stats().aborted, 1);

        // The next full session goes through.
        feed(&mut asm, BEGIN);
        feed(&mut asm, &node_batch(&["x"]));
        let Some(Output::Snapshot(snap)) = feed(&mut asm, END) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.nodes[0].id, "x");
    }

    #[test]
    fn abort_still_answers_hello_and_forwards() {
        let mut asm = StreamAssembler::new();
        assert!(!asm.abort());

        let hello = feed(&mut asm, r#"{"type":"hello","payload":{}}"#);
        assert_eq!(hello, Some(Output::Reply(OutboundFrame::ReadyForGraph {})));
        let focus = feed(&mut asm, r#"{"type":"focus","payload":{}}"#);
        assert!(matches!(focus, Some(Output::Forward(_))));
        assert_eq!(asm.state(), AssemblerState::Aborted);

        feed(&mut asm, BEGIN);
        assert!(asm.is_streaming());
    }
}
