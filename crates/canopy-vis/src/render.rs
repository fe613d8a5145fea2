//! Renderer seam.
//!
//! The engine hands a [`Scene`] to its renderer after every tick and after
//! every change applied between ticks. Drawing pixels is somebody else's job;
//! the bundled [`BroadcastRenderer`] turns scenes into serializable
//! [`LayoutFrame`]s for the WebSocket surface.

use std::sync::Arc;

use canopy_layout::{GraphNode, Viewport};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

/// Frames buffered per WebSocket subscriber.
const FRAME_BUFFER: usize = 16;

/// What a renderer sees for one frame.
#[derive(Debug, Clone, Copy)]
pub struct Scene<'a> {
    pub nodes: &'a [GraphNode],
    /// Live edges as `(source, target)` indices into `nodes`
    pub edges: &'a [(usize, usize)],
    pub selection: Option<&'a str>,
    pub viewport: &'a Viewport,
    pub settled: bool,
    pub tick: u64,
}

/// Consumer of layout scenes.
pub trait Renderer: Send {
    fn render(&mut self, scene: &Scene<'_>);
}

/// Node placement within a [`LayoutFrame`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedNode {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub centrality: f64,
}

/// Serializable snapshot of the layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutFrame {
    pub tick: u64,
    pub settled: bool,
    pub nodes: Vec<PlacedNode>,
    pub edges: Vec<[usize; 2]>,
    pub selection: Option<String>,
    pub viewport: Viewport,
}

impl LayoutFrame {
    pub fn from_scene(scene: &Scene<'_>) -> Self {
        Self {
            tick: scene.tick,
            settled: scene.settled,
            nodes: scene
                .nodes
                .iter()
                .map(|n| PlacedNode {
                    id: n.id.clone(),
                    name: n.name.clone(),
                    kind: n.kind.clone(),
                    x: n.position.x,
                    y: n.position.y,
                    centrality: n.centrality,
                })
                .collect(),
            edges: scene.edges.iter().map(|&(s, t)| [s, t]).collect(),
            selection: scene.selection.map(str::to_string),
            viewport: *scene.viewport,
        }
    }
}

/// Publishes every scene as a [`LayoutFrame`] and remembers the latest.
pub struct BroadcastRenderer {
    frames: broadcast::Sender<Arc<LayoutFrame>>,
    latest: watch::Sender<Option<Arc<LayoutFrame>>>,
}

impl Default for BroadcastRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastRenderer {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        let (latest, _) = watch::channel(None);
        Self { frames, latest }
    }

    /// Handle for observers; stays valid after the renderer moves into the engine.
    pub fn frames(&self) -> FrameFeed {
        FrameFeed {
            frames: self.frames.clone(),
            latest: self.latest.subscribe(),
        }
    }
}

impl Renderer for BroadcastRenderer {
    fn render(&mut self, scene: &Scene<'_>) {
        let frame = Arc::new(LayoutFrame::from_scene(scene));
        self.latest.send_replace(Some(frame.clone()));
        // Nobody watching is fine.
        let _ = self.frames.send(frame);
    }
}

/// Observer side of a [`BroadcastRenderer`].
#[derive(Clone)]
pub struct FrameFeed {
    frames: broadcast::Sender<Arc<LayoutFrame>>,
    latest: watch::Receiver<Option<Arc<LayoutFrame>>>,
}

impl FrameFeed {
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<LayoutFrame>> {
        self.frames.subscribe()
    }

    /// The most recent frame, if anything has been rendered.
    pub fn latest(&self) -> Option<Arc<LayoutFrame>> {
        self.latest.borrow().clone()
    }
}
