//! The engine event loop.
//!
//! One task owns the assembler, the simulation and the renderer, and
//! selects over three sources:
//!
//! - inbound frames from the [`ConnectionManager`]
//! - [`Command`]s from the observation surface
//! - a tick interval, polled only while the layout is in motion
//!
//! Everything runs to completion inside its select arm, so a tick never
//! overlaps another tick or a drag. Commands land strictly between ticks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use canopy_layout::{in_bounds, search, ForceSimulation, GraphSnapshot, LayoutError, Vec2, Viewport};
use canopy_protocol::{Frame, Output, StreamAssembler, TaggedMessage};
use canopy_transfer::ConnectionManager;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineOptions;
use crate::error::{Error, Result};
use crate::render::{Renderer, Scene};

const COMMAND_BUFFER: usize = 64;
const TOPIC_BUFFER: usize = 64;

/// Requests applied by the engine between ticks.
#[derive(Debug)]
pub enum Command {
    /// Move a node, as a user drag does
    Drag { id: String, position: Vec2 },
    /// Select a node and focus the viewport on it; `None` clears
    Select { id: Option<String> },
    /// Center the layout on the viewport
    Recenter,
    /// Local search over the loaded nodes
    Search {
        query: String,
        limit: usize,
        reply: oneshot::Sender<Vec<SearchHit>>,
    },
    Shutdown,
}

/// One local search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub file: String,
}

/// Observable engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStatus {
    pub connected: bool,
    /// Between `graph_begin` and `graph_end`
    pub loading: bool,
    pub node_count: usize,
    pub edge_count: usize,
    pub settled: bool,
    pub snapshots: u64,
    /// Inbound frames that failed to decode
    pub discarded_frames: u64,
    /// Sessions abandoned because the engine fell behind
    pub aborted_sessions: u64,
    pub selection: Option<String>,
}

type Topics = Arc<Mutex<HashMap<String, broadcast::Sender<TaggedMessage>>>>;

fn topics(topics: &Topics) -> MutexGuard<'_, HashMap<String, broadcast::Sender<TaggedMessage>>> {
    topics.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle for talking to a running [`Engine`].
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<EngineStatus>,
    topics: Topics,
}

impl EngineHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::EngineStopped)
    }

    /// Queue a drag. Positions outside the layout bounds are refused here.
    pub async fn drag(&self, id: impl Into<String>, position: Vec2) -> Result<()> {
        if !in_bounds(position) {
            return Err(LayoutError::OutOfBounds {
                x: position.x,
                y: position.y,
            }
            .into());
        }
        self.send(Command::Drag {
            id: id.into(),
            position,
        })
        .await
    }

    pub async fn select(&self, id: Option<String>) -> Result<()> {
        self.send(Command::Select { id }).await
    }

    pub async fn recenter(&self) -> Result<()> {
        self.send(Command::Recenter).await
    }

    pub async fn search(&self, query: impl Into<String>, limit: usize) -> Result<Vec<SearchHit>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Search {
            query: query.into(),
            limit,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::EngineStopped)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// Receive forwarded frames whose type tag is `kind`.
    pub fn subscribe(&self, kind: &str) -> broadcast::Receiver<TaggedMessage> {
        topics(&self.topics)
            .entry(kind.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .subscribe()
    }
}

/// Layout engine bound to one connection and one renderer.
pub struct Engine<R> {
    options: EngineOptions,
    manager: ConnectionManager,
    assembler: StreamAssembler,
    simulation: ForceSimulation,
    renderer: R,
    viewport: Viewport,
    selection: Option<String>,
    bulk_loaded: bool,
    commands: mpsc::Receiver<Command>,
    status: watch::Sender<EngineStatus>,
    topics: Topics,
}

impl<R: Renderer> Engine<R> {
    /// Build an engine and its handle. The manager may already be connecting.
    pub fn new(manager: ConnectionManager, options: EngineOptions, renderer: R) -> Result<(Self, EngineHandle)> {
        let simulation = ForceSimulation::new(options.simulation.clone())?;
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (status, status_rx) = watch::channel(EngineStatus {
            settled: true,
            ..Default::default()
        });
        let topics = Topics::default();

        let handle = EngineHandle {
            commands: commands_tx,
            status: status_rx,
            topics: topics.clone(),
        };
        let engine = Self {
            options,
            manager,
            assembler: StreamAssembler::new(),
            simulation,
            renderer,
            viewport: Viewport::default(),
            selection: None,
            bulk_loaded: false,
            commands,
            status,
            topics,
        };
        Ok((engine, handle))
    }

    /// Run until shut down, then dispose the connection.
    pub async fn run(mut self) -> Result<()> {
        let mut frames = self.manager.subscribe()?;
        let mut link = self.manager.status();
        let mut ticker = tokio::time::interval(self.options.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let dt = self.options.tick.as_secs_f64();
        info!(tick_ms = self.options.tick.as_millis() as u64, "Engine running");

        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Ok(frame) => self.on_frame(frame),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Engine fell behind the inbound stream, frames lost");
                        self.assembler.abort();
                        self.publish_status();
                    }
                    Err(RecvError::Closed) => {
                        info!("Inbound stream closed");
                        break;
                    }
                },
                changed = link.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish_status();
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                _ = ticker.tick(), if !self.simulation.is_settled() => self.on_tick(dt),
            }
        }

        self.manager.dispose().await;
        self.publish_status();
        info!(ticks = self.simulation.ticks(), "Engine stopped");
        Ok(())
    }

    fn on_frame(&mut self, frame: Frame) {
        match self.assembler.apply(frame) {
            Some(Output::Reply(reply)) => match reply.encode() {
                Ok(text) => {
                    if let Err(e) = self.manager.send(text) {
                        warn!(error = %e, "Could not queue reply");
                    }
                }
                Err(e) => warn!(error = %e, "Could not encode reply"),
            },
            Some(Output::Snapshot(snapshot)) => self.load(snapshot),
            Some(Output::Forward(message)) => self.forward(message),
            None => {}
        }
        self.publish_status();
    }

    fn load(&mut self, snapshot: GraphSnapshot) {
        let gone = self
            .selection
            .as_ref()
            .is_some_and(|id| !snapshot.nodes.iter().any(|n| &n.id == id));
        if gone {
            if let Some(id) = self.selection.take() {
                debug!(%id, "Selected node left the graph");
            }
        }

        self.simulation.load(snapshot);
        if !self.bulk_loaded {
            self.bulk_loaded = true;
            self.simulation.recenter(self.view_center());
        }
        self.render();
    }

    fn forward(&self, message: TaggedMessage) {
        let topics = topics(&self.topics);
        match topics.get(&message.kind) {
            Some(tx) => {
                let _ = tx.send(message);
            }
            None => debug!(kind = %message.kind, "No subscribers for forwarded frame"),
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Drag { id, position } => match self.simulation.move_node(&id, position) {
                Ok(true) => self.render(),
                Ok(false) => debug!(%id, "Drag of unknown node ignored"),
                Err(e) => warn!(%id, error = %e, "Drag rejected"),
            },
            Command::Select { id: None } => {
                self.selection = None;
                self.render();
            }
            Command::Select { id: Some(id) } => match self.simulation.node(&id) {
                Some(node) => {
                    self.viewport.focus(node.position);
                    self.selection = Some(id);
                    self.render();
                }
                None => debug!(%id, "Selection of unknown node ignored"),
            },
            Command::Recenter => {
                self.simulation.recenter(self.view_center());
                self.render();
            }
            Command::Search { query, limit, reply } => {
                let nodes = self.simulation.nodes();
                let hits = search(nodes, &query, limit)
                    .into_iter()
                    .map(|i| SearchHit {
                        id: nodes[i].id.clone(),
                        name: nodes[i].name.clone(),
                        kind: nodes[i].kind.clone(),
                        file: nodes[i].file.clone(),
                    })
                    .collect();
                let _ = reply.send(hits);
            }
            Command::Shutdown => {}
        }
        self.publish_status();
    }

    fn on_tick(&mut self, dt: f64) {
        let moving = self.simulation.tick(dt);
        self.render();
        if !moving {
            info!(ticks = self.simulation.ticks(), "Layout settled");
            self.publish_status();
        }
    }

    /// World position currently shown at the screen center.
    fn view_center(&self) -> Vec2 {
        let center = self.options.screen_center();
        self.viewport.screen_to_world(center, center)
    }

    fn render(&mut self) {
        let scene = Scene {
            nodes: self.simulation.nodes(),
            edges: self.simulation.springs(),
            selection: self.selection.as_deref(),
            viewport: &self.viewport,
            settled: self.simulation.is_settled(),
            tick: self.simulation.ticks(),
        };
        self.renderer.render(&scene);
    }

    fn publish_status(&self) {
        let status = EngineStatus {
            connected: self.manager.is_connected(),
            loading: self.assembler.is_streaming(),
            node_count: self.simulation.nodes().len(),
            edge_count: self.simulation.springs().len(),
            settled: self.simulation.is_settled(),
            snapshots: self.assembler.stats().snapshots,
            discarded_frames: self.manager.discarded(),
            aborted_sessions: self.assembler.stats().aborted,
            selection: self.selection.clone(),
        };
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}
