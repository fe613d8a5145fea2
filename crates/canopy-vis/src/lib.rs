//! Canopy Visualization Engine
//!
//! Live layout of a streamed code graph.
//!
//! # Architecture
//!
//! - **Engine**: one task wiring connection → assembler → simulation → renderer
//! - **Renderer**: receives a scene per frame; the bundled one broadcasts
//!   serializable layout frames
//! - **Server**: REST status/search/commands and a WebSocket frame stream
//! - **Config**: `CANOPY_*` environment variables and positional arguments
//!
//! # Usage
//!
//! ```ignore
//! let manager = ConnectionManager::new(Arc::new(TcpTransport), ReconnectPolicy::default());
//! manager.connect("127.0.0.1:8081")?;
//!
//! let renderer = BroadcastRenderer::new();
//! let feed = renderer.frames();
//! let (engine, handle) = Engine::new(manager, EngineOptions::default(), renderer)?;
//! tokio::spawn(VisServer::new(handle, feed).serve(addr));
//! engine.run().await?;
//! ```

mod config;
mod engine;
mod error;
mod render;
mod server;

pub use config::{EngineOptions, VisConfig};
pub use engine::{Command, Engine, EngineHandle, EngineStatus, SearchHit};
pub use error::{Error, Result};
pub use render::{BroadcastRenderer, FrameFeed, LayoutFrame, PlacedNode, Renderer, Scene};
pub use server::VisServer;
