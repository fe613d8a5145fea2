//! Canopy Layout
//!
//! Physics-based 2D layout for large code graphs.
//!
//! # Architecture
//!
//! - **Model**: Nodes, edges and snapshots; edges refer to nodes by id
//! - **Quadtree**: Barnes-Hut spatial index, rebuilt every tick
//! - **Simulation**: Repulsion, springs, damped integration, settling
//! - **Viewport**: World/screen transform handed to renderers
//!
//! # Usage
//!
//! ```
//! use canopy_layout::{ForceSimulation, GraphEdge, GraphNode, GraphSnapshot, SimulationConfig};
//!
//! let mut sim = ForceSimulation::new(SimulationConfig::default()).unwrap();
//! sim.load(GraphSnapshot::new(
//!     vec![
//!         GraphNode::new("a", "main", "function", "src/main.rs"),
//!         GraphNode::new("b", "run", "function", "src/lib.rs"),
//!     ],
//!     vec![GraphEdge::new("a", "b", "calls")],
//!     0,
//! ));
//! for _ in 0..500 {
//!     if !sim.tick(0.016) {
//!         break;
//!     }
//! }
//! assert_eq!(sim.nodes().len(), 2);
//! ```

mod error;
mod model;
mod quadtree;
mod simulation;
mod vector;
mod viewport;

pub use error::{LayoutError, Result};
pub use model::{search, GraphEdge, GraphNode, GraphSnapshot, NodeIndex, DEFAULT_SEARCH_LIMIT};
pub use quadtree::{
    in_bounds, pairwise_force, Body, Cell, Quadrant, DEFAULT_THETA, MAX_COORDINATE,
    MAX_LEAF_BODIES, MIN_SPLIT_SIZE,
};
pub use simulation::{recenter, seed_position, spring_force, ForceSimulation, SimulationConfig};
pub use vector::Vec2;
pub use viewport::Viewport;
