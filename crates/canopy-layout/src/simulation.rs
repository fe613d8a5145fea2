//! Force-directed layout stepping.
//!
//! Each tick rebuilds the quadtree, accumulates Barnes-Hut repulsion and
//! edge springs, then integrates in a fixed order: damp the old velocity,
//! add the force times `dt`, advance the position by velocity times `dt`.

use std::collections::HashMap;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::error::{LayoutError, Result};
use crate::model::{GraphEdge, GraphNode, GraphSnapshot, NodeIndex};
use crate::quadtree::{in_bounds, Quadrant, DEFAULT_THETA};
use crate::vector::Vec2;

/// Configuration for the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Inverse-square repulsion strength
    pub repulsion: f64,
    /// Spring constant along edges
    pub attraction: f64,
    /// Spring rest length; shorter edges exert no force
    pub min_distance: f64,
    /// Velocity retained per tick (0.0 - 1.0)
    pub damping: f64,
    /// Barnes-Hut accuracy threshold
    pub theta: f64,
    /// Aggregate |velocity| at or below which the layout counts as settled
    pub settle_threshold: f64,
    /// Upper bound on a single spring's magnitude
    pub max_spring_force: Option<f64>,
    /// Pull toward the centroid of nodes sharing a file; 0 disables
    pub cluster_gravity: f64,
    /// Seed for the symmetry-breaking jitter
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            repulsion: 5000.0,
            attraction: 0.1,
            min_distance: 80.0,
            damping: 0.9,
            theta: DEFAULT_THETA,
            settle_threshold: 0.5,
            max_spring_force: None,
            cluster_gravity: 0.0,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// Reject non-finite or out-of-range constants.
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("repulsion", self.repulsion),
            ("attraction", self.attraction),
            ("min_distance", self.min_distance),
            ("theta", self.theta),
            ("settle_threshold", self.settle_threshold),
            ("cluster_gravity", self.cluster_gravity),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(LayoutError::InvalidConfig { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.damping) {
            return Err(LayoutError::InvalidConfig {
                name: "damping",
                value: self.damping,
            });
        }
        if let Some(max) = self.max_spring_force {
            if !max.is_finite() || max < 0.0 {
                return Err(LayoutError::InvalidConfig {
                    name: "max_spring_force",
                    value: max,
                });
            }
        }
        Ok(())
    }
}

/// Spring force on `source` from an edge to `target`.
///
/// Zero at or under `min_distance`; otherwise `(distance - min_distance) *
/// attraction` (clamped to `max_spring_force`) pointing at `target`. The
/// target receives the negation.
pub fn spring_force(source: Vec2, target: Vec2, config: &SimulationConfig) -> Vec2 {
    let delta = target - source;
    let distance = delta.length();
    if distance <= config.min_distance {
        return Vec2::ZERO;
    }

    let mut magnitude = (distance - config.min_distance) * config.attraction;
    if let Some(max) = config.max_spring_force {
        magnitude = magnitude.min(max);
    }
    delta / distance * magnitude
}

/// Seed position for the `i`-th of `n` newly arrived nodes.
pub fn seed_position(i: usize, n: usize) -> Vec2 {
    let angle = i as f64 * 2.0 * PI / n.max(1) as f64;
    let radius = 200.0 + (i % 5) as f64 * 50.0;
    Vec2::new(angle.cos() * radius, angle.sin() * radius)
}

/// Translate every node so the bounding box of all positions is centered
/// on `center`. Does nothing for an empty slice.
pub fn recenter(nodes: &mut [GraphNode], center: Vec2) {
    let mut positions = nodes.iter().map(|n| n.position).filter(Vec2::is_finite);
    let Some(first) = positions.next() else {
        return;
    };

    let (min, max) = positions.fold((first, first), |(min, max), p| {
        (
            Vec2::new(min.x.min(p.x), min.y.min(p.y)),
            Vec2::new(max.x.max(p.x), max.y.max(p.y)),
        )
    });
    let shift = center - (min + max) / 2.0;
    for node in nodes.iter_mut() {
        node.position += shift;
    }
}

/// Layout state for one graph snapshot.
pub struct ForceSimulation {
    config: SimulationConfig,
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    index: NodeIndex,
    springs: Vec<(usize, usize)>,
    rng: StdRng,
    ticks: u64,
    settled: bool,
}

impl ForceSimulation {
    /// Create an empty simulation.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            nodes: Vec::new(),
            edges: Vec::new(),
            index: NodeIndex::default(),
            springs: Vec::new(),
            rng,
            ticks: 0,
            settled: true,
        })
    }

    /// Replace the graph with a new snapshot.
    ///
    /// Nodes already laid out keep their position and velocity; new nodes
    /// are seeded on a circle. Dangling edges are kept but never sprung.
    pub fn load(&mut self, snapshot: GraphSnapshot) {
        let previous: HashMap<String, (Vec2, Vec2)> = self
            .nodes
            .drain(..)
            .map(|n| (n.id, (n.position, n.velocity)))
            .collect();

        let mut nodes = snapshot.nodes;
        let arrivals = nodes.iter().filter(|n| !previous.contains_key(&n.id)).count();
        let mut seeded = 0;
        for node in nodes.iter_mut() {
            match previous.get(&node.id) {
                Some(&(position, velocity)) => {
                    node.position = position;
                    node.velocity = velocity;
                }
                None => {
                    node.position = seed_position(seeded, arrivals);
                    node.velocity = Vec2::ZERO;
                    seeded += 1;
                }
            }
        }

        self.index = NodeIndex::build(&nodes);
        self.springs = snapshot
            .edges
            .iter()
            .filter_map(|e| self.index.resolve(e))
            .filter(|(s, t)| s != t)
            .collect();
        debug!(
            nodes = nodes.len(),
            seeded,
            springs = self.springs.len(),
            skipped = snapshot.edges.len() - self.springs.len(),
            "Loaded snapshot into simulation"
        );

        self.nodes = nodes;
        self.edges = snapshot.edges;
        self.settled = self.nodes.is_empty();
    }

    /// Advance one tick. Returns whether the layout is still in motion.
    pub fn tick(&mut self, dt: f64) -> bool {
        if self.nodes.is_empty() {
            self.settled = true;
            return false;
        }

        let forces = self.accumulate_forces();

        let damping = self.config.damping;
        let mut motion = 0.0;
        for (node, force) in self.nodes.iter_mut().zip(forces) {
            node.velocity = node.velocity * damping;
            node.velocity += force * dt;
            node.position += node.velocity * dt;
            motion += node.velocity.manhattan();
        }

        self.ticks += 1;
        let moving = motion > self.config.settle_threshold;
        if moving == self.settled {
            debug!(tick = self.ticks, motion, moving, "Simulation motion changed");
        }
        self.settled = !moving;
        moving
    }

    /// Net force on every node for the current positions.
    fn accumulate_forces(&mut self) -> Vec<Vec2> {
        let positions: Vec<Vec2> = self.nodes.iter().map(|n| n.position).collect();
        let mut forces = vec![Vec2::ZERO; positions.len()];

        let tree = Quadrant::build(&positions);
        for (i, &at) in positions.iter().enumerate() {
            forces[i] += tree.force_on(i, at, self.config.repulsion, self.config.theta, &mut self.rng);
        }

        for &(s, t) in &self.springs {
            let f = spring_force(positions[s], positions[t], &self.config);
            forces[s] += f;
            forces[t] -= f;
        }

        if self.config.cluster_gravity > 0.0 {
            self.add_cluster_gravity(&positions, &mut forces);
        }
        forces
    }

    /// Pull nodes toward the centroid of their file.
    fn add_cluster_gravity(&self, positions: &[Vec2], forces: &mut [Vec2]) {
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, node) in self.nodes.iter().enumerate() {
            groups.entry(node.file.as_str()).or_default().push(i);
        }

        let reach = self.config.min_distance / 2.0;
        for members in groups.values().filter(|m| m.len() > 1) {
            let sum = members.iter().fold(Vec2::ZERO, |acc, &i| acc + positions[i]);
            let centroid = sum / members.len() as f64;
            for &i in members {
                let delta = centroid - positions[i];
                let distance = delta.length();
                if distance > reach {
                    forces[i] += delta / distance * (distance * self.config.cluster_gravity);
                }
            }
        }
    }

    /// Recenter the layout on `center`.
    pub fn recenter(&mut self, center: Vec2) {
        recenter(&mut self.nodes, center);
    }

    /// Move a node, as a user drag does. Takes effect from the next tick and
    /// wakes a settled simulation. Returns false for an unknown id.
    pub fn move_node(&mut self, id: &str, position: Vec2) -> Result<bool> {
        if !in_bounds(position) {
            return Err(LayoutError::OutOfBounds {
                x: position.x,
                y: position.y,
            });
        }
        let Some(slot) = self.index.get(id) else {
            return Ok(false);
        };
        self.nodes[slot].position = position;
        self.settled = false;
        Ok(true)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Edges as received, dangling ones included.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Resolved `(source, target)` slot pairs of the live edges.
    pub fn springs(&self) -> &[(usize, usize)] {
        &self.springs
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Mark the layout as moving so callers resume ticking.
    pub fn wake(&mut self) {
        if !self.nodes.is_empty() {
            self.settled = false;
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Sum of absolute velocity components across all nodes.
    pub fn motion(&self) -> f64 {
        self.nodes.iter().map(|n| n.velocity.manhattan()).sum()
    }
}
