//! Barnes-Hut quadtree with incremental center-of-mass aggregation.
//!
//! The tree is rebuilt from scratch every simulation tick and dropped at the
//! end of it. Each quadrant is either a leaf holding a few bodies or a split
//! quadrant owning exactly four children, never both.
//!
//! # Aggregation invariant
//!
//! For every quadrant, `mass` is the number of bodies in its subtree and
//! `center_of_mass` is their mean position. Insertion maintains this with a
//! running weighted average on every quadrant it passes through, so the
//! invariant holds after each single insertion.

use rand::Rng;

use crate::vector::Vec2;

/// Bodies a leaf may hold before it splits.
pub const MAX_LEAF_BODIES: usize = 4;

/// Quadrants at or below this size never split; their bodies share the leaf.
pub const MIN_SPLIT_SIZE: f64 = 10.0;

/// Default accuracy/speed trade-off.
pub const DEFAULT_THETA: f64 = 0.7;

/// Padding added around the bounding box of all bodies.
const BOUNDS_PADDING: f64 = 50.0;

/// Root size used when there is nothing to bound.
const EMPTY_ROOT_SIZE: f64 = 1000.0;

/// Largest coordinate magnitude the index accepts on either axis.
pub const MAX_COORDINATE: f64 = 1.0e12;

/// Distances below this are treated as coincident.
const NEAR_ZERO: f64 = 1e-6;

/// Component bound of the symmetry-breaking jitter force.
const JITTER: f64 = 1.0;

/// Whether `position` is finite and within [`MAX_COORDINATE`] on both axes.
pub fn in_bounds(position: Vec2) -> bool {
    position.x.abs() <= MAX_COORDINATE && position.y.abs() <= MAX_COORDINATE
}

/// A graph node as seen by the index: its arena slot and position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub index: usize,
    pub position: Vec2,
}

impl Body {
    pub fn new(index: usize, position: Vec2) -> Self {
        Self { index, position }
    }
}

/// Payload of a quadrant.
#[derive(Debug, Clone)]
pub enum Cell {
    /// Bodies stored directly
    Leaf(Vec<Body>),
    /// Four children in NW, NE, SW, SE order
    Split(Box<[Quadrant; 4]>),
}

/// A square region of the index.
#[derive(Debug, Clone)]
pub struct Quadrant {
    origin: Vec2,
    size: f64,
    mass: f64,
    center_of_mass: Vec2,
    cell: Cell,
}

impl Quadrant {
    /// An empty leaf covering `[origin, origin + size)` on both axes.
    pub fn new(origin: Vec2, size: f64) -> Self {
        Self {
            origin,
            size,
            mass: 0.0,
            center_of_mass: Vec2::ZERO,
            cell: Cell::Leaf(Vec::new()),
        }
    }

    /// Build an index over `positions`, using each position's slice index as
    /// the body index.
    ///
    /// Positions that are not [`in_bounds`] are left out of the tree.
    pub fn build(positions: &[Vec2]) -> Self {
        let finite = || positions.iter().enumerate().filter(|(_, p)| in_bounds(**p));

        let mut min = Vec2::new(f64::INFINITY, f64::INFINITY);
        let mut max = Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (_, p) in finite() {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }

        if !min.is_finite() {
            return Self::new(Vec2::ZERO, EMPTY_ROOT_SIZE);
        }

        let width = max.x - min.x + 2.0 * BOUNDS_PADDING;
        let height = max.y - min.y + 2.0 * BOUNDS_PADDING;
        let origin = min - Vec2::new(BOUNDS_PADDING, BOUNDS_PADDING);

        let size = width.max(height);
        if !size.is_finite() {
            return Self::new(Vec2::ZERO, EMPTY_ROOT_SIZE);
        }

        let mut root = Self::new(origin, size);
        for (index, &position) in finite() {
            root.insert(Body::new(index, position));
        }
        root
    }

    /// Insert one body, updating the aggregate of every quadrant on its path.
    pub fn insert(&mut self, body: Body) {
        self.mass += 1.0;
        self.center_of_mass += (body.position - self.center_of_mass) / self.mass;

        let slot = self.child_slot(body.position);
        let overfull = match &mut self.cell {
            Cell::Split(children) => {
                children[slot].insert(body);
                false
            }
            Cell::Leaf(bodies) => {
                bodies.push(body);
                bodies.len() > MAX_LEAF_BODIES
            }
        };
        if overfull && self.size > MIN_SPLIT_SIZE {
            self.subdivide();
        }
    }

    /// Replace this leaf with four children and redistribute its bodies.
    /// A quadrant whose half size is not finite stays a leaf.
    fn subdivide(&mut self) {
        let half = self.size / 2.0;
        if !half.is_finite() {
            return;
        }
        let Vec2 { x, y } = self.origin;
        let children = Box::new([
            Quadrant::new(Vec2::new(x, y), half),
            Quadrant::new(Vec2::new(x + half, y), half),
            Quadrant::new(Vec2::new(x, y + half), half),
            Quadrant::new(Vec2::new(x + half, y + half), half),
        ]);

        let Cell::Leaf(bodies) = std::mem::replace(&mut self.cell, Cell::Split(children)) else {
            return;
        };
        let slots: Vec<usize> = bodies.iter().map(|b| self.child_slot(b.position)).collect();
        if let Cell::Split(children) = &mut self.cell {
            for (body, slot) in bodies.into_iter().zip(slots) {
                children[slot].insert(body);
            }
        }
    }

    /// Child quadrant a position falls in, by comparison with the midpoint.
    fn child_slot(&self, position: Vec2) -> usize {
        let half = self.size / 2.0;
        let east = position.x >= self.origin.x + half;
        let south = position.y >= self.origin.y + half;
        usize::from(east) + 2 * usize::from(south)
    }

    /// Top-left corner.
    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    /// Side length.
    pub fn size(&self) -> f64 {
        self.size
    }

    /// Number of bodies in this subtree.
    pub fn mass(&self) -> f64 {
        self.mass
    }

    /// Mean position of the bodies in this subtree.
    pub fn center_of_mass(&self) -> Vec2 {
        self.center_of_mass
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.cell, Cell::Leaf(_))
    }

    /// Whether this is a leaf whose only body is `index`.
    fn holds_only(&self, index: usize) -> bool {
        matches!(&self.cell, Cell::Leaf(bodies) if bodies.len() == 1 && bodies[0].index == index)
    }

    /// Aggregate repulsive force on body `index` located at `at`.
    ///
    /// Quadrants with `size / distance < theta` are treated as a point mass
    /// at their center of mass exerting `repulsion * mass / distance²` away
    /// from it. Leaves that are too close for that are summed body by body,
    /// skipping `index` itself. A quadrant whose center of mass coincides
    /// with `at` contributes nothing if it is a leaf holding only `index`,
    /// and a small random jitter otherwise.
    pub fn force_on<R: Rng + ?Sized>(
        &self,
        index: usize,
        at: Vec2,
        repulsion: f64,
        theta: f64,
        rng: &mut R,
    ) -> Vec2 {
        if self.mass == 0.0 {
            return Vec2::ZERO;
        }

        let away = at - self.center_of_mass;
        let distance = away.length();
        if distance < NEAR_ZERO {
            if self.holds_only(index) {
                return Vec2::ZERO;
            }
            return jitter(rng);
        }

        if self.size / distance < theta {
            return point_repulsion(away, distance, self.mass, repulsion);
        }

        let mut force = Vec2::ZERO;
        match &self.cell {
            Cell::Leaf(bodies) => {
                for body in bodies.iter().filter(|b| b.index != index) {
                    let away = at - body.position;
                    let distance = away.length();
                    force += if distance < NEAR_ZERO {
                        jitter(rng)
                    } else {
                        point_repulsion(away, distance, 1.0, repulsion)
                    };
                }
            }
            Cell::Split(children) => {
                for child in children.iter() {
                    force += child.force_on(index, at, repulsion, theta, rng);
                }
            }
        }
        force
    }

    /// Depth of the deepest leaf (a lone leaf has depth 0).
    pub fn depth(&self) -> usize {
        match &self.cell {
            Cell::Leaf(_) => 0,
            Cell::Split(children) => 1 + children.iter().map(Quadrant::depth).max().unwrap_or(0),
        }
    }
}

/// Inverse-square push of magnitude `repulsion * mass / distance²` along `away`.
fn point_repulsion(away: Vec2, distance: f64, mass: f64, repulsion: f64) -> Vec2 {
    let magnitude = repulsion * mass / (distance * distance);
    away / distance * magnitude
}

fn jitter<R: Rng + ?Sized>(rng: &mut R) -> Vec2 {
    Vec2::new(rng.gen_range(-JITTER..JITTER), rng.gen_range(-JITTER..JITTER))
}

/// Exact O(n²) repulsion on body `index`, the reference for [`Quadrant::force_on`].
pub fn pairwise_force(positions: &[Vec2], index: usize, repulsion: f64) -> Vec2 {
    let at = positions[index];
    positions
        .iter()
        .enumerate()
        .filter(|&(i, p)| i != index && at.distance(*p) >= NEAR_ZERO)
        .fold(Vec2::ZERO, |acc, (_, &p)| {
            let away = at - p;
            acc + point_repulsion(away, away.length(), 1.0, repulsion)
        })
}
