#[derive(Debug, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug)]
pub struct Node {
    pub vertex: Vertex,
}

/// A 4-node bilinear quadrilateral, nodes ordered counter-clockwise
#[derive(Debug)]
pub struct Element {
    pub nodes: [usize; 4],
    pub stress: Option<f64>,
}

/// A structured quadrilateral mesh over one rectangular subdomain.
///
/// `nx` and `ny` are the per-axis cell counts the mesh was generated with;
/// boundary extraction uses them as expected edge counts.
#[derive(Debug)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
    pub nx: usize,
    pub ny: usize,
}

/// The two subdomains of the coupled model, split at the interface line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Left,
    Right,
}

/// Maps a node in either subdomain to its global degree-of-freedom indices.
///
/// The global unknown vector has length `2 * (n_left + n_right)` and is laid
/// out in four blocks: left x-displacements, right x-displacements, left
/// y-displacements, right y-displacements. A node's y-DOF index is always its
/// x-DOF index plus `n_left + n_right`.
#[derive(Debug, Clone, Copy)]
pub struct DofMap {
    n_left: usize,
    n_right: usize,
}

impl DofMap {
    pub fn new(n_left: usize, n_right: usize) -> DofMap {
        DofMap { n_left, n_right }
    }

    /// Total number of degrees of freedom in the coupled system
    pub fn total(&self) -> usize {
        2 * (self.n_left + self.n_right)
    }

    /// Global index of a node's x-displacement
    pub fn x_dof(&self, domain: Domain, node: usize) -> usize {
        match domain {
            Domain::Left => node,
            Domain::Right => self.n_left + node,
        }
    }

    /// Global index of a node's y-displacement
    pub fn y_dof(&self, domain: Domain, node: usize) -> usize {
        self.x_dof(domain, node) + self.n_left + self.n_right
    }
}

/// An edge on a mesh boundary, with the element it belongs to.
///
/// Node pairs are ordered by increasing coordinate along the boundary.
#[derive(Debug)]
pub struct BoundaryEdge {
    pub nodes: (usize, usize),
    pub element: usize,
}

/// One quadrature point on the coupling interface.
///
/// Carries the local coordinates of the same physical point inside the
/// containing element on each side, the integration weight scaled by the edge
/// Jacobian, and the unit normal pointing out of the left subdomain.
#[derive(Debug)]
pub struct InterfacePoint {
    pub left_element: usize,
    pub right_element: usize,
    pub left_local: (f64, f64),
    pub right_local: (f64, f64),
    pub weight: f64,
    pub normal: (f64, f64),
}

/// Model parameters, either built-in defaults or loaded from an input json
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
    pub length: f64,
    pub half_height: f64,
    pub tip_load: f64,
    pub nitsche_penalty: f64,
    pub nx_left: usize,
    pub ny_left: usize,
    pub nx_right: usize,
    pub ny_right: usize,
}

impl ModelConfig {
    /// Second moment of area of the rectangular cross section (unit thickness)
    pub fn moment_of_inertia(&self) -> f64 {
        2.0 * f64::powi(self.half_height, 3) / 3.0
    }

    /// X coordinate of the coupling line between the two subdomains
    pub fn interface_x(&self) -> f64 {
        self.length / 2.0
    }
}

impl Default for ModelConfig {
    /// The calibrated cantilever: E=30e6, nu=0.3, L=48, c=3, P=1000
    fn default() -> ModelConfig {
        ModelConfig {
            youngs_modulus: 30e6,
            poisson_ratio: 0.3,
            length: 48.0,
            half_height: 3.0,
            tip_load: 1000.0,
            nitsche_penalty: 1e9,
            nx_left: 10,
            ny_left: 8,
            nx_right: 10,
            ny_right: 4,
        }
    }
}
