use json::JsonValue;

use crate::{
    datatypes::{BoundaryEdge, Element, Mesh, ModelConfig, Node, Vertex},
    error::BimeshError,
};

/// Coordinate axis a boundary predicate applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Geometric tolerance for boundary predicates and point location
pub const GEOM_TOL: f64 = 1e-9;

/// Builds a structured quadrilateral mesh over a rectangle.
///
/// Grid nodes are ordered column-major: node `ix * (ny + 1) + iy` sits at
/// grid position (ix, iy). Each grid cell becomes one counter-clockwise
/// bilinear quadrilateral.
///
/// # Arguments
/// * `x_min`, `y_min` - Lower-left corner of the rectangle
/// * `x_max`, `y_max` - Upper-right corner of the rectangle
/// * `nx`, `ny` - Number of subdivisions per axis
///
/// # Returns
/// A Mesh with `(nx+1)(ny+1)` nodes and `nx ny` elements
pub fn structured_mesh(
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
    nx: usize,
    ny: usize,
) -> Result<Mesh, BimeshError> {
    if nx < 1 || ny < 1 {
        return Err(BimeshError::InvalidMesh(format!(
            "Subdivision counts must be at least 1, got nx={nx} ny={ny}"
        )));
    }
    if x_max <= x_min || y_max <= y_min {
        return Err(BimeshError::InvalidMesh(format!(
            "Degenerate rectangle [{x_min}, {x_max}] x [{y_min}, {y_max}]"
        )));
    }

    let dx = (x_max - x_min) / nx as f64;
    let dy = (y_max - y_min) / ny as f64;

    let mut nodes: Vec<Node> = Vec::with_capacity((nx + 1) * (ny + 1));
    for ix in 0..=nx {
        for iy in 0..=ny {
            nodes.push(Node {
                vertex: Vertex {
                    x: x_min + ix as f64 * dx,
                    y: y_min + iy as f64 * dy,
                },
            });
        }
    }

    let mut elements: Vec<Element> = Vec::with_capacity(nx * ny);
    let stride = ny + 1;
    for ix in 0..nx {
        for iy in 0..ny {
            let n00 = ix * stride + iy;
            let n10 = (ix + 1) * stride + iy;
            let n01 = n00 + 1;
            let n11 = n10 + 1;

            elements.push(Element {
                nodes: [n00, n10, n11, n01],
                stress: None,
            });
        }
    }

    Ok(Mesh {
        nodes,
        elements,
        nx,
        ny,
    })
}

/// Collects the indices of nodes lying on a coordinate line.
///
/// # Arguments
/// * `mesh` - The mesh to search
/// * `axis` - Which coordinate the predicate applies to
/// * `target` - The coordinate value defining the boundary line
///
/// # Returns
/// Node indices sorted by increasing coordinate along the boundary
pub fn boundary_nodes(mesh: &Mesh, axis: Axis, target: f64) -> Vec<usize> {
    let mut found: Vec<usize> = mesh
        .nodes
        .iter()
        .enumerate()
        .filter(|(_, node)| {
            let coord = match axis {
                Axis::X => node.vertex.x,
                Axis::Y => node.vertex.y,
            };
            (coord - target).abs() < GEOM_TOL
        })
        .map(|(i, _)| i)
        .collect();

    found.sort_by(|a, b| {
        let along = |i: &usize| match axis {
            Axis::X => mesh.nodes[*i].vertex.y,
            Axis::Y => mesh.nodes[*i].vertex.x,
        };
        along(a).partial_cmp(&along(b)).unwrap()
    });

    found
}

/// Extracts the boundary edges along a coordinate line, each tagged with its
/// owning element.
///
/// Edges are consecutive node pairs in boundary traversal order, so edge
/// lists extracted from two meshes sharing the same line cover the same
/// coordinate ranges in the same order.
///
/// # Arguments
/// * `mesh` - The mesh to search
/// * `axis` - Which coordinate the predicate applies to
/// * `target` - The coordinate value defining the boundary line
///
/// # Returns
/// An ordered vector of BoundaryEdge instances
pub fn boundary_edges(mesh: &Mesh, axis: Axis, target: f64) -> Result<Vec<BoundaryEdge>, BimeshError> {
    let nodes = boundary_nodes(mesh, axis, target);
    if nodes.len() < 2 {
        return Err(BimeshError::InvalidMesh(format!(
            "Found {} nodes on boundary {:?}={target}; expected at least 2",
            nodes.len(),
            axis
        )));
    }

    let mut edges: Vec<BoundaryEdge> = Vec::with_capacity(nodes.len() - 1);
    for pair in nodes.windows(2) {
        let (a, b) = (pair[0], pair[1]);

        let element = mesh
            .elements
            .iter()
            .position(|e| e.nodes.contains(&a) && e.nodes.contains(&b))
            .ok_or_else(|| {
                BimeshError::InvalidMesh(format!(
                    "No element owns boundary edge ({a}, {b}) on {:?}={target}",
                    axis
                ))
            })?;

        edges.push(BoundaryEdge {
            nodes: (a, b),
            element,
        });
    }

    Ok(edges)
}

/// Parses the input json into a JsonValue object
///
/// # Arguments
/// * `input_file` - The path to the input file
///
/// # Returns
/// A JsonValue object
fn load_input_file(input_file: &str) -> Result<JsonValue, BimeshError> {
    let file_string = match std::fs::read_to_string(input_file) {
        Ok(f) => f,
        Err(_err) => {
            return Err(BimeshError::Input(format!(
                "Unable to open input file {}",
                input_file
            )))
        }
    };

    let input_file_json = match json::parse(&file_string) {
        Ok(f) => f,
        Err(err) => {
            return Err(BimeshError::Input(format!(
                "Error in input file json: {err}"
            )))
        }
    };

    for key in [
        "material_elasticity",
        "poisson_ratio",
        "length",
        "half_height",
        "tip_load",
        "nitsche_penalty",
        "nx_left",
        "ny_left",
        "nx_right",
        "ny_right",
    ] {
        if !input_file_json.has_key(key) {
            return Err(BimeshError::Input(format!(
                "Input json missing {key} field"
            )));
        }
    }

    Ok(input_file_json)
}

/// Parses a ModelConfig from the input json
///
/// # Arguments
/// * `input_json` - The input file as a JsonValue object
///
/// # Returns
/// A ModelConfig instance
fn parse_config(input_json: &JsonValue) -> Result<ModelConfig, BimeshError> {
    let field_f64 = |key: &str| {
        input_json[key]
            .as_f64()
            .ok_or_else(|| BimeshError::Input(format!("Bad value for {key} in input json")))
    };
    let field_usize = |key: &str| {
        input_json[key]
            .as_usize()
            .ok_or_else(|| BimeshError::Input(format!("Bad value for {key} in input json")))
    };

    Ok(ModelConfig {
        youngs_modulus: field_f64("material_elasticity")?,
        poisson_ratio: field_f64("poisson_ratio")?,
        length: field_f64("length")?,
        half_height: field_f64("half_height")?,
        tip_load: field_f64("tip_load")?,
        nitsche_penalty: field_f64("nitsche_penalty")?,
        nx_left: field_usize("nx_left")?,
        ny_left: field_usize("ny_left")?,
        nx_right: field_usize("nx_right")?,
        ny_right: field_usize("ny_right")?,
    })
}

/// Validates a model configuration before any meshing happens
///
/// # Arguments
/// * `config` - The configuration to validate
pub fn validate_config(config: &ModelConfig) -> Result<(), BimeshError> {
    if config.youngs_modulus <= 0.0 {
        return Err(BimeshError::InvalidConfiguration(
            "Material elasticity must be positive".to_owned(),
        ));
    }
    if config.poisson_ratio <= -1.0 || config.poisson_ratio >= 0.5 {
        return Err(BimeshError::InvalidConfiguration(format!(
            "Poisson ratio {} outside (-1, 0.5)",
            config.poisson_ratio
        )));
    }
    if config.length <= 0.0 || config.half_height <= 0.0 {
        return Err(BimeshError::InvalidConfiguration(
            "Beam length and half-height must be positive".to_owned(),
        ));
    }
    if config.nitsche_penalty <= 0.0 {
        return Err(BimeshError::InvalidConfiguration(format!(
            "Nitsche penalty must be positive, got {}",
            config.nitsche_penalty
        )));
    }
    if config.nx_left < 1 || config.ny_left < 1 || config.nx_right < 1 || config.ny_right < 1 {
        return Err(BimeshError::InvalidConfiguration(
            "Subdivision counts must be at least 1".to_owned(),
        ));
    }
    if config.ny_left % config.ny_right != 0 {
        return Err(BimeshError::InvalidConfiguration(format!(
            "Left interface subdivision count {} must be an integer multiple of the right count {}",
            config.ny_left, config.ny_right
        )));
    }

    Ok(())
}

/// Runs the mesher: loads the configuration and builds both subdomain meshes
///
/// # Arguments
/// * `input_file` - Optional path to a json input file; defaults apply when absent
///
/// # Returns
/// The validated configuration and the left and right meshes, in that order
pub fn run(input_file: Option<&str>) -> Result<(ModelConfig, Mesh, Mesh), BimeshError> {
    let config = match input_file {
        Some(path) => parse_config(&load_input_file(path)?)?,
        None => ModelConfig::default(),
    };
    validate_config(&config)?;

    let c = config.half_height;
    let mid = config.interface_x();

    let left = structured_mesh(0.0, -c, mid, c, config.nx_left, config.ny_left)?;
    let right = structured_mesh(mid, -c, config.length, c, config.nx_right, config.ny_right)?;

    println!(
        "info: meshed subdomains with {} + {} nodes, {} + {} elements",
        left.nodes.len(),
        right.nodes.len(),
        left.elements.len(),
        right.elements.len()
    );

    Ok((config, left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn structured_mesh_counts() {
        let mesh = structured_mesh(0.0, -3.0, 24.0, 3.0, 10, 8).unwrap();

        assert_eq!(mesh.nodes.len(), 11 * 9);
        assert_eq!(mesh.elements.len(), 10 * 8);
        assert_eq!((mesh.nx, mesh.ny), (10, 8));
    }

    #[test]
    fn structured_mesh_rejects_zero_subdivisions() {
        assert!(matches!(
            structured_mesh(0.0, 0.0, 1.0, 1.0, 0, 4),
            Err(BimeshError::InvalidMesh(_))
        ));
    }

    #[test]
    fn elements_wind_counter_clockwise() {
        let mesh = structured_mesh(0.0, 0.0, 2.0, 1.0, 4, 3).unwrap();

        // Shoelace formula over the four corners
        for element in &mesh.elements {
            let mut doubled_area = 0.0;
            for i in 0..4 {
                let a = &mesh.nodes[element.nodes[i]].vertex;
                let b = &mesh.nodes[element.nodes[(i + 1) % 4]].vertex;
                doubled_area += a.x * b.y - b.x * a.y;
            }
            assert!(doubled_area > 0.0);
        }
    }

    #[test]
    fn boundary_nodes_ordered_by_y() {
        let mesh = structured_mesh(0.0, -3.0, 24.0, 3.0, 4, 6).unwrap();
        let nodes = boundary_nodes(&mesh, Axis::X, 24.0);

        assert_eq!(nodes.len(), 7);
        for pair in nodes.windows(2) {
            assert!(mesh.nodes[pair[0]].vertex.y < mesh.nodes[pair[1]].vertex.y);
        }
        assert_relative_eq!(mesh.nodes[nodes[0]].vertex.y, -3.0);
        assert_relative_eq!(mesh.nodes[nodes[6]].vertex.y, 3.0);
    }

    #[test]
    fn boundary_edges_have_owning_elements() {
        let mesh = structured_mesh(0.0, -3.0, 24.0, 3.0, 4, 6).unwrap();
        let edges = boundary_edges(&mesh, Axis::X, 0.0).unwrap();

        assert_eq!(edges.len(), 6);
        for edge in &edges {
            let element = &mesh.elements[edge.element];
            assert!(element.nodes.contains(&edge.nodes.0));
            assert!(element.nodes.contains(&edge.nodes.1));
        }
    }

    #[test]
    fn config_validation_rejects_bad_penalty() {
        let config = ModelConfig {
            nitsche_penalty: -1.0,
            ..ModelConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(BimeshError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn config_validation_rejects_non_nesting_interface() {
        let config = ModelConfig {
            ny_left: 8,
            ny_right: 3,
            ..ModelConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(BimeshError::InvalidConfiguration(_))
        ));
    }
}
