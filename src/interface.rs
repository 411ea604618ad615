use nalgebra::{Matrix2, Vector2};

use crate::{
    datatypes::{InterfacePoint, Mesh},
    error::BimeshError,
    mesher::{self, Axis, GEOM_TOL},
    quadrature::LineQuadrature,
    solver,
};

/// Tolerance on local element coordinates when checking that a projected
/// interface point actually lies inside its containing element
pub const CONTAINMENT_TOL: f64 = 1e-8;

/// Newton iteration cap for inverting the bilinear element map
const MAX_LOCATE_ITER: usize = 10;

/// Inverts the bilinear map of a quadrilateral to find the local coordinates
/// of a physical point.
///
/// The reference square is [-1, 1] x [-1, 1]. The inverse map is solved with
/// a Newton iteration started at the element center; for the axis-aligned
/// elements produced by the structured mesher it converges in one step.
///
/// # Arguments
/// * `mesh` - The mesh owning the element
/// * `element` - Index of the containing element
/// * `x`, `y` - Physical coordinates of the point
///
/// # Returns
/// The local coordinates (xi, eta) of the point
pub fn locate_in_element(
    mesh: &Mesh,
    element: usize,
    x: f64,
    y: f64,
) -> Result<(f64, f64), BimeshError> {
    let nodes = mesh.elements[element].nodes;
    let mut local = Vector2::new(0.0, 0.0);

    for _ in 0..MAX_LOCATE_ITER {
        let n = solver::shape_values(local[0], local[1]);
        let mut mapped = Vector2::zeros();
        for (i, node) in nodes.iter().enumerate() {
            let vertex = &mesh.nodes[*node].vertex;
            mapped[0] += n[i] * vertex.x;
            mapped[1] += n[i] * vertex.y;
        }

        let residual = mapped - Vector2::new(x, y);
        if residual.norm() < GEOM_TOL {
            return Ok((local[0], local[1]));
        }

        let g = solver::shape_gradients(local[0], local[1]);
        let mut jacobian: Matrix2<f64> = Matrix2::zeros();
        for (i, node) in nodes.iter().enumerate() {
            let vertex = &mesh.nodes[*node].vertex;
            jacobian[(0, 0)] += g[(0, i)] * vertex.x;
            jacobian[(0, 1)] += g[(1, i)] * vertex.x;
            jacobian[(1, 0)] += g[(0, i)] * vertex.y;
            jacobian[(1, 1)] += g[(1, i)] * vertex.y;
        }

        let step = match jacobian.lu().solve(&residual) {
            Some(s) => s,
            None => {
                return Err(BimeshError::InvalidMesh(format!(
                    "Element {element} is degenerate; cannot invert its bilinear map"
                )))
            }
        };
        local -= step;
    }

    Err(BimeshError::InvalidMesh(format!(
        "Point location did not converge at ({x}, {y}) in element {element}"
    )))
}

/// Whether local coordinates lie inside the reference square
fn contains(local: (f64, f64)) -> bool {
    local.0.abs() <= 1.0 + CONTAINMENT_TOL && local.1.abs() <= 1.0 + CONTAINMENT_TOL
}

/// Builds the interface correspondence table between the two meshes.
///
/// Runs a 2-point Gauss rule along every left-mesh interface edge. Each
/// quadrature point is mapped to local coordinates in the owning left element
/// and in the overlapping right element, found by matching the point's y
/// coordinate against the right edge intervals. Both meshes must discretize
/// the same interface segment; densities may differ.
///
/// # Arguments
/// * `left` - The left subdomain mesh
/// * `right` - The right subdomain mesh
/// * `x_interface` - X coordinate of the shared coupling line
///
/// # Returns
/// An ordered vector of InterfacePoint instances, one per quadrature point
pub fn build_interface(
    left: &Mesh,
    right: &Mesh,
    x_interface: f64,
) -> Result<Vec<InterfacePoint>, BimeshError> {
    let left_edges = mesher::boundary_edges(left, Axis::X, x_interface)?;
    let right_edges = mesher::boundary_edges(right, Axis::X, x_interface)?;

    // Each mesh must contribute one edge per cell row
    if left_edges.len() != left.ny || right_edges.len() != right.ny {
        return Err(BimeshError::MeshMismatch(format!(
            "Interface edge counts {} / {} do not match the mesh subdivisions {} / {}",
            left_edges.len(),
            right_edges.len(),
            left.ny,
            right.ny
        )));
    }

    // The interface segments must cover the same y-range
    let left_lo = left.nodes[left_edges[0].nodes.0].vertex.y;
    let left_hi = left.nodes[left_edges.last().unwrap().nodes.1].vertex.y;
    let right_lo = right.nodes[right_edges[0].nodes.0].vertex.y;
    let right_hi = right.nodes[right_edges.last().unwrap().nodes.1].vertex.y;
    if (left_lo - right_lo).abs() > GEOM_TOL || (left_hi - right_hi).abs() > GEOM_TOL {
        return Err(BimeshError::MeshMismatch(format!(
            "Interface extents differ: left covers [{left_lo}, {left_hi}], \
             right covers [{right_lo}, {right_hi}]"
        )));
    }

    let rule = LineQuadrature::two_point();
    let mut points: Vec<InterfacePoint> = Vec::with_capacity(2 * left_edges.len());

    for (edge_idx, edge) in left_edges.iter().enumerate() {
        let ya = left.nodes[edge.nodes.0].vertex.y;
        let yb = left.nodes[edge.nodes.1].vertex.y;
        let edge_jacobian = (yb - ya) / 2.0;

        // Unit tangent rotated -90 degrees points out of the left subdomain
        let tangent = Vector2::new(0.0, yb - ya).normalize();
        let normal = (tangent.y, -tangent.x);

        for (qp_idx, (t, w)) in rule.points.iter().zip(rule.weights.iter()).enumerate() {
            let y = ya * (1.0 - t) / 2.0 + yb * (1.0 + t) / 2.0;

            let left_local = locate_in_element(left, edge.element, x_interface, y)?;
            if !contains(left_local) {
                return Err(BimeshError::MeshMismatch(format!(
                    "Quadrature point {qp_idx} of interface edge {edge_idx} at y={y} \
                     falls outside its own left element {}",
                    edge.element
                )));
            }

            let right_edge = right_edges
                .iter()
                .find(|e| {
                    let lo = right.nodes[e.nodes.0].vertex.y;
                    let hi = right.nodes[e.nodes.1].vertex.y;
                    y >= lo - GEOM_TOL && y <= hi + GEOM_TOL
                })
                .ok_or_else(|| {
                    BimeshError::MeshMismatch(format!(
                        "No right-mesh interface edge covers y={y} \
                         (quadrature point {qp_idx} of left edge {edge_idx})"
                    ))
                })?;

            let right_local = locate_in_element(right, right_edge.element, x_interface, y)?;
            if !contains(right_local) {
                return Err(BimeshError::MeshMismatch(format!(
                    "Quadrature point {qp_idx} of interface edge {edge_idx} at y={y} \
                     falls outside right element {}",
                    right_edge.element
                )));
            }

            points.push(InterfacePoint {
                left_element: edge.element,
                right_element: right_edge.element,
                left_local,
                right_local,
                weight: w * edge_jacobian,
                normal,
            });
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesher::structured_mesh;
    use approx::assert_relative_eq;

    /// Physical coordinates of a local point inside an element
    fn physical_point(mesh: &Mesh, element: usize, local: (f64, f64)) -> (f64, f64) {
        let shape = solver::shape_values(local.0, local.1);
        let mut x = 0.0;
        let mut y = 0.0;
        for (n, node) in mesh.elements[element].nodes.iter().enumerate() {
            x += shape[n] * mesh.nodes[*node].vertex.x;
            y += shape[n] * mesh.nodes[*node].vertex.y;
        }
        (x, y)
    }

    #[test]
    fn locate_recovers_vertices_and_center() {
        let mesh = structured_mesh(0.0, 0.0, 2.0, 1.0, 2, 1).unwrap();
        let nodes = mesh.elements[0].nodes;

        let v1 = &mesh.nodes[nodes[1]].vertex;
        let local = locate_in_element(&mesh, 0, v1.x, v1.y).unwrap();
        assert_relative_eq!(local.0, 1.0, epsilon = 1e-10);
        assert_relative_eq!(local.1, -1.0, epsilon = 1e-10);

        let mut center_x = 0.0;
        let mut center_y = 0.0;
        for node in &nodes {
            center_x += mesh.nodes[*node].vertex.x / 4.0;
            center_y += mesh.nodes[*node].vertex.y / 4.0;
        }
        let local = locate_in_element(&mesh, 0, center_x, center_y).unwrap();
        assert_relative_eq!(local.0, 0.0, epsilon = 1e-10);
        assert_relative_eq!(local.1, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn interface_points_agree_from_both_sides() {
        let left = structured_mesh(0.0, -3.0, 24.0, 3.0, 2, 4).unwrap();
        let right = structured_mesh(24.0, -3.0, 48.0, 3.0, 2, 2).unwrap();

        let points = build_interface(&left, &right, 24.0).unwrap();
        assert_eq!(points.len(), 2 * 4);

        for point in &points {
            let from_left = physical_point(&left, point.left_element, point.left_local);
            let from_right = physical_point(&right, point.right_element, point.right_local);

            assert_relative_eq!(from_left.0, 24.0, epsilon = 1e-10);
            assert_relative_eq!(from_right.0, 24.0, epsilon = 1e-10);
            assert_relative_eq!(from_left.1, from_right.1, epsilon = 1e-10);

            assert_relative_eq!(point.normal.0, 1.0, epsilon = 1e-12);
            assert_relative_eq!(point.normal.1, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn interface_weights_sum_to_interface_length() {
        let left = structured_mesh(0.0, -3.0, 24.0, 3.0, 3, 8).unwrap();
        let right = structured_mesh(24.0, -3.0, 48.0, 3.0, 3, 4).unwrap();

        let points = build_interface(&left, &right, 24.0).unwrap();
        let total: f64 = points.iter().map(|p| p.weight).sum();
        assert_relative_eq!(total, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_extents_are_rejected() {
        let left = structured_mesh(0.0, -3.0, 24.0, 3.0, 2, 4).unwrap();
        let shifted = structured_mesh(24.0, -2.0, 48.0, 4.0, 2, 2).unwrap();

        assert!(matches!(
            build_interface(&left, &shifted, 24.0),
            Err(BimeshError::MeshMismatch(_))
        ));
    }
}
