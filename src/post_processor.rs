use std::io::Write;

use nalgebra::{DVector, SMatrix};

use crate::{
    datatypes::{Domain, DofMap, Mesh, ModelConfig},
    error::BimeshError,
    mesher::{self, Axis},
    solver,
};

/// Closed-form Timoshenko cantilever displacement field (plane stress).
///
/// The beam is fixed at x=0 and carries the tip load downward at x=L; the
/// field is compatible with the parabolic shear traction applied by the load
/// assembler.
///
/// # Arguments
/// * `config` - The model configuration
/// * `x`, `y` - Physical coordinates of the evaluation point
///
/// # Returns
/// The displacements (ux, uy) at the point
pub fn exact_displacement(config: &ModelConfig, x: f64, y: f64) -> (f64, f64) {
    let e = config.youngs_modulus;
    let nu = config.poisson_ratio;
    let l = config.length;
    let c = config.half_height;
    let p = config.tip_load;
    let inertia = config.moment_of_inertia();

    let factor = p / (6.0 * e * inertia);

    let ux = factor * y * ((6.0 * l - 3.0 * x) * x + (2.0 + nu) * (y * y - c * c));
    let uy = -factor
        * (3.0 * nu * y * y * (l - x) + (4.0 + 5.0 * nu) * c * c * x + (3.0 * l - x) * x * x);

    (ux, uy)
}

/// Closed-form Timoshenko cantilever stress field
///
/// # Arguments
/// * `config` - The model configuration
/// * `x`, `y` - Physical coordinates of the evaluation point
///
/// # Returns
/// The stress components (sxx, syy, txy) at the point
pub fn exact_stress(config: &ModelConfig, x: f64, y: f64) -> (f64, f64, f64) {
    let l = config.length;
    let c = config.half_height;
    let p = config.tip_load;
    let inertia = config.moment_of_inertia();

    let sxx = p * (l - x) * y / inertia;
    let txy = -p * (c * c - y * y) / (2.0 * inertia);

    (sxx, 0.0, txy)
}

/// Calculates the von Mises stress in every element of a subdomain. Loads the
/// results into the element objects
///
/// # Arguments
/// * `mesh` - A mutable reference to the subdomain mesh
/// * `domain` - Which subdomain the mesh represents
/// * `dof_map` - The global DOF map
/// * `displacements` - The solved global displacement vector
/// * `config` - The model configuration
pub fn compute_stress(
    mesh: &mut Mesh,
    domain: Domain,
    dof_map: &DofMap,
    displacements: &DVector<f64>,
    config: &ModelConfig,
) -> Result<(), BimeshError> {
    let stress_strain_mat =
        solver::compute_stress_strain_matrix(config.poisson_ratio, config.youngs_modulus);

    for i in 0..mesh.elements.len() {
        let element = &mesh.elements[i];

        // Strains evaluated at the element center
        let (strain_displacement_mat, _) =
            solver::compute_strain_displacement_matrix(element, &mesh.nodes, i, (0.0, 0.0))?;

        let mut nodal_displacements: SMatrix<f64, 8, 1> = SMatrix::zeros();
        for (local, node) in element.nodes.iter().enumerate() {
            nodal_displacements[local] = displacements[dof_map.x_dof(domain, *node)];
            nodal_displacements[local + 4] = displacements[dof_map.y_dof(domain, *node)];
        }

        let stress = stress_strain_mat * strain_displacement_mat * nodal_displacements;
        let von_mises = f64::sqrt(
            stress[0] * stress[0] - stress[0] * stress[1]
                + stress[1] * stress[1]
                + 3.0 * stress[2] * stress[2],
        );

        mesh.elements[i].stress = Some(von_mises);
    }

    Ok(())
}

/// Writes simulation results to two CSV files
///
/// # Arguments
/// * `left` - The post-solve left subdomain mesh
/// * `right` - The post-solve right subdomain mesh
/// * `dof_map` - The global DOF map
/// * `displacements` - The solved global displacement vector
/// * `nodes_output` - The filename of the output nodes csv
/// * `elements_output` - The filename of the output elements csv
pub fn csv_output(
    left: &Mesh,
    right: &Mesh,
    dof_map: &DofMap,
    displacements: &DVector<f64>,
    nodes_output: &str,
    elements_output: &str,
) -> Result<(), BimeshError> {
    let mut nodes_file = match std::fs::File::create(nodes_output) {
        Ok(f) => f,
        Err(err) => {
            return Err(BimeshError::PostProcessor(format!(
                "Failed to create {nodes_output}: {err}"
            )));
        }
    };
    let mut elements_file = match std::fs::File::create(elements_output) {
        Ok(f) => f,
        Err(err) => {
            return Err(BimeshError::PostProcessor(format!(
                "Failed to create {elements_output}: {err}"
            )));
        }
    };

    let write_err = |err: std::io::Error| {
        BimeshError::PostProcessor(format!("Failed to write output csv: {err}"))
    };

    // Write nodes
    nodes_file
        .write_all("domain,x,y,ux,uy\n".as_bytes())
        .map_err(write_err)?;
    for (label, domain, mesh) in [("left", Domain::Left, left), ("right", Domain::Right, right)] {
        for (i, node) in mesh.nodes.iter().enumerate() {
            nodes_file
                .write_all(
                    format!(
                        "{label},{x},{y},{ux},{uy}\n",
                        x = node.vertex.x,
                        y = node.vertex.y,
                        ux = displacements[dof_map.x_dof(domain, i)],
                        uy = displacements[dof_map.y_dof(domain, i)],
                    )
                    .as_bytes(),
                )
                .map_err(write_err)?;
        }
    }

    // Write elements
    elements_file
        .write_all("domain,n0,n1,n2,n3,stress\n".as_bytes())
        .map_err(write_err)?;
    for (label, mesh) in [("left", left), ("right", right)] {
        for element in &mesh.elements {
            elements_file
                .write_all(
                    format!(
                        "{label},{n0},{n1},{n2},{n3},{stress}\n",
                        n0 = element.nodes[0],
                        n1 = element.nodes[1],
                        n2 = element.nodes[2],
                        n3 = element.nodes[3],
                        stress = element.stress.unwrap_or(0.0),
                    )
                    .as_bytes(),
                )
                .map_err(write_err)?;
        }
    }

    println!(
        "info: wrote output to {} and {}",
        nodes_output, elements_output
    );

    Ok(())
}

/// Finds the solved deflection at the interface mid-height and compares it
/// against the analytical Timoshenko value
///
/// # Arguments
/// * `left` - The left subdomain mesh
/// * `dof_map` - The global DOF map
/// * `displacements` - The solved global displacement vector
/// * `config` - The model configuration
///
/// # Returns
/// The relative error of the mid-span deflection
pub fn report(
    left: &Mesh,
    dof_map: &DofMap,
    displacements: &DVector<f64>,
    config: &ModelConfig,
) -> Result<f64, BimeshError> {
    let interface_nodes = mesher::boundary_nodes(left, Axis::X, config.interface_x());
    let mid_node = interface_nodes
        .iter()
        .min_by(|a, b| {
            let ya = left.nodes[**a].vertex.y.abs();
            let yb = left.nodes[**b].vertex.y.abs();
            ya.partial_cmp(&yb).unwrap()
        })
        .copied()
        .ok_or_else(|| {
            BimeshError::PostProcessor(
                "No left-mesh nodes found on the interface line".to_owned(),
            )
        })?;

    let vertex = &left.nodes[mid_node].vertex;
    let numerical = displacements[dof_map.y_dof(Domain::Left, mid_node)];
    let (_, analytical) = exact_displacement(config, vertex.x, vertex.y);
    let relative_error = ((numerical - analytical) / analytical).abs();

    println!(
        "info: mid-span deflection at ({:.2}, {:.2}): numerical {:.6e}, analytical {:.6e}",
        vertex.x, vertex.y, numerical, analytical
    );
    println!(
        "info: relative error {:.3}%",
        100.0 * relative_error
    );

    Ok(relative_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exact_field_matches_beam_theory_constants() {
        let config = ModelConfig::default();

        // Shear traction vanishes on the top and bottom faces
        let (_, _, txy_top) = exact_stress(&config, 10.0, config.half_height);
        assert_relative_eq!(txy_top, 0.0);

        // Bending stress vanishes at the loaded end
        let (sxx_tip, _, _) = exact_stress(&config, config.length, 2.0);
        assert_relative_eq!(sxx_tip, 0.0);

        // Fixed-end centroid does not move
        let (ux, uy) = exact_displacement(&config, 0.0, 0.0);
        assert_relative_eq!(ux, 0.0);
        assert_relative_eq!(uy, 0.0);
    }

    #[test]
    fn exact_shear_resultant_equals_tip_load() {
        // Integrate txy over the end cross-section with a fine trapezoid rule
        let config = ModelConfig::default();
        let c = config.half_height;
        let n = 10_000;
        let dy = 2.0 * c / n as f64;

        let mut resultant = 0.0;
        for i in 0..n {
            let y = -c + (i as f64 + 0.5) * dy;
            let (_, _, txy) = exact_stress(&config, config.length, y);
            resultant += txy * dy;
        }

        assert_relative_eq!(resultant, -config.tip_load, max_relative = 1e-6);
    }

    #[test]
    fn exact_displacement_strains_match_exact_stress() {
        // Central-difference strains from the displacement field must
        // reproduce the stress field through the constitutive matrix
        let config = ModelConfig::default();
        let e = config.youngs_modulus;
        let nu = config.poisson_ratio;
        let h = 1e-4;
        let (x, y) = (17.0, 1.3);

        let ddx = |f: &dyn Fn(f64, f64) -> (f64, f64), pick: usize| {
            let a = f(x + h, y);
            let b = f(x - h, y);
            ([a.0, a.1][pick] - [b.0, b.1][pick]) / (2.0 * h)
        };
        let ddy = |f: &dyn Fn(f64, f64) -> (f64, f64), pick: usize| {
            let a = f(x, y + h);
            let b = f(x, y - h);
            ([a.0, a.1][pick] - [b.0, b.1][pick]) / (2.0 * h)
        };

        let field = |x: f64, y: f64| exact_displacement(&config, x, y);
        let exx = ddx(&field, 0);
        let eyy = ddy(&field, 1);
        let gxy = ddy(&field, 0) + ddx(&field, 1);

        let (sxx, syy, txy) = exact_stress(&config, x, y);
        assert_relative_eq!(
            e / (1.0 - nu * nu) * (exx + nu * eyy),
            sxx,
            max_relative = 1e-5
        );
        // syy is identically zero in the analytical field
        let syy_from_strain = e / (1.0 - nu * nu) * (eyy + nu * exx);
        assert!(syy_from_strain.abs() < 1e-5 * sxx.abs());
        let _ = syy;
        assert_relative_eq!(e / (2.0 * (1.0 + nu)) * gxy, txy, max_relative = 1e-5);
    }
}
