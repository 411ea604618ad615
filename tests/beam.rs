use std::collections::BTreeSet;

use approx::assert_relative_eq;
use bimesh::{
    datatypes::{DofMap, Domain, Mesh, ModelConfig},
    interface, mesher,
    mesher::Axis,
    post_processor, solver,
    solver::SolverBackend,
};
use nalgebra::{DMatrix, DVector};

/// Builds the two subdomain meshes for a configuration
fn build_meshes(config: &ModelConfig) -> (Mesh, Mesh) {
    let c = config.half_height;
    let mid = config.interface_x();
    let left = mesher::structured_mesh(0.0, -c, mid, c, config.nx_left, config.ny_left).unwrap();
    let right =
        mesher::structured_mesh(mid, -c, config.length, c, config.nx_right, config.ny_right)
            .unwrap();
    (left, right)
}

/// Assembles the full pre-BC stiffness matrix: both subdomains plus coupling
fn assemble_coupled_stiffness(
    left: &Mesh,
    right: &Mesh,
    config: &ModelConfig,
    dof_map: &DofMap,
) -> DMatrix<f64> {
    let mut k = DMatrix::zeros(dof_map.total(), dof_map.total());
    solver::assemble_stiffness(left, Domain::Left, dof_map, config, &mut k).unwrap();
    solver::assemble_stiffness(right, Domain::Right, dof_map, config, &mut k).unwrap();

    let points = interface::build_interface(left, right, config.interface_x()).unwrap();
    solver::assemble_nitsche(left, right, &points, dof_map, config, &mut k).unwrap();

    k
}

/// A smooth linear displacement field used by the patch and conservation tests
fn linear_field(x: f64, y: f64) -> (f64, f64) {
    (
        1e-4 * (2.0 + 0.5 * x - 0.3 * y),
        1e-4 * (-1.0 + 0.2 * x + 0.4 * y),
    )
}

/// The nodal interpolant of the linear field over both meshes
fn linear_field_vector(left: &Mesh, right: &Mesh, dof_map: &DofMap) -> DVector<f64> {
    let mut u = DVector::zeros(dof_map.total());
    for (domain, mesh) in [(Domain::Left, left), (Domain::Right, right)] {
        for (i, node) in mesh.nodes.iter().enumerate() {
            let (ux, uy) = linear_field(node.vertex.x, node.vertex.y);
            u[dof_map.x_dof(domain, i)] = ux;
            u[dof_map.y_dof(domain, i)] = uy;
        }
    }
    u
}

/// Interpolates the solved displacement at a local point of an element
fn displacement_at(
    mesh: &Mesh,
    domain: Domain,
    element: usize,
    local: (f64, f64),
    dof_map: &DofMap,
    u: &DVector<f64>,
) -> (f64, f64) {
    let shape = solver::shape_values(local.0, local.1);
    let mut ux = 0.0;
    let mut uy = 0.0;
    for (n, node) in mesh.elements[element].nodes.iter().enumerate() {
        ux += shape[n] * u[dof_map.x_dof(domain, *node)];
        uy += shape[n] * u[dof_map.y_dof(domain, *node)];
    }
    (ux, uy)
}

#[test]
fn coupled_stiffness_is_symmetric_before_bc() {
    let config = ModelConfig {
        nx_left: 4,
        ny_left: 4,
        nx_right: 4,
        ny_right: 2,
        ..ModelConfig::default()
    };
    let (left, right) = build_meshes(&config);
    let dof_map = DofMap::new(left.nodes.len(), right.nodes.len());
    let k = assemble_coupled_stiffness(&left, &right, &config, &dof_map);

    let asymmetry = (&k - k.transpose()).amax();
    assert!(asymmetry < 1e-10 * k.amax());
}

#[test]
fn patch_test_reproduces_linear_field() {
    // A linear field prescribed on the exterior boundary must be reproduced
    // exactly at every node, including across the non-matching interface,
    // for any penalty magnitude
    for alpha in [1e7, 1e10] {
        let config = ModelConfig {
            nx_left: 4,
            ny_left: 4,
            nx_right: 4,
            ny_right: 2,
            nitsche_penalty: alpha,
            ..ModelConfig::default()
        };
        let (left, right) = build_meshes(&config);
        let dof_map = DofMap::new(left.nodes.len(), right.nodes.len());
        let mut k = assemble_coupled_stiffness(&left, &right, &config, &dof_map);
        let mut f = DVector::zeros(dof_map.total());

        let c = config.half_height;
        let mut constraints: Vec<(usize, f64)> = Vec::new();
        for (domain, mesh, end_x) in [
            (Domain::Left, &left, 0.0),
            (Domain::Right, &right, config.length),
        ] {
            let mut boundary: BTreeSet<usize> = BTreeSet::new();
            boundary.extend(mesher::boundary_nodes(mesh, Axis::X, end_x));
            boundary.extend(mesher::boundary_nodes(mesh, Axis::Y, -c));
            boundary.extend(mesher::boundary_nodes(mesh, Axis::Y, c));

            for node in boundary {
                let vertex = &mesh.nodes[node].vertex;
                let (ux, uy) = linear_field(vertex.x, vertex.y);
                constraints.push((dof_map.x_dof(domain, node), ux));
                constraints.push((dof_map.y_dof(domain, node), uy));
            }
        }

        solver::apply_displacement_bc(&mut k, &mut f, &constraints);
        let u = solver::solve(&k, &f, SolverBackend::Direct).unwrap();

        for (domain, mesh) in [(Domain::Left, &left), (Domain::Right, &right)] {
            for (i, node) in mesh.nodes.iter().enumerate() {
                let (ux, uy) = linear_field(node.vertex.x, node.vertex.y);
                assert_relative_eq!(
                    u[dof_map.x_dof(domain, i)],
                    ux,
                    epsilon = 1e-10,
                    max_relative = 1e-6
                );
                assert_relative_eq!(
                    u[dof_map.y_dof(domain, i)],
                    uy,
                    epsilon = 1e-10,
                    max_relative = 1e-6
                );
            }
        }
    }
}

#[test]
fn interface_jump_shrinks_as_penalty_grows() {
    let mut jumps: Vec<f64> = Vec::new();

    for alpha in [1e6, 1e8, 1e10] {
        let config = ModelConfig {
            nitsche_penalty: alpha,
            ..ModelConfig::default()
        };
        let (left, right) = build_meshes(&config);
        let (dof_map, u) = solver::run(&left, &right, &config, SolverBackend::Direct).unwrap();

        let points = interface::build_interface(&left, &right, config.interface_x()).unwrap();
        let max_jump = points
            .iter()
            .map(|p| {
                let (lx, ly) =
                    displacement_at(&left, Domain::Left, p.left_element, p.left_local, &dof_map, &u);
                let (rx, ry) = displacement_at(
                    &right,
                    Domain::Right,
                    p.right_element,
                    p.right_local,
                    &dof_map,
                    &u,
                );
                f64::sqrt((lx - rx).powi(2) + (ly - ry).powi(2))
            })
            .fold(0.0, f64::max);

        jumps.push(max_jump);
    }

    assert!(
        jumps[0] > jumps[1] && jumps[1] > jumps[2],
        "interface jumps did not decrease monotonically: {:?}",
        jumps
    );
}

#[test]
fn mid_span_deflection_matches_timoshenko_solution() {
    let config = ModelConfig {
        nx_left: 10,
        ny_left: 8,
        nx_right: 10,
        ny_right: 8,
        nitsche_penalty: 1e9,
        ..ModelConfig::default()
    };
    let (left, right) = build_meshes(&config);
    let (dof_map, u) = solver::run(&left, &right, &config, SolverBackend::Direct).unwrap();

    let relative_error = post_processor::report(&left, &dof_map, &u, &config).unwrap();
    assert!(
        relative_error < 0.05,
        "mid-span deflection off by {:.2}%",
        100.0 * relative_error
    );
}

#[test]
fn coupling_terms_conserve_continuous_fields() {
    // The Nitsche coupling matrix must inject no energy and no net force for
    // a continuous constant-strain field
    let config = ModelConfig {
        nx_left: 4,
        ny_left: 4,
        nx_right: 4,
        ny_right: 2,
        nitsche_penalty: 1e8,
        ..ModelConfig::default()
    };
    let (left, right) = build_meshes(&config);
    let dof_map = DofMap::new(left.nodes.len(), right.nodes.len());

    let mut coupling = DMatrix::zeros(dof_map.total(), dof_map.total());
    let points = interface::build_interface(&left, &right, config.interface_x()).unwrap();
    solver::assemble_nitsche(&left, &right, &points, &dof_map, &config, &mut coupling).unwrap();

    let u = linear_field_vector(&left, &right, &dof_map);
    let forces = &coupling * &u;

    let energy = u.dot(&forces);
    assert!(energy.abs() < 1e-8 * config.nitsche_penalty * u.norm_squared());

    // Rigid translations see no resultant from the coupling
    let mut translation = DVector::zeros(dof_map.total());
    for (domain, mesh) in [(Domain::Left, &left), (Domain::Right, &right)] {
        for i in 0..mesh.nodes.len() {
            translation[dof_map.x_dof(domain, i)] = 1.0;
        }
    }
    let resultant = translation.dot(&forces);
    assert!(resultant.abs() < 1e-10 * config.nitsche_penalty * u.norm());
}

#[test]
fn assembly_is_deterministic() {
    let config = ModelConfig {
        nx_left: 3,
        ny_left: 4,
        nx_right: 3,
        ny_right: 2,
        ..ModelConfig::default()
    };
    let (left, right) = build_meshes(&config);
    let dof_map = DofMap::new(left.nodes.len(), right.nodes.len());

    let first = assemble_coupled_stiffness(&left, &right, &config, &dof_map);
    let second = assemble_coupled_stiffness(&left, &right, &config, &dof_map);

    assert_eq!(first, second);
}

#[test]
fn iterative_backend_agrees_with_direct_solve() {
    let config = ModelConfig {
        nx_left: 4,
        ny_left: 4,
        nx_right: 4,
        ny_right: 2,
        nitsche_penalty: 1e8,
        ..ModelConfig::default()
    };
    let (left, right) = build_meshes(&config);

    let (dof_map, direct) = solver::run(&left, &right, &config, SolverBackend::Direct).unwrap();
    let (_, iterative) =
        solver::run(&left, &right, &config, SolverBackend::ConjugateGradient).unwrap();

    let scale = direct.amax();
    for i in 0..dof_map.total() {
        assert!((direct[i] - iterative[i]).abs() < 1e-4 * scale);
    }
}
