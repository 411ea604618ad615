use crate::{
    datatypes::{Domain, DofMap, Element, InterfacePoint, Mesh, ModelConfig, Node},
    error::BimeshError,
    interface,
    mesher::{self, Axis},
    post_processor,
    quadrature::{LineQuadrature, QuadQuadrature},
};
use indicatif::ProgressBar;
use nalgebra::{matrix, DMatrix, DVector, Matrix2, SMatrix};
use nalgebra_sparse::{coo::CooMatrix, csr::CsrMatrix};

use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        Error, Executor, Operator, State, KV,
    },
    solver::conjugategradient::ConjugateGradient,
};

pub const MAX_CG_ITER: u64 = 1e7 as u64;
pub const TARGET_CG_COST: f64 = 1e-4 as f64;

/// Which linear-algebra backend solves the assembled system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverBackend {
    /// Dense LU factorization; the default
    Direct,
    /// Conjugate gradient on a sparse operator
    ConjugateGradient,
}

/// Runs multiplication for Conjugate Gradient Solver
struct ConjugateGradientOperator<'a> {
    a: &'a CsrMatrix<f64>,
}

impl<'a> Operator for ConjugateGradientOperator<'a> {
    type Param = Vec<f64>;
    type Output = Vec<f64>;

    fn apply(&self, x: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let x_vec = DVector::from_vec(x.to_vec());
        let product: DVector<f64> = self.a * &x_vec;
        Ok(product.data.as_vec().clone())
    }
}

/// Observer bar for argmin solver
struct ConjugateGradientObserverBar {
    bar: ProgressBar,
    final_mag: f64,
}

impl ConjugateGradientObserverBar {
    fn new() -> ConjugateGradientObserverBar {
        ConjugateGradientObserverBar {
            bar: ProgressBar::new(1000),
            final_mag: TARGET_CG_COST.log10().floor(),
        }
    }
}

impl<I> Observe<I> for ConjugateGradientObserverBar
where
    I: State<Float = f64>,
{
    fn observe_init(&mut self, _name: &str, _state: &I, _kv: &KV) -> Result<(), Error> {
        Ok(())
    }

    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), Error> {
        let cost = state.get_cost();
        if !cost.is_finite() || cost <= 0.0 {
            return Ok(());
        }
        let cost_mag = cost.log10().floor();
        let progress = (1000. / f64::sqrt(f64::max(cost_mag - self.final_mag, 1.0))) as u64;
        self.bar.set_position(progress);

        Ok(())
    }

    fn observe_final(&mut self, _state: &I) -> Result<(), Error> {
        self.bar.finish();
        Ok(())
    }
}

/// Solves a system of equations using the conjugate gradient method.
///
/// This function returns an approximation for x in `Ax=b`
///
/// # Arguments
/// * `a` - A square positive definite sparse matrix
/// * `b` - A vector of the solutions to the system
///
/// # Returns
/// A DVector that represents `x` from the system
fn run_conjugate_gradient(
    a: &CsrMatrix<f64>,
    b: &DVector<f64>,
) -> Result<DVector<f64>, BimeshError> {
    let b_flat: Vec<f64> = b.iter().map(|f| *f).collect();
    let solver: ConjugateGradient<_, f64> = ConjugateGradient::new(b_flat);
    let initial_guess: Vec<f64> = vec![0.0; b.nrows()];

    let operator = ConjugateGradientOperator { a };
    let observer = ConjugateGradientObserverBar::new();

    // Run solver
    let res = match Executor::new(operator, solver)
        .configure(|state| {
            state
                .param(initial_guess)
                .max_iters(MAX_CG_ITER)
                .target_cost(TARGET_CG_COST)
        })
        .add_observer(observer, ObserverMode::NewBest)
        .run()
    {
        Ok(r) => r,
        Err(err) => {
            return Err(BimeshError::SingularSystem(format!(
                "Conjugate Gradient error: {err}"
            )))
        }
    };

    let best_param = match &res.state().best_param {
        Some(vec) => DVector::from_vec(vec.clone()),
        None => {
            return Err(BimeshError::SingularSystem(
                "Conjugate Gradient could not produce best parameter".to_owned(),
            ))
        }
    };

    Ok(best_param)
}

/// Calculates the stress-strain matrix
///
/// # Arguments
/// * `poisson_ratio` - The poisson ratio for the model
/// * `youngs_modulus` - The modulus of elasticity of the model
///
/// # Returns
/// A 3x3 plane-stress stress-strain matrix
pub fn compute_stress_strain_matrix(poisson_ratio: f64, youngs_modulus: f64) -> SMatrix<f64, 3, 3> {
    let mut strain_stress_mat: SMatrix<f64, 3, 3> = matrix![
        1.0, poisson_ratio, 0.0;
        poisson_ratio, 1.0, 0.0;
        0.0, 0.0, (1.0 - poisson_ratio)/2.0;
    ];

    strain_stress_mat *= youngs_modulus / (1.0 - f64::powi(poisson_ratio, 2));

    strain_stress_mat
}

/// Bilinear shape function values on the reference square, node order
/// (-1,-1), (1,-1), (1,1), (-1,1)
pub fn shape_values(xi: f64, eta: f64) -> [f64; 4] {
    [
        0.25 * (1.0 - xi) * (1.0 - eta),
        0.25 * (1.0 + xi) * (1.0 - eta),
        0.25 * (1.0 + xi) * (1.0 + eta),
        0.25 * (1.0 - xi) * (1.0 + eta),
    ]
}

/// Reference-coordinate shape function gradients, rows are d/dxi and d/deta
pub fn shape_gradients(xi: f64, eta: f64) -> SMatrix<f64, 2, 4> {
    matrix![
        -0.25 * (1.0 - eta), 0.25 * (1.0 - eta), 0.25 * (1.0 + eta), -0.25 * (1.0 + eta);
        -0.25 * (1.0 - xi), -0.25 * (1.0 + xi), 0.25 * (1.0 + xi), 0.25 * (1.0 - xi);
    ]
}

/// Calculates the strain-displacement matrix of an element at a reference
/// point.
///
/// Columns are ordered x-block then y-block: [ux0..ux3 uy0..uy3]. The
/// gradients come from the inverse Jacobian of the bilinear map evaluated at
/// the point, so the matrix varies over the element.
///
/// # Arguments
/// * `element` - The Element to target
/// * `nodes` - A reference to the vector of nodes
/// * `element_index` - Index of the element, for error context
/// * `local` - Reference coordinates (xi, eta) of the evaluation point
///
/// # Returns
/// The 3x8 strain-displacement matrix and the Jacobian determinant
pub fn compute_strain_displacement_matrix(
    element: &Element,
    nodes: &Vec<Node>,
    element_index: usize,
    local: (f64, f64),
) -> Result<(SMatrix<f64, 3, 8>, f64), BimeshError> {
    let reference_gradients = shape_gradients(local.0, local.1);

    let mut jacobian: Matrix2<f64> = Matrix2::zeros();
    for (i, node) in element.nodes.iter().enumerate() {
        let vertex = &nodes[*node].vertex;
        jacobian[(0, 0)] += reference_gradients[(0, i)] * vertex.x;
        jacobian[(0, 1)] += reference_gradients[(1, i)] * vertex.x;
        jacobian[(1, 0)] += reference_gradients[(0, i)] * vertex.y;
        jacobian[(1, 1)] += reference_gradients[(1, i)] * vertex.y;
    }

    let det_j = jacobian.determinant();
    if det_j <= 0.0 {
        return Err(BimeshError::InvalidMesh(format!(
            "Element {element_index} has non-positive Jacobian determinant {det_j}"
        )));
    }

    let jacobian_inv = Matrix2::new(
        jacobian[(1, 1)],
        -jacobian[(0, 1)],
        -jacobian[(1, 0)],
        jacobian[(0, 0)],
    ) / det_j;
    let gradients = jacobian_inv.transpose() * reference_gradients;

    let strain_displacement_mat: SMatrix<f64, 3, 8> = matrix![
        gradients[(0,0)], gradients[(0,1)], gradients[(0,2)], gradients[(0,3)], 0., 0., 0., 0.;
        0., 0., 0., 0., gradients[(1,0)], gradients[(1,1)], gradients[(1,2)], gradients[(1,3)];
        gradients[(1,0)], gradients[(1,1)], gradients[(1,2)], gradients[(1,3)], gradients[(0,0)], gradients[(0,1)], gradients[(0,2)], gradients[(0,3)];
    ];

    Ok((strain_displacement_mat, det_j))
}

/// Computes the stiffness matrix for a given element
///
/// # Arguments
/// * `element` - The element to target
/// * `nodes` - A reference to the vector of nodes
/// * `element_index` - Index of the element, for error context
/// * `stress_strain_mat` - The 3x3 stress-strain matrix
///
/// # Returns
/// An 8x8 stiffness matrix for the element
fn compute_element_stiffness_matrix(
    element: &Element,
    nodes: &Vec<Node>,
    element_index: usize,
    stress_strain_mat: &SMatrix<f64, 3, 3>,
) -> Result<SMatrix<f64, 8, 8>, BimeshError> {
    let quadrature = QuadQuadrature::two_by_two();
    let mut stiffness: SMatrix<f64, 8, 8> = SMatrix::zeros();

    for (point, weight) in quadrature.points.iter().zip(quadrature.weights.iter()) {
        let (strain_displacement_mat, det_j) =
            compute_strain_displacement_matrix(element, nodes, element_index, (point[0], point[1]))?;

        stiffness += (strain_displacement_mat.transpose() * stress_strain_mat)
            * strain_displacement_mat
            * det_j
            * *weight;
    }

    Ok(stiffness)
}

/// Global DOF indices of an element, ordered [ux0..ux3 uy0..uy3]
fn element_dofs(element: &Element, domain: Domain, dof_map: &DofMap) -> [usize; 8] {
    [
        dof_map.x_dof(domain, element.nodes[0]),
        dof_map.x_dof(domain, element.nodes[1]),
        dof_map.x_dof(domain, element.nodes[2]),
        dof_map.x_dof(domain, element.nodes[3]),
        dof_map.y_dof(domain, element.nodes[0]),
        dof_map.y_dof(domain, element.nodes[1]),
        dof_map.y_dof(domain, element.nodes[2]),
        dof_map.y_dof(domain, element.nodes[3]),
    ]
}

/// Adds an element-sized block into the global stiffness matrix
fn scatter_block<const N: usize>(
    total_stiffness_matrix: &mut DMatrix<f64>,
    rows: &[usize; N],
    cols: &[usize; N],
    block: &SMatrix<f64, N, N>,
) {
    for (local_row, global_row) in rows.iter().enumerate() {
        for (local_col, global_col) in cols.iter().enumerate() {
            total_stiffness_matrix[(*global_row, *global_col)] += block[(local_row, local_col)];
        }
    }
}

/// Accumulates one subdomain's element stiffness contributions into the
/// global stiffness matrix
///
/// # Arguments
/// * `mesh` - The subdomain mesh
/// * `domain` - Which subdomain the mesh represents
/// * `dof_map` - The global DOF map
/// * `config` - The model configuration
/// * `total_stiffness_matrix` - The global accumulator
pub fn assemble_stiffness(
    mesh: &Mesh,
    domain: Domain,
    dof_map: &DofMap,
    config: &ModelConfig,
    total_stiffness_matrix: &mut DMatrix<f64>,
) -> Result<(), BimeshError> {
    let stress_strain_mat =
        compute_stress_strain_matrix(config.poisson_ratio, config.youngs_modulus);

    let bar = ProgressBar::new(mesh.elements.len() as u64);
    for (i, element) in mesh.elements.iter().enumerate() {
        bar.inc(1);

        let stiffness =
            compute_element_stiffness_matrix(element, &mesh.nodes, i, &stress_strain_mat)?;
        let dofs = element_dofs(element, domain, dof_map);
        scatter_block(total_stiffness_matrix, &dofs, &dofs, &stiffness);
    }
    bar.finish_and_clear();

    Ok(())
}

/// Shape function matrix interpolating element displacements at a local point
fn shape_matrix(local: (f64, f64)) -> SMatrix<f64, 2, 8> {
    let n = shape_values(local.0, local.1);
    matrix![
        n[0], n[1], n[2], n[3], 0., 0., 0., 0.;
        0., 0., 0., 0., n[0], n[1], n[2], n[3];
    ]
}

/// Contracts the stress vector (sxx, syy, txy) with a unit normal to a traction
fn traction_projector(normal: (f64, f64)) -> SMatrix<f64, 2, 3> {
    matrix![
        normal.0, 0., normal.1;
        0., normal.1, normal.0;
    ]
}

/// Accumulates the Nitsche coupling terms over the interface quadrature
/// points into the global stiffness matrix.
///
/// Per point, with N_a the shape rows of side `a`, B_a its strain matrix and
/// n the normal out of the left subdomain, the penalty blocks are
/// `Kp_ab = alpha w Na' Nb` and the consistency blocks
/// `Kd_ab = w/2 Na' n C B_b`. The four global sub-blocks receive
/// `K11 += Kp11 - Kd11 - Kd11'`, `K12 += -Kp12 - Kd12 + Kd21'`,
/// `K21 += -Kp12' + Kd21 - Kd12'`, `K22 += Kp22 + Kd22 + Kd22'`, which keeps
/// the assembled matrix symmetric.
///
/// # Arguments
/// * `left` - The left subdomain mesh
/// * `right` - The right subdomain mesh
/// * `interface_points` - The interface correspondence table
/// * `dof_map` - The global DOF map
/// * `config` - The model configuration; supplies the penalty and elasticity
/// * `total_stiffness_matrix` - The global accumulator
pub fn assemble_nitsche(
    left: &Mesh,
    right: &Mesh,
    interface_points: &Vec<InterfacePoint>,
    dof_map: &DofMap,
    config: &ModelConfig,
    total_stiffness_matrix: &mut DMatrix<f64>,
) -> Result<(), BimeshError> {
    let stress_strain_mat =
        compute_stress_strain_matrix(config.poisson_ratio, config.youngs_modulus);
    let alpha = config.nitsche_penalty;

    for point in interface_points {
        let left_element = &left.elements[point.left_element];
        let right_element = &right.elements[point.right_element];

        let (b_left, _) = compute_strain_displacement_matrix(
            left_element,
            &left.nodes,
            point.left_element,
            point.left_local,
        )?;
        let (b_right, _) = compute_strain_displacement_matrix(
            right_element,
            &right.nodes,
            point.right_element,
            point.right_local,
        )?;

        let n_left = shape_matrix(point.left_local);
        let n_right = shape_matrix(point.right_local);
        let projector = traction_projector(point.normal);
        let w = point.weight;

        // Average traction operators, one per side
        let d_left: SMatrix<f64, 2, 8> = 0.5 * projector * stress_strain_mat * b_left;
        let d_right: SMatrix<f64, 2, 8> = 0.5 * projector * stress_strain_mat * b_right;

        let kp11 = alpha * w * n_left.transpose() * n_left;
        let kp12 = alpha * w * n_left.transpose() * n_right;
        let kp22 = alpha * w * n_right.transpose() * n_right;

        let kd11 = w * n_left.transpose() * d_left;
        let kd12 = w * n_left.transpose() * d_right;
        let kd21 = w * n_right.transpose() * d_left;
        let kd22 = w * n_right.transpose() * d_right;

        let k11 = kp11 - kd11 - kd11.transpose();
        let k12 = -kp12 - kd12 + kd21.transpose();
        let k21 = -kp12.transpose() + kd21 - kd12.transpose();
        let k22 = kp22 + kd22 + kd22.transpose();

        let left_dofs = element_dofs(left_element, Domain::Left, dof_map);
        let right_dofs = element_dofs(right_element, Domain::Right, dof_map);

        scatter_block(total_stiffness_matrix, &left_dofs, &left_dofs, &k11);
        scatter_block(total_stiffness_matrix, &left_dofs, &right_dofs, &k12);
        scatter_block(total_stiffness_matrix, &right_dofs, &left_dofs, &k21);
        scatter_block(total_stiffness_matrix, &right_dofs, &right_dofs, &k22);
    }

    Ok(())
}

/// Integrates the parabolic shear traction over the loaded edge of the right
/// subdomain into the global force vector
///
/// # Arguments
/// * `right` - The right subdomain mesh
/// * `dof_map` - The global DOF map
/// * `config` - The model configuration
/// * `nodal_forces` - The global force accumulator
pub fn assemble_load(
    right: &Mesh,
    dof_map: &DofMap,
    config: &ModelConfig,
    nodal_forces: &mut DVector<f64>,
) -> Result<(), BimeshError> {
    let edges = mesher::boundary_edges(right, Axis::X, config.length)?;
    let rule = LineQuadrature::three_point();

    let inertia = config.moment_of_inertia();
    let c = config.half_height;
    let p = config.tip_load;

    for edge in &edges {
        let ya = right.nodes[edge.nodes.0].vertex.y;
        let yb = right.nodes[edge.nodes.1].vertex.y;
        let edge_jacobian = (yb - ya) / 2.0;

        for (t, w) in rule.points.iter().zip(rule.weights.iter()) {
            let shape = [(1.0 - t) / 2.0, (1.0 + t) / 2.0];
            let y = shape[0] * ya + shape[1] * yb;
            let traction_y = -p * (c * c - y * y) / (2.0 * inertia);

            for (node, n) in [edge.nodes.0, edge.nodes.1].iter().zip(shape.iter()) {
                nodal_forces[dof_map.y_dof(Domain::Right, *node)] +=
                    n * traction_y * w * edge_jacobian;
            }
        }
    }

    Ok(())
}

/// Returns the prescribed-displacement constraints on the fixed edge of the
/// left subdomain, taken from the analytical beam field
///
/// # Arguments
/// * `left` - The left subdomain mesh
/// * `dof_map` - The global DOF map
/// * `config` - The model configuration
pub fn fixed_boundary_constraints(
    left: &Mesh,
    dof_map: &DofMap,
    config: &ModelConfig,
) -> Vec<(usize, f64)> {
    let mut constraints: Vec<(usize, f64)> = Vec::new();

    for node in mesher::boundary_nodes(left, Axis::X, 0.0) {
        let vertex = &left.nodes[node].vertex;
        let (ux, uy) = post_processor::exact_displacement(config, vertex.x, vertex.y);
        constraints.push((dof_map.x_dof(Domain::Left, node), ux));
        constraints.push((dof_map.y_dof(Domain::Left, node), uy));
    }

    constraints
}

/// Imposes prescribed displacements with the big-diagonal substitution.
///
/// For each constrained DOF: the fixed column's contribution is subtracted
/// from the force vector, the row and column are zeroed, and the diagonal is
/// replaced by the mean diagonal magnitude of the unconstrained matrix, with
/// the force entry scaled to match.
///
/// # Arguments
/// * `total_stiffness_matrix` - The assembled global stiffness matrix
/// * `nodal_forces` - The assembled global force vector
/// * `constraints` - Pairs of (global DOF index, prescribed value)
pub fn apply_displacement_bc(
    total_stiffness_matrix: &mut DMatrix<f64>,
    nodal_forces: &mut DVector<f64>,
    constraints: &Vec<(usize, f64)>,
) {
    let n = total_stiffness_matrix.nrows();
    let mean_diagonal = (0..n)
        .map(|i| total_stiffness_matrix[(i, i)].abs())
        .sum::<f64>()
        / n as f64;

    for (dof, value) in constraints {
        for row in 0..n {
            nodal_forces[row] -= total_stiffness_matrix[(row, *dof)] * value;
        }
        for i in 0..n {
            total_stiffness_matrix[(i, *dof)] = 0.0;
            total_stiffness_matrix[(*dof, i)] = 0.0;
        }

        total_stiffness_matrix[(*dof, *dof)] = mean_diagonal;
        nodal_forces[*dof] = mean_diagonal * value;
    }
}

/// Builds a sparse copy of the assembled stiffness matrix for the iterative
/// solver path
fn build_sparse_operator(total_stiffness_matrix: &DMatrix<f64>) -> CsrMatrix<f64> {
    let n = total_stiffness_matrix.nrows();
    let mut coo = CooMatrix::new(n, n);

    for row in 0..n {
        for col in 0..n {
            let value = total_stiffness_matrix[(row, col)];
            if value != 0.0 {
                coo.push(row, col, value);
            }
        }
    }

    CsrMatrix::from(&coo)
}

/// Solves the assembled linear system for the nodal displacements
///
/// # Arguments
/// * `total_stiffness_matrix` - The post-BC global stiffness matrix
/// * `nodal_forces` - The post-BC global force vector
/// * `backend` - The linear-algebra backend to use
///
/// # Returns
/// The global displacement vector
pub fn solve(
    total_stiffness_matrix: &DMatrix<f64>,
    nodal_forces: &DVector<f64>,
    backend: SolverBackend,
) -> Result<DVector<f64>, BimeshError> {
    match backend {
        SolverBackend::Direct => total_stiffness_matrix
            .clone()
            .lu()
            .solve(nodal_forces)
            .ok_or_else(|| {
                BimeshError::SingularSystem(
                    "Dense LU factorization failed; the assembled matrix is singular".to_owned(),
                )
            }),
        SolverBackend::ConjugateGradient => {
            let sparse = build_sparse_operator(total_stiffness_matrix);
            run_conjugate_gradient(&sparse, nodal_forces)
        }
    }
}

/// Runs the solver pipeline: assembly, coupling, load, boundary conditions,
/// and the linear solve
///
/// # Arguments
/// * `left` - The left subdomain mesh
/// * `right` - The right subdomain mesh
/// * `config` - The model configuration
/// * `backend` - The linear-algebra backend to use
///
/// # Returns
/// The DOF map and the global displacement vector, in that order
pub fn run(
    left: &Mesh,
    right: &Mesh,
    config: &ModelConfig,
    backend: SolverBackend,
) -> Result<(DofMap, DVector<f64>), BimeshError> {
    let dof_map = DofMap::new(left.nodes.len(), right.nodes.len());
    let mut total_stiffness_matrix: DMatrix<f64> =
        DMatrix::zeros(dof_map.total(), dof_map.total());

    println!("info: building element stiffness matrices...");
    assemble_stiffness(left, Domain::Left, &dof_map, config, &mut total_stiffness_matrix)?;
    assemble_stiffness(right, Domain::Right, &dof_map, config, &mut total_stiffness_matrix)?;

    println!("info: coupling interface with Nitsche terms...");
    let interface_points = interface::build_interface(left, right, config.interface_x())?;
    assemble_nitsche(
        left,
        right,
        &interface_points,
        &dof_map,
        config,
        &mut total_stiffness_matrix,
    )?;

    let mut nodal_forces: DVector<f64> = DVector::zeros(dof_map.total());
    assemble_load(right, &dof_map, config, &mut nodal_forces)?;

    let constraints = fixed_boundary_constraints(left, &dof_map, config);
    println!(
        "info: applying {} prescribed displacements on the fixed edge",
        constraints.len()
    );
    apply_displacement_bc(&mut total_stiffness_matrix, &mut nodal_forces, &constraints);

    let start = std::time::Instant::now();
    println!("info: solving...");
    let displacements = solve(&total_stiffness_matrix, &nodal_forces, backend)?;
    let elapsed = (std::time::Instant::now() - start).as_secs_f32();
    println!("info: solved system in {:.3} seconds", elapsed);

    Ok((dof_map, displacements))
}
