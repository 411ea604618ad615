use bimesh::{
    datatypes::Domain,
    error::BimeshError,
    mesher, post_processor,
    solver::{self, SolverBackend},
};
use clap::Parser;

/// Nitsche-coupled non-matching-mesh bending of a plane-stress cantilever
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to a json input file overriding the built-in beam configuration
    #[arg(short, long)]
    input: Option<String>,

    /// Solve with conjugate gradient instead of dense LU
    #[arg(long)]
    iterative: bool,

    /// Write nodes.csv and elements.csv result files
    #[arg(long)]
    csv: bool,
}

fn run(args: &Args) -> Result<(), BimeshError> {
    let (config, mut left, mut right) = mesher::run(args.input.as_deref())?;

    let backend = if args.iterative {
        SolverBackend::ConjugateGradient
    } else {
        SolverBackend::Direct
    };

    let (dof_map, displacements) = solver::run(&left, &right, &config, backend)?;

    post_processor::compute_stress(&mut left, Domain::Left, &dof_map, &displacements, &config)?;
    post_processor::compute_stress(&mut right, Domain::Right, &dof_map, &displacements, &config)?;
    post_processor::report(&left, &dof_map, &displacements, &config)?;

    if args.csv {
        post_processor::csv_output(
            &left,
            &right,
            &dof_map,
            &displacements,
            "nodes.csv",
            "elements.csv",
        )?;
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(&args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
