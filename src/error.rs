use std::fmt::Display;

#[derive(Debug)]
pub enum BimeshError {
    Input(String),
    InvalidConfiguration(String),
    InvalidMesh(String),
    MeshMismatch(String),
    SingularSystem(String),
    PostProcessor(String),
}

impl Display for BimeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            BimeshError::Input(v) => ("Input", v),
            BimeshError::InvalidConfiguration(v) => ("Invalid Configuration", v),
            BimeshError::InvalidMesh(v) => ("Invalid Mesh", v),
            BimeshError::MeshMismatch(v) => ("Mesh Mismatch", v),
            BimeshError::SingularSystem(v) => ("Singular System", v),
            BimeshError::PostProcessor(v) => ("Post Processor", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}
