pub mod datatypes;
pub mod error;
pub mod interface;
pub mod mesher;
pub mod post_processor;
pub mod quadrature;
pub mod solver;
