pub mod analyzer;
pub mod indicators;

pub use analyzer::analyze;
