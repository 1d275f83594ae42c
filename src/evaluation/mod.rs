//! Comparison of two snapshots: structural similarity plus a
//! content-addressed diff of files and directories.

pub mod diff;
mod evaluator;
pub mod flatten;
mod report;
pub mod similarity;

pub use evaluator::Evaluator;
pub use report::EvaluationReport;
