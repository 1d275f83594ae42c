use clap::ValueEnum;

/// How an evaluation report is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Colored summary for terminals
    #[default]
    Text,
    /// Machine-readable report
    Json,
}
