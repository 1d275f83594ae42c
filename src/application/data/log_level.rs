use clap::ValueEnum;

/// Verbosity of the diagnostics written to stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum LogLevel {
    /// Every walked directory and hashing batch
    Debug,
    /// Progress of snapshots and evaluations
    Info,
    /// Unreadable files, unlistable directories and skipped measurements
    #[default]
    Warn,
    Error,
    /// No diagnostics at all
    Silent,
}

impl LogLevel {
    /// `None` means no subscriber is installed.
    pub fn to_tracing_level(self) -> Option<tracing::Level> {
        match self {
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Silent => None,
        }
    }
}
