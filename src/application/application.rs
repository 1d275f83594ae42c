use std::path::{Path, PathBuf};

use compio::fs;
use snafu::Snafu;
use snafu::prelude::*;
use supports_color::Stream;
use tracing::{debug, info};

use crate::application::RuntimeConfig;
use crate::application::data::OutputFormat;
use crate::cli::Command;
use crate::config::{Settings, SettingsError};
use crate::evaluation::{EvaluationReport, Evaluator};
use crate::ext::{AsyncTryFrom, BestEffortPathExt};
use crate::snapshot::json;
use crate::snapshot::persistence::{self, PersistenceError};
use crate::snapshot::{SnapshotBuilder, SnapshotError, Tree};

pub struct Application;

impl Application {
    pub async fn run(runtime_config: impl Into<RuntimeConfig>) -> Result<(), ApplicationError> {
        let runtime_config: RuntimeConfig = runtime_config.into();
        let settings = Settings::read(&runtime_config.settings_path)
            .await
            .context(SettingsSnafu)?;
        debug!("Loaded settings: {:?}", settings);

        match runtime_config.command {
            Command::Snapshot { root, output } => {
                Self::snapshot(&settings, &root, output.as_deref()).await
            }
            Command::Evaluate {
                before,
                after,
                format,
                output,
            } => {
                let report = Self::evaluate(&settings, &before, &after).await?;
                Self::write_report(&report, format, output.as_deref()).await
            }
        }
    }

    async fn snapshot(
        settings: &Settings,
        root: &Path,
        output: Option<&Path>,
    ) -> Result<(), ApplicationError> {
        let tree = SnapshotBuilder::new(settings.snapshot.clone())
            .context(SnapshotSnafu)?
            .build(root)
            .await
            .context(SnapshotSnafu)?;

        match output {
            Some(output) => persistence::save(&tree, output)
                .await
                .context(PersistenceSnafu),
            None => {
                let rendered = serde_json::to_string_pretty(&json::to_json(&tree))
                    .context(RenderSnafu)?;
                println!("{rendered}");
                Ok(())
            }
        }
    }

    async fn evaluate(
        settings: &Settings,
        before: &Path,
        after: &Path,
    ) -> Result<EvaluationReport, ApplicationError> {
        let builder = if before.is_dir() || after.is_dir() {
            Some(SnapshotBuilder::new(settings.snapshot.clone()).context(SnapshotSnafu)?)
        } else {
            None
        };

        let before = Self::resolve(builder.as_ref(), before).await?;
        let after = Self::resolve(builder.as_ref(), after).await?;

        Ok(Evaluator::new(settings).evaluate(&before, &after))
    }

    /// Walks a directory, or loads a snapshot saved earlier
    async fn resolve(builder: Option<&SnapshotBuilder>, path: &Path) -> Result<Tree, ApplicationError> {
        match builder {
            Some(builder) if path.is_dir() => builder.build(path).await.context(SnapshotSnafu),
            _ => {
                info!("Loading snapshot {}", path.best_effort_path_display());
                Tree::async_try_from(path).await.context(PersistenceSnafu)
            }
        }
    }

    async fn write_report(
        report: &EvaluationReport,
        format: OutputFormat,
        output: Option<&Path>,
    ) -> Result<(), ApplicationError> {
        let rendered = match format {
            OutputFormat::Json => report.to_json_string().context(RenderSnafu)?,
            OutputFormat::Text => {
                let use_color =
                    output.is_none() && supports_color::on(Stream::Stdout).is_some();
                colored::control::set_override(use_color);
                report.to_string()
            }
        };

        match output {
            Some(output) => {
                fs::write(output, rendered).await.0.context(WriteReportSnafu {
                    path: output.to_path_buf(),
                })?;
                info!("Wrote report to {}", output.best_effort_path_display());
            }
            None => println!("{}", rendered.trim_end()),
        }
        Ok(())
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered while reading settings"))]
    SettingsError { source: SettingsError },
    #[snafu(display("Critical failure encountered while capturing a snapshot"))]
    SnapshotError { source: SnapshotError },
    #[snafu(display("Critical failure encountered while saving or loading a snapshot"))]
    PersistenceError { source: PersistenceError },
    #[snafu(display("Failed to render output as JSON"))]
    RenderError { source: serde_json::Error },
    #[snafu(display("Failed to write report to {}", path.best_effort_path_display()))]
    WriteReportError {
        path: PathBuf,
        source: std::io::Error,
    },
}
