use std::fmt;

use colored::Colorize;
use serde::Serialize;

use crate::evaluation::diff::{
    DiffError, DirectoryChange, DirectoryChanges, DirectoryRelocation, FileChange, FileChanges,
    FileRelocation,
};
use crate::evaluation::similarity::Similarity;

const LABEL_WIDTH: usize = 22;

/// Per-change listings. A list is `None` when the phase producing it failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportDetails {
    pub deleted_files: Option<Vec<String>>,
    pub added_files: Option<Vec<String>>,
    pub moved_renamed_files: Option<Vec<FileRelocation>>,
    pub deleted_dirs: Option<Vec<String>>,
    pub added_dirs: Option<Vec<String>>,
    pub moved_renamed_dirs: Option<Vec<DirectoryRelocation>>,
    pub unchanged_dirs: Option<Vec<String>>,
}

/// Result of comparing two snapshots.
///
/// Counts are `None` (serialized as `null`) when the phase computing them
/// failed; `diff_error` then says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub ted_similarity: Similarity,
    pub files_added: Option<usize>,
    pub files_deleted: Option<usize>,
    pub files_unchanged: Option<usize>,
    pub files_moved: Option<usize>,
    pub files_renamed: Option<usize>,
    pub files_moved_renamed: Option<usize>,
    pub dirs_added: Option<usize>,
    pub dirs_deleted: Option<usize>,
    pub dirs_unchanged: Option<usize>,
    pub dirs_moved: Option<usize>,
    pub dirs_renamed: Option<usize>,
    pub details: ReportDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_error: Option<String>,
}

impl EvaluationReport {
    pub fn new(
        ted_similarity: Similarity,
        files: Result<FileChanges, DiffError>,
        directories: Result<DirectoryChanges, DiffError>,
    ) -> Self {
        let mut report = EvaluationReport {
            ted_similarity,
            files_added: None,
            files_deleted: None,
            files_unchanged: None,
            files_moved: None,
            files_renamed: None,
            files_moved_renamed: None,
            dirs_added: None,
            dirs_deleted: None,
            dirs_unchanged: None,
            dirs_moved: None,
            dirs_renamed: None,
            details: ReportDetails::default(),
            diff_error: None,
        };
        let mut errors = Vec::new();

        match files {
            Ok(files) => {
                report.files_added = Some(files.added.len());
                report.files_deleted = Some(files.deleted.len());
                report.files_unchanged = Some(files.unchanged);
                report.files_moved = Some(files.count(FileChange::Moved));
                report.files_renamed = Some(files.count(FileChange::Renamed));
                report.files_moved_renamed = Some(files.count(FileChange::MovedRenamed));
                report.details.added_files = Some(files.added);
                report.details.deleted_files = Some(files.deleted);
                report.details.moved_renamed_files = Some(files.relocations);
            }
            Err(error) => errors.push(format!("file comparison failed: {error}")),
        }

        match directories {
            Ok(directories) => {
                report.dirs_added = Some(directories.added.len());
                report.dirs_deleted = Some(directories.deleted.len());
                report.dirs_unchanged = Some(directories.unchanged.len());
                report.dirs_moved = Some(directories.count(DirectoryChange::Moved));
                report.dirs_renamed = Some(directories.count(DirectoryChange::Renamed));
                report.details.added_dirs = Some(directories.added);
                report.details.deleted_dirs = Some(directories.deleted);
                report.details.unchanged_dirs = Some(directories.unchanged);
                report.details.moved_renamed_dirs = Some(directories.relocations);
            }
            Err(error) => errors.push(format!("directory comparison failed: {error}")),
        }

        if !errors.is_empty() {
            report.diff_error = Some(errors.join("; "));
        }
        report
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

struct Count(Option<usize>);

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(0) => write!(f, "{}", "0".dimmed()),
            Some(count) => write!(f, "{}", count.to_string().bold()),
            None => write!(f, "{}", "n/a".yellow()),
        }
    }
}

fn write_count(f: &mut fmt::Formatter<'_>, label: &str, count: Option<usize>) -> fmt::Result {
    writeln!(f, "  {:<width$}{}", label, Count(count), width = LABEL_WIDTH)
}

fn write_paths(f: &mut fmt::Formatter<'_>, marker: &str, paths: Option<&Vec<String>>) -> fmt::Result {
    for path in paths.into_iter().flatten() {
        let line = format!("{marker} {path}");
        let line = if marker == "+" { line.green() } else { line.red() };
        writeln!(f, "    {line}")?;
    }
    Ok(())
}

/// Human-readable summary. Colors follow `colored`'s global switch.
impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let similarity = match self.ted_similarity.score() {
            Some(score) => format!("{score:.4}").cyan().bold(),
            None => "unavailable".yellow(),
        };
        writeln!(f, "{:<width$}{}", "Similarity", similarity, width = LABEL_WIDTH + 2)?;

        writeln!(f, "{}", "Files".bold())?;
        write_count(f, "added", self.files_added)?;
        write_paths(f, "+", self.details.added_files.as_ref())?;
        write_count(f, "deleted", self.files_deleted)?;
        write_paths(f, "-", self.details.deleted_files.as_ref())?;
        write_count(f, "unchanged", self.files_unchanged)?;
        write_count(f, "moved", self.files_moved)?;
        write_count(f, "renamed", self.files_renamed)?;
        write_count(f, "moved and renamed", self.files_moved_renamed)?;
        for relocation in self.details.moved_renamed_files.iter().flatten() {
            writeln!(
                f,
                "    {} -> {}",
                relocation.original_path,
                relocation.new_path.blue()
            )?;
        }

        writeln!(f, "{}", "Directories".bold())?;
        write_count(f, "added", self.dirs_added)?;
        write_paths(f, "+", self.details.added_dirs.as_ref())?;
        write_count(f, "deleted", self.dirs_deleted)?;
        write_paths(f, "-", self.details.deleted_dirs.as_ref())?;
        write_count(f, "unchanged", self.dirs_unchanged)?;
        write_count(f, "moved", self.dirs_moved)?;
        write_count(f, "renamed", self.dirs_renamed)?;
        for relocation in self.details.moved_renamed_dirs.iter().flatten() {
            writeln!(
                f,
                "    {} -> {}",
                relocation.original_path,
                relocation.new_path.blue()
            )?;
        }

        if let Some(error) = &self.diff_error {
            writeln!(f, "{} {}", "error:".red().bold(), error)?;
        }
        Ok(())
    }
}
