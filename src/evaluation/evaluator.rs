use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::evaluation::diff::{diff_directories, diff_files};
use crate::evaluation::flatten::flatten;
use crate::evaluation::report::EvaluationReport;
use crate::evaluation::similarity::SimilarityScorer;
use crate::snapshot::Tree;

/// Compares two snapshots. Similarity, file diff and directory diff fail
/// independently of each other; a failure only blanks its own part of the report.
#[derive(Debug, Clone)]
pub struct Evaluator {
    scorer: SimilarityScorer,
}

impl Evaluator {
    pub fn new(settings: &Settings) -> Self {
        Self {
            scorer: SimilarityScorer::new(&settings.similarity),
        }
    }

    pub fn evaluate(&self, before: &Tree, after: &Tree) -> EvaluationReport {
        let similarity = self.scorer.score(before, after);

        let before_entries = flatten(before);
        let after_entries = flatten(after);
        debug!(
            "Flattened {} entries before and {} after",
            before_entries.len(),
            after_entries.len()
        );

        let files = diff_files(&before_entries, &after_entries);
        if let Err(error) = &files {
            warn!("File comparison failed: {}", error);
        }
        let directories = diff_directories(&before_entries, &after_entries);
        if let Err(error) = &directories {
            warn!("Directory comparison failed: {}", error);
        }

        let report = EvaluationReport::new(similarity, files, directories);
        info!(
            "Evaluated snapshots: similarity {}, {:?} files unchanged, {:?} directories unchanged",
            report.ted_similarity.as_reported(),
            report.files_unchanged,
            report.dirs_unchanged
        );
        report
    }
}
