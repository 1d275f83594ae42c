use std::{
    borrow::Cow,
    io::ErrorKind,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use compio::fs;
use hashlink::LinkedHashMap;
use saphyr::{LoadableYamlNode, Scalar, Yaml};
use snafu::prelude::*;
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;
use crate::snapshot::{DEFAULT_CHUNK_SIZE, ROOT_NAME};

pub const SETTINGS_FILE_NAME: &str = "reshelf.yaml";

const DEFAULT_HASH_CONCURRENCY: usize = 64;
const DEFAULT_MAX_CELLS: usize = 16_000_000;

/// How a directory is turned into a snapshot. Both sides of an evaluation
/// must be captured with the same values to be comparable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub skip_hidden: bool,
    pub follow_symlinks: bool,
    pub chunk_size: usize,
    pub hash_concurrency: usize,
    pub worker_threads: Option<NonZeroUsize>,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            skip_hidden: false,
            follow_symlinks: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_concurrency: DEFAULT_HASH_CONCURRENCY,
            worker_threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilaritySettings {
    pub root_label: String,
    /// Upper bound on the edit distance table size, in cells
    pub max_cells: usize,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            root_label: ROOT_NAME.to_string(),
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub snapshot: SnapshotSettings,
    pub similarity: SimilaritySettings,
}

impl Settings {
    /// Reads the settings file, falling back to defaults when it does not exist
    pub async fn read(path: &Path) -> Result<Self, SettingsError> {
        debug!("Reading settings from {}", path.best_effort_path_display());
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                info!("No settings file found, using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(error).context(ReadSnafu {
                    file_path: path.to_path_buf(),
                });
            }
        };

        let contents = String::from_utf8(bytes).map_err(|_| SettingsError::NotUtf8 {
            file_path: path.to_path_buf(),
        })?;
        contents.as_str().try_into()
    }

    fn parse_snapshot(section: &Section) -> Result<SnapshotSettings, SettingsError> {
        section.log_unknown_keys(&[
            "skip_hidden",
            "follow_symlinks",
            "chunk_size",
            "hash_concurrency",
            "worker_threads",
        ]);
        let defaults = SnapshotSettings::default();

        Ok(SnapshotSettings {
            skip_hidden: section.boolean("skip_hidden", defaults.skip_hidden)?,
            follow_symlinks: section.boolean("follow_symlinks", defaults.follow_symlinks)?,
            chunk_size: section.positive("chunk_size", defaults.chunk_size)?,
            hash_concurrency: section.positive("hash_concurrency", defaults.hash_concurrency)?,
            worker_threads: section
                .optional_positive("worker_threads")?
                .and_then(NonZeroUsize::new),
        })
    }

    fn parse_similarity(section: &Section) -> Result<SimilaritySettings, SettingsError> {
        section.log_unknown_keys(&["root_label", "max_cells"]);
        let defaults = SimilaritySettings::default();

        Ok(SimilaritySettings {
            root_label: section.string("root_label", defaults.root_label)?,
            max_cells: section.positive("max_cells", defaults.max_cells)?,
        })
    }
}

impl TryFrom<&str> for Settings {
    type Error = SettingsError;

    fn try_from(contents: &str) -> Result<Self, Self::Error> {
        let documents =
            Yaml::load_from_str(contents).map_err(|e| SettingsError::ParseError { source: e })?;

        let Some(document) = documents.first() else {
            debug!("Settings file is empty, using defaults");
            return Ok(Self::default());
        };

        let top_level = document
            .as_mapping()
            .ok_or(SettingsError::TopLevelNotMap)?;

        Ok(Settings {
            snapshot: Self::parse_snapshot(&Section::from_top_level(top_level, "snapshot")?)?,
            similarity: Self::parse_similarity(&Section::from_top_level(
                top_level,
                "similarity",
            )?)?,
        })
    }
}

fn yaml_key(name: &'static str) -> Yaml<'static> {
    Yaml::Value(Scalar::String(Cow::Borrowed(name)))
}

/// One top-level mapping of the settings file; a missing section reads as empty.
struct Section<'a, 'input> {
    name: &'static str,
    entries: Option<&'a LinkedHashMap<Yaml<'input>, Yaml<'input>>>,
}

impl<'a, 'input> Section<'a, 'input> {
    fn from_top_level(
        top_level: &'a LinkedHashMap<Yaml<'input>, Yaml<'input>>,
        name: &'static str,
    ) -> Result<Self, SettingsError> {
        let entries = match top_level.get(&yaml_key(name)) {
            None => None,
            Some(Yaml::Mapping(entries)) => Some(entries),
            Some(_) => return SectionNotMapSnafu { section: name }.fail(),
        };
        Ok(Self { name, entries })
    }

    fn get(&self, key: &'static str) -> Option<&'a Yaml<'input>> {
        self.entries?.get(&yaml_key(key))
    }

    fn boolean(&self, key: &'static str, default: bool) -> Result<bool, SettingsError> {
        match self.get(key) {
            None => Ok(default),
            Some(Yaml::Value(Scalar::Boolean(value))) => Ok(*value),
            Some(_) => self.invalid(key, "a boolean"),
        }
    }

    fn positive(&self, key: &'static str, default: usize) -> Result<usize, SettingsError> {
        Ok(self.optional_positive(key)?.unwrap_or(default))
    }

    fn optional_positive(&self, key: &'static str) -> Result<Option<usize>, SettingsError> {
        match self.get(key) {
            None => Ok(None),
            Some(Yaml::Value(Scalar::Integer(value))) if *value > 0 => Ok(Some(*value as usize)),
            Some(_) => self.invalid(key, "a positive integer"),
        }
    }

    fn string(&self, key: &'static str, default: String) -> Result<String, SettingsError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                Some(text) => Ok(text.to_string()),
                None => self.invalid(key, "a string"),
            },
        }
    }

    fn invalid<T>(&self, key: &'static str, expected: &'static str) -> Result<T, SettingsError> {
        InvalidValueSnafu {
            key: format!("{}.{}", self.name, key),
            expected,
        }
        .fail()
    }

    fn log_unknown_keys(&self, known: &[&str]) {
        let Some(entries) = self.entries else {
            return;
        };
        for key in entries.keys() {
            match key.as_str() {
                Some(name) if known.contains(&name) => {}
                _ => debug!("Ignoring unknown key {:?} in section '{}'", key, self.name),
            }
        }
    }
}

#[derive(Debug, Snafu)]
pub enum SettingsError {
    #[snafu(display("Failed to read the settings file: {}", file_path.best_effort_path_display()))]
    ReadError {
        file_path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Settings file {} is not valid UTF-8", file_path.best_effort_path_display()))]
    NotUtf8 { file_path: PathBuf },
    #[snafu(display("Failed to parse the settings file"))]
    ParseError { source: saphyr::ScanError },
    #[snafu(display("Top level of the settings file should be a map"))]
    TopLevelNotMap,
    #[snafu(display("Section '{}' should be a map", section))]
    SectionNotMap { section: String },
    #[snafu(display("Setting '{}' should be {}", key, expected))]
    InvalidValue { key: String, expected: String },
}
