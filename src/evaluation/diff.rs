//! Content-addressed reconciliation of two flattened snapshots.
//!
//! Files are followed by content hash. Directories have no content identity,
//! so they are matched by position: same path, then same trailing name (a
//! move), then same parent (a rename). The directory heuristic takes the first
//! unclaimed candidate in path order, which can pick the wrong partner when
//! several directories share a name or a parent.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use snafu::Snafu;

use crate::evaluation::flatten::{EntryKind, FlatEntry, SEPARATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChange {
    Moved,
    Renamed,
    MovedRenamed,
}

/// A file found under a different path in the second snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRelocation {
    pub hash: String,
    pub original_path: String,
    pub new_path: String,
    pub change_type: FileChange,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileChanges {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub relocations: Vec<FileRelocation>,
}

impl FileChanges {
    pub fn count(&self, change: FileChange) -> usize {
        self.relocations
            .iter()
            .filter(|relocation| relocation.change_type == change)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryChange {
    Moved,
    Renamed,
}

/// A directory paired with a directory of the second snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryRelocation {
    #[serde(rename = "type")]
    pub change_type: DirectoryChange,
    pub original_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryChanges {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub relocations: Vec<DirectoryRelocation>,
}

impl DirectoryChanges {
    pub fn count(&self, change: DirectoryChange) -> usize {
        self.relocations
            .iter()
            .filter(|relocation| relocation.change_type == change)
            .count()
    }
}

/// Splits a path into its parent path (empty at the top level) and its name
fn split_path(path: &str) -> Result<(&str, &str), DiffError> {
    if path.split(SEPARATOR).any(str::is_empty) {
        return MalformedPathSnafu { path }.fail();
    }
    Ok(match path.rsplit_once(SEPARATOR) {
        Some((parent, name)) => (parent, name),
        None => ("", path),
    })
}

/// Maps every file hash to one path holding it, the smallest in path order
fn files_by_hash(entries: &[FlatEntry]) -> Result<BTreeMap<&str, &str>, DiffError> {
    let mut by_hash: BTreeMap<&str, &str> = BTreeMap::new();
    for entry in entries.iter().filter(|entry| entry.kind.is_file()) {
        let Some(hash) = entry.identity.as_deref() else {
            continue;
        };
        split_path(&entry.path)?;
        by_hash
            .entry(hash)
            .and_modify(|path| {
                if entry.path.as_str() < *path {
                    *path = entry.path.as_str();
                }
            })
            .or_insert(&entry.path);
    }
    Ok(by_hash)
}

/// Classifies every file of both snapshots by content hash.
pub fn diff_files(before: &[FlatEntry], after: &[FlatEntry]) -> Result<FileChanges, DiffError> {
    let before = files_by_hash(before)?;
    let after = files_by_hash(after)?;

    let mut changes = FileChanges {
        deleted: before
            .iter()
            .filter(|(hash, _)| !after.contains_key(*hash))
            .map(|(_, path)| path.to_string())
            .collect(),
        added: after
            .iter()
            .filter(|(hash, _)| !before.contains_key(*hash))
            .map(|(_, path)| path.to_string())
            .collect(),
        ..FileChanges::default()
    };

    for (hash, original_path) in &before {
        let Some(new_path) = after.get(hash) else {
            continue;
        };
        if original_path == new_path {
            changes.unchanged += 1;
            continue;
        }

        let (original_parent, original_name) = split_path(original_path)?;
        let (new_parent, new_name) = split_path(new_path)?;
        let change_type = match (original_parent != new_parent, original_name != new_name) {
            (true, true) => FileChange::MovedRenamed,
            (true, false) => FileChange::Moved,
            _ => FileChange::Renamed,
        };

        changes.relocations.push(FileRelocation {
            hash: hash.to_string(),
            original_path: original_path.to_string(),
            new_path: new_path.to_string(),
            change_type,
        });
    }

    Ok(changes)
}

fn directory_paths(entries: &[FlatEntry]) -> Result<BTreeSet<&str>, DiffError> {
    entries
        .iter()
        .filter(|entry| entry.kind == EntryKind::Directory)
        .map(|entry| split_path(&entry.path).map(|_| entry.path.as_str()))
        .collect()
}

/// Classifies the directories of both snapshots by position.
pub fn diff_directories(
    before: &[FlatEntry],
    after: &[FlatEntry],
) -> Result<DirectoryChanges, DiffError> {
    let before = directory_paths(before)?;
    let after = directory_paths(after)?;

    let mut changes = DirectoryChanges {
        unchanged: before.intersection(&after).map(|path| path.to_string()).collect(),
        ..DirectoryChanges::default()
    };

    let mut unclaimed: Vec<&str> = after.difference(&before).copied().collect();

    for deleted in before.difference(&after) {
        let (parent, name) = split_path(deleted)?;

        let mut matched = None;
        for (change_type, wanted) in [
            (DirectoryChange::Moved, Side::Name(name)),
            (DirectoryChange::Renamed, Side::Parent(parent)),
        ] {
            if let Some(position) = find_candidate(&unclaimed, wanted)? {
                matched = Some((change_type, unclaimed.remove(position)));
                break;
            }
        }

        match matched {
            Some((change_type, new_path)) => changes.relocations.push(DirectoryRelocation {
                change_type,
                original_path: deleted.to_string(),
                new_path: new_path.to_string(),
            }),
            None => changes.deleted.push(deleted.to_string()),
        }
    }

    changes.added = unclaimed.into_iter().map(str::to_string).collect();
    Ok(changes)
}

/// Which half of a candidate path has to match
#[derive(Clone, Copy)]
enum Side<'a> {
    Name(&'a str),
    Parent(&'a str),
}

fn find_candidate(candidates: &[&str], wanted: Side<'_>) -> Result<Option<usize>, DiffError> {
    for (position, candidate) in candidates.iter().enumerate() {
        let (parent, name) = split_path(candidate)?;
        let found = match wanted {
            Side::Name(wanted) => name == wanted,
            Side::Parent(wanted) => parent == wanted,
        };
        if found {
            return Ok(Some(position));
        }
    }
    Ok(None)
}

#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum DiffError {
    #[snafu(display("Path '{}' has an empty component", path))]
    MalformedPath { path: String },
}
