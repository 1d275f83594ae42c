use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::SnapshotSettings;
use crate::ext::BestEffortPathExt;
use crate::snapshot::hashing_pool::{HashJob, HashingError, HashingPool, HashingPoolCreationError};
use crate::snapshot::{NodeId, Tree};

/// Walks a directory and captures it as a hashed [`Tree`].
pub struct SnapshotBuilder {
    settings: SnapshotSettings,
    pool: HashingPool,
}

/// A directory on the way from the root to the entry being visited
struct Ancestor {
    node: NodeId,
    path: PathBuf,
}

impl SnapshotBuilder {
    pub fn new(settings: SnapshotSettings) -> Result<Self, SnapshotError> {
        let pool = HashingPool::new(
            settings.worker_threads,
            settings.chunk_size,
            settings.hash_concurrency,
        )
        .context(PoolSnafu)?;
        Ok(Self { settings, pool })
    }

    /// Builds the snapshot of `root`.
    ///
    /// Only an invalid or unlistable root fails the whole build. Below the
    /// root, unreadable files keep a node without a hash, unlistable
    /// directories become error nodes and entries that cannot be placed in
    /// the tree are logged and left out.
    pub async fn build(&self, root: &Path) -> Result<Tree, SnapshotError> {
        let metadata = fs::metadata(root).context(RootSnafu {
            path: root.to_path_buf(),
        })?;
        if !metadata.is_dir() {
            return NotADirectorySnafu {
                path: root.to_path_buf(),
            }
            .fail();
        }

        info!("Capturing snapshot of {}", root.best_effort_path_display());
        let mut tree = Tree::new();
        let mut jobs = Vec::new();
        // ancestors[depth] is the directory last entered at that depth
        let mut ancestors: Vec<Ancestor> = Vec::new();

        let skip_hidden = self.settings.skip_hidden;
        let mut walker = WalkDir::new(root)
            .follow_links(self.settings.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                let keep = entry.depth() == 0 || !skip_hidden || !is_hidden(entry);
                if !keep {
                    debug!("Skipping hidden entry {}", entry.path().display());
                }
                keep
            });

        while let Some(next) = walker.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(error) if error.depth() == 0 => {
                    return Err(error).context(RootListingSnafu {
                        path: root.to_path_buf(),
                    });
                }
                Err(error) => {
                    record_failure(&mut tree, &mut ancestors, &error);
                    continue;
                }
            };

            let depth = entry.depth();
            if depth == 0 {
                ancestors.push(Ancestor {
                    node: Tree::ROOT,
                    path: entry.into_path(),
                });
                continue;
            }

            ancestors.truncate(depth);
            let Some(parent) = ancestors.get(depth - 1).map(|ancestor| ancestor.node) else {
                warn!("No parent recorded for {}, skipping it", entry.path().display());
                continue;
            };

            let name = entry_name(entry.file_name());
            let file_type = entry.file_type();
            let added = if file_type.is_dir() {
                tree.add_directory(parent, name)
            } else if file_type.is_file() {
                tree.add_file(parent, name, None)
            } else {
                // without follow_links a link reports its own type
                debug!("Skipping link or special file {}", entry.path().display());
                continue;
            };

            match added {
                Ok(node) if file_type.is_dir() => ancestors.push(Ancestor {
                    node,
                    path: entry.into_path(),
                }),
                Ok(node) => jobs.push(HashJob {
                    node,
                    path: entry.into_path(),
                }),
                Err(error) => {
                    warn!("Leaving {} out of the snapshot: {}", entry.path().display(), error);
                    if file_type.is_dir() {
                        walker.skip_current_dir();
                    }
                }
            }
        }

        for (node, hash) in self.pool.hash_all(jobs).await.context(HashingSnafu)? {
            tree.set_hash(node, hash);
        }

        debug!("Captured {} nodes", tree.len());
        Ok(tree)
    }
}

/// Records a walk error below the root as an error node.
///
/// A directory that cannot be listed is reported right after the directory
/// itself was entered, at its own depth; anything else is an entry of the
/// directory one level up that could not be inspected (a dangling link or a
/// link back to an ancestor).
fn record_failure(tree: &mut Tree, ancestors: &mut Vec<Ancestor>, error: &walkdir::Error) {
    let depth = error.depth();
    let cause = error
        .io_error()
        .map(ToString::to_string)
        .unwrap_or_else(|| error.to_string());
    let Some(path) = error.path() else {
        warn!("Walk error without a path: {}", error);
        return;
    };

    if let Some(directory) = ancestors.get(depth).filter(|ancestor| ancestor.path == path) {
        warn!("Cannot list directory {}: {}", path.display(), cause);
        tree.mark_error(directory.node, format!("Access denied or error: {cause}"));
        return;
    }

    ancestors.truncate(depth);
    let Some(parent) = depth.checked_sub(1).and_then(|index| ancestors.get(index)) else {
        warn!("Could not access {}: {}", path.display(), cause);
        return;
    };
    warn!("Could not access item {}: {}", path.display(), cause);
    let name = path.file_name().map(entry_name).unwrap_or_default();
    if let Err(tree_error) = tree.add_error(parent.node, name, format!("Error accessing item: {cause}")) {
        warn!("Leaving {} out of the snapshot: {}", path.display(), tree_error);
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().as_encoded_bytes().starts_with(b".")
}

/// Entry name as stored in the tree; bytes that are not UTF-8 are kept
/// distinguishable as `\xNN` escapes.
fn entry_name(name: &OsStr) -> String {
    if let Some(name) = name.to_str() {
        return name.to_string();
    }
    let mut escaped = String::new();
    for chunk in name.as_encoded_bytes().utf8_chunks() {
        escaped.push_str(chunk.valid());
        for byte in chunk.invalid() {
            escaped.push_str(&format!("\\x{byte:02x}"));
        }
    }
    escaped
}

#[derive(Debug, Snafu)]
pub enum SnapshotError {
    #[snafu(display("Cannot read snapshot root {}", path.best_effort_path_display()))]
    RootError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Cannot list snapshot root {}", path.best_effort_path_display()))]
    RootListingError {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[snafu(display("Snapshot root {} is not a directory", path.best_effort_path_display()))]
    NotADirectoryError { path: PathBuf },
    #[snafu(display("Failed to start the hashing workers"))]
    PoolError { source: HashingPoolCreationError },
    #[snafu(display("Failed to hash the snapshot files"))]
    HashingError { source: HashingError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ContentHash, NodeKind};
    use tempfile::TempDir;

    fn builder(settings: SnapshotSettings) -> SnapshotBuilder {
        SnapshotBuilder::new(settings).expect("Failed to create builder")
    }

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn resolve(tree: &Tree, path: &str) -> Option<NodeId> {
        path.split('/')
            .try_fold(Tree::ROOT, |current, name| tree.find_child(current, name))
    }

    #[compio::test]
    async fn captures_structure_and_hashes() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "docs/report.txt", "Report Content Alpha");
        write(temp_dir.path(), "docs/images/logo.png", "PNG Data Gamma");
        write(temp_dir.path(), "misc.tmp", "Temporary data");
        fs::create_dir(temp_dir.path().join("empty")).unwrap();

        let tree = builder(SnapshotSettings::default())
            .build(temp_dir.path())
            .await
            .unwrap();

        let root_names: Vec<_> = tree
            .children(Tree::ROOT)
            .iter()
            .map(|id| tree.node(*id).name.as_str())
            .collect();
        assert_eq!(root_names, vec!["docs", "empty", "misc.tmp"]);

        let report = resolve(&tree, "docs/report.txt").unwrap();
        assert_eq!(
            tree.node(report).kind,
            NodeKind::File {
                hash: Some(ContentHash::of_bytes(b"Report Content Alpha"))
            }
        );
        let logo = resolve(&tree, "docs/images/logo.png").unwrap();
        assert_eq!(
            tree.node(logo).kind,
            NodeKind::File {
                hash: Some(ContentHash::of_bytes(b"PNG Data Gamma"))
            }
        );
        let empty = resolve(&tree, "empty").unwrap();
        assert!(tree.node(empty).kind.is_directory());
        assert!(tree.children(empty).is_empty());
    }

    #[compio::test]
    async fn hidden_entries_follow_the_settings() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), ".hidden/secret.txt", "s");
        write(temp_dir.path(), ".env", "e");
        write(temp_dir.path(), "visible.txt", "v");

        let with_hidden = builder(SnapshotSettings::default())
            .build(temp_dir.path())
            .await
            .unwrap();
        let without_hidden = builder(SnapshotSettings {
            skip_hidden: true,
            ..SnapshotSettings::default()
        })
        .build(temp_dir.path())
        .await
        .unwrap();

        assert!(resolve(&with_hidden, ".hidden/secret.txt").is_some());
        assert!(resolve(&with_hidden, ".env").is_some());
        assert_eq!(without_hidden.children(Tree::ROOT).len(), 1);
        assert!(resolve(&without_hidden, "visible.txt").is_some());
    }

    #[cfg(unix)]
    #[compio::test]
    async fn symbolic_links_are_skipped_by_default() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "real/data.txt", "payload");
        std::os::unix::fs::symlink(temp_dir.path().join("real"), temp_dir.path().join("alias"))
            .unwrap();

        let skipped = builder(SnapshotSettings::default())
            .build(temp_dir.path())
            .await
            .unwrap();
        let followed = builder(SnapshotSettings {
            follow_symlinks: true,
            ..SnapshotSettings::default()
        })
        .build(temp_dir.path())
        .await
        .unwrap();

        assert!(resolve(&skipped, "alias").is_none());
        let aliased = resolve(&followed, "alias/data.txt").unwrap();
        let real = resolve(&followed, "real/data.txt").unwrap();
        assert_eq!(followed.node(aliased).kind, followed.node(real).kind);
        assert_eq!(
            followed.node(real).kind,
            NodeKind::File {
                hash: Some(ContentHash::of_bytes(b"payload"))
            }
        );
    }

    #[cfg(unix)]
    #[compio::test]
    async fn link_back_to_an_ancestor_becomes_an_error_node() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "real/data.txt", "payload");
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("real/back")).unwrap();

        let tree = builder(SnapshotSettings {
            follow_symlinks: true,
            ..SnapshotSettings::default()
        })
        .build(temp_dir.path())
        .await
        .unwrap();

        let back = resolve(&tree, "real/back").unwrap();
        assert!(tree.node(back).kind.is_error());
        assert!(tree.children(back).is_empty());
        assert!(resolve(&tree, "real/data.txt").is_some());
    }

    #[cfg(unix)]
    #[compio::test]
    async fn unlistable_directory_becomes_an_error_node() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "locked/inner.txt", "inner");
        write(temp_dir.path(), "keep.txt", "keep");
        let locked = temp_dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // running as root, permission bits are not enforced
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = builder(SnapshotSettings::default())
            .build(temp_dir.path())
            .await;
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        let tree = result.unwrap();

        let locked = resolve(&tree, "locked").unwrap();
        match &tree.node(locked).kind {
            NodeKind::Error { message } => {
                assert!(message.starts_with("Access denied or error:"), "{message}")
            }
            other => panic!("expected an error node, got {other:?}"),
        }
        assert!(tree.children(locked).is_empty());
        let keep = resolve(&tree, "keep.txt").unwrap();
        assert_eq!(
            tree.node(keep).kind,
            NodeKind::File {
                hash: Some(ContentHash::of_bytes(b"keep"))
            }
        );
    }

    #[cfg(target_os = "linux")]
    #[compio::test]
    async fn names_that_are_not_utf8_stay_distinct() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"a\xff")), "ff").unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"a\xfe")), "fe").unwrap();
        write(temp_dir.path(), "ok.txt", "ok");

        let tree = builder(SnapshotSettings::default())
            .build(temp_dir.path())
            .await
            .unwrap();

        let names: Vec<_> = tree
            .children(Tree::ROOT)
            .iter()
            .map(|id| tree.node(*id).name.as_str())
            .collect();
        assert_eq!(names, vec!["a\\xfe", "a\\xff", "ok.txt"]);
        let ff = resolve(&tree, "a\\xff").unwrap();
        assert_eq!(
            tree.node(ff).kind,
            NodeKind::File {
                hash: Some(ContentHash::of_bytes(b"ff"))
            }
        );
    }

    #[cfg(target_os = "linux")]
    #[compio::test]
    async fn colliding_names_are_left_out_without_failing() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new().unwrap();
        // the escaped form of the second name is literally the first one
        write(temp_dir.path(), "a\\xff/one.txt", "literal");
        fs::create_dir(temp_dir.path().join(OsStr::from_bytes(b"a\xff"))).unwrap();
        fs::write(temp_dir.path().join(OsStr::from_bytes(b"a\xff/two.txt")), "raw").unwrap();
        write(temp_dir.path(), "z.txt", "z");

        let tree = builder(SnapshotSettings::default())
            .build(temp_dir.path())
            .await
            .unwrap();

        assert_eq!(tree.children(Tree::ROOT).len(), 2);
        let collided = resolve(&tree, "a\\xff").unwrap();
        assert_eq!(tree.children(collided).len(), 1);
        assert!(resolve(&tree, "z.txt").is_some());
        tree.validate().unwrap();
    }

    #[cfg(unix)]
    #[compio::test]
    async fn dangling_link_becomes_an_error_node_when_followed() {
        let temp_dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("nowhere"), temp_dir.path().join("dangling"))
            .unwrap();

        let tree = builder(SnapshotSettings {
            follow_symlinks: true,
            ..SnapshotSettings::default()
        })
        .build(temp_dir.path())
        .await
        .unwrap();

        let dangling = resolve(&tree, "dangling").unwrap();
        assert!(tree.node(dangling).kind.is_error());
    }

    #[compio::test]
    async fn nonexistent_root_is_a_hard_failure() {
        let temp_dir = TempDir::new().unwrap();
        let result = builder(SnapshotSettings::default())
            .build(&temp_dir.path().join("missing"))
            .await;
        assert!(matches!(result, Err(SnapshotError::RootError { .. })));
    }

    #[compio::test]
    async fn file_root_is_a_hard_failure() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "plain.txt", "not a directory");

        let result = builder(SnapshotSettings::default())
            .build(&temp_dir.path().join("plain.txt"))
            .await;
        assert!(matches!(result, Err(SnapshotError::NotADirectoryError { .. })));
    }

    #[compio::test]
    async fn same_directory_gives_the_same_tree() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), "a/b.txt", "b");
        write(temp_dir.path(), "a/c.txt", "c");
        write(temp_dir.path(), "z.txt", "z");
        let builder = builder(SnapshotSettings::default());

        let first = builder.build(temp_dir.path()).await.unwrap();
        let second = builder.build(temp_dir.path()).await.unwrap();

        assert_eq!(first, second);
    }
}
