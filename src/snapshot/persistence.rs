use std::path::{Path, PathBuf};

use compio::fs;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::ext::{AsyncTryFrom, BestEffortPathExt};
use crate::snapshot::json::{self, JsonSnapshotError};
use crate::snapshot::{Tree, TreeError};

const ZSTD_LEVEL: i32 = 3;

/// On-disk representation of a saved snapshot, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Nested-mapping JSON, readable by other tools
    Json,
    /// bincode, compressed with zstd
    Binary,
}

impl SnapshotFormat {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some(extension) if extension.eq_ignore_ascii_case("json") => SnapshotFormat::Json,
            _ => SnapshotFormat::Binary,
        }
    }
}

pub fn encode(tree: &Tree, format: SnapshotFormat) -> Result<Vec<u8>, PersistenceError> {
    match format {
        SnapshotFormat::Json => {
            serde_json::to_vec_pretty(&json::to_json(tree)).context(JsonEncodeSnafu)
        }
        SnapshotFormat::Binary => {
            let bytes = bincode::encode_to_vec(tree, bincode::config::standard())
                .context(BinaryEncodeSnafu)?;
            zstd::encode_all(bytes.as_slice(), ZSTD_LEVEL).context(CompressSnafu)
        }
    }
}

pub fn decode(bytes: &[u8], format: SnapshotFormat) -> Result<Tree, PersistenceError> {
    match format {
        SnapshotFormat::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(bytes).context(JsonDecodeSnafu)?;
            json::from_json(&value).context(JsonShapeSnafu)
        }
        SnapshotFormat::Binary => {
            let bytes = zstd::decode_all(bytes).context(DecompressSnafu)?;
            let (tree, _) =
                bincode::decode_from_slice::<Tree, _>(&bytes, bincode::config::standard())
                    .context(BinaryDecodeSnafu)?;
            tree.validate().context(CorruptSnapshotSnafu)?;
            Ok(tree)
        }
    }
}

/// Writes a snapshot, choosing the format from the file extension
pub async fn save(tree: &Tree, path: &Path) -> Result<(), PersistenceError> {
    let format = SnapshotFormat::for_path(path);
    debug!(
        "Writing {:?} snapshot to {}",
        format,
        path.best_effort_path_display()
    );
    let bytes = encode(tree, format)?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.context(WriteSnafu {
            path: path.to_path_buf(),
        })?;
    }
    fs::write(path, bytes).await.0.context(WriteSnafu {
        path: path.to_path_buf(),
    })?;

    info!("Saved snapshot to {}", path.best_effort_path_display());
    Ok(())
}

/// Reads a snapshot saved by [`save`]
pub async fn load(path: &Path) -> Result<Tree, PersistenceError> {
    let format = SnapshotFormat::for_path(path);
    debug!(
        "Reading {:?} snapshot from {}",
        format,
        path.best_effort_path_display()
    );
    let bytes = fs::read(path).await.context(ReadSnafu {
        path: path.to_path_buf(),
    })?;
    decode(&bytes, format)
}

impl AsyncTryFrom<&Path> for Tree {
    type Error = PersistenceError;

    async fn async_try_from(path: &Path) -> Result<Self, Self::Error> {
        load(path).await
    }
}

#[derive(Debug, Snafu)]
pub enum PersistenceError {
    #[snafu(display("Failed to read snapshot {}", path.best_effort_path_display()))]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write snapshot {}", path.best_effort_path_display()))]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Snapshot is not valid JSON"))]
    JsonDecodeError { source: serde_json::Error },
    #[snafu(display("Failed to serialize snapshot as JSON"))]
    JsonEncodeError { source: serde_json::Error },
    #[snafu(display("Snapshot JSON has an unexpected shape"))]
    JsonShapeError { source: JsonSnapshotError },
    #[snafu(display("Failed to compress snapshot"))]
    CompressError { source: std::io::Error },
    #[snafu(display("Failed to decompress snapshot"))]
    DecompressError { source: std::io::Error },
    #[snafu(display("Failed to encode snapshot"))]
    BinaryEncodeError { source: bincode::error::EncodeError },
    #[snafu(display("Failed to decode snapshot"))]
    BinaryDecodeError { source: bincode::error::DecodeError },
    #[snafu(display("Snapshot decodes to an inconsistent tree"))]
    CorruptSnapshotError { source: TreeError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tree::Node;
    use crate::snapshot::{ContentHash, NodeId, NodeKind};
    use rstest::*;
    use tempfile::TempDir;

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        tree.insert_file_path("src/main.rs", Some(ContentHash::of_bytes(b"fn main() {}")))
            .unwrap();
        tree.insert_file_path("README.md", None).unwrap();
        let broken = tree.insert_directory_path("broken").unwrap();
        tree.mark_error(broken, "Access denied");
        tree
    }

    #[rstest]
    #[case("snapshot.json", SnapshotFormat::Json)]
    #[case("SNAPSHOT.JSON", SnapshotFormat::Json)]
    #[case("snapshot.bin", SnapshotFormat::Binary)]
    #[case("snapshot", SnapshotFormat::Binary)]
    fn format_follows_the_extension(#[case] file_name: &str, #[case] expected: SnapshotFormat) {
        assert_eq!(SnapshotFormat::for_path(Path::new(file_name)), expected);
    }

    #[rstest]
    #[case("nested/dir/before.json")]
    #[case("before.snapshot")]
    #[compio::test]
    async fn saved_snapshot_loads_back(#[case] file_name: &str) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(file_name);
        let tree = sample_tree();

        save(&tree, &path).await.unwrap();
        let loaded = load(&path).await.unwrap();

        assert_eq!(json::to_json(&loaded), json::to_json(&tree));
    }

    #[compio::test]
    async fn missing_snapshot_is_a_read_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = Tree::async_try_from(temp_dir.path().join("missing.json").as_path()).await;
        assert!(matches!(result, Err(PersistenceError::ReadError { .. })));
    }

    #[test]
    fn garbage_is_rejected_in_both_formats() {
        let garbage = b"definitely not a snapshot";
        assert!(matches!(
            decode(garbage, SnapshotFormat::Json),
            Err(PersistenceError::JsonDecodeError { .. })
        ));
        assert!(matches!(
            decode(garbage, SnapshotFormat::Binary),
            Err(PersistenceError::DecompressError { .. })
        ));
    }

    fn compressed(nodes: &[Node]) -> Vec<u8> {
        let bytes = bincode::encode_to_vec(nodes, bincode::config::standard()).unwrap();
        zstd::encode_all(bytes.as_slice(), ZSTD_LEVEL).unwrap()
    }

    #[test]
    fn binary_snapshot_with_dangling_child_is_rejected() {
        let nodes = vec![Node {
            name: ".".to_string(),
            kind: NodeKind::Directory {
                children: vec![NodeId::from(7)],
            },
        }];

        let result = decode(&compressed(&nodes), SnapshotFormat::Binary);

        assert!(matches!(
            result,
            Err(PersistenceError::CorruptSnapshotError {
                source: TreeError::BrokenLink { .. }
            })
        ));
    }

    #[test]
    fn binary_snapshot_with_cycle_is_rejected() {
        let directory = |children: Vec<usize>| NodeKind::Directory {
            children: children.into_iter().map(NodeId::from).collect(),
        };
        let nodes = vec![
            Node {
                name: ".".to_string(),
                kind: directory(vec![1]),
            },
            Node {
                name: "loop".to_string(),
                kind: directory(vec![0]),
            },
        ];

        let result = decode(&compressed(&nodes), SnapshotFormat::Binary);

        assert!(matches!(result, Err(PersistenceError::CorruptSnapshotError { .. })));
    }

    #[test]
    fn json_with_wrong_shape_is_rejected() {
        let result = decode(b"[1, 2, 3]", SnapshotFormat::Json);
        assert!(matches!(result, Err(PersistenceError::JsonShapeError { .. })));
    }
}
