//! Conversion between [`Tree`] and the nested-mapping JSON form of a snapshot.
//!
//! The JSON form is a mapping of the root's children, where every entry is one
//! of `{"type": "file", "hash": ...}`, `{"type": "directory", "children": {...}}`
//! or `{"type": "error", "message": ...}`.

use serde_json::{Map, Value, json};
use snafu::{ResultExt, Snafu};
use tracing::warn;

use crate::snapshot::{ContentHash, NodeId, NodeKind, Tree, TreeError};

/// Renders the tree in its nested-mapping form.
pub fn to_json(tree: &Tree) -> Value {
    // Children always come after their parent in the arena, so walking the
    // ids backwards builds every child before the directory that holds it.
    let mut built: Vec<Option<Value>> = vec![None; tree.len()];

    for id in tree.ids().rev().filter(|id| *id != Tree::ROOT) {
        let node = tree.node(id);
        let value = match &node.kind {
            NodeKind::File { hash } => json!({
                "type": "file",
                "hash": hash.as_ref().map(ContentHash::as_str),
            }),
            NodeKind::Directory { children } => {
                json!({ "type": "directory", "children": take_children(tree, children, &mut built) })
            }
            NodeKind::Error { message } => json!({ "type": "error", "message": message }),
        };
        built[id.index()] = Some(value);
    }

    Value::Object(take_children(tree, tree.children(Tree::ROOT), &mut built))
}

fn take_children(tree: &Tree, children: &[NodeId], built: &mut [Option<Value>]) -> Map<String, Value> {
    children
        .iter()
        .filter_map(|child| {
            built[child.index()]
                .take()
                .map(|value| (tree.node(*child).name.clone(), value))
        })
        .collect()
}

/// Reads a tree from its nested-mapping form.
///
/// Malformed entries are logged and skipped together with their subtree; only
/// a top level that is not a mapping is an error.
pub fn from_json(value: &Value) -> Result<Tree, JsonSnapshotError> {
    let top_level = value.as_object().ok_or(JsonSnapshotError::TopLevelNotMap)?;

    let mut tree = Tree::new();
    let mut pending = vec![(Tree::ROOT, String::new(), top_level)];

    while let Some((parent, parent_path, entries)) = pending.pop() {
        for (name, content) in entries {
            let path = if parent_path.is_empty() {
                name.clone()
            } else {
                format!("{parent_path}/{name}")
            };

            let Some(content) = content.as_object() else {
                warn!("Skipping malformed entry '{}': expected a mapping, got {}", path, content);
                continue;
            };

            match content.get("type").and_then(Value::as_str) {
                Some("file") => {
                    let hash = match content.get("hash") {
                        Some(Value::String(hex)) => Some(ContentHash::from_hex(hex.as_str())),
                        Some(Value::Null) | None => None,
                        Some(other) => {
                            warn!("Ignoring malformed hash of '{}': {}", path, other);
                            None
                        }
                    };
                    tree.add_file(parent, name.as_str(), hash)
                        .context(TreeSnafu { path })?;
                }
                Some("directory") => {
                    let directory = tree
                        .add_directory(parent, name.as_str())
                        .context(TreeSnafu { path: path.clone() })?;
                    match content.get("children") {
                        Some(Value::Object(children)) => pending.push((directory, path, children)),
                        None => {}
                        Some(other) => warn!(
                            "Expected a mapping for the children of '{}', got {}",
                            path, other
                        ),
                    }
                }
                Some("error") => {
                    let message = content
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    tree.add_error(parent, name.as_str(), message)
                        .context(TreeSnafu { path })?;
                }
                other => warn!("Skipping '{}' with unknown type {:?}", path, other),
            }
        }
    }

    Ok(tree)
}

#[derive(Debug, Snafu)]
pub enum JsonSnapshotError {
    #[snafu(display("Top level of a snapshot should be a mapping"))]
    TopLevelNotMap,
    #[snafu(display("Snapshot entry '{}' cannot be placed in the tree", path))]
    TreeError { path: String, source: TreeError },
}
