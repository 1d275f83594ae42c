use derive_more::{Display, IsVariant};

use crate::snapshot::{NodeId, NodeKind, Tree};

pub const SEPARATOR: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, IsVariant)]
pub enum EntryKind {
    #[display("file")]
    File,
    #[display("directory")]
    Directory,
    #[display("error")]
    Error,
}

/// One node of a snapshot, addressed by its slash-separated path from the root.
///
/// `identity` is the content hash for files, the diagnostic for errors and
/// absent for directories.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlatEntry {
    pub path: String,
    pub kind: EntryKind,
    pub identity: Option<String>,
}

/// Lists every node below the root of `tree`, depth first.
///
/// The root itself is not listed. Callers should treat the result as a set.
pub fn flatten(tree: &Tree) -> Vec<FlatEntry> {
    let mut entries = Vec::with_capacity(tree.len().saturating_sub(1));
    let mut pending: Vec<(NodeId, String)> = tree
        .children(Tree::ROOT)
        .iter()
        .rev()
        .map(|child| (*child, tree.node(*child).name.clone()))
        .collect();

    while let Some((id, path)) = pending.pop() {
        match &tree.node(id).kind {
            NodeKind::File { hash } => entries.push(FlatEntry {
                path,
                kind: EntryKind::File,
                identity: hash.as_ref().map(ToString::to_string),
            }),
            NodeKind::Error { message } => entries.push(FlatEntry {
                path,
                kind: EntryKind::Error,
                identity: Some(message.clone()),
            }),
            NodeKind::Directory { children } => {
                pending.extend(children.iter().rev().map(|child| {
                    (*child, format!("{path}{SEPARATOR}{}", tree.node(*child).name))
                }));
                entries.push(FlatEntry {
                    path,
                    kind: EntryKind::Directory,
                    identity: None,
                });
            }
        }
    }

    entries
}
