use bincode::{Decode, Encode};
use derive_more::{Display, From, IsVariant};
use snafu::{Snafu, ensure};

use crate::snapshot::ContentHash;

/// Name given to the root node of every snapshot.
pub const ROOT_NAME: &str = ".";

/// Stable index of a node inside a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Encode, Decode)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What a single filesystem entry turned out to be
#[derive(Debug, Clone, PartialEq, Eq, IsVariant, Encode, Decode)]
pub enum NodeKind {
    File { hash: Option<ContentHash> },
    Directory { children: Vec<NodeId> },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

/// Arena-backed snapshot of a directory hierarchy.
///
/// Node 0 is always the root directory. Children are allocated after their
/// parent, so a child's id is strictly greater than its parent's. Directory
/// children are kept sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new() -> Self {
        Tree {
            nodes: vec![Node {
                name: ROOT_NAME.to_string(),
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Children of `id` in name order. Empty for files and error nodes.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).kind {
            NodeKind::Directory { children } => children,
            _ => &[],
        }
    }

    pub fn add_file(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        hash: Option<ContentHash>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(parent, name.into(), NodeKind::File { hash })
    }

    pub fn add_directory(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(
            parent,
            name.into(),
            NodeKind::Directory {
                children: Vec::new(),
            },
        )
    }

    pub fn add_error(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<NodeId, TreeError> {
        self.add_child(
            parent,
            name.into(),
            NodeKind::Error {
                message: message.into(),
            },
        )
    }

    /// Records the content hash of a file node. Ignored for other kinds.
    pub fn set_hash(&mut self, id: NodeId, hash: Option<ContentHash>) {
        if let NodeKind::File { hash: slot } = &mut self.nodes[id.0].kind {
            *slot = hash;
        }
    }

    /// Replaces a node with an error node, dropping the links to its children.
    pub fn mark_error(&mut self, id: NodeId, message: impl Into<String>) {
        self.nodes[id.0].kind = NodeKind::Error {
            message: message.into(),
        };
    }

    /// Checks the arena invariants of a tree that was not grown through the
    /// `add_*` methods, such as one decoded from disk: the root is a directory,
    /// every child id is in range and above its parent's, every node but the
    /// root has exactly one parent and siblings are sorted by unique name.
    pub fn validate(&self) -> Result<(), TreeError> {
        ensure!(
            self.nodes.first().is_some_and(|root| root.kind.is_directory()),
            RootNotADirectorySnafu
        );

        let mut has_parent = vec![false; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            let NodeKind::Directory { children } = &node.kind else {
                continue;
            };
            for child in children {
                ensure!(
                    child.0 > index && child.0 < self.nodes.len(),
                    BrokenLinkSnafu {
                        parent: NodeId(index),
                        child: *child,
                    }
                );
                ensure!(
                    !std::mem::replace(&mut has_parent[child.0], true),
                    SharedChildSnafu { child: *child }
                );
            }
            ensure!(
                children
                    .windows(2)
                    .all(|pair| self.nodes[pair[0].0].name < self.nodes[pair[1].0].name),
                UnsortedChildrenSnafu {
                    parent: NodeId(index)
                }
            );
        }

        match has_parent.iter().skip(1).position(|linked| !linked) {
            Some(orphan) => OrphanSnafu {
                node: NodeId(orphan + 1),
            }
            .fail(),
            None => Ok(()),
        }
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        name: String,
        kind: NodeKind,
    ) -> Result<NodeId, TreeError> {
        let id = NodeId(self.nodes.len());

        let position = match &self.nodes[parent.0].kind {
            NodeKind::Directory { children } => {
                match children.binary_search_by(|child| self.nodes[child.0].name.cmp(&name)) {
                    Ok(_) => return DuplicateNameSnafu { name }.fail(),
                    Err(position) => position,
                }
            }
            _ => {
                return NotADirectorySnafu {
                    parent: self.nodes[parent.0].name.clone(),
                    name,
                }
                .fail();
            }
        };

        if let NodeKind::Directory { children } = &mut self.nodes[parent.0].kind {
            children.insert(position, id);
        }
        self.nodes.push(Node { name, kind });

        Ok(id)
    }
}

/// Path-based construction, for building fixtures in tests.
#[cfg(test)]
impl Tree {
    /// Inserts a file at a slash-separated path below the root, creating the
    /// intermediate directories on the way.
    pub(crate) fn insert_file_path(
        &mut self,
        path: &str,
        hash: Option<ContentHash>,
    ) -> Result<NodeId, TreeError> {
        let (parent_path, name) = path.rsplit_once('/').unwrap_or(("", path));
        let parent = self.insert_directory_path(parent_path)?;
        self.add_file(parent, name, hash)
    }

    /// Inserts a directory chain at a slash-separated path below the root.
    pub(crate) fn insert_directory_path(&mut self, path: &str) -> Result<NodeId, TreeError> {
        let mut current = Self::ROOT;
        for name in path.split('/').filter(|c| !c.is_empty()) {
            current = match self.find_child(current, name) {
                Some(existing) => existing,
                None => self.add_directory(current, name)?,
            };
        }
        Ok(current)
    }

    pub(crate) fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let children = self.children(parent);
        children
            .binary_search_by(|child| self.node(*child).name.as_str().cmp(name))
            .ok()
            .map(|position| children[position])
    }
}

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum TreeError {
    #[snafu(display("Cannot insert '{name}' into '{parent}', which is not a directory"))]
    NotADirectory { parent: String, name: String },
    #[snafu(display("An entry named '{name}' already exists in this directory"))]
    DuplicateName { name: String },
    #[snafu(display("Snapshot root is not a directory"))]
    RootNotADirectory,
    #[snafu(display("Node {parent} links to child {child}, which is out of order or out of range"))]
    BrokenLink { parent: NodeId, child: NodeId },
    #[snafu(display("Node {child} is listed under more than one directory"))]
    SharedChild { child: NodeId },
    #[snafu(display("Node {node} is not reachable from the root"))]
    Orphan { node: NodeId },
    #[snafu(display("Children of node {parent} are not sorted by unique name"))]
    UnsortedChildren { parent: NodeId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn names(tree: &Tree, id: NodeId) -> Vec<&str> {
        tree.children(id)
            .iter()
            .map(|child| tree.node(*child).name.as_str())
            .collect()
    }

    #[test]
    fn new_tree_has_only_the_root() {
        let tree = Tree::new();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.node(Tree::ROOT).name, ROOT_NAME);
        assert!(tree.node(Tree::ROOT).kind.is_directory());
    }

    #[test]
    fn children_stay_sorted_by_name() {
        let mut tree = Tree::new();
        tree.add_file(Tree::ROOT, "zeta.txt", None).unwrap();
        tree.add_directory(Tree::ROOT, "alpha").unwrap();
        tree.add_file(Tree::ROOT, "mid.md", None).unwrap();

        assert_eq!(names(&tree, Tree::ROOT), vec!["alpha", "mid.md", "zeta.txt"]);
    }

    #[test]
    fn insert_file_path_creates_intermediate_directories() {
        let mut tree = Tree::new();
        let file = tree
            .insert_file_path("path/to/file1.txt", Some(ContentHash::of_bytes(b"one")))
            .unwrap();
        tree.insert_file_path("path/to/file2.txt", None).unwrap();

        let path = tree.find_child(Tree::ROOT, "path").unwrap();
        let to = tree.find_child(path, "to").unwrap();
        assert_eq!(names(&tree, to), vec!["file1.txt", "file2.txt"]);
        assert!(file > to);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn cannot_insert_into_a_file() {
        let mut tree = Tree::new();
        tree.insert_file_path("a.txt", None).unwrap();

        let result = tree.insert_file_path("a.txt/b.txt", None);
        assert!(matches!(result, Err(TreeError::NotADirectory { .. })));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut tree = Tree::new();
        tree.add_file(Tree::ROOT, "a.txt", None).unwrap();

        let result = tree.add_directory(Tree::ROOT, "a.txt");
        assert_eq!(
            result,
            Err(TreeError::DuplicateName {
                name: "a.txt".to_string()
            })
        );
    }

    fn raw(nodes: Vec<(&str, NodeKind)>) -> Tree {
        Tree {
            nodes: nodes
                .into_iter()
                .map(|(name, kind)| Node {
                    name: name.to_string(),
                    kind,
                })
                .collect(),
        }
    }

    fn directory(children: &[usize]) -> NodeKind {
        NodeKind::Directory {
            children: children.iter().copied().map(NodeId).collect(),
        }
    }

    fn file() -> NodeKind {
        NodeKind::File { hash: None }
    }

    #[test]
    fn trees_built_through_add_are_valid() {
        let mut tree = Tree::new();
        tree.insert_file_path("a/b/c.txt", None).unwrap();
        tree.insert_directory_path("a/z").unwrap();
        let locked = tree.insert_directory_path("locked").unwrap();
        tree.mark_error(locked, "denied");

        assert_eq!(tree.validate(), Ok(()));
    }

    #[rstest]
    #[case::empty_arena(raw(vec![]), TreeError::RootNotADirectory)]
    #[case::file_root(raw(vec![(".", file())]), TreeError::RootNotADirectory)]
    #[case::out_of_range(
        raw(vec![(".", directory(&[7]))]),
        TreeError::BrokenLink { parent: NodeId(0), child: NodeId(7) }
    )]
    #[case::back_edge(
        raw(vec![(".", directory(&[1])), ("loop", directory(&[0]))]),
        TreeError::BrokenLink { parent: NodeId(1), child: NodeId(0) }
    )]
    #[case::shared_child(
        raw(vec![(".", directory(&[1, 2])), ("a", directory(&[2])), ("b", file())]),
        TreeError::SharedChild { child: NodeId(2) }
    )]
    #[case::orphan(
        raw(vec![(".", directory(&[1])), ("a", file()), ("lost", file())]),
        TreeError::Orphan { node: NodeId(2) }
    )]
    #[case::unsorted(
        raw(vec![(".", directory(&[1, 2])), ("b", file()), ("a", file())]),
        TreeError::UnsortedChildren { parent: NodeId(0) }
    )]
    #[case::duplicate_names(
        raw(vec![(".", directory(&[1, 2])), ("a", file()), ("a", file())]),
        TreeError::UnsortedChildren { parent: NodeId(0) }
    )]
    fn broken_arenas_are_rejected(#[case] tree: Tree, #[case] expected: TreeError) {
        assert_eq!(tree.validate(), Err(expected));
    }

    #[test]
    fn mark_error_detaches_children() {
        let mut tree = Tree::new();
        let dir = tree.insert_directory_path("locked").unwrap();
        tree.add_file(dir, "secret.txt", None).unwrap();

        tree.mark_error(dir, "permission denied");

        assert!(tree.children(dir).is_empty());
        assert_eq!(
            tree.node(dir).kind,
            NodeKind::Error {
                message: "permission denied".to_string()
            }
        );
    }

    #[test]
    fn set_hash_only_touches_files() {
        let mut tree = Tree::new();
        let file = tree.insert_file_path("a.txt", None).unwrap();
        let dir = tree.insert_directory_path("d").unwrap();
        let hash = ContentHash::of_bytes(b"data");

        tree.set_hash(file, Some(hash.clone()));
        tree.set_hash(dir, Some(hash.clone()));

        assert_eq!(tree.node(file).kind, NodeKind::File { hash: Some(hash) });
        assert!(tree.node(dir).kind.is_directory());
    }
}
