//! Structural similarity between two snapshots.
//!
//! Both trees are reduced to ordered trees labeled by entry name, then
//! compared with the Zhang-Shasha tree edit distance (unit cost for relabel,
//! insert and delete). Content hashes play no part here.

use serde::{Serialize, Serializer};
use snafu::Snafu;
use tracing::{debug, warn};

use crate::config::SimilaritySettings;
use crate::snapshot::{NodeId, Tree};

/// Value reported when the score could not be computed
pub const UNAVAILABLE_SENTINEL: f64 = -1.0;

/// Outcome of scoring two trees
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Similarity {
    Score(f64),
    Unavailable,
}

impl Similarity {
    pub fn score(self) -> Option<f64> {
        match self {
            Similarity::Score(score) => Some(score),
            Similarity::Unavailable => None,
        }
    }

    pub fn as_reported(self) -> f64 {
        self.score().unwrap_or(UNAVAILABLE_SENTINEL)
    }
}

impl Serialize for Similarity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_reported())
    }
}

/// A tree in postorder, as the edit distance needs it.
///
/// `leftmost[i]` is the postorder index of the leftmost leaf below node `i`;
/// `keyroots` holds, in increasing order, every node that has no later node
/// sharing its leftmost leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedTree {
    labels: Vec<String>,
    leftmost: Vec<usize>,
    keyroots: Vec<usize>,
}

impl OrderedTree {
    /// Converts a snapshot, labeling the root with `root_label`.
    pub fn from_tree(tree: &Tree, root_label: &str) -> Self {
        let mut labels = Vec::with_capacity(tree.len());
        let mut leftmost = Vec::with_capacity(tree.len());
        let mut postorder_of = vec![usize::MAX; tree.len()];

        // (node, whether its children were already scheduled)
        let mut pending: Vec<(NodeId, bool)> = vec![(Tree::ROOT, false)];
        while let Some((id, expanded)) = pending.pop() {
            let children = tree.children(id);
            if !expanded && !children.is_empty() {
                pending.push((id, true));
                pending.extend(children.iter().rev().map(|child| (*child, false)));
                continue;
            }

            let index = labels.len();
            postorder_of[id.index()] = index;
            labels.push(if id == Tree::ROOT {
                root_label.to_string()
            } else {
                tree.node(id).name.clone()
            });
            leftmost.push(match children.first() {
                Some(first) => leftmost[postorder_of[first.index()]],
                None => index,
            });
        }

        let keyroots = Self::keyroots(&leftmost);
        OrderedTree {
            labels,
            leftmost,
            keyroots,
        }
    }

    fn keyroots(leftmost: &[usize]) -> Vec<usize> {
        let mut seen = vec![false; leftmost.len()];
        let mut keyroots = Vec::new();
        for index in (0..leftmost.len()).rev() {
            if !std::mem::replace(&mut seen[leftmost[index]], true) {
                keyroots.push(index);
            }
        }
        keyroots.reverse();
        keyroots
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Zhang-Shasha edit distance between two ordered trees
pub fn tree_edit_distance(a: &OrderedTree, b: &OrderedTree) -> usize {
    if a.is_empty() || b.is_empty() {
        return a.len() + b.len();
    }

    let mut tree_distance = vec![vec![0u32; b.len()]; a.len()];
    for &i in &a.keyroots {
        for &j in &b.keyroots {
            forest_distance(a, b, i, j, &mut tree_distance);
        }
    }

    tree_distance[a.len() - 1][b.len() - 1] as usize
}

fn forest_distance(
    a: &OrderedTree,
    b: &OrderedTree,
    i: usize,
    j: usize,
    tree_distance: &mut [Vec<u32>],
) {
    let left_a = a.leftmost[i];
    let left_b = b.leftmost[j];
    let rows = i - left_a + 2;
    let cols = j - left_b + 2;

    // forest[x][y]: distance between the forests left_a..left_a+x and left_b..left_b+y
    let mut forest = vec![vec![0u32; cols]; rows];
    for x in 1..rows {
        forest[x][0] = forest[x - 1][0] + 1;
    }
    for y in 1..cols {
        forest[0][y] = forest[0][y - 1] + 1;
    }

    for x in 1..rows {
        let node_a = left_a + x - 1;
        for y in 1..cols {
            let node_b = left_b + y - 1;
            let delete = forest[x - 1][y] + 1;
            let insert = forest[x][y - 1] + 1;

            if a.leftmost[node_a] == left_a && b.leftmost[node_b] == left_b {
                let relabel = u32::from(a.labels[node_a] != b.labels[node_b]);
                let distance = delete.min(insert).min(forest[x - 1][y - 1] + relabel);
                forest[x][y] = distance;
                tree_distance[node_a][node_b] = distance;
            } else {
                let prefix_a = a.leftmost[node_a] - left_a;
                let prefix_b = b.leftmost[node_b] - left_b;
                let replace = forest[prefix_a][prefix_b] + tree_distance[node_a][node_b];
                forest[x][y] = delete.min(insert).min(replace);
            }
        }
    }
}

/// Normalizes a distance by the combined size of both trees into `[0, 1]`
pub fn normalize(distance: usize, size_a: usize, size_b: usize) -> f64 {
    let total = size_a + size_b;
    if total == 0 {
        return 1.0;
    }
    (1.0 - distance as f64 / total as f64).clamp(0.0, 1.0)
}

/// Computes tree edit distance based similarity between snapshots.
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    root_label: String,
    max_cells: usize,
}

impl SimilarityScorer {
    pub fn new(settings: &SimilaritySettings) -> Self {
        Self {
            root_label: settings.root_label.clone(),
            max_cells: settings.max_cells,
        }
    }

    /// Scores two snapshots; failures are logged and reported as unavailable.
    pub fn score(&self, before: &Tree, after: &Tree) -> Similarity {
        match self.try_score(before, after) {
            Ok(score) => Similarity::Score(score),
            Err(error) => {
                warn!("Similarity could not be computed: {}", error);
                Similarity::Unavailable
            }
        }
    }

    pub fn try_score(&self, before: &Tree, after: &Tree) -> Result<f64, SimilarityError> {
        let a = OrderedTree::from_tree(before, &self.root_label);
        let b = OrderedTree::from_tree(after, &self.root_label);

        let cells = a.len().saturating_mul(b.len());
        if cells > self.max_cells {
            return TooLargeSnafu {
                before: a.len(),
                after: b.len(),
                max_cells: self.max_cells,
            }
            .fail();
        }

        let distance = tree_edit_distance(&a, &b);
        debug!(
            "Tree edit distance {} between {} and {} nodes",
            distance,
            a.len(),
            b.len()
        );
        Ok(normalize(distance, a.len(), b.len()))
    }
}

#[derive(Debug, Snafu)]
pub enum SimilarityError {
    #[snafu(display(
        "Trees of {} and {} nodes exceed the budget of {} distance cells",
        before,
        after,
        max_cells
    ))]
    TooLarge {
        before: usize,
        after: usize,
        max_cells: usize,
    },
}
