//! Hashed snapshots of directory trees and their on-disk forms.

mod builder;
mod content_hash;
pub mod hashing_pool;
pub mod json;
pub mod persistence;
mod tree;

pub use builder::{SnapshotBuilder, SnapshotError};
pub use content_hash::{ContentHash, DEFAULT_CHUNK_SIZE};
pub use tree::{NodeId, NodeKind, ROOT_NAME, Tree, TreeError};
