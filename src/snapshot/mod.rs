//! Immutable project snapshots and their forking
//!
//! A snapshot is a directory tree owned by a [`SnapshotStore`]. Repairs never
//! touch an existing snapshot: the store forks a fresh copy and the only write
//! access afterwards is [`SnapshotStore::apply`].

mod copy;
mod patch;
mod store;

pub use copy::{copy_tree, is_non_empty_dir};
pub use patch::FilePatch;
pub use store::{ProjectSnapshot, SnapshotError, SnapshotId, SnapshotStore};
