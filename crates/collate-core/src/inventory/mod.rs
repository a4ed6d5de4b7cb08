pub mod diff;
pub mod item;
pub mod membership;
pub mod snapshot;

pub use diff::{affected_groups, diff, ChangeSet, Modification};
pub use item::{Item, ItemId, ItemKind, ItemRef};
pub use membership::{FolderMap, GroupId, GroupMembership, MatchedFolder};
pub use snapshot::{Snapshot, SnapshotStore};
