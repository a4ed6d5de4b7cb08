pub mod tracker;

pub use tracker::{BatchMarker, ExecutionState, GroupStatus, StateTracker, TaskMark};
