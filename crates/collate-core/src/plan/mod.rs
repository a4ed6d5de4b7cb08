pub mod planner;
pub mod store;
pub mod task;

pub use planner::{plan, Batch, Plan, PlanningError};
pub use store::PlanStore;
pub use task::{classify, ActionKind, ContentFormat, Task};
