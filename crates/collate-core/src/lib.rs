pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod inventory;
pub mod persist;
pub mod plan;
pub mod progress;
pub mod state;

pub use config::AppConfig;
pub use engine::{CollateEngine, CycleReport, GroupOverview, PlanningReport};
pub use error::{Error, Result};
pub use events::{Event, EventSink};
pub use executor::{Executor, ExecutorSettings, GroupOutcome, RunSummary};
pub use progress::{ProgressReporter, SilentReporter};
