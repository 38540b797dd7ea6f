//! Shared wire types, newtypes, driver contracts, and the history-event
//! vocabulary used by the task lifecycle engine.

pub mod errors;
pub mod history;
pub mod traits;
pub mod types;

pub use errors::EngineError;
pub use history::HistoryEvent;
pub use traits::{CiStatus, Clock, CreatePrRequest, DiffStats, DriverError, Multiplexer, PrHost, PrStatus, Vcs};
pub use types::{
    BranchName, HarnessId, MergeStrategy, PrState, Project, ProjectName, SessionName, Task, TaskId,
    TaskStatus, WorkspaceName,
};
