//! Task lifecycle engine: persistence, artifact gates, the workspace pool,
//! the declarative transition table and its hooks, the exit monitor, and
//! task CRUD. Driver implementations (multiplexer, VCS, PR host, clock)
//! are injected from `anvil-protocol`'s traits; this crate contains no
//! production driver of its own.

pub mod crud;
pub mod errors;
pub mod gates;
pub mod hooks;
pub mod logging;
pub mod monitor;
pub mod persistence;
pub mod pool;
pub mod transitions;

pub use crud::{create, cancel, delete, merge, CreateRequest, Engine, MergeRequest};
pub use errors::{
    root_cause, CrudError, EngineError, GateError, MergeError, MonitorError, PersistenceError, PoolError,
    ProjectError, TransitionError,
};
pub use gates::ReviewVerdict;
pub use hooks::{Dependencies, EngineHooks};
pub use logging::init_logging;
pub use monitor::{reconcile, Tick};
pub use persistence::{
    append_history, list_task_ids, load_history, load_projects, load_task, save_projects, save_task,
};
pub use pool::{PoolDocument, PoolEntry, PoolStatus};
pub use transitions::{execute, execute_in_memory, find_row, Gate, HookRunner, HookStep, SpawnVariant, TransitionOutcome, TransitionRow, TRANSITION_TABLE};
