pub use anvil_protocol::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse frontmatter for {path}: {source}")]
    FrontmatterParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path} has no frontmatter block (expected a leading '---' line)")]
    MissingFrontmatter { path: String },
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse json at {path}: {source}")]
    JsonParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError for PersistenceError {
    fn error_code(&self) -> &'static str {
        match self {
            PersistenceError::Io { .. } => "PERSISTENCE_IO",
            PersistenceError::FrontmatterParse { .. } => "PERSISTENCE_FRONTMATTER_PARSE",
            PersistenceError::MissingFrontmatter { .. } => "PERSISTENCE_MISSING_FRONTMATTER",
            PersistenceError::Serialize { .. } => "PERSISTENCE_SERIALIZE",
            PersistenceError::JsonParse { .. } => "PERSISTENCE_JSON_PARSE",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("body is missing a '## {section}' section")]
    MissingSection { section: &'static str },
    #[error("'## {section}' section is present but has none of the required markers: {markers:?}")]
    MissingMarker {
        section: &'static str,
        markers: &'static [&'static str],
    },
    #[error("review verdict is '{found}', expected '{expected}'")]
    VerdictMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl EngineError for GateError {
    fn error_code(&self) -> &'static str {
        match self {
            GateError::MissingSection { .. } => "GATE_MISSING_SECTION",
            GateError::MissingMarker { .. } => "GATE_MISSING_MARKER",
            GateError::VerdictMismatch { .. } => "GATE_VERDICT_MISMATCH",
        }
    }

    fn is_user_error(&self) -> bool {
        true
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool exhausted for project '{project}': {existing}/{limit} workspaces in use")]
    Exhausted {
        project: String,
        existing: u32,
        limit: u32,
    },
    #[error("workspace '{workspace}' is dirty and release was not forced")]
    DirtyWorkspace { workspace: String },
    #[error("unknown workspace '{workspace}'")]
    UnknownWorkspace { workspace: String },
    #[error("branch '{branch}' is already checked out by another worktree")]
    BranchInUseByWorktree { branch: String },
    #[error("lock error on {path}: {source}")]
    Lock {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Driver(#[from] anvil_protocol::DriverError),
}

impl EngineError for PoolError {
    fn error_code(&self) -> &'static str {
        match self {
            PoolError::Exhausted { .. } => "POOL_EXHAUSTED",
            PoolError::DirtyWorkspace { .. } => "POOL_DIRTY_WORKSPACE",
            PoolError::UnknownWorkspace { .. } => "POOL_UNKNOWN_WORKSPACE",
            PoolError::BranchInUseByWorktree { .. } => "POOL_BRANCH_IN_USE",
            PoolError::Lock { .. } => "POOL_LOCK_FAILED",
            PoolError::Persistence(_) => "POOL_PERSISTENCE_FAILED",
            PoolError::Driver(_) => "POOL_DRIVER_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            PoolError::Exhausted { .. } | PoolError::DirtyWorkspace { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("no valid transition from '{from}' to '{to}'")]
    NoValidTransition { from: String, to: String },
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl TransitionError {
    /// Symbolic kind, matching the engine-wide taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionError::NoValidTransition { .. } => "no-valid-transition",
            TransitionError::Gate(_) => "gate-failed",
            TransitionError::Persistence(_) => "persistence-failed",
        }
    }
}

impl EngineError for TransitionError {
    fn error_code(&self) -> &'static str {
        match self {
            TransitionError::NoValidTransition { .. } => "NO_VALID_TRANSITION",
            TransitionError::Gate(_) => "GATE_FAILED",
            TransitionError::Persistence(_) => "TRANSITION_PERSISTENCE_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, TransitionError::NoValidTransition { .. } | TransitionError::Gate(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Driver(#[from] anvil_protocol::DriverError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EngineError for MonitorError {
    fn error_code(&self) -> &'static str {
        match self {
            MonitorError::Driver(_) => "MONITOR_DRIVER_FAILED",
            MonitorError::Persistence(_) => "MONITOR_PERSISTENCE_FAILED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project '{0}' not found")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EngineError for ProjectError {
    fn error_code(&self) -> &'static str {
        match self {
            ProjectError::NotFound(_) => "PROJECT_NOT_FOUND",
            ProjectError::Persistence(_) => "PROJECT_PERSISTENCE_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, ProjectError::NotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("pull request for branch '{branch}' is still open")]
    PrOpen { branch: String },
    #[error("pull request for branch '{branch}' was closed without merging")]
    PrClosed { branch: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Driver(#[from] anvil_protocol::DriverError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl MergeError {
    pub fn kind(&self) -> &'static str {
        match self {
            MergeError::PrOpen { .. } => "pr-open",
            MergeError::PrClosed { .. } => "pr-closed",
            MergeError::Pool(_) => "pool-error",
            MergeError::Transition(_) => "transition-error",
            MergeError::Driver(_) => "vcs-failed",
            MergeError::Persistence(_) => "persistence-failed",
        }
    }
}

impl EngineError for MergeError {
    fn error_code(&self) -> &'static str {
        match self {
            MergeError::PrOpen { .. } => "PR_OPEN",
            MergeError::PrClosed { .. } => "PR_CLOSED",
            MergeError::Pool(_) => "MERGE_POOL_FAILED",
            MergeError::Transition(_) => "MERGE_TRANSITION_FAILED",
            MergeError::Driver(_) => "MERGE_VCS_FAILED",
            MergeError::Persistence(_) => "MERGE_PERSISTENCE_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, MergeError::PrOpen { .. } | MergeError::PrClosed { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrudError {
    #[error("task '{0}' is not terminal and cannot be deleted")]
    NotTerminal(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Driver(#[from] anvil_protocol::DriverError),
}

impl EngineError for CrudError {
    fn error_code(&self) -> &'static str {
        match self {
            CrudError::NotTerminal(_) => "TASK_NOT_TERMINAL",
            CrudError::Pool(_) => "CRUD_POOL_FAILED",
            CrudError::Transition(_) => "CRUD_TRANSITION_FAILED",
            CrudError::Persistence(_) => "CRUD_PERSISTENCE_FAILED",
            CrudError::Driver(_) => "CRUD_DRIVER_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(self, CrudError::NotTerminal(_))
    }
}

/// Strip nested error wrappers down to the innermost message, the way a
/// command-line front end would print a single clean root-cause line.
pub fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}
