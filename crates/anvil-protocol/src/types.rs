use serde::{Deserialize, Serialize};

/// Generate a newtype wrapper around `String` with standard trait impls.
///
/// Each generated type gets: `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`,
/// `Serialize`/`Deserialize` (transparent), `Display`, `Deref<Target=str>`,
/// `AsRef<str>`, `Borrow<str>`, `From<String>`, `From<&str>`.
macro_rules! newtype_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

newtype_string! {
    /// Opaque task identifier (e.g. `"ab12cd34"`).
    TaskId
}

newtype_string! {
    /// Project name, used as a key into the project registry and as a
    /// path segment under `tasks/` and within workspace names.
    ProjectName
}

newtype_string! {
    /// User-facing git branch name for a task.
    BranchName
}

newtype_string! {
    /// Name of a bound worktree within the workspace pool (`"<project>--<n>"`).
    WorkspaceName
}

newtype_string! {
    /// Name of a multiplexer session bound to a task.
    SessionName
}

newtype_string! {
    /// Identifier for an agent harness (e.g. `"claude"`, `"codex"`).
    HarnessId
}

/// The task's position in the lifecycle. See the state-machine design for
/// the legal transition table between these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Planning,
    Clarification,
    Working,
    AgentReview,
    Reviewing,
    Stuck,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Planning => "planning",
            TaskStatus::Clarification => "clarification",
            TaskStatus::Working => "working",
            TaskStatus::AgentReview => "agent-review",
            TaskStatus::Reviewing => "reviewing",
            TaskStatus::Stuck => "stuck",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Snapshot of a pull request's lifecycle state, as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

/// Strategy used to fold a task branch into the default branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Ff,
    Merge,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::Ff
    }
}

/// A unit of work tracked by the engine. Everything except `body` lives in
/// the document's YAML frontmatter; `body` is the markdown text after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project: ProjectName,
    pub branch: BranchName,
    pub harness: HarnessId,
    pub review_harness: HarnessId,
    pub status: TaskStatus,
    #[serde(default)]
    pub review_round: u32,
    #[serde(default)]
    pub crash_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub workspace: Option<WorkspaceName>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session: Option<SessionName>,
    pub summary: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pr_state: Option<PrState>,
    /// Not part of the frontmatter; carried alongside it once parsed.
    #[serde(skip)]
    pub body: String,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A project registered with the engine: a version-controlled repository on
/// disk plus the policy knobs the pool and spawn hooks need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: ProjectName,
    pub path: std::path::PathBuf,
    pub default_branch: String,
    pub pool_size: u32,
}
