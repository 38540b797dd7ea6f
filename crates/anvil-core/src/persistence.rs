//! Task document, history log, and project registry I/O.
//!
//! Task documents and the project registry are written with a crash-safe
//! temp-then-rename overwrite. History is append-only. Loading tolerates
//! individual corrupt entries by skipping and warning rather than failing
//! the whole read, the way the teacher's session loader does.

use std::fs;
use std::path::{Path, PathBuf};

use anvil_protocol::{HistoryEvent, Project, Task};
use tracing::warn;

use crate::errors::PersistenceError;

const FRONTMATTER_DELIM: &str = "---";

/// Split a `TASK.md` document into its frontmatter block and body text.
fn split_frontmatter(raw: &str) -> Result<(&str, &str), ()> {
    let rest = raw.strip_prefix(FRONTMATTER_DELIM).ok_or(())?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---").ok_or(())?;
    let frontmatter = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Ok((frontmatter, body))
}

fn render_document(task: &Task) -> Result<String, PersistenceError> {
    let frontmatter = serde_yaml::to_string(task).map_err(|source| PersistenceError::Serialize {
        path: format!("{}/{}", task.project, task.id),
        source,
    })?;
    Ok(format!("---\n{frontmatter}---\n{}", task.body))
}

/// Atomically overwrite `path` with `contents` (write to a sibling temp
/// file, then rename over the destination).
fn atomic_write(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents).map_err(|source| PersistenceError::Io {
        path: tmp_path.display().to_string(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        PersistenceError::Io {
            path: path.display().to_string(),
            source,
        }
    })?;
    Ok(())
}

pub fn save_task(paths: &anvil_paths::AnvilPaths, task: &Task) -> Result<(), PersistenceError> {
    let path = paths.task_file(&task.project, &task.id);
    let document = render_document(task)?;
    atomic_write(&path, &document)
}

pub fn load_task(
    paths: &anvil_paths::AnvilPaths,
    project: &str,
    task_id: &str,
) -> Result<Task, PersistenceError> {
    let path = paths.task_file(project, task_id);
    let raw = fs::read_to_string(&path).map_err(|source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let (frontmatter, body) = split_frontmatter(&raw).map_err(|_| PersistenceError::MissingFrontmatter {
        path: path.display().to_string(),
    })?;
    let mut task: Task = serde_yaml::from_str(frontmatter).map_err(|source| PersistenceError::FrontmatterParse {
        path: path.display().to_string(),
        source,
    })?;
    task.body = body.to_string();
    Ok(task)
}

pub fn append_history(
    paths: &anvil_paths::AnvilPaths,
    project: &str,
    task_id: &str,
    event: &HistoryEvent,
) -> Result<(), PersistenceError> {
    let path = paths.history_file(project, task_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let line = serde_json::to_string(event).map_err(|source| PersistenceError::JsonParse {
        path: path.display().to_string(),
        source,
    })?;
    use std::io::Write;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
    writeln!(file, "{line}").map_err(|source| PersistenceError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load every event in a task's history, in file order. A malformed line is
/// skipped with a warning rather than failing the whole read.
pub fn load_history(
    paths: &anvil_paths::AnvilPaths,
    project: &str,
    task_id: &str,
) -> Result<Vec<HistoryEvent>, PersistenceError> {
    let path = paths.history_file(project, task_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let mut events = Vec::new();
    let mut skipped = 0usize;
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEvent>(line) {
            Ok(event) => events.push(event),
            Err(error) => {
                skipped += 1;
                warn!(
                    event = "anvil.persistence.history_line_skipped",
                    path = %path.display(),
                    line = lineno,
                    error = %error,
                );
            }
        }
    }
    if skipped > 0 {
        warn!(
            event = "anvil.persistence.history_load_partial",
            path = %path.display(),
            skipped,
        );
    }
    Ok(events)
}

#[derive(serde::Serialize, serde::Deserialize, Default)]
struct ProjectRegistryDocument {
    projects: Vec<Project>,
}

pub fn load_projects(paths: &anvil_paths::AnvilPaths) -> Result<Vec<Project>, PersistenceError> {
    let path = paths.projects_file();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(PersistenceError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    };
    let doc: ProjectRegistryDocument =
        serde_json::from_str(&raw).map_err(|source| PersistenceError::JsonParse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(doc.projects)
}

pub fn save_projects(paths: &anvil_paths::AnvilPaths, projects: &[Project]) -> Result<(), PersistenceError> {
    let path = paths.projects_file();
    let doc = ProjectRegistryDocument {
        projects: projects.to_vec(),
    };
    let json = serde_json::to_string_pretty(&doc).map_err(|source| PersistenceError::JsonParse {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write(&path, &json)
}

/// List the on-disk task ids under a project's task directory.
pub fn list_task_ids(paths: &anvil_paths::AnvilPaths, project: &str) -> Vec<String> {
    let dir: PathBuf = paths.project_tasks_dir(project);
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect()
}
