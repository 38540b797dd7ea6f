use serde::{Deserialize, Serialize};

/// One line of a task's append-only `history.jsonl`. The `type` tag is the
/// wire discriminant; every variant also implicitly carries a `timestamp`
/// stamped by the caller at append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HistoryEvent {
    #[serde(rename = "task.created")]
    TaskCreated {
        timestamp: String,
        task_id: String,
        project: String,
        branch: String,
        summary: String,
    },
    #[serde(rename = "task.updated")]
    TaskUpdated {
        timestamp: String,
        branch_change: Option<(String, String)>,
        summary_changed: bool,
    },
    #[serde(rename = "agent.spawned")]
    AgentSpawned {
        timestamp: String,
        workspace: String,
        session: String,
    },
    #[serde(rename = "agent.crashed")]
    AgentCrashed {
        timestamp: String,
        status: String,
        crash_count: u32,
        reason: String,
    },
    #[serde(rename = "auto.advanced")]
    AutoAdvanced {
        timestamp: String,
        from: String,
        to: String,
        reason: String,
    },
    #[serde(rename = "status.changed")]
    StatusChanged {
        timestamp: String,
        from: String,
        to: String,
    },
    #[serde(rename = "task.merged")]
    TaskMerged {
        timestamp: String,
        commit_hash: String,
        strategy: String,
    },
    #[serde(rename = "task.cancelled")]
    TaskCancelled {
        timestamp: String,
        reason: Option<String>,
    },
    #[serde(rename = "pr.created")]
    PrCreated { timestamp: String, url: String },
    #[serde(rename = "pr.merged")]
    PrMerged {
        timestamp: String,
        url: String,
        merge_commit: String,
    },
}

impl HistoryEvent {
    pub fn timestamp(&self) -> &str {
        match self {
            HistoryEvent::TaskCreated { timestamp, .. }
            | HistoryEvent::TaskUpdated { timestamp, .. }
            | HistoryEvent::AgentSpawned { timestamp, .. }
            | HistoryEvent::AgentCrashed { timestamp, .. }
            | HistoryEvent::AutoAdvanced { timestamp, .. }
            | HistoryEvent::StatusChanged { timestamp, .. }
            | HistoryEvent::TaskMerged { timestamp, .. }
            | HistoryEvent::TaskCancelled { timestamp, .. }
            | HistoryEvent::PrCreated { timestamp, .. }
            | HistoryEvent::PrMerged { timestamp, .. } => timestamp,
        }
    }

    /// Serialize as a single JSON line, newline-terminated, ready to append.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_created_wire_tag() {
        let event = HistoryEvent::TaskCreated {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            task_id: "abc".to_string(),
            project: "acme".to_string(),
            branch: "feature".to_string(),
            summary: "do a thing".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"task.created""#));
        let parsed: HistoryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn status_changed_roundtrip() {
        let event = HistoryEvent::StatusChanged {
            timestamp: "t".to_string(),
            from: "working".to_string(),
            to: "agent-review".to_string(),
        };
        let line = event.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let parsed: HistoryEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn timestamp_accessor_covers_every_variant() {
        let events = vec![
            HistoryEvent::TaskCreated {
                timestamp: "a".into(),
                task_id: "x".into(),
                project: "p".into(),
                branch: "b".into(),
                summary: "s".into(),
            },
            HistoryEvent::AgentCrashed {
                timestamp: "b".into(),
                status: "working".into(),
                crash_count: 1,
                reason: "dead session".into(),
            },
            HistoryEvent::TaskCancelled {
                timestamp: "c".into(),
                reason: None,
            },
        ];
        let stamps: Vec<&str> = events.iter().map(|e| e.timestamp()).collect();
        assert_eq!(stamps, vec!["a", "b", "c"]);
    }

    #[test]
    fn unknown_type_tag_fails_to_parse() {
        let bad = r#"{"type":"nonsense","timestamp":"t"}"#;
        let parsed: Result<HistoryEvent, _> = serde_json::from_str(bad);
        assert!(parsed.is_err());
    }
}
