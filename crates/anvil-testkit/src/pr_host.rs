use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anvil_protocol::{CreatePrRequest, DriverError, PrHost, PrStatus};

/// A pull-request host fake driven by a queue of canned responses, one per
/// call to `get_pr_status`. `create_pr` always succeeds and records its
/// request for assertion.
#[derive(Default)]
pub struct ScriptedPrHost {
    status_queue: Mutex<VecDeque<Result<PrStatus, String>>>,
    created: Mutex<Vec<(String, String)>>,
}

impl ScriptedPrHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: PrStatus) {
        self.status_queue.lock().unwrap().push_back(Ok(status));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.status_queue
            .lock()
            .unwrap()
            .push_back(Err(message.into()));
    }

    pub fn created_prs(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }
}

impl PrHost for ScriptedPrHost {
    fn is_available(&self, _cwd: Option<&Path>) -> bool {
        true
    }

    fn create_pr(&self, _cwd: &Path, request: CreatePrRequest<'_>) -> Result<String, DriverError> {
        let url = format!("https://example.invalid/pr/{}", request.branch);
        self.created
            .lock()
            .unwrap()
            .push((request.branch.to_string(), url.clone()));
        Ok(url)
    }

    fn get_pr_status(&self, _cwd: &Path, _branch: &str) -> Result<PrStatus, DriverError> {
        match self.status_queue.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(msg)) => Err(DriverError::PrHostFailed(msg)),
            None => Ok(PrStatus {
                exists: false,
                url: None,
                state: None,
                merge_commit: None,
                checks: anvil_protocol::CiStatus::None,
            }),
        }
    }
}
