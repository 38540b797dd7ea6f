use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use anvil_protocol::{DriverError, Multiplexer};

/// A purely in-memory multiplexer fake: sessions are names, windows are
/// names within a session. Nothing is actually spawned; `new_session`/
/// `new_window` just record the command they were asked to run so tests
/// can assert on it.
#[derive(Default)]
pub struct InMemoryMultiplexer {
    sessions: Mutex<HashMap<String, HashSet<String>>>,
    commands: Mutex<Vec<(String, String, String)>>,
}

impl InMemoryMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<(String, String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn windows_in(&self, session: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Multiplexer for InMemoryMultiplexer {
    fn is_available(&self) -> bool {
        true
    }

    fn session_exists(&self, session: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(session)
    }

    fn list_sessions(&self) -> Result<Vec<String>, DriverError> {
        Ok(self.sessions.lock().unwrap().keys().cloned().collect())
    }

    fn new_session(
        &self,
        session: &str,
        window: &str,
        _cwd: &Path,
        command: &str,
    ) -> Result<(), DriverError> {
        let mut sessions = self.sessions.lock().unwrap();
        if sessions.contains_key(session) {
            return Err(DriverError::MultiplexerUnavailable(format!(
                "session '{session}' already exists"
            )));
        }
        sessions.insert(session.to_string(), HashSet::from([window.to_string()]));
        self.commands
            .lock()
            .unwrap()
            .push((session.to_string(), window.to_string(), command.to_string()));
        Ok(())
    }

    fn new_window(
        &self,
        session: &str,
        window: &str,
        _cwd: &Path,
        command: &str,
    ) -> Result<(), DriverError> {
        let mut sessions = self.sessions.lock().unwrap();
        let windows = sessions
            .get_mut(session)
            .ok_or_else(|| DriverError::MultiplexerUnavailable(format!("no such session '{session}'")))?;
        windows.insert(window.to_string());
        self.commands
            .lock()
            .unwrap()
            .push((session.to_string(), window.to_string(), command.to_string()));
        Ok(())
    }

    fn rename_window(&self, session: &str, window: &str) -> Result<(), DriverError> {
        if !self.session_exists(session) {
            return Err(DriverError::MultiplexerUnavailable(format!(
                "no such session '{session}'"
            )));
        }
        self.sessions
            .lock()
            .unwrap()
            .get_mut(session)
            .unwrap()
            .insert(window.to_string());
        Ok(())
    }

    fn kill_session_safe(&self, session: &str) {
        self.sessions.lock().unwrap().remove(session);
    }

    fn kill_window_safe(&self, session: &str, window: &str) {
        if let Some(windows) = self.sessions.lock().unwrap().get_mut(session) {
            windows.remove(window);
        }
    }

    fn send_literal(&self, session: &str, _text: &str) -> Result<(), DriverError> {
        if !self.session_exists(session) {
            return Err(DriverError::MultiplexerUnavailable(format!(
                "no such session '{session}'"
            )));
        }
        Ok(())
    }
}
