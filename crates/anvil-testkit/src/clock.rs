use std::sync::Mutex;

use anvil_protocol::Clock;

/// A clock that returns a fixed timestamp, or advances deterministically
/// when the test asks it to. Grounded on the engine's need for
/// reproducible `created_at`/`updated_at` values in scenario tests.
pub struct FixedClock {
    current: Mutex<chrono::DateTime<chrono::Utc>>,
}

impl FixedClock {
    pub fn new(start: &str) -> Self {
        let parsed = chrono::DateTime::parse_from_rfc3339(start)
            .expect("FixedClock::new expects an RFC3339 timestamp")
            .with_timezone(&chrono::Utc);
        Self {
            current: Mutex::new(parsed),
        }
    }

    /// Advance the clock by `seconds`, returning the new timestamp.
    pub fn advance(&self, seconds: i64) -> String {
        let mut guard = self.current.lock().unwrap();
        *guard += chrono::Duration::seconds(seconds);
        guard.to_rfc3339()
    }
}

impl Clock for FixedClock {
    fn now(&self) -> String {
        self.current.lock().unwrap().to_rfc3339()
    }
}
