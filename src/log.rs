//! Append-only record of build actions.
//!
//! Every action the tool attempts is recorded here with a timestamp and
//! echoed to the console as it happens. The full ordered sequence is
//! printed again when the run ends, whatever the outcome, so a failed or
//! interrupted build still leaves a complete trace. The duplicate
//! visibility (record time and dump time) is intentional.
//!
//! The log is an explicit object threaded through every component that
//! records actions; there is no process-global state.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// One recorded action.
#[derive(Debug, Clone)]
pub struct ActionEntry {
    pub timestamp: OffsetDateTime,
    pub message: String,
}

/// Time-ordered, append-only action log.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: Vec<ActionEntry>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action with the current timestamp and echo it.
    pub fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        println!("Build Action: {message}");
        self.entries.push(ActionEntry {
            timestamp: OffsetDateTime::now_utc(),
            message,
        });
    }

    /// The full ordered sequence, oldest first.
    pub fn entries(&self) -> &[ActionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Print every recorded action with its timestamp.
    pub fn dump(&self) {
        println!("---------- Actions Attempted");
        for entry in &self.entries {
            let stamp = entry
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| entry.timestamp.to_string());
            println!("{stamp} {}", entry.message);
        }
    }
}
