//! Bounded retry bookkeeping for the correction loop.

use serde::{Deserialize, Serialize};

use super::schema::Schema;

/// Attempt counter threaded through one validation.
///
/// Terminal once `attempts_used == max_attempts`; the caller then takes the
/// schema fallback instead of asking again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

impl RetryState {
    /// `max_attempts` counts the first try. Zero is raised to one.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_used: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    /// Record a failed attempt and return the updated state.
    pub fn record_failure(self, error: impl Into<String>) -> Self {
        Self {
            attempts_used: (self.attempts_used + 1).min(self.max_attempts),
            max_attempts: self.max_attempts,
            last_error: Some(error.into()),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_used >= self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }
}

/// Corrective request sent back to the agent that produced `raw`.
pub fn correction_message(raw: &str, error: &str, schema: &Schema) -> String {
    format!(
        "Your previous response could not be used.\n\n\
         Response received:\n{raw}\n\n\
         Problem: {error}\n\n\
         Reply again with ONLY a valid JSON object in exactly this format, \
         with no other text:\n{}",
        schema.expected_format()
    )
}
