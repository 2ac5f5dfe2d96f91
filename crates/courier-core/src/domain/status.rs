//! Message status state machine (shared by Published and Received).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::StoreError;

/// Status of a stored message.
///
/// State transitions:
/// - Scheduled -> Succeeded
/// - Scheduled -> Failed -> Scheduled (retry selected)
/// - Scheduled -> Delayed -> Queued -> Succeeded | Failed
/// - Succeeded | Failed -> (purged after retention)
///
/// The persisted text is the variant name (`"Scheduled"`, ...). Parsing is
/// case-insensitive because rows written by other deployments may use any casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusName {
    /// Initial state, waiting for (re)dispatch.
    Scheduled,

    /// Due delayed message claimed for processing.
    Queued,

    /// Deliberately deferred; `ExpiresAt` holds the due time.
    Delayed,

    /// Terminal: dispatched / consumed successfully.
    Succeeded,

    /// Terminal until retried or purged.
    Failed,
}

impl StatusName {
    pub const ALL: [StatusName; 5] = [
        StatusName::Scheduled,
        StatusName::Queued,
        StatusName::Delayed,
        StatusName::Succeeded,
        StatusName::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StatusName::Scheduled => "Scheduled",
            StatusName::Queued => "Queued",
            StatusName::Delayed => "Delayed",
            StatusName::Succeeded => "Succeeded",
            StatusName::Failed => "Failed",
        }
    }

    /// Eligible for purge once `ExpiresAt` has passed.
    pub fn is_terminal(self) -> bool {
        matches!(self, StatusName::Succeeded | StatusName::Failed)
    }

    /// Eligible for the retry selector (subject to the retry/age bounds).
    pub fn is_retryable(self) -> bool {
        matches!(self, StatusName::Scheduled | StatusName::Failed)
    }

    /// Is `self -> next` an edge of the state machine?
    pub fn can_transition_to(self, next: StatusName) -> bool {
        use StatusName::*;
        matches!(
            (self, next),
            (Scheduled, Succeeded)
                | (Scheduled, Failed)
                | (Scheduled, Delayed)
                | (Failed, Scheduled)
                | (Delayed, Queued)
                | (Queued, Succeeded)
                | (Queued, Failed)
        )
    }
}

impl fmt::Display for StatusName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusName {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        StatusName::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| StoreError::InvalidStatus(s.to_string()))
    }
}
