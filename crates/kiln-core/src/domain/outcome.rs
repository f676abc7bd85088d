//! Outcome model: the tagged result of one build job.
//!
//! Stages never propagate failures to the dispatcher. Each stage writes its
//! own log lines and hands back one of these values, which only feeds the
//! job status.

use serde::{Deserialize, Serialize};

use super::state::JobState;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildOutcome {
    /// The build tool ran to completion. The exit code is whatever the tool
    /// returned; `None` when it was ended by a signal.
    Completed { exit_code: Option<i32> },

    /// No build descriptor inside the archive.
    DescriptorMissing,

    /// The archive could not be unpacked.
    ExtractionFailed,

    /// Descriptor discovery or the tool launch failed.
    LaunchFailed,

    /// The build deadline expired and the tool was killed.
    TimedOut,

    /// The job task panicked.
    Crashed,

    /// Still queued when the workers were shut down.
    Cancelled,
}

impl BuildOutcome {
    /// Terminal state reported by the status API.
    pub fn final_state(self) -> JobState {
        match self {
            BuildOutcome::Completed { exit_code: Some(0) } => JobState::Succeeded,
            _ => JobState::Failed,
        }
    }

    pub fn exit_code(self) -> Option<i32> {
        match self {
            BuildOutcome::Completed { exit_code } => exit_code,
            _ => None,
        }
    }
}
