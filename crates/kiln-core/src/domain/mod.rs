//! Domain model (ids, principals, log entries, job state, outcomes).

pub mod ids;
pub mod log;
pub mod outcome;
pub mod principal;
pub mod state;

pub use ids::RequestId;
pub use log::{ERROR_PREFIX, LINE_SEPARATOR, LogEntry, error_line, join_lines};
pub use outcome::BuildOutcome;
pub use principal::{Credentials, Principal};
pub use state::{JobState, JobStatus};
