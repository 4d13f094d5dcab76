use crate::warehouse::InsertError;
use std::fmt;
use thiserror::Error;

/// Cause carried by a failed status.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    #[error("write failed: {0}")]
    Write(String),

    #[error("warehouse rejected {} row(s)", .0.len())]
    Insert(Vec<InsertError>),

    #[error("offset acknowledgement failed for {0}")]
    Acknowledgement(String),

    #[error("offset commit failed: {0}")]
    Commit(String),

    #[error("worker fault: {0}")]
    Fault(String),
}

/// Outcome of pushing a batch somewhere. Carries no retry state.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Success,
    Failure(FailureCause),
    /// Failing constituents of a fan-out, in child order. Never successful.
    MultiFailure(Vec<Status>),
}

impl Status {
    pub fn failure(cause: FailureCause) -> Self {
        Status::Failure(cause)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }

    /// Aggregate child statuses: success iff every child succeeded.
    pub fn aggregate(statuses: impl IntoIterator<Item = Status>) -> Self {
        let failures: Vec<Status> = statuses.into_iter().filter(|s| !s.is_success()).collect();
        if failures.is_empty() {
            Status::Success
        } else {
            Status::MultiFailure(failures)
        }
    }

    /// Flattened list of leaf causes.
    pub fn causes(&self) -> Vec<&FailureCause> {
        match self {
            Status::Success => Vec::new(),
            Status::Failure(cause) => vec![cause],
            Status::MultiFailure(statuses) => statuses.iter().flat_map(|s| s.causes()).collect(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Failure(cause) => write!(f, "failure: {}", cause),
            Status::MultiFailure(statuses) => {
                write!(f, "{} failure(s): [", statuses.len())?;
                for (i, status) in statuses.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", status)?;
                }
                write!(f, "]")
            }
        }
    }
}
