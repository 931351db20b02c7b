//! Outcome of one reconciliation step
//!
//! Waiting on something outside the operator's control is not an error: a
//! step that cannot finish yet returns [`Progress::Waiting`] and the caller
//! hands control back to the scheduler. Hard failures travel separately as
//! `Err(Error)`, so `Result<Progress>` covers all three outcomes of a pass.

use std::fmt;

/// Result of a step that may need to be re-run later
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Progress {
    /// The step converged; the sequence may continue
    Done,
    /// An upstream dependency is not ready; requeue and try again
    Waiting {
        /// Human-readable reason, surfaced in logs and Workshop status
        reason: String,
    },
}

impl Progress {
    /// Build a waiting outcome
    pub fn waiting(reason: impl Into<String>) -> Self {
        Self::Waiting {
            reason: reason.into(),
        }
    }

    /// Whether the scheduler should re-invoke the pass
    pub fn should_requeue(&self) -> bool {
        matches!(self, Self::Waiting { .. })
    }

    /// Whether the step converged
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Waiting { reason } => write!(f, "waiting: {reason}"),
        }
    }
}

/// Return early from the enclosing function unless the step is done.
///
/// ```ignore
/// proceed!(gate.require(&handle).await?);
/// ```
#[macro_export]
macro_rules! proceed {
    ($step:expr) => {
        match $step {
            $crate::Progress::Done => {}
            waiting => return Ok(waiting),
        }
    };
}
