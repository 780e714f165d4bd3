use super::dimacs::Dimacs;
use crate::utils::cancel::Canceled;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

pub mod pred_abs;
pub mod qsat;
pub mod validate;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum SolverResult {
    Satisfiable = 10,
    Unsatisfiable = 20,
    Unknown = 30,
}

impl Dimacs for SolverResult {
    #[must_use]
    fn dimacs(&self) -> String {
        match *self {
            Self::Satisfiable => String::from("1"),
            Self::Unsatisfiable => String::from("0"),
            Self::Unknown => String::from("-1"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize, Deserialize)]
pub enum FailureReason {
    /// The cancellation token was set
    Canceled,
    /// A kernel gave up
    Kernel,
    /// A model could not evaluate a formula the search depends on
    Evaluation,
    /// The formula contains something the kernels cannot decide
    Unsupported,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::Canceled => write!(f, "canceled"),
            FailureReason::Kernel => write!(f, "kernel failure"),
            FailureReason::Evaluation => write!(f, "evaluation failure"),
            FailureReason::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Why a query ended in `Unknown`.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub message: String,
}

impl Failure {
    pub fn new<S: Into<String>>(reason: FailureReason, message: S) -> Failure {
        Failure {
            reason,
            message: message.into(),
        }
    }

    pub fn canceled() -> Failure {
        Failure::new(FailureReason::Canceled, "canceled")
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl Error for Failure {}

impl From<Canceled> for Failure {
    fn from(_: Canceled) -> Failure {
        Failure::canceled()
    }
}
