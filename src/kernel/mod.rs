//! Incremental decision procedures the search engine issues its queries to.

use crate::model::Model;
use crate::solve::Failure;
use crate::term::{Term, TermStore};

pub mod arith;
mod smt;

pub use self::smt::{KernelEvent, SmtKernel};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Sat,
    Unsat,
    Unknown(Failure),
}

/// One incremental solver instance.
///
/// Formulas asserted with `assert_formula` are permanent; the terms passed to
/// `check` only hold for that query. After `Sat`, `model` assigns every
/// variable occurring in the asserted formulas and the assumptions. After
/// `Unsat`, `unsat_core` is a subset of the assumptions that is inconsistent
/// with the asserted formulas.
pub trait Kernel {
    fn assert_formula(&mut self, store: &TermStore, fml: Term);

    fn check(&mut self, store: &TermStore, assumptions: &[Term]) -> CheckResult;

    fn model(&self) -> Option<&Model>;

    fn unsat_core(&self) -> &[Term];

    /// All formulas asserted since the last reset.
    fn formulas(&self) -> &[Term];

    fn reset(&mut self);

    fn last_failure(&self) -> Option<&Failure>;

    /// A fresh instance with the same configuration and no assertions.
    fn independent(&self) -> Self
    where
        Self: Sized;
}
