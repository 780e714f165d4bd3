//! Consistency checks for models, unsat cores and projections.
//!
//! The checks are expensive and only run when validation is enabled. A failed
//! hard check is a defect in a kernel or the projector, never a property of
//! the input.

use crate::kernel::{CheckResult, Kernel};
use crate::mbp::Projector;
use crate::model::{Model, Value};
use crate::term::{occurs, Term, TermStore};
use crate::utils::cancel::CancellationToken;
use std::error::Error;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ValidationKind {
    Model,
    Core,
    Projection,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub msg: String,
}

impl ValidationError {
    fn new(kind: ValidationKind, msg: String) -> ValidationError {
        ValidationError { kind, msg }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let what = match self.kind {
            ValidationKind::Model => "model",
            ValidationKind::Core => "unsat core",
            ValidationKind::Projection => "projection",
        };
        write!(f, "invalid {}: {}", what, self.msg)
    }
}

impl Error for ValidationError {}

/// Every formula in `fmls` has to be true in `model`. Formulas that cannot be
/// evaluated are accepted only after cancellation.
fn holds_in(
    store: &TermStore,
    model: &Model,
    fmls: &[Term],
    token: &CancellationToken,
    kind: ValidationKind,
) -> Result<(), ValidationError> {
    for &f in fmls {
        match model.is_true(store, f) {
            Ok(true) => {}
            Ok(false) => {
                return Err(ValidationError::new(
                    kind,
                    format!("{} evaluates to false", store.display(f)),
                ))
            }
            Err(err) if !token.is_canceled() => {
                return Err(ValidationError::new(
                    kind,
                    format!("{} does not evaluate: {}", store.display(f), err),
                ))
            }
            Err(_) => {}
        }
    }
    Ok(())
}

/// The model returned by `kernel` satisfies the assumptions of the query and
/// everything asserted into the kernel.
pub fn validate_model<K: Kernel>(
    store: &TermStore,
    model: &Model,
    assumptions: &[Term],
    kernel: &K,
    token: &CancellationToken,
) -> Result<(), ValidationError> {
    trace!("validate model");
    holds_in(store, model, assumptions, token, ValidationKind::Model)?;
    holds_in(store, model, kernel.formulas(), token, ValidationKind::Model)
}

/// `core` together with the formulas asserted into `kernel` is unsatisfiable,
/// as decided by a fresh kernel instance.
pub fn validate_core<K: Kernel>(
    store: &TermStore,
    core: &[Term],
    kernel: &K,
    token: &CancellationToken,
) -> Result<(), ValidationError> {
    trace!("validate core {}", store.display_all(core));
    let mut fmls = core.to_vec();
    fmls.extend_from_slice(kernel.formulas());
    match check_fmls(store, &fmls, kernel) {
        CheckResult::Unsat => Ok(()),
        _ if token.is_canceled() => Ok(()),
        result => Err(ValidationError::new(
            ValidationKind::Core,
            format!(
                "{} is not unsatisfiable ({:?})",
                store.display_all(core),
                result
            ),
        )),
    }
}

fn check_fmls<K: Kernel>(store: &TermStore, fmls: &[Term], kernel: &K) -> CheckResult {
    let mut solver = kernel.independent();
    for &f in fmls {
        solver.assert_formula(store, f);
    }
    solver.check(store, &[])
}

/// Projects `vars` out of `core` with a separate projection and checks the
/// result: it must be true in `model` and must not mention `vars`. Whether
/// the core under the model values of `vars` implies the projection is
/// checked as well, but a failure is only logged; replacing disequalities by
/// strict inequalities can legitimately break it.
pub fn validate_project<K: Kernel, P: Projector>(
    store: &mut TermStore,
    projector: &mut P,
    model: &Model,
    core: &[Term],
    vars: &[Term],
    kernel: &K,
    token: &CancellationToken,
) -> Result<(), ValidationError> {
    trace!("validate projection");
    holds_in(store, model, core, token, ValidationKind::Projection)?;

    let mut proj = core.to_vec();
    let mut remaining = vars.to_vec();
    if let Err(err) = projector.project(store, false, &mut remaining, model, &mut proj) {
        if token.is_canceled() {
            return Ok(());
        }
        return Err(ValidationError::new(
            ValidationKind::Projection,
            format!("projection failed: {}", err),
        ));
    }
    if !remaining.is_empty() {
        trace!("not validating partial projection");
        return Ok(());
    }
    holds_in(store, model, &proj, token, ValidationKind::Projection)?;
    if token.is_canceled() {
        return Ok(());
    }
    for &v in vars {
        if let Some(&f) = proj.iter().find(|&&f| occurs(store, f, v)) {
            return Err(ValidationError::new(
                ValidationKind::Projection,
                format!(
                    "{} still contains {}",
                    store.display(f),
                    store.display(v)
                ),
            ));
        }
    }

    let mut fmls = core.to_vec();
    for &v in vars {
        let fixed = match model.evaluate(store, v) {
            Ok(Value::Bool(true)) => v,
            Ok(Value::Bool(false)) => store.mk_not(v),
            Ok(Value::Real(r)) => {
                let value = store.mk_num(r);
                store.mk_eq(v, value)
            }
            Err(_) => continue,
        };
        fmls.push(fixed);
    }
    let conj = store.mk_and(proj);
    fmls.push(store.mk_not(conj));
    if check_fmls(store, &fmls, kernel) != CheckResult::Unsat {
        debug!("implication check of projection failed");
    }
    Ok(())
}
