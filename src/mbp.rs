//! Model-based projection.
//!
//! Given a model `M` and formulas `F` true in `M`, a projection of variables
//! `V` is a quantifier-free formula `P` over the remaining variables with
//! `M |= P` and `P => exists V. F`. There are finitely many projections for a
//! fixed `F`, which is what makes the alternating search terminate.

use crate::kernel::arith::{Constraint, LinExpr, Rel};
use crate::model::{EvalError, Model};
use crate::term::{occurs, Sort, Term, TermKind, TermStore};
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashSet;

pub trait Projector {
    /// Replaces `fmls` by a projection of the variables in `vars` with
    /// respect to `model`. On return, `vars` holds the variables that could
    /// not be eliminated; it is only non-empty when `force` is false or some
    /// variable occurs in a formula the projector cannot look into.
    fn project(
        &mut self,
        store: &mut TermStore,
        force: bool,
        vars: &mut Vec<Term>,
        model: &Model,
        fmls: &mut Vec<Term>,
    ) -> Result<(), EvalError>;
}

/// Projection for booleans and linear real arithmetic.
///
/// The formulas are first replaced by a set of literals true in the model
/// that implies them. Boolean variables are eliminated by dropping their
/// literals, real variables by substituting a defining equality or the
/// greatest lower bound in the model.
#[derive(Debug, Default, Clone)]
pub struct ModelBasedProjector {}

impl ModelBasedProjector {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Literals true in `model` whose conjunction implies every formula in `fmls`.
pub fn implicant(
    store: &mut TermStore,
    model: &Model,
    fmls: &[Term],
) -> Result<Vec<Term>, EvalError> {
    let mut literals = Vec::new();
    let mut visited = FxHashSet::default();
    let mut todo: Vec<(Term, bool)> = fmls.iter().rev().map(|&f| (f, true)).collect();
    while let Some((t, polarity)) = todo.pop() {
        if !visited.insert((t, polarity)) {
            continue;
        }
        match store.kind(t).clone() {
            TermKind::True | TermKind::False => {}
            TermKind::Not(a) => todo.push((a, !polarity)),
            TermKind::And(args) | TermKind::Or(args) => {
                let conjunctive = matches!(store.kind(t), TermKind::And(_)) == polarity;
                if conjunctive {
                    todo.extend(args.into_iter().rev().map(|a| (a, polarity)));
                } else {
                    // one argument with the wanted value suffices
                    let mut witness = None;
                    for a in args {
                        if model.is_true(store, a)? == polarity {
                            witness = Some(a);
                            break;
                        }
                    }
                    match witness {
                        Some(a) => todo.push((a, polarity)),
                        None => return Err(EvalError::Sort),
                    }
                }
            }
            TermKind::Iff(a, b) => {
                let va = model.is_true(store, a)?;
                let vb = model.is_true(store, b)?;
                todo.push((b, vb));
                todo.push((a, va));
            }
            _ => {
                let literal = if polarity { t } else { store.mk_not(t) };
                literals.push(literal);
            }
        }
    }
    Ok(literals)
}

impl ModelBasedProjector {
    fn eliminate_real(
        store: &TermStore,
        model: &Model,
        v: Term,
        constraints: Vec<Constraint>,
    ) -> Result<Vec<Constraint>, EvalError> {
        let (mut touched, mut rest): (Vec<Constraint>, Vec<Constraint>) = constraints
            .into_iter()
            .partition(|c| !c.expr.coeff(v).is_zero());
        if touched.is_empty() {
            return Ok(rest);
        }
        let value = |expr: &LinExpr| {
            expr.eval_model(model).ok_or_else(|| {
                let name = store.var_name(v).unwrap_or("?").to_string();
                EvalError::Unassigned(name)
            })
        };

        if let Some(pos) = touched.iter().position(|c| c.rel == Rel::Eq) {
            let eq = touched.swap_remove(pos);
            let c = eq.expr.coeff(v);
            let mut others = eq.expr.clone();
            others.add_scaled(&LinExpr::var(v), &-c.clone());
            let definition = others.scaled(&-c.recip());
            for constraint in touched {
                rest.push(Constraint::new(
                    constraint.expr.substitute(v, &definition),
                    constraint.rel,
                ));
            }
            return Ok(rest);
        }

        let mut lowers: Vec<(LinExpr, bool)> = Vec::new();
        let mut uppers: Vec<(LinExpr, bool)> = Vec::new();
        for constraint in touched {
            let (expr, strict) = match constraint.rel {
                Rel::Le => (constraint.expr, false),
                Rel::Lt => (constraint.expr, true),
                Rel::Ne => {
                    // the side of the hyperplane the model is on
                    if value(&constraint.expr)?.is_negative() {
                        (constraint.expr, true)
                    } else {
                        (constraint.expr.scaled(&-BigRational::one()), true)
                    }
                }
                Rel::Eq => unreachable!("equalities are substituted above"),
            };
            let c = expr.coeff(v);
            let mut others = expr.clone();
            others.add_scaled(&LinExpr::var(v), &-c.clone());
            let bound = others.scaled(&-c.recip());
            if c.is_positive() {
                uppers.push((bound, strict));
            } else {
                lowers.push((bound, strict));
            }
        }
        if lowers.is_empty() || uppers.is_empty() {
            return Ok(rest);
        }

        // greatest lower bound in the model, strict wins on ties
        let mut best = 0;
        let mut best_value = value(&lowers[0].0)?;
        for (i, (bound, strict)) in lowers.iter().enumerate().skip(1) {
            let current = value(bound)?;
            if current > best_value || (current == best_value && *strict && !lowers[best].1) {
                best = i;
                best_value = current;
            }
        }
        let (glb, glb_strict) = lowers[best].clone();
        for (i, (bound, strict)) in lowers.iter().enumerate() {
            if i == best {
                continue;
            }
            let rel = if !glb_strict && *strict {
                Rel::Lt
            } else {
                Rel::Le
            };
            rest.push(Constraint::new(bound.minus(&glb), rel));
        }
        for (bound, strict) in uppers {
            let rel = if glb_strict || strict { Rel::Lt } else { Rel::Le };
            rest.push(Constraint::new(glb.minus(&bound), rel));
        }
        Ok(rest)
    }
}

impl Projector for ModelBasedProjector {
    fn project(
        &mut self,
        store: &mut TermStore,
        force: bool,
        vars: &mut Vec<Term>,
        model: &Model,
        fmls: &mut Vec<Term>,
    ) -> Result<(), EvalError> {
        if vars.is_empty() {
            return Ok(());
        }
        let literals = implicant(store, model, fmls)?;
        let eliminated_bools: FxHashSet<Term> = vars
            .iter()
            .copied()
            .filter(|&v| store.is_bool_var(v))
            .collect();

        let mut constraints = Vec::new();
        let mut opaque = Vec::new();
        for literal in literals {
            let (atom, polarity) = match store.kind(literal) {
                TermKind::Not(a) => (*a, false),
                _ => (literal, true),
            };
            if eliminated_bools.contains(&atom) {
                continue;
            }
            match Constraint::from_atom(store, atom, polarity) {
                Some(c) => constraints.push(c),
                None => opaque.push(literal),
            }
        }

        let mut remaining = Vec::new();
        for &v in vars.iter() {
            if opaque.iter().any(|&o| occurs(store, o, v)) {
                remaining.push(v);
                continue;
            }
            if store.sort(v) == Sort::Real {
                constraints = Self::eliminate_real(store, model, v, constraints)?;
            }
        }
        if force && !remaining.is_empty() {
            debug!(
                "projection could not eliminate {}",
                store.display_all(&remaining)
            );
        }

        fmls.clear();
        fmls.extend(opaque);
        for constraint in constraints {
            let t = constraint.to_term(store);
            if !store.is_true(t) && !fmls.contains(&t) {
                fmls.push(t);
            }
        }
        *vars = remaining;
        Ok(())
    }
}
