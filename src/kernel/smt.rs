use super::arith::{self, Constraint};
use super::{CheckResult, Kernel};
use crate::model::Model;
use crate::solve::{Failure, FailureReason};
use crate::term::{Sort, Term, TermKind, TermStore};
use crate::utils::cancel::CancellationToken;
use crate::utils::statistics::CountingStats;
use bit_vec::BitVec;
use cryptominisat::{Lbool, Lit};
use num_rational::BigRational;
use num_traits::Zero;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum KernelEvent {
    Checks,
    SatCalls,
    TheoryConflicts,
}

impl fmt::Display for KernelEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelEvent::Checks => write!(f, "kernel checks"),
            KernelEvent::SatCalls => write!(f, "sat calls"),
            KernelEvent::TheoryConflicts => write!(f, "theory conflicts"),
        }
    }
}

/// Lazy SMT solver for quantifier-free boolean combinations of linear real
/// arithmetic.
///
/// The boolean structure is Tseitin-encoded into CryptoMiniSat, arithmetic
/// atoms become SAT variables. Every propositional model is checked against
/// the arithmetic; infeasible ones are blocked by a lemma built from a
/// minimal conflicting subset of the asserted atoms.
pub struct SmtKernel {
    sat: cryptominisat::Solver,
    token: CancellationToken,
    term2lit: FxHashMap<Term, Lit>,
    true_lit: Option<Lit>,
    bool_vars: Vec<(Term, Lit)>,
    atoms: Vec<(Term, Lit)>,
    real_vars: Vec<Term>,
    /// indexed by term handle, set for real variables already in `real_vars`
    known_reals: BitVec,
    formulas: Vec<Term>,
    model: Option<Model>,
    core: Vec<Term>,
    unsupported: Option<String>,
    failure: Option<Failure>,
    statistics: CountingStats<KernelEvent>,
}

impl SmtKernel {
    pub fn new(token: CancellationToken) -> SmtKernel {
        let mut sat = cryptominisat::Solver::new();
        sat.set_num_threads(1);
        SmtKernel {
            sat,
            token,
            term2lit: FxHashMap::default(),
            true_lit: None,
            bool_vars: Vec::new(),
            atoms: Vec::new(),
            real_vars: Vec::new(),
            known_reals: BitVec::new(),
            formulas: Vec::new(),
            model: None,
            core: Vec::new(),
            unsupported: None,
            failure: None,
            statistics: CountingStats::new(),
        }
    }

    pub fn statistics(&self) -> &CountingStats<KernelEvent> {
        &self.statistics
    }

    fn true_lit(&mut self) -> Lit {
        if let Some(lit) = self.true_lit {
            return lit;
        }
        let lit = self.sat.new_var();
        self.sat.add_clause(&[lit]);
        self.true_lit = Some(lit);
        lit
    }

    /// Value of `lit` in the last SAT model, unassigned counts as false.
    fn is_true(&self, lit: Lit) -> bool {
        match self.sat.get_model()[lit.var() as usize] {
            Lbool::True => !lit.isneg(),
            Lbool::False => lit.isneg(),
            _ => false,
        }
    }

    fn register_reals(&mut self, store: &TermStore, atom: Term) {
        let mut stack = vec![atom];
        while let Some(t) = stack.pop() {
            match store.kind(t) {
                TermKind::Var(_, Sort::Real) => {
                    if self.known_reals.len() <= t.index() {
                        self.known_reals.grow(t.index() + 1 - self.known_reals.len(), false);
                    }
                    if !self.known_reals[t.index()] {
                        self.known_reals.set(t.index(), true);
                        self.real_vars.push(t);
                    }
                }
                _ => stack.extend(store.children(t)),
            }
        }
    }

    /// Returns the SAT literal equivalent to `root`, adding the defining
    /// clauses of all sub-formulas not encoded yet.
    fn encode(&mut self, store: &TermStore, root: Term) -> Lit {
        let mut stack = vec![root];
        while let Some(&t) = stack.last() {
            if self.term2lit.contains_key(&t) {
                stack.pop();
                continue;
            }
            let children = match store.kind(t) {
                TermKind::Not(_) | TermKind::And(_) | TermKind::Or(_) | TermKind::Iff(_, _) => {
                    store.children(t)
                }
                _ => Vec::new(),
            };
            let pending: Vec<Term> = children
                .iter()
                .filter(|&&c| !self.term2lit.contains_key(&c))
                .copied()
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            let args: Vec<Lit> = children.iter().map(|c| self.term2lit[c]).collect();
            let lit = match store.kind(t) {
                TermKind::True => self.true_lit(),
                TermKind::False => !self.true_lit(),
                TermKind::Not(_) => !args[0],
                TermKind::And(_) => {
                    let v = self.sat.new_var();
                    let mut long = vec![v];
                    for &a in &args {
                        self.sat.add_clause(&[!v, a]);
                        long.push(!a);
                    }
                    self.sat.add_clause(&long);
                    v
                }
                TermKind::Or(_) => {
                    let v = self.sat.new_var();
                    let mut long = vec![!v];
                    for &a in &args {
                        self.sat.add_clause(&[v, !a]);
                        long.push(a);
                    }
                    self.sat.add_clause(&long);
                    v
                }
                TermKind::Iff(_, _) => {
                    let v = self.sat.new_var();
                    let (a, b) = (args[0], args[1]);
                    self.sat.add_clause(&[!v, !a, b]);
                    self.sat.add_clause(&[!v, a, !b]);
                    self.sat.add_clause(&[v, a, b]);
                    self.sat.add_clause(&[v, !a, !b]);
                    v
                }
                TermKind::Var(_, Sort::Bool) => {
                    let v = self.sat.new_var();
                    self.bool_vars.push((t, v));
                    v
                }
                TermKind::Le(_, _) | TermKind::Lt(_, _) | TermKind::Eq(_, _) => {
                    let v = self.sat.new_var();
                    self.atoms.push((t, v));
                    self.register_reals(store, t);
                    v
                }
                _ => {
                    if self.unsupported.is_none() {
                        self.unsupported =
                            Some(format!("cannot decide `{}`", store.display(t)));
                    }
                    self.sat.new_var()
                }
            };
            self.term2lit.insert(t, lit);
            stack.pop();
        }
        self.term2lit[&root]
    }

    /// Shrinks an infeasible set of constraints to a minimal infeasible one.
    fn minimize(mut conflict: Vec<(usize, Constraint)>) -> Vec<usize> {
        let mut i = 0;
        while i < conflict.len() {
            let mut trial = conflict.clone();
            trial.remove(i);
            let constraints: Vec<Constraint> = trial.iter().map(|(_, c)| c.clone()).collect();
            if arith::is_feasible(&constraints) {
                i += 1;
            } else {
                conflict = trial;
            }
        }
        conflict.into_iter().map(|(i, _)| i).collect()
    }

    fn fail(&mut self, reason: FailureReason, message: String) -> CheckResult {
        let failure = Failure::new(reason, message);
        debug!("kernel failure: {}", failure);
        self.failure = Some(failure.clone());
        CheckResult::Unknown(failure)
    }

    fn extract_model(&self, point: &arith::Assignment) -> Model {
        let mut model = Model::new();
        for &(t, v) in &self.bool_vars {
            model.assign_bool(t, self.is_true(v));
        }
        for &t in &self.real_vars {
            let value = point.get(&t).cloned().unwrap_or_else(BigRational::zero);
            model.assign_real(t, value);
        }
        model
    }

    /// Assumptions whose SAT variable occurs in the final conflict.
    fn extract_core(&mut self, assumptions: &[Term], lits: &[Lit]) {
        let failed: FxHashSet<u32> = self.sat.get_conflict().iter().map(|l| l.var()).collect();
        for (&a, lit) in assumptions.iter().zip(lits) {
            if failed.contains(&lit.var()) && !self.core.contains(&a) {
                self.core.push(a);
            }
        }
    }
}

impl Kernel for SmtKernel {
    fn assert_formula(&mut self, store: &TermStore, fml: Term) {
        trace!("assert {}", store.display(fml));
        self.formulas.push(fml);
        let lit = self.encode(store, fml);
        self.sat.add_clause(&[lit]);
    }

    fn check(&mut self, store: &TermStore, assumptions: &[Term]) -> CheckResult {
        self.statistics.inc(KernelEvent::Checks);
        self.model = None;
        self.core.clear();
        self.failure = None;
        let lits: Vec<Lit> = assumptions.iter().map(|&a| self.encode(store, a)).collect();
        if let Some(message) = self.unsupported.clone() {
            return self.fail(FailureReason::Unsupported, message);
        }
        loop {
            // the SAT solver itself cannot be interrupted, poll between calls
            if self.token.is_canceled() {
                return self.fail(FailureReason::Canceled, String::from("canceled"));
            }
            self.statistics.inc(KernelEvent::SatCalls);
            match self.sat.solve_with_assumptions(&lits) {
                Lbool::False => {
                    self.extract_core(assumptions, &lits);
                    return CheckResult::Unsat;
                }
                Lbool::True => {
                    let mut constraints = Vec::with_capacity(self.atoms.len());
                    for (i, &(atom, lit)) in self.atoms.iter().enumerate() {
                        let value = self.is_true(lit);
                        if let Some(c) = Constraint::from_atom(store, atom, value) {
                            constraints.push((i, c));
                        }
                    }
                    let all: Vec<Constraint> = constraints.iter().map(|(_, c)| c.clone()).collect();
                    if let Some(point) = arith::feasible_point(&all) {
                        self.model = Some(self.extract_model(&point));
                        return CheckResult::Sat;
                    }
                    self.statistics.inc(KernelEvent::TheoryConflicts);
                    let lemma: Vec<Lit> = SmtKernel::minimize(constraints)
                        .into_iter()
                        .map(|i| {
                            let lit = self.atoms[i].1;
                            if self.is_true(lit) {
                                !lit
                            } else {
                                lit
                            }
                        })
                        .collect();
                    trace!("theory lemma with {} literals", lemma.len());
                    self.sat.add_clause(&lemma);
                }
                _ => {
                    return self.fail(
                        FailureReason::Kernel,
                        String::from("SAT solver returned undef"),
                    );
                }
            }
        }
    }

    fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    fn unsat_core(&self) -> &[Term] {
        &self.core
    }

    fn formulas(&self) -> &[Term] {
        &self.formulas
    }

    fn reset(&mut self) {
        *self = SmtKernel::new(self.token.clone());
    }

    fn last_failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    fn independent(&self) -> SmtKernel {
        SmtKernel::new(self.token.clone())
    }
}
