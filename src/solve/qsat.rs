use super::pred_abs::PredAbs;
use super::validate::{self, ValidationError};
use super::{Failure, FailureReason, SolverResult};
use crate::hoist::pull_block;
use crate::kernel::{CheckResult, Kernel, SmtKernel};
use crate::level::Level;
use crate::mbp::{ModelBasedProjector, Projector};
use crate::model::{EvalError, Model, ModelConverter};
use crate::term::{free_vars, push_not, Term, TermKind, TermStore};
use crate::utils::cancel::{CancellationToken, Canceled};
use crate::utils::statistics::CountingStats;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsatOptions {
    /// Compute a quantifier-free equivalent instead of deciding satisfiability
    pub eliminate: bool,
    /// Decide the whole prefix at once; otherwise nested quantifiers are
    /// eliminated innermost first
    pub force_elimination: bool,
    /// Check every model, core and projection
    pub validate: bool,
}

impl Default for QsatOptions {
    fn default() -> Self {
        QsatOptions {
            eliminate: false,
            force_elimination: true,
            validate: cfg!(debug_assertions),
        }
    }
}

#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum QsatEvent {
    Rounds,
    Projections,
    Backtracks,
    EliminatedAtRoot,
    Predicates,
}

impl fmt::Display for QsatEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QsatEvent::Rounds => write!(f, "rounds"),
            QsatEvent::Projections => write!(f, "projections"),
            QsatEvent::Backtracks => write!(f, "backtracks"),
            QsatEvent::EliminatedAtRoot => write!(f, "eliminated at root"),
            QsatEvent::Predicates => write!(f, "predicates"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum QsatOutcome {
    /// The formula is unsatisfiable. In elimination mode `answer` is a
    /// quantifier-free formula equivalent to the input.
    Unsat { answer: Option<Term> },
    /// `model` is the witness for the outermost existential block, it still
    /// contains internal variables that `converter` removes.
    Sat {
        model: Model,
        converter: ModelConverter,
    },
    Unknown(Failure),
}

impl QsatOutcome {
    pub fn result(&self) -> SolverResult {
        match self {
            QsatOutcome::Unsat { .. } => SolverResult::Unsatisfiable,
            QsatOutcome::Sat { .. } => SolverResult::Satisfiable,
            QsatOutcome::Unknown(_) => SolverResult::Unknown,
        }
    }

    /// The model without internal variables, if satisfiable.
    pub fn external_model(&self) -> Option<Model> {
        match self {
            QsatOutcome::Sat { model, converter } => Some(converter.apply(model)),
            _ => None,
        }
    }

    pub fn answer(&self) -> Option<Term> {
        match self {
            QsatOutcome::Unsat { answer } => *answer,
            _ => None,
        }
    }
}

/// Ends the search early.
enum Abort {
    Failed(Failure),
    Invalid(ValidationError),
}

impl From<Failure> for Abort {
    fn from(failure: Failure) -> Abort {
        Abort::Failed(failure)
    }
}

impl From<Canceled> for Abort {
    fn from(canceled: Canceled) -> Abort {
        Abort::Failed(canceled.into())
    }
}

impl From<ValidationError> for Abort {
    fn from(err: ValidationError) -> Abort {
        Abort::Invalid(err)
    }
}

/// Alternating search over the quantifier prefix with predicate abstraction.
///
/// Depth `d` of the search is resolved by the existential kernel if `d` is
/// even and by the universal kernel otherwise. The existential kernel holds
/// the abstracted formula, the universal one its negation. A model at depth
/// `d` fixes the predicates of level `d` for depth `d + 1`; an unsat answer
/// is generalized by model-based projection into a formula that is learned
/// at a shallower depth.
pub struct QsatSolver<K: Kernel = SmtKernel, P: Projector = ModelBasedProjector> {
    options: QsatOptions,
    token: CancellationToken,
    ex: K,
    fa: K,
    projector: P,
    pred_abs: PredAbs,
    level: usize,
    model: Option<Model>,
    /// `models[i]` is the model found at depth `i` on the current path
    models: Vec<Model>,
    /// global assumptions, one per formula learned at the root
    asms: Vec<Term>,
    answer: Vec<Term>,
    /// quantifier blocks, block `i` is resolved at depth `i`
    vars: Vec<Vec<Term>>,
    avars: Vec<Term>,
    /// variables the projection could not eliminate
    free_vars: Vec<Term>,
    stats: CountingStats<QsatEvent>,
}

impl QsatSolver {
    pub fn new(options: QsatOptions) -> Self {
        let token = CancellationToken::new();
        QsatSolver::with_kernels(
            options,
            SmtKernel::new(token.clone()),
            SmtKernel::new(token.clone()),
            ModelBasedProjector::new(),
            token,
        )
    }
}

impl<K: Kernel, P: Projector> QsatSolver<K, P> {
    /// Creates an engine over the given kernels. `token` has to be the token
    /// the kernels poll.
    pub fn with_kernels(
        options: QsatOptions,
        ex: K,
        fa: K,
        projector: P,
        token: CancellationToken,
    ) -> Self {
        QsatSolver {
            options,
            token: token.clone(),
            ex,
            fa,
            projector,
            pred_abs: PredAbs::new(token.clone()),
            level: 0,
            model: None,
            models: Vec::new(),
            asms: Vec::new(),
            answer: Vec::new(),
            vars: Vec::new(),
            avars: Vec::new(),
            free_vars: Vec::new(),
            stats: CountingStats::new(),
        }
    }

    pub fn options(&self) -> &QsatOptions {
        &self.options
    }

    /// Setting the token makes a running `check` return `Unknown`.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn statistics(&self) -> &CountingStats<QsatEvent> {
        &self.stats
    }

    pub fn exists_kernel(&self) -> &K {
        &self.ex
    }

    pub fn forall_kernel(&self) -> &K {
        &self.fa
    }

    /// Decides `fml`, or eliminates its quantifiers in elimination mode.
    ///
    /// Free variables of `fml` are existential. An `Err` is only returned if
    /// validation is enabled and found an inconsistency.
    pub fn check(
        &mut self,
        store: &mut TermStore,
        fml: Term,
    ) -> Result<QsatOutcome, ValidationError> {
        info!("solve {}", if self.options.eliminate { "elimination" } else { "satisfiability" });
        let result = if self.options.force_elimination {
            self.check_prefix(store, fml)
        } else {
            self.elim_rec(store, fml).map(|answer| QsatOutcome::Unsat {
                answer: Some(answer),
            })
        };
        self.stats
            .inc_by(QsatEvent::Predicates, self.pred_abs.num_predicates());
        match result {
            Ok(outcome) => Ok(outcome),
            Err(Abort::Failed(failure)) => {
                info!("unknown: {}", failure);
                Ok(QsatOutcome::Unknown(failure))
            }
            Err(Abort::Invalid(err)) => Err(err),
        }
    }

    fn check_prefix(&mut self, store: &mut TermStore, fml: Term) -> Result<QsatOutcome, Abort> {
        self.reset();
        let fml = if self.options.eliminate {
            push_not(store, fml)
        } else {
            fml
        };
        let fml = self.hoist(store, fml)?;
        let mut defs = Vec::new();
        self.pred_abs
            .abstract_atoms(store, fml, &mut Level::unbounded(), &mut defs)?;
        let fml = self.pred_abs.mk_abstract(store, fml)?;
        self.assert_initial(store, defs, fml);
        if self.check_sat(store)? {
            let model = self.models.first().cloned().unwrap_or_default();
            Ok(QsatOutcome::Sat {
                model,
                converter: self.pred_abs.converter().clone(),
            })
        } else if self.options.eliminate {
            let answer = store.mk_and(self.answer.iter().copied());
            Ok(QsatOutcome::Unsat {
                answer: Some(answer),
            })
        } else {
            Ok(QsatOutcome::Unsat { answer: None })
        }
    }

    /// Asserts the definitions into both kernels, the abstracted formula into
    /// the existential and its negation into the universal kernel.
    fn assert_initial(&mut self, store: &mut TermStore, defs: Vec<Term>, fml: Term) {
        let defs = store.mk_and(defs);
        self.ex.assert_formula(store, defs);
        self.fa.assert_formula(store, defs);
        self.ex.assert_formula(store, fml);
        let negated = store.mk_not(fml);
        self.fa.assert_formula(store, negated);
    }

    fn reset(&mut self) {
        self.level = 0;
        self.model = None;
        self.models.clear();
        self.asms.clear();
        self.answer.clear();
        self.vars.clear();
        self.avars.clear();
        self.free_vars.clear();
        self.pred_abs.reset();
        self.ex.reset();
        self.fa.reset();
    }

    fn check_cancel(&self) -> Result<(), Abort> {
        if self.token.is_canceled() {
            Err(Failure::canceled().into())
        } else {
            Ok(())
        }
    }

    fn eval_failure(&self, err: EvalError) -> Abort {
        if self.token.is_canceled() {
            Failure::canceled().into()
        } else {
            Failure::new(FailureReason::Evaluation, err.to_string()).into()
        }
    }

    fn kernel(&mut self, level: usize) -> &mut K {
        if level % 2 == 0 {
            &mut self.ex
        } else {
            &mut self.fa
        }
    }

    fn kernel_ref(&self, level: usize) -> &K {
        if level % 2 == 0 {
            &self.ex
        } else {
            &self.fa
        }
    }

    fn push(&mut self) {
        self.level += 1;
        self.pred_abs.push();
    }

    fn pop(&mut self, num_scopes: usize) {
        debug_assert!(num_scopes <= self.level);
        self.model = None;
        self.pred_abs.pop(num_scopes);
        self.level -= num_scopes;
        self.models.truncate(self.level);
        self.stats.inc(QsatEvent::Backtracks);
    }

    /// Runs the search. Returns true if the outermost block has a winning
    /// assignment, false if the formula at depth 0 became unsatisfiable.
    fn check_sat(&mut self, store: &mut TermStore) -> Result<bool, Abort> {
        loop {
            self.stats.inc(QsatEvent::Rounds);
            self.check_cancel()?;
            let mut asms = self.asms.clone();
            self.pred_abs
                .get_assumptions(store, self.model.as_ref(), &mut asms)
                .map_err(|err| self.eval_failure(err))?;
            trace!("level {} assumptions {}", self.level, store.display_all(&asms));
            let level = self.level;
            match self.kernel(level).check(store, &asms) {
                CheckResult::Sat => {
                    let model = match self.kernel_ref(level).model() {
                        Some(model) => model.clone(),
                        None => {
                            return Err(Failure::new(
                                FailureReason::Kernel,
                                "satisfiable query without model",
                            )
                            .into())
                        }
                    };
                    if self.options.validate {
                        validate::validate_model(
                            store,
                            &model,
                            &asms,
                            self.kernel_ref(level),
                            &self.token,
                        )?;
                    }
                    self.models.push(model.clone());
                    self.model = Some(model);
                    self.push();
                }
                CheckResult::Unsat => match level {
                    0 => return Ok(false),
                    1 => {
                        if !self.options.eliminate {
                            return Ok(true);
                        }
                        if self.model.is_some() {
                            self.project_qe(store)?;
                        } else {
                            self.pop(1);
                        }
                    }
                    _ => {
                        if self.model.is_some() {
                            self.project(store)?;
                        } else {
                            self.pop(1);
                        }
                    }
                },
                CheckResult::Unknown(failure) => return Err(failure.into()),
            }
        }
    }

    /// The unsat core of the kernel at `level` over atoms.
    fn get_core(&mut self, store: &mut TermStore, level: usize) -> Result<Vec<Term>, Canceled> {
        let mut core = self.kernel_ref(level).unsat_core().to_vec();
        self.pred_abs.pred2lit(store, &mut core)?;
        debug!("core {}", store.display_all(&core));
        Ok(core)
    }

    fn validate_core(&self, store: &TermStore, core: &[Term]) -> Result<(), Abort> {
        if self.options.validate {
            validate::validate_core(store, core, self.kernel_ref(self.level), &self.token)?;
        }
        Ok(())
    }

    /// Collects the variables of the blocks from `level` on into `avars`.
    fn get_vars(&mut self, level: usize) {
        self.avars.clear();
        for block in self.vars.iter().skip(level) {
            self.avars.extend_from_slice(block);
        }
    }

    fn take_model(&mut self) -> Result<Model, Abort> {
        self.model
            .take()
            .ok_or_else(|| Failure::new(FailureReason::Kernel, "projection without model").into())
    }

    /// Learns a global assumption `b <=> fml`.
    fn add_assumption(&mut self, store: &mut TermStore, fml: Term) {
        let b = self.pred_abs.fresh_bool(store, "b");
        self.asms.push(b);
        let eq = store.mk_iff(b, fml);
        self.ex.assert_formula(store, eq);
        self.fa.assert_formula(store, eq);
        self.pred_abs.add_pred(b, fml);
        self.pred_abs.set_level(b, Level::unbounded());
        self.stats.inc(QsatEvent::EliminatedAtRoot);
    }

    /// The universal kernel refuted the last model of the free variables:
    /// the projected core is a new conjunct of the answer.
    fn project_qe(&mut self, store: &mut TermStore) -> Result<(), Abort> {
        trace!("project_qe");
        debug_assert_eq!(self.level, 1);
        self.stats.inc(QsatEvent::Projections);
        let mut core = self.get_core(store, self.level)?;
        self.validate_core(store, &core)?;
        let model = self.take_model()?;
        self.get_vars(self.level);
        if let Err(err) = self.projector.project(
            store,
            self.options.force_elimination,
            &mut self.avars,
            &model,
            &mut core,
        ) {
            return Err(self.eval_failure(err));
        }
        let conj = store.mk_and(core);
        let fml = push_not(store, conj);
        debug!("answer conjunct {}", store.display(fml));
        self.add_assumption(store, fml);
        self.answer.push(fml);
        self.free_vars.extend_from_slice(&self.avars);
        self.pop(1);
        Ok(())
    }

    /// Generalizes the unsat core at the current depth and learns its
    /// negation at the deepest depth it depends on.
    fn project(&mut self, store: &mut TermStore) -> Result<(), Abort> {
        trace!("project");
        debug_assert!(self.level >= 2);
        self.stats.inc(QsatEvent::Projections);
        let level = self.level;
        let mut core = self.get_core(store, level)?;
        self.validate_core(store, &core)?;
        let model = self.take_model()?;
        self.get_vars(level - 1);
        if self.options.validate {
            let kernel = if level % 2 == 0 { &self.ex } else { &self.fa };
            validate::validate_project(
                store,
                &mut self.projector,
                &model,
                &core,
                &self.avars,
                kernel,
                &self.token,
            )?;
        }
        if let Err(err) = self.projector.project(
            store,
            self.options.force_elimination,
            &mut self.avars,
            &model,
            &mut core,
        ) {
            return Err(self.eval_failure(err));
        }
        self.free_vars.extend_from_slice(&self.avars);
        let conj = store.mk_and(core);
        let fml = push_not(store, conj);

        let sizes = self.pred_abs.bucket_sizes();
        let mut defs = Vec::new();
        let mut fml_level = Level::unbounded();
        self.pred_abs
            .abstract_atoms(store, fml, &mut fml_level, &mut defs)?;
        let defs = store.mk_and(defs);
        self.ex.assert_formula(store, defs);
        self.fa.assert_formula(store, defs);

        let num_scopes = backtrack_scopes(level, &fml_level, &self.options);
        self.pop(num_scopes);
        debug!(
            "backtrack {} to level {}, learned {}",
            num_scopes,
            self.level,
            store.display(fml)
        );
        if self.level == 0 && self.options.eliminate {
            self.add_assumption(store, fml);
        } else {
            let abstracted = self.pred_abs.mk_abstract(store, fml)?;
            let level = self.level;
            self.kernel(level).assert_formula(store, abstracted);
        }
        self.pred_abs
            .fix_new_predicates(store, &sizes, &self.models)
            .map_err(|err| self.eval_failure(err))?;
        Ok(())
    }

    /// Moves the quantifier prefix of `fml` into `vars` and returns the
    /// matrix. Block 0 holds the free variables; in elimination mode the
    /// formula is negated, so its first quantifier block is universal.
    fn hoist(&mut self, store: &mut TermStore, fml: Term) -> Result<Term, Canceled> {
        trace!("hoist");
        self.vars.push(free_vars(store, fml, &self.token)?);
        let mut is_forall = self.options.eliminate;
        let (mut fml, pulled) = pull_block(store, is_forall, fml, &self.token)?;
        self.hide(&pulled);
        if is_forall {
            self.vars.push(pulled);
        } else {
            self.vars[0].extend(pulled);
        }
        loop {
            is_forall = !is_forall;
            let (body, pulled) = pull_block(store, is_forall, fml, &self.token)?;
            fml = body;
            self.hide(&pulled);
            let done = pulled.is_empty();
            self.vars.push(pulled);
            if done {
                break;
            }
        }
        self.initialize_levels();
        debug!("prefix with {} blocks", self.vars.len());
        Ok(fml)
    }

    fn hide(&mut self, vars: &[Term]) {
        for &v in vars {
            self.pred_abs.hide(v);
        }
    }

    fn initialize_levels(&mut self) {
        for (depth, block) in self.vars.iter().enumerate() {
            for &v in block {
                self.pred_abs.set_level(v, Level::of_block(depth as u32));
            }
        }
    }

    /// Eliminates quantifiers innermost first. Every quantified sub-formula
    /// is replaced by the answer of an elimination round on its already
    /// quantifier-free body.
    fn elim_rec(&mut self, store: &mut TermStore, fml: Term) -> Result<Term, Abort> {
        trace!("elim_rec");
        let mut visited: FxHashMap<Term, Term> = FxHashMap::default();
        let mut todo = vec![fml];
        while let Some(&e) = todo.last() {
            self.check_cancel()?;
            if visited.contains_key(&e) {
                todo.pop();
                continue;
            }
            let result = match store.kind(e).clone() {
                TermKind::Exists(vars, body) | TermKind::Forall(vars, body) => {
                    match visited.get(&body) {
                        None => {
                            todo.push(body);
                            continue;
                        }
                        Some(&inner) => {
                            let is_forall = matches!(store.kind(e), TermKind::Forall(_, _));
                            let tmp = if is_forall {
                                push_not(store, inner)
                            } else {
                                inner
                            };
                            let tmp = match self.elim(store, vars.clone(), tmp)? {
                                Some(answer) => answer,
                                None => store.mk_exists(vars, tmp),
                            };
                            if is_forall {
                                push_not(store, tmp)
                            } else {
                                tmp
                            }
                        }
                    }
                }
                _ => {
                    let children = store.children(e);
                    let pending: Vec<Term> = children
                        .iter()
                        .copied()
                        .filter(|c| !visited.contains_key(c))
                        .collect();
                    if !pending.is_empty() {
                        todo.extend(pending);
                        continue;
                    }
                    let args: Vec<Term> = children.iter().map(|c| visited[c]).collect();
                    store.rebuild(e, &args)
                }
            };
            visited.insert(e, result);
            todo.pop();
        }
        Ok(visited.get(&fml).copied().unwrap_or(fml))
    }

    /// One elimination round for `exists vars. fml`. Returns `None` if the
    /// round ended satisfiable, which only happens outside elimination mode.
    fn elim(
        &mut self,
        store: &mut TermStore,
        vars: Vec<Term>,
        fml: Term,
    ) -> Result<Option<Term>, Abort> {
        trace!("elim");
        self.reset();
        self.vars.push(Vec::new());
        self.vars.push(vars);
        self.initialize_levels();
        let fml = push_not(store, fml);
        let mut defs = Vec::new();
        self.pred_abs
            .abstract_atoms(store, fml, &mut Level::unbounded(), &mut defs)?;
        let abstracted = self.pred_abs.mk_abstract(store, fml)?;
        self.assert_initial(store, defs, abstracted);
        if self.check_sat(store)? {
            return Ok(None);
        }
        dedup_swap_remove(&mut self.free_vars);
        let answer = store.mk_and(self.answer.iter().copied());
        debug!(
            "eliminated to {} with {} free variables",
            store.display(answer),
            self.free_vars.len()
        );
        Ok(Some(store.mk_exists(self.free_vars.clone(), answer)))
    }
}

/// Number of scopes to pop at depth `level` after learning a formula whose
/// level is `learned`. The count is even, so the formula lands in a kernel of
/// the player that has to respect it.
fn backtrack_scopes(level: usize, learned: &Level, options: &QsatOptions) -> usize {
    match learned.max() {
        None => 2 * (level / 2),
        Some(_) if options.eliminate && !options.force_elimination => 2,
        Some(max) => {
            debug_assert!(max as usize + 2 <= level);
            let mut num_scopes = level.saturating_sub(max as usize).max(2);
            if num_scopes % 2 != 0 {
                num_scopes -= 1;
            }
            num_scopes
        }
    }
}

/// Removes repeated variables. A repeated entry is overwritten by the last
/// entry, which is then examined in its place, so the order of the survivors
/// is not preserved.
fn dedup_swap_remove(vars: &mut Vec<Term>) {
    let mut seen = FxHashSet::default();
    let mut i = 0;
    while i < vars.len() {
        if seen.insert(vars[i]) {
            i += 1;
        } else {
            vars.swap_remove(i);
        }
    }
}
