use num_bigint::BigInt;
use num_rational::BigRational;
use qsat::kernel::{CheckResult, Kernel, SmtKernel};
use qsat::mbp::ModelBasedProjector;
use qsat::model::Model;
use qsat::parse::smt2;
use qsat::solve::Failure;
use qsat::term::{Sort, Term, TermStore};
use qsat::utils::cancel::CancellationToken;
use qsat::{FailureReason, QsatOptions, QsatOutcome, QsatSolver, SolverResult};
use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

fn options(eliminate: bool) -> QsatOptions {
    QsatOptions {
        eliminate,
        force_elimination: true,
        validate: true,
    }
}

fn rational(numer: i64, denom: i64) -> BigRational {
    BigRational::new(BigInt::from(numer), BigInt::from(denom))
}

fn eliminate(store: &mut TermStore, fml: Term) -> Term {
    let mut solver = QsatSolver::new(options(true));
    match solver.check(store, fml).unwrap() {
        QsatOutcome::Unsat {
            answer: Some(answer),
        } => answer,
        outcome => panic!("unexpected {:?}", outcome),
    }
}

#[test]
fn dense_order_needs_no_projection() {
    let mut store = TermStore::new();
    let script = smt2::parse(
        &mut store,
        "(assert (exists ((x Real)) (and (> x 0) (< x 1))))\n(check-sat)\n",
    )
    .unwrap();
    let fml = script.formula(&mut store);
    let mut solver = QsatSolver::new(options(false));
    let outcome = solver.check(&mut store, fml).unwrap();
    assert_eq!(outcome.result(), SolverResult::Satisfiable);
    assert_eq!(
        solver
            .statistics()
            .get(&qsat::solve::qsat::QsatEvent::Projections),
        0
    );
}

#[test]
fn defined_variable_is_eliminated() {
    let mut store = TermStore::new();
    let script = smt2::parse(
        &mut store,
        "(declare-const y Real)\n(assert (exists ((x Real)) (= x (+ y 1))))\n",
    )
    .unwrap();
    let fml = script.formula(&mut store);
    let answer = eliminate(&mut store, fml);
    assert!(store.is_true(answer));
}

#[test]
fn universal_witness_is_hidden() {
    let mut store = TermStore::new();
    let script = smt2::parse(
        &mut store,
        "(assert (forall ((x Real)) (exists ((y Real)) (= y x))))\n",
    )
    .unwrap();
    let fml = script.formula(&mut store);

    let answer = eliminate(&mut store, fml);
    assert!(store.is_true(answer));

    let mut solver = QsatSolver::new(options(false));
    let outcome = solver.check(&mut store, fml).unwrap();
    assert_eq!(outcome.result(), SolverResult::Satisfiable);
    assert!(outcome.external_model().unwrap().is_empty());
}

#[test]
fn boolean_case_split_is_eliminated() {
    // exists p. (p & x < 1) | (!p & x > 2) is x < 1 | x > 2
    let mut store = TermStore::new();
    let script = smt2::parse(
        &mut store,
        "(declare-const x Real)\n\
         (assert (exists ((p Bool)) (or (and p (< x 1)) (and (not p) (> x 2)))))\n",
    )
    .unwrap();
    let x = script.declarations[0];
    let fml = script.formula(&mut store);
    let answer = eliminate(&mut store, fml);

    let holds = |value: BigRational| {
        let mut model = Model::new();
        model.assign_real(x, value);
        model.is_true(&store, answer).unwrap()
    };
    assert!(holds(rational(0, 1)));
    assert!(!holds(rational(3, 2)));
    assert!(!holds(rational(2, 1)));
    assert!(holds(rational(7, 2)));
}

#[test]
fn answer_is_quantifier_free_over_free_variables() {
    let mut store = TermStore::new();
    let script = smt2::parse(
        &mut store,
        "(declare-const a Real)\n(declare-const b Real)\n\
         (assert (exists ((x Real) (y Real)) (and (<= a x) (< x y) (<= y b))))\n",
    )
    .unwrap();
    let (a, b) = (script.declarations[0], script.declarations[1]);
    let fml = script.formula(&mut store);
    let answer = eliminate(&mut store, fml);
    for var in qsat::term::free_vars(&store, answer, &CancellationToken::new()).unwrap() {
        assert!(var == a || var == b);
    }

    let holds = |a_value: i64, b_value: i64| {
        let mut model = Model::new();
        model.assign_real(a, BigRational::from_integer(a_value.into()));
        model.assign_real(b, BigRational::from_integer(b_value.into()));
        model.is_true(&store, answer).unwrap()
    };
    assert!(holds(0, 1));
    assert!(!holds(1, 1));
    assert!(!holds(2, 0));
}

#[test]
fn recursive_elimination_agrees_with_prefix_elimination() {
    let mut store = TermStore::new();
    let script = smt2::parse(
        &mut store,
        "(declare-const z Real)\n\
         (assert (exists ((x Real)) (and (< z x) (forall ((y Real)) (or (< y x) (> y z))))))\n",
    )
    .unwrap();
    let fml = script.formula(&mut store);
    let mut solver = QsatSolver::new(QsatOptions {
        eliminate: true,
        force_elimination: false,
        validate: true,
    });
    let answer = solver.check(&mut store, fml).unwrap().answer().unwrap();
    for var in qsat::term::free_vars(&store, answer, &CancellationToken::new()).unwrap() {
        assert_eq!(store.var_name(var), Some("z"));
    }
}

/// Cancels `token` after a generous timeout, so a search that stops making
/// progress fails the test instead of hanging it.
fn watchdog(token: &CancellationToken) {
    let token = token.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(120));
        token.cancel();
    });
}

/// forall y z. exists w. F(a, y, z, w) where the two equations on `w` only
/// agree on the line a + 2y - 4z = 4, so the formula is false for every `a`.
const THREE_BLOCKS: &str = "(declare-const a Real)\n\
    (assert (forall ((y Real)) (forall ((z Real)) (exists ((w Real))\n\
      (and (or (= (+ (* 2 a) z 1) 0) (< (+ (* 2 a) (* 2 y) w) (+ 3 z)))\n\
           (= (+ a (* 2 y) (* 2 z) (* 2 w) 2) 0)\n\
           (= (+ a (* 2 y) w) (+ 1 z)))))))\n";

#[test]
fn outer_values_stay_fixed_below_their_depth() {
    let mut store = TermStore::new();
    let script = smt2::parse(&mut store, THREE_BLOCKS).unwrap();
    let fml = script.formula(&mut store);

    let mut solver = QsatSolver::new(options(false));
    watchdog(solver.token());
    let outcome = solver.check(&mut store, fml).unwrap();
    assert_eq!(outcome.result(), SolverResult::Unsatisfiable);
    let stats = solver.statistics();
    assert!(stats.get(&qsat::solve::qsat::QsatEvent::Projections) >= 1);
    assert!(stats.get(&qsat::solve::qsat::QsatEvent::Backtracks) >= 1);
}

#[test]
fn three_blocks_eliminate_to_false() {
    let mut store = TermStore::new();
    let script = smt2::parse(&mut store, THREE_BLOCKS).unwrap();
    let a = script.declarations[0];
    let fml = script.formula(&mut store);

    let mut solver = QsatSolver::new(options(true));
    watchdog(solver.token());
    let answer = match solver.check(&mut store, fml).unwrap() {
        QsatOutcome::Unsat {
            answer: Some(answer),
        } => answer,
        outcome => panic!("unexpected {:?}", outcome),
    };
    for value in &[-4, 0, 2, 4] {
        let mut model = Model::new();
        model.assign_real(a, rational(*value, 1));
        assert_eq!(model.is_true(&store, answer), Ok(false));
    }
}

/// Counts checks across both kernels and trips the token after `limit`
/// checks.
struct Tripwire {
    inner: SmtKernel,
    token: CancellationToken,
    checks: Rc<Cell<usize>>,
    limit: Option<usize>,
}

impl Kernel for Tripwire {
    fn assert_formula(&mut self, store: &TermStore, fml: Term) {
        self.inner.assert_formula(store, fml)
    }

    fn check(&mut self, store: &TermStore, assumptions: &[Term]) -> CheckResult {
        let result = self.inner.check(store, assumptions);
        if let Some(limit) = self.limit {
            self.checks.set(self.checks.get() + 1);
            if self.checks.get() >= limit {
                self.token.cancel();
            }
        }
        result
    }

    fn model(&self) -> Option<&Model> {
        self.inner.model()
    }

    fn unsat_core(&self) -> &[Term] {
        self.inner.unsat_core()
    }

    fn formulas(&self) -> &[Term] {
        self.inner.formulas()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn last_failure(&self) -> Option<&Failure> {
        self.inner.last_failure()
    }

    fn independent(&self) -> Tripwire {
        Tripwire {
            inner: self.inner.independent(),
            token: self.token.clone(),
            checks: Rc::new(Cell::new(0)),
            limit: None,
        }
    }
}

#[test]
fn cancellation_stops_before_next_kernel_call() {
    let mut store = TermStore::new();
    let x = store.mk_var("x", Sort::Real);
    let y = store.mk_var("y", Sort::Real);
    let eq = store.mk_eq(y, x);
    let inner = store.mk_exists(vec![y], eq);
    let fml = store.mk_forall(vec![x], inner);

    let token = CancellationToken::new();
    let checks = Rc::new(Cell::new(0));
    let tripwire = |limit| Tripwire {
        inner: SmtKernel::new(token.clone()),
        token: token.clone(),
        checks: checks.clone(),
        limit: Some(limit),
    };
    let mut solver = QsatSolver::with_kernels(
        QsatOptions {
            eliminate: false,
            force_elimination: true,
            validate: false,
        },
        tripwire(2),
        tripwire(2),
        ModelBasedProjector::new(),
        token.clone(),
    );
    match solver.check(&mut store, fml).unwrap() {
        QsatOutcome::Unknown(failure) => assert_eq!(failure.reason, FailureReason::Canceled),
        outcome => panic!("unexpected {:?}", outcome),
    }
    assert_eq!(checks.get(), 2);
}
