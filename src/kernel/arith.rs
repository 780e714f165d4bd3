//! Linear real arithmetic over exact rationals.
//!
//! Conjunctions of constraints `e ~ 0` with `~` one of `<=`, `<`, `=`, `!=` are
//! decided by Gaussian elimination of the equalities followed by
//! Fourier-Motzkin elimination with strictness tracking. Disequalities are
//! handled by moving a feasible point along segments towards points that
//! avoid them.

use crate::model::Model;
use crate::term::{Sort, Term, TermKind, TermStore};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;

pub type Assignment = FxHashMap<Term, BigRational>;

/// `sum(coeffs[v] * v) + constant`, zero coefficients are never stored.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct LinExpr {
    coeffs: BTreeMap<Term, BigRational>,
    constant: BigRational,
}

impl LinExpr {
    pub fn zero() -> LinExpr {
        LinExpr::default()
    }

    pub fn constant(value: BigRational) -> LinExpr {
        LinExpr {
            coeffs: BTreeMap::new(),
            constant: value,
        }
    }

    pub fn var(v: Term) -> LinExpr {
        let mut expr = LinExpr::zero();
        expr.add_var(v, BigRational::one());
        expr
    }

    /// Linearizes a real-sorted term, `None` for anything else.
    pub fn from_term(store: &TermStore, t: Term) -> Option<LinExpr> {
        let mut result = LinExpr::zero();
        let mut stack = vec![(t, BigRational::one())];
        while let Some((t, k)) = stack.pop() {
            match store.kind(t) {
                TermKind::Num(n) => result.constant += n * &k,
                TermKind::Var(_, Sort::Real) => result.add_var(t, k),
                TermKind::Add(args) => {
                    for &a in args {
                        stack.push((a, k.clone()));
                    }
                }
                TermKind::Mul(c, a) => stack.push((*a, c * &k)),
                _ => return None,
            }
        }
        Some(result)
    }

    fn add_var(&mut self, v: Term, k: BigRational) {
        let entry = self.coeffs.entry(v).or_insert_with(BigRational::zero);
        *entry += k;
        if entry.is_zero() {
            self.coeffs.remove(&v);
        }
    }

    /// `self += k * other`
    pub fn add_scaled(&mut self, other: &LinExpr, k: &BigRational) {
        for (&v, c) in &other.coeffs {
            self.add_var(v, c * k);
        }
        self.constant += &other.constant * k;
    }

    pub fn scaled(&self, k: &BigRational) -> LinExpr {
        let mut result = LinExpr::zero();
        result.add_scaled(self, k);
        result
    }

    pub fn minus(&self, other: &LinExpr) -> LinExpr {
        let mut result = self.clone();
        result.add_scaled(other, &-BigRational::one());
        result
    }

    pub fn coeff(&self, v: Term) -> BigRational {
        self.coeffs.get(&v).cloned().unwrap_or_else(BigRational::zero)
    }

    pub fn constant_part(&self) -> &BigRational {
        &self.constant
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn vars(&self) -> impl Iterator<Item = Term> + '_ {
        self.coeffs.keys().copied()
    }

    /// Replaces `v` by `by`.
    pub fn substitute(&self, v: Term, by: &LinExpr) -> LinExpr {
        let c = self.coeff(v);
        if c.is_zero() {
            return self.clone();
        }
        let mut result = self.clone();
        result.coeffs.remove(&v);
        result.add_scaled(by, &c);
        result
    }

    /// Evaluates with unassigned variables read as zero.
    pub fn eval(&self, values: &Assignment) -> BigRational {
        let mut sum = self.constant.clone();
        for (v, c) in &self.coeffs {
            if let Some(value) = values.get(v) {
                sum += c * value;
            }
        }
        sum
    }

    pub fn eval_model(&self, model: &Model) -> Option<BigRational> {
        let mut sum = self.constant.clone();
        for (&v, c) in &self.coeffs {
            sum += c * model.real_value(v)?;
        }
        Some(sum)
    }

    pub fn to_term(&self, store: &mut TermStore) -> Term {
        let mut args = Vec::with_capacity(self.coeffs.len() + 1);
        for (&v, c) in &self.coeffs {
            args.push(store.mk_mul(c.clone(), v));
        }
        let constant = store.mk_num(self.constant.clone());
        args.push(constant);
        store.mk_add(args)
    }
}

#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Rel {
    Le,
    Lt,
    Eq,
    Ne,
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rel::Le => write!(f, "<="),
            Rel::Lt => write!(f, "<"),
            Rel::Eq => write!(f, "="),
            Rel::Ne => write!(f, "!="),
        }
    }
}

/// The constraint `expr rel 0`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Constraint {
    pub expr: LinExpr,
    pub rel: Rel,
}

impl Constraint {
    pub fn new(expr: LinExpr, rel: Rel) -> Constraint {
        Constraint { expr, rel }
    }

    /// The constraint expressed by the arithmetic atom `atom` when it has
    /// truth value `polarity`.
    pub fn from_atom(store: &TermStore, atom: Term, polarity: bool) -> Option<Constraint> {
        let (a, b, rel) = match store.kind(atom) {
            TermKind::Le(a, b) => (*a, *b, Rel::Le),
            TermKind::Lt(a, b) => (*a, *b, Rel::Lt),
            TermKind::Eq(a, b) => (*a, *b, Rel::Eq),
            _ => return None,
        };
        let lhs = LinExpr::from_term(store, a)?;
        let rhs = LinExpr::from_term(store, b)?;
        let diff = lhs.minus(&rhs);
        let constraint = match (rel, polarity) {
            (Rel::Le, true) => Constraint::new(diff, Rel::Le),
            (Rel::Le, false) => Constraint::new(rhs.minus(&lhs), Rel::Lt),
            (Rel::Lt, true) => Constraint::new(diff, Rel::Lt),
            (Rel::Lt, false) => Constraint::new(rhs.minus(&lhs), Rel::Le),
            (Rel::Eq, true) => Constraint::new(diff, Rel::Eq),
            (_, _) => Constraint::new(diff, Rel::Ne),
        };
        Some(constraint)
    }

    pub fn holds(&self, values: &Assignment) -> bool {
        holds(self.rel, &self.expr.eval(values))
    }

    /// Renders the constraint as `vars rel -constant`.
    pub fn to_term(&self, store: &mut TermStore) -> Term {
        let mut lhs = self.expr.clone();
        let constant = std::mem::replace(&mut lhs.constant, BigRational::zero());
        let lhs = lhs.to_term(store);
        let rhs = store.mk_num(-constant);
        match self.rel {
            Rel::Le => store.mk_le(lhs, rhs),
            Rel::Lt => store.mk_lt(lhs, rhs),
            Rel::Eq => store.mk_eq(lhs, rhs),
            Rel::Ne => store.mk_distinct(lhs, rhs),
        }
    }
}

fn holds(rel: Rel, value: &BigRational) -> bool {
    match rel {
        Rel::Le => !value.is_positive(),
        Rel::Lt => value.is_negative(),
        Rel::Eq => value.is_zero(),
        Rel::Ne => !value.is_zero(),
    }
}

/// A bound `v >= expr` (lower) or `v <= expr` (upper), strict if `strict`.
#[derive(Clone, Debug)]
struct Bound {
    expr: LinExpr,
    strict: bool,
}

enum Step {
    Define(Term, LinExpr),
    Bounds(Term, Vec<Bound>, Vec<Bound>),
}

fn two() -> BigRational {
    BigRational::from_integer(BigInt::from(2))
}

/// Decides a conjunction of `<=`, `<`, `=` constraints and returns a point
/// satisfying all of them.
fn solve_bounds(constraints: &[Constraint]) -> Option<Assignment> {
    let mut equalities = Vec::new();
    let mut inequalities: Vec<(LinExpr, bool)> = Vec::new();
    for c in constraints {
        match c.rel {
            Rel::Eq => equalities.push(c.expr.clone()),
            Rel::Le => inequalities.push((c.expr.clone(), false)),
            Rel::Lt => inequalities.push((c.expr.clone(), true)),
            Rel::Ne => debug_assert!(false, "disequalities are split by the caller"),
        }
    }
    let mut steps = Vec::new();

    while let Some(eq) = equalities.pop() {
        let (v, c) = match eq.coeffs.iter().next() {
            None => {
                if eq.constant.is_zero() {
                    continue;
                }
                return None;
            }
            Some((&v, c)) => (v, c.clone()),
        };
        // c*v + rest = 0  ==>  v = -rest / c
        let mut rest = eq.clone();
        rest.coeffs.remove(&v);
        let definition = rest.scaled(&(-c.recip()));
        for other in &mut equalities {
            *other = other.substitute(v, &definition);
        }
        for (other, _) in &mut inequalities {
            *other = other.substitute(v, &definition);
        }
        steps.push(Step::Define(v, definition));
    }

    loop {
        let mut pivot = None;
        for (expr, strict) in &inequalities {
            if expr.is_constant() {
                let rel = if *strict { Rel::Lt } else { Rel::Le };
                if !holds(rel, &expr.constant) {
                    return None;
                }
            } else if pivot.is_none() {
                pivot = expr.vars().next();
            }
        }
        let v = match pivot {
            None => break,
            Some(v) => v,
        };
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        let mut remaining = Vec::new();
        for (expr, strict) in inequalities {
            if expr.is_constant() {
                continue;
            }
            let c = expr.coeff(v);
            if c.is_zero() {
                remaining.push((expr, strict));
                continue;
            }
            // c*v + rest ~ 0  ==>  v ~ -rest / c, flipped if c < 0
            let mut rest = expr;
            rest.coeffs.remove(&v);
            let bound = Bound {
                expr: rest.scaled(&(-c.recip())),
                strict,
            };
            if c.is_positive() {
                uppers.push(bound);
            } else {
                lowers.push(bound);
            }
        }
        for lower in &lowers {
            for upper in &uppers {
                remaining.push((lower.expr.minus(&upper.expr), lower.strict || upper.strict));
            }
        }
        inequalities = remaining;
        steps.push(Step::Bounds(v, lowers, uppers));
    }

    let mut values = Assignment::default();
    for step in steps.iter().rev() {
        match step {
            Step::Define(v, definition) => {
                let value = definition.eval(&values);
                values.insert(*v, value);
            }
            Step::Bounds(v, lowers, uppers) => {
                let value = pick_between(&values, lowers, uppers);
                values.insert(*v, value);
            }
        }
    }
    for c in constraints {
        for v in c.expr.vars() {
            values.entry(v).or_insert_with(BigRational::zero);
        }
    }
    Some(values)
}

fn pick_between(values: &Assignment, lowers: &[Bound], uppers: &[Bound]) -> BigRational {
    // tightest bound, strict wins on ties
    let tightest = |bounds: &[Bound], lower: bool| {
        let mut best: Option<(BigRational, bool)> = None;
        for b in bounds {
            let value = b.expr.eval(values);
            best = match best {
                None => Some((value, b.strict)),
                Some((current, strict)) => {
                    let tighter = if lower {
                        value > current
                    } else {
                        value < current
                    };
                    if tighter || (value == current && b.strict) {
                        Some((value, b.strict))
                    } else {
                        Some((current, strict))
                    }
                }
            };
        }
        best
    };
    match (tightest(lowers, true), tightest(uppers, false)) {
        (Some((lo, _)), Some((hi, _))) => {
            if lo == hi {
                lo
            } else {
                (lo + hi) / two()
            }
        }
        (Some((lo, _)), None) => lo + BigRational::one(),
        (None, Some((hi, _))) => hi - BigRational::one(),
        (None, None) => BigRational::zero(),
    }
}

fn combine(p: &Assignment, q: &Assignment, t: &BigRational) -> Assignment {
    let mut result = Assignment::default();
    let zero = BigRational::zero();
    for v in p.keys().chain(q.keys()) {
        let a = p.get(v).unwrap_or(&zero);
        let b = q.get(v).unwrap_or(&zero);
        result.insert(*v, a + (b - a) * t);
    }
    result
}

/// Returns a point satisfying every constraint, `None` if the conjunction is
/// infeasible.
pub fn feasible_point(constraints: &[Constraint]) -> Option<Assignment> {
    let (diseqs, base): (Vec<&Constraint>, Vec<&Constraint>) =
        constraints.iter().partition(|c| c.rel == Rel::Ne);
    let base: Vec<Constraint> = base.into_iter().cloned().collect();
    let mut point = solve_bounds(&base)?;
    let mut satisfied: Vec<&Constraint> = Vec::new();
    for d in diseqs {
        if !d.holds(&point) {
            // a point of the base polytope on either side of the hyperplane
            let mut below = base.clone();
            below.push(Constraint::new(d.expr.clone(), Rel::Lt));
            let other = match solve_bounds(&below) {
                Some(q) => q,
                None => {
                    let mut above = base.clone();
                    above.push(Constraint::new(d.expr.scaled(&-BigRational::one()), Rel::Lt));
                    solve_bounds(&above)?
                }
            };
            // every affine function that is non-zero at one end of the segment
            // vanishes on at most one point of it
            let mut k = 1_i64;
            point = loop {
                let t = BigRational::new(BigInt::one(), BigInt::from(k));
                let candidate = combine(&point, &other, &t);
                if d.holds(&candidate) && satisfied.iter().all(|s| s.holds(&candidate)) {
                    break candidate;
                }
                k += 1;
            };
        }
        satisfied.push(d);
    }
    for c in constraints {
        for v in c.expr.vars() {
            point.entry(v).or_insert_with(BigRational::zero);
        }
    }
    debug_assert!(constraints.iter().all(|c| c.holds(&point)));
    Some(point)
}

pub fn is_feasible(constraints: &[Constraint]) -> bool {
    feasible_point(constraints).is_some()
}

#[cfg(test)]
mod tests {

    use super::*;

    fn int(n: i64) -> BigRational {
        BigRational::from_integer(BigInt::from(n))
    }

    struct Vars {
        store: TermStore,
        x: Term,
        y: Term,
    }

    fn vars() -> Vars {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        Vars { store, x, y }
    }

    /// `a*x + b*y + c rel 0`
    fn constraint(v: &Vars, a: i64, b: i64, c: i64, rel: Rel) -> Constraint {
        let mut expr = LinExpr::constant(int(c));
        expr.add_scaled(&LinExpr::var(v.x), &int(a));
        expr.add_scaled(&LinExpr::var(v.y), &int(b));
        Constraint::new(expr, rel)
    }

    #[test]
    fn linearize_terms() {
        let mut v = vars();
        let store = &mut v.store;
        let two_y = store.mk_mul(int(2), v.y);
        let three = store.mk_int(3);
        let sum = store.mk_add(vec![v.x, two_y, three, v.x]);
        let expr = LinExpr::from_term(store, sum).unwrap();
        assert_eq!(expr.coeff(v.x), int(2));
        assert_eq!(expr.coeff(v.y), int(2));
        assert_eq!(expr.constant_part(), &int(3));
        let p = store.mk_var("p", Sort::Bool);
        assert!(LinExpr::from_term(store, p).is_none());
    }

    #[test]
    fn atoms_under_both_polarities() {
        let mut v = vars();
        let le = v.store.mk_le(v.x, v.y);
        let positive = Constraint::from_atom(&v.store, le, true).unwrap();
        let negative = Constraint::from_atom(&v.store, le, false).unwrap();
        assert_eq!(positive.rel, Rel::Le);
        assert_eq!(negative.rel, Rel::Lt);
        let mut point = Assignment::default();
        point.insert(v.x, int(1));
        point.insert(v.y, int(2));
        assert!(positive.holds(&point));
        assert!(!negative.holds(&point));
    }

    #[test]
    fn open_interval_is_feasible() {
        let v = vars();
        // 0 < x < 1
        let cs = vec![
            constraint(&v, -1, 0, 0, Rel::Lt),
            constraint(&v, 1, 0, -1, Rel::Lt),
        ];
        let point = feasible_point(&cs).unwrap();
        assert_eq!(point[&v.x], BigRational::new(BigInt::from(1), BigInt::from(2)));
    }

    #[test]
    fn strict_bounds_conflict() {
        let v = vars();
        // x < y, y <= x
        let cs = vec![
            constraint(&v, 1, -1, 0, Rel::Lt),
            constraint(&v, -1, 1, 0, Rel::Le),
        ];
        assert!(!is_feasible(&cs));
        // x <= y, y <= x is fine
        let cs = vec![
            constraint(&v, 1, -1, 0, Rel::Le),
            constraint(&v, -1, 1, 0, Rel::Le),
        ];
        assert!(is_feasible(&cs));
    }

    #[test]
    fn equalities_are_substituted() {
        let v = vars();
        // x = y + 1, y >= 2, x <= 3
        let cs = vec![
            constraint(&v, 1, -1, -1, Rel::Eq),
            constraint(&v, 0, -1, 2, Rel::Le),
            constraint(&v, 1, 0, -3, Rel::Le),
        ];
        let point = feasible_point(&cs).unwrap();
        assert_eq!(point[&v.x], int(3));
        assert_eq!(point[&v.y], int(2));
        let mut cs = cs;
        cs.push(constraint(&v, 0, 1, -2, Rel::Ne));
        assert!(!is_feasible(&cs));
    }

    #[test]
    fn disequalities_move_the_point() {
        let v = vars();
        // 0 <= x <= 2, x != 1, y = x, y != 0
        let cs = vec![
            constraint(&v, -1, 0, 0, Rel::Le),
            constraint(&v, 1, 0, -2, Rel::Le),
            constraint(&v, 1, 0, -1, Rel::Ne),
            constraint(&v, 1, -1, 0, Rel::Eq),
            constraint(&v, 0, 1, 0, Rel::Ne),
        ];
        let point = feasible_point(&cs).unwrap();
        assert!(cs.iter().all(|c| c.holds(&point)));
    }

    #[test]
    fn constraint_terms() {
        let mut v = vars();
        let c = constraint(&v, 1, 0, -1, Rel::Lt);
        let t = c.to_term(&mut v.store);
        let one = v.store.mk_int(1);
        assert_eq!(t, v.store.mk_lt(v.x, one));
        let trivial = Constraint::new(LinExpr::constant(int(-1)), Rel::Le);
        let t = trivial.to_term(&mut v.store);
        assert!(v.store.is_true(t));
    }
}
