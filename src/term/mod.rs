//! Hash-consed formulas over booleans and linear real arithmetic.
//!
//! Terms are immutable nodes owned by a `TermStore` and addressed by `Term`
//! handles. Structurally equal nodes are interned to the same handle, so
//! handle equality is structural equality.

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

mod traverse;
pub use self::traverse::*;

#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Hash)]
pub struct Term(u32);

impl Term {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum Sort {
    Bool,
    Real,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::Real => write!(f, "Real"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum TermKind {
    True,
    False,
    Var(String, Sort),
    Num(BigRational),
    Not(Term),
    And(Vec<Term>),
    Or(Vec<Term>),
    Iff(Term, Term),
    Add(Vec<Term>),
    /// Scaling of a real term by a constant, the only multiplication allowed
    Mul(BigRational, Term),
    Le(Term, Term),
    Lt(Term, Term),
    /// Equality between real terms, boolean equality is `Iff`
    Eq(Term, Term),
    Exists(Vec<Term>, Term),
    Forall(Vec<Term>, Term),
}

#[derive(Default)]
pub struct TermStore {
    nodes: Vec<TermKind>,
    table: FxHashMap<TermKind, Term>,
    names: FxHashSet<String>,
    fresh: FxHashMap<String, usize>,
}

impl TermStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn intern(&mut self, kind: TermKind) -> Term {
        if let Some(&t) = self.table.get(&kind) {
            return t;
        }
        let t = Term(self.nodes.len() as u32);
        self.nodes.push(kind.clone());
        self.table.insert(kind, t);
        t
    }

    pub fn kind(&self, t: Term) -> &TermKind {
        &self.nodes[t.index()]
    }

    pub fn sort(&self, t: Term) -> Sort {
        match self.kind(t) {
            TermKind::Var(_, sort) => *sort,
            TermKind::Num(_) | TermKind::Add(_) | TermKind::Mul(_, _) => Sort::Real,
            _ => Sort::Bool,
        }
    }

    pub fn mk_true(&mut self) -> Term {
        self.intern(TermKind::True)
    }

    pub fn mk_false(&mut self) -> Term {
        self.intern(TermKind::False)
    }

    pub fn mk_bool(&mut self, value: bool) -> Term {
        if value {
            self.mk_true()
        } else {
            self.mk_false()
        }
    }

    pub fn is_true(&self, t: Term) -> bool {
        *self.kind(t) == TermKind::True
    }

    pub fn is_false(&self, t: Term) -> bool {
        *self.kind(t) == TermKind::False
    }

    /// Returns the variable named `name`, declaring it on first use.
    pub fn mk_var(&mut self, name: &str, sort: Sort) -> Term {
        self.names.insert(name.to_string());
        self.intern(TermKind::Var(name.to_string(), sort))
    }

    /// Returns a variable whose name has not been used in this store yet.
    pub fn mk_fresh(&mut self, hint: &str, sort: Sort) -> Term {
        let mut counter = self.fresh.get(hint).copied().unwrap_or(0);
        let name = loop {
            let candidate = format!("{}!{}", hint, counter);
            counter += 1;
            if !self.names.contains(&candidate) {
                break candidate;
            }
        };
        self.fresh.insert(hint.to_string(), counter);
        self.mk_var(&name, sort)
    }

    pub fn is_var(&self, t: Term) -> bool {
        matches!(self.kind(t), TermKind::Var(_, _))
    }

    pub fn is_bool_var(&self, t: Term) -> bool {
        matches!(self.kind(t), TermKind::Var(_, Sort::Bool))
    }

    pub fn var_name(&self, t: Term) -> Option<&str> {
        match self.kind(t) {
            TermKind::Var(name, _) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn is_quantifier(&self, t: Term) -> bool {
        matches!(self.kind(t), TermKind::Exists(_, _) | TermKind::Forall(_, _))
    }

    /// Boolean terms that are not built from boolean connectives.
    pub fn is_atom(&self, t: Term) -> bool {
        match self.kind(t) {
            TermKind::True
            | TermKind::False
            | TermKind::Not(_)
            | TermKind::And(_)
            | TermKind::Or(_)
            | TermKind::Iff(_, _) => false,
            _ => self.sort(t) == Sort::Bool,
        }
    }

    pub fn mk_num(&mut self, value: BigRational) -> Term {
        self.intern(TermKind::Num(value))
    }

    pub fn mk_int(&mut self, value: i64) -> Term {
        self.mk_num(BigRational::from_integer(BigInt::from(value)))
    }

    pub fn num_value(&self, t: Term) -> Option<&BigRational> {
        match self.kind(t) {
            TermKind::Num(n) => Some(n),
            _ => None,
        }
    }

    pub fn mk_not(&mut self, a: Term) -> Term {
        match self.kind(a) {
            TermKind::True => self.mk_false(),
            TermKind::False => self.mk_true(),
            TermKind::Not(inner) => *inner,
            _ => self.intern(TermKind::Not(a)),
        }
    }

    /// Flattens nested conjunctions, drops `true` and duplicates, and detects
    /// `false` and complementary conjuncts.
    pub fn mk_and<I: IntoIterator<Item = Term>>(&mut self, args: I) -> Term {
        match self.flatten(args, true) {
            None => self.mk_false(),
            Some(flat) => match flat.len() {
                0 => self.mk_true(),
                1 => flat[0],
                _ => self.intern(TermKind::And(flat)),
            },
        }
    }

    pub fn mk_or<I: IntoIterator<Item = Term>>(&mut self, args: I) -> Term {
        match self.flatten(args, false) {
            None => self.mk_true(),
            Some(flat) => match flat.len() {
                0 => self.mk_false(),
                1 => flat[0],
                _ => self.intern(TermKind::Or(flat)),
            },
        }
    }

    /// Returns `None` if the absorbing element was found.
    fn flatten<I: IntoIterator<Item = Term>>(&self, args: I, conjunction: bool) -> Option<Vec<Term>> {
        let mut todo: Vec<Term> = args.into_iter().collect();
        todo.reverse();
        let mut flat = Vec::new();
        let mut seen = FxHashSet::default();
        while let Some(t) = todo.pop() {
            match (self.kind(t), conjunction) {
                (TermKind::True, true) | (TermKind::False, false) => continue,
                (TermKind::False, true) | (TermKind::True, false) => return None,
                (TermKind::And(inner), true) | (TermKind::Or(inner), false) => {
                    todo.extend(inner.iter().rev().copied());
                }
                _ => {
                    if seen.insert(t) {
                        flat.push(t);
                    }
                }
            }
        }
        for &t in &flat {
            if let TermKind::Not(inner) = self.kind(t) {
                if seen.contains(inner) {
                    return None;
                }
            }
        }
        Some(flat)
    }

    pub fn mk_iff(&mut self, a: Term, b: Term) -> Term {
        if a == b {
            return self.mk_true();
        }
        if self.is_true(a) {
            return b;
        }
        if self.is_true(b) {
            return a;
        }
        if self.is_false(a) {
            return self.mk_not(b);
        }
        if self.is_false(b) {
            return self.mk_not(a);
        }
        let complementary = match (self.kind(a), self.kind(b)) {
            (TermKind::Not(x), _) if *x == b => true,
            (_, TermKind::Not(y)) if *y == a => true,
            _ => false,
        };
        if complementary {
            return self.mk_false();
        }
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.intern(TermKind::Iff(a, b))
    }

    pub fn mk_implies(&mut self, a: Term, b: Term) -> Term {
        let not_a = self.mk_not(a);
        self.mk_or(vec![not_a, b])
    }

    /// Equality, dispatching to `mk_iff` for boolean arguments.
    pub fn mk_eq(&mut self, a: Term, b: Term) -> Term {
        if self.sort(a) == Sort::Bool {
            return self.mk_iff(a, b);
        }
        if a == b {
            return self.mk_true();
        }
        if let (Some(x), Some(y)) = (self.num_value(a), self.num_value(b)) {
            let value = x == y;
            return self.mk_bool(value);
        }
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        self.intern(TermKind::Eq(a, b))
    }

    pub fn mk_distinct(&mut self, a: Term, b: Term) -> Term {
        let eq = self.mk_eq(a, b);
        self.mk_not(eq)
    }

    pub fn mk_add<I: IntoIterator<Item = Term>>(&mut self, args: I) -> Term {
        let mut todo: Vec<Term> = args.into_iter().collect();
        todo.reverse();
        let mut flat = Vec::new();
        let mut constant = BigRational::zero();
        while let Some(t) = todo.pop() {
            match self.kind(t) {
                TermKind::Num(n) => constant += n,
                TermKind::Add(inner) => todo.extend(inner.iter().rev().copied()),
                _ => flat.push(t),
            }
        }
        if !constant.is_zero() || flat.is_empty() {
            let c = self.mk_num(constant);
            flat.push(c);
        }
        if flat.len() == 1 {
            flat[0]
        } else {
            self.intern(TermKind::Add(flat))
        }
    }

    pub fn mk_mul(&mut self, coefficient: BigRational, t: Term) -> Term {
        if coefficient.is_zero() {
            return self.mk_num(coefficient);
        }
        if coefficient.is_one() {
            return t;
        }
        match self.kind(t) {
            TermKind::Num(n) => {
                let value = n * &coefficient;
                self.mk_num(value)
            }
            TermKind::Mul(inner_coefficient, inner) => {
                let value = inner_coefficient * &coefficient;
                let inner = *inner;
                self.mk_mul(value, inner)
            }
            _ => self.intern(TermKind::Mul(coefficient, t)),
        }
    }

    pub fn mk_neg(&mut self, t: Term) -> Term {
        self.mk_mul(-BigRational::one(), t)
    }

    pub fn mk_sub(&mut self, a: Term, b: Term) -> Term {
        let neg = self.mk_neg(b);
        self.mk_add(vec![a, neg])
    }

    pub fn mk_le(&mut self, a: Term, b: Term) -> Term {
        if a == b {
            return self.mk_true();
        }
        if let (Some(x), Some(y)) = (self.num_value(a), self.num_value(b)) {
            let value = x <= y;
            return self.mk_bool(value);
        }
        self.intern(TermKind::Le(a, b))
    }

    pub fn mk_lt(&mut self, a: Term, b: Term) -> Term {
        if a == b {
            return self.mk_false();
        }
        if let (Some(x), Some(y)) = (self.num_value(a), self.num_value(b)) {
            let value = x < y;
            return self.mk_bool(value);
        }
        self.intern(TermKind::Lt(a, b))
    }

    pub fn mk_ge(&mut self, a: Term, b: Term) -> Term {
        self.mk_le(b, a)
    }

    pub fn mk_gt(&mut self, a: Term, b: Term) -> Term {
        self.mk_lt(b, a)
    }

    pub fn mk_quantifier(&mut self, forall: bool, vars: Vec<Term>, body: Term) -> Term {
        if vars.is_empty() || self.is_true(body) || self.is_false(body) {
            return body;
        }
        if forall {
            self.intern(TermKind::Forall(vars, body))
        } else {
            self.intern(TermKind::Exists(vars, body))
        }
    }

    pub fn mk_exists(&mut self, vars: Vec<Term>, body: Term) -> Term {
        self.mk_quantifier(false, vars, body)
    }

    pub fn mk_forall(&mut self, vars: Vec<Term>, body: Term) -> Term {
        self.mk_quantifier(true, vars, body)
    }

    /// The immediate sub-terms; bound variables of quantifiers are not children.
    pub fn children(&self, t: Term) -> Vec<Term> {
        match self.kind(t) {
            TermKind::True | TermKind::False | TermKind::Var(_, _) | TermKind::Num(_) => Vec::new(),
            TermKind::Not(a) | TermKind::Mul(_, a) => vec![*a],
            TermKind::And(args) | TermKind::Or(args) | TermKind::Add(args) => args.clone(),
            TermKind::Iff(a, b) | TermKind::Le(a, b) | TermKind::Lt(a, b) | TermKind::Eq(a, b) => {
                vec![*a, *b]
            }
            TermKind::Exists(_, body) | TermKind::Forall(_, body) => vec![*body],
        }
    }

    /// Rebuilds `t` with the given children through the smart constructors.
    pub fn rebuild(&mut self, t: Term, args: &[Term]) -> Term {
        match self.kind(t).clone() {
            TermKind::True | TermKind::False | TermKind::Var(_, _) | TermKind::Num(_) => t,
            TermKind::Not(_) => self.mk_not(args[0]),
            TermKind::And(_) => self.mk_and(args.iter().copied()),
            TermKind::Or(_) => self.mk_or(args.iter().copied()),
            TermKind::Iff(_, _) => self.mk_iff(args[0], args[1]),
            TermKind::Add(_) => self.mk_add(args.iter().copied()),
            TermKind::Mul(c, _) => self.mk_mul(c, args[0]),
            TermKind::Le(_, _) => self.mk_le(args[0], args[1]),
            TermKind::Lt(_, _) => self.mk_lt(args[0], args[1]),
            TermKind::Eq(_, _) => self.mk_eq(args[0], args[1]),
            TermKind::Exists(vars, _) => self.mk_exists(vars, args[0]),
            TermKind::Forall(vars, _) => self.mk_forall(vars, args[0]),
        }
    }

    pub fn display(&self, t: Term) -> TermDisplay {
        TermDisplay { store: self, term: t }
    }

    pub fn display_all<'a>(&'a self, terms: &'a [Term]) -> TermsDisplay<'a> {
        TermsDisplay { store: self, terms }
    }
}

/// SMT-LIB rendering of a term.
pub struct TermDisplay<'a> {
    store: &'a TermStore,
    term: Term,
}

enum Item<'a> {
    Term(Term),
    Text(&'static str),
    Num(&'a BigRational),
    Binder(Term),
}

/// SMT-LIB rendering of a rational constant.
pub fn format_rational(value: &BigRational) -> String {
    let abs = value.abs();
    let body = if abs.is_integer() {
        format!("{}", abs.numer())
    } else {
        format!("(/ {} {})", abs.numer(), abs.denom())
    };
    if value.is_negative() {
        format!("(- {})", body)
    } else {
        body
    }
}

fn write_num(f: &mut fmt::Formatter, value: &BigRational) -> fmt::Result {
    f.write_str(&format_rational(value))
}

impl<'a> fmt::Display for TermDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let store = self.store;
        let mut stack = vec![Item::Term(self.term)];
        while let Some(item) = stack.pop() {
            let t = match item {
                Item::Text(s) => {
                    f.write_str(s)?;
                    continue;
                }
                Item::Num(n) => {
                    write_num(f, n)?;
                    continue;
                }
                Item::Binder(v) => {
                    write!(f, "({} {})", store.var_name(v).unwrap_or("?"), store.sort(v))?;
                    continue;
                }
                Item::Term(t) => t,
            };
            let (head, args): (&'static str, Vec<Term>) = match store.kind(t) {
                TermKind::True => {
                    f.write_str("true")?;
                    continue;
                }
                TermKind::False => {
                    f.write_str("false")?;
                    continue;
                }
                TermKind::Var(name, _) => {
                    f.write_str(name)?;
                    continue;
                }
                TermKind::Num(n) => {
                    write_num(f, n)?;
                    continue;
                }
                TermKind::Mul(c, a) => {
                    f.write_str("(* ")?;
                    stack.push(Item::Text(")"));
                    stack.push(Item::Term(*a));
                    stack.push(Item::Text(" "));
                    stack.push(Item::Num(c));
                    continue;
                }
                TermKind::Exists(vars, body) | TermKind::Forall(vars, body) => {
                    if let TermKind::Exists(_, _) = store.kind(t) {
                        f.write_str("(exists (")?;
                    } else {
                        f.write_str("(forall (")?;
                    }
                    stack.push(Item::Text(")"));
                    stack.push(Item::Term(*body));
                    stack.push(Item::Text(") "));
                    for (i, &v) in vars.iter().enumerate().rev() {
                        stack.push(Item::Binder(v));
                        if i > 0 {
                            stack.push(Item::Text(" "));
                        }
                    }
                    continue;
                }
                TermKind::Not(a) => ("not", vec![*a]),
                TermKind::And(args) => ("and", args.clone()),
                TermKind::Or(args) => ("or", args.clone()),
                TermKind::Iff(a, b) => ("=", vec![*a, *b]),
                TermKind::Add(args) => ("+", args.clone()),
                TermKind::Le(a, b) => ("<=", vec![*a, *b]),
                TermKind::Lt(a, b) => ("<", vec![*a, *b]),
                TermKind::Eq(a, b) => ("=", vec![*a, *b]),
            };
            write!(f, "({}", head)?;
            stack.push(Item::Text(")"));
            for &a in args.iter().rev() {
                stack.push(Item::Term(a));
                stack.push(Item::Text(" "));
            }
        }
        Ok(())
    }
}

pub struct TermsDisplay<'a> {
    store: &'a TermStore,
    terms: &'a [Term],
}

impl<'a> fmt::Display for TermsDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, &t) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", self.store.display(t))?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn interning_shares_handles() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let one = store.mk_int(1);
        let a = store.mk_le(x, one);
        let b = store.mk_le(x, one);
        assert_eq!(a, b);
        assert_eq!(store.mk_var("x", Sort::Real), x);
    }

    #[test]
    fn boolean_simplifications() {
        let mut store = TermStore::new();
        let p = store.mk_var("p", Sort::Bool);
        let q = store.mk_var("q", Sort::Bool);
        let t = store.mk_true();
        let f = store.mk_false();
        let not_p = store.mk_not(p);
        assert_eq!(store.mk_not(not_p), p);
        assert_eq!(store.mk_and(vec![p, t]), p);
        assert_eq!(store.mk_and(vec![p, f]), f);
        assert_eq!(store.mk_and(vec![p, not_p]), f);
        assert_eq!(store.mk_or(vec![p, not_p]), t);
        assert_eq!(store.mk_and(Vec::new()), t);
        assert_eq!(store.mk_or(Vec::new()), f);

        let pq = store.mk_and(vec![p, q]);
        let nested = store.mk_and(vec![pq, p]);
        assert_eq!(nested, pq);
        assert_eq!(store.mk_iff(p, q), store.mk_iff(q, p));
        assert_eq!(store.mk_iff(p, not_p), f);
    }

    #[test]
    fn arithmetic_constant_folding() {
        let mut store = TermStore::new();
        let one = store.mk_int(1);
        let two = store.mk_int(2);
        let lt = store.mk_lt(one, two);
        assert!(store.is_true(lt));
        let sum = store.mk_add(vec![one, one]);
        assert_eq!(sum, two);
        let x = store.mk_var("x", Sort::Real);
        let scaled = store.mk_mul(BigRational::zero(), x);
        assert_eq!(store.num_value(scaled), Some(&BigRational::zero()));
        let diff = store.mk_sub(x, x);
        assert_eq!(store.sort(diff), Sort::Real);
    }

    #[test]
    fn fresh_names_are_unique() {
        let mut store = TermStore::new();
        store.mk_var("p!0", Sort::Bool);
        let a = store.mk_fresh("p", Sort::Bool);
        let b = store.mk_fresh("p", Sort::Bool);
        assert_ne!(a, b);
        assert_eq!(store.var_name(a), Some("p!1"));
        assert_eq!(store.var_name(b), Some("p!2"));
    }

    #[test]
    fn smtlib_display() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        let half = store.mk_num(BigRational::new(BigInt::from(-1), BigInt::from(2)));
        let sum = store.mk_add(vec![x, half]);
        let le = store.mk_le(sum, y);
        let q = store.mk_exists(vec![x], le);
        assert_eq!(
            format!("{}", store.display(q)),
            "(exists ((x Real)) (<= (+ x (- (/ 1 2))) y))"
        );
        let scaled = store.mk_mul(BigRational::from_integer(BigInt::from(3)), y);
        assert_eq!(format!("{}", store.display(scaled)), "(* 3 y)");
    }

}
