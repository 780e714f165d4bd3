use crate::term::{format_rational, Term, TermKind, TermStore};
use num_rational::BigRational;
use num_traits::Zero;
use rustc_hash::{FxHashMap, FxHashSet};
use std::error::Error;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Real(BigRational),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// The variable has no value in the model
    Unassigned(String),
    /// Quantified formulas are not evaluated
    Quantifier,
    /// A term was used with the wrong sort
    Sort,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvalError::Unassigned(name) => write!(f, "variable `{}` is not assigned", name),
            EvalError::Quantifier => write!(f, "cannot evaluate quantified formula"),
            EvalError::Sort => write!(f, "ill-sorted term"),
        }
    }
}

impl Error for EvalError {}

/// An assignment of booleans to boolean variables and rationals to real
/// variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Model {
    bools: FxHashMap<Term, bool>,
    reals: FxHashMap<Term, BigRational>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign_bool(&mut self, var: Term, value: bool) {
        self.bools.insert(var, value);
    }

    pub fn assign_real(&mut self, var: Term, value: BigRational) {
        self.reals.insert(var, value);
    }

    /// Fixes the value of a (possibly freshly introduced) variable, overriding
    /// any previous value.
    pub fn register_fixed_value(&mut self, var: Term, value: Value) {
        match value {
            Value::Bool(b) => self.assign_bool(var, b),
            Value::Real(r) => self.assign_real(var, r),
        }
    }

    pub fn bool_value(&self, var: Term) -> Option<bool> {
        self.bools.get(&var).copied()
    }

    pub fn real_value(&self, var: Term) -> Option<&BigRational> {
        self.reals.get(&var)
    }

    pub fn contains(&self, var: Term) -> bool {
        self.bools.contains_key(&var) || self.reals.contains_key(&var)
    }

    /// Assigned variables, sorted by handle.
    pub fn variables(&self) -> Vec<Term> {
        let mut vars: Vec<Term> = self.bools.keys().chain(self.reals.keys()).copied().collect();
        vars.sort();
        vars
    }

    pub fn len(&self) -> usize {
        self.bools.len() + self.reals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evaluate(&self, store: &TermStore, t: Term) -> Result<Value, EvalError> {
        let mut memo: FxHashMap<Term, Value> = FxHashMap::default();
        let mut stack = vec![t];
        while let Some(&top) = stack.last() {
            if memo.contains_key(&top) {
                stack.pop();
                continue;
            }
            if store.is_quantifier(top) {
                return Err(EvalError::Quantifier);
            }
            let children = store.children(top);
            let pending: Vec<Term> = children
                .iter()
                .filter(|&&c| !memo.contains_key(&c))
                .copied()
                .collect();
            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }
            let value = self.evaluate_node(store, top, &memo)?;
            memo.insert(top, value);
            stack.pop();
        }
        memo.remove(&t).ok_or(EvalError::Sort)
    }

    fn evaluate_node(
        &self,
        store: &TermStore,
        t: Term,
        memo: &FxHashMap<Term, Value>,
    ) -> Result<Value, EvalError> {
        let boolean = |c: &Term| match memo.get(c) {
            Some(Value::Bool(b)) => Ok(*b),
            _ => Err(EvalError::Sort),
        };
        let real = |c: &Term| match memo.get(c) {
            Some(Value::Real(r)) => Ok(r),
            _ => Err(EvalError::Sort),
        };
        let value = match store.kind(t) {
            TermKind::True => Value::Bool(true),
            TermKind::False => Value::Bool(false),
            TermKind::Var(name, _) => {
                if let Some(&b) = self.bools.get(&t) {
                    Value::Bool(b)
                } else if let Some(r) = self.reals.get(&t) {
                    Value::Real(r.clone())
                } else {
                    return Err(EvalError::Unassigned(name.clone()));
                }
            }
            TermKind::Num(n) => Value::Real(n.clone()),
            TermKind::Not(a) => Value::Bool(!boolean(a)?),
            TermKind::And(args) => {
                let mut result = true;
                for a in args {
                    result &= boolean(a)?;
                }
                Value::Bool(result)
            }
            TermKind::Or(args) => {
                let mut result = false;
                for a in args {
                    result |= boolean(a)?;
                }
                Value::Bool(result)
            }
            TermKind::Iff(a, b) => Value::Bool(boolean(a)? == boolean(b)?),
            TermKind::Add(args) => {
                let mut sum = BigRational::zero();
                for a in args {
                    sum += real(a)?;
                }
                Value::Real(sum)
            }
            TermKind::Mul(c, a) => Value::Real(c * real(a)?),
            TermKind::Le(a, b) => Value::Bool(real(a)? <= real(b)?),
            TermKind::Lt(a, b) => Value::Bool(real(a)? < real(b)?),
            TermKind::Eq(a, b) => Value::Bool(real(a)? == real(b)?),
            TermKind::Exists(_, _) | TermKind::Forall(_, _) => return Err(EvalError::Quantifier),
        };
        Ok(value)
    }

    pub fn is_true(&self, store: &TermStore, t: Term) -> Result<bool, EvalError> {
        match self.evaluate(store, t)? {
            Value::Bool(b) => Ok(b),
            Value::Real(_) => Err(EvalError::Sort),
        }
    }

    pub fn display<'a>(&'a self, store: &'a TermStore) -> ModelDisplay<'a> {
        ModelDisplay { model: self, store }
    }
}

pub struct ModelDisplay<'a> {
    model: &'a Model,
    store: &'a TermStore,
}

impl<'a> fmt::Display for ModelDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut entries: Vec<(String, String)> = Vec::new();
        for var in self.model.variables() {
            let name = self.store.var_name(var).unwrap_or("?").to_string();
            let value = match (self.model.bool_value(var), self.model.real_value(var)) {
                (Some(b), _) => b.to_string(),
                (None, Some(r)) => format_rational(r),
                (None, None) => continue,
            };
            entries.push((name, value));
        }
        entries.sort();
        for (name, value) in entries {
            writeln!(f, "{} -> {}", name, value)?;
        }
        Ok(())
    }
}

/// Records variables introduced or bound by the solver that must not show up
/// in a model handed back to the caller.
#[derive(Clone, Debug, Default)]
pub struct ModelConverter {
    hidden: FxHashSet<Term>,
}

impl ModelConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide(&mut self, var: Term) {
        self.hidden.insert(var);
    }

    pub fn is_hidden(&self, var: Term) -> bool {
        self.hidden.contains(&var)
    }

    pub fn reset(&mut self) {
        self.hidden.clear();
    }

    /// Lifts an internal model to the externally observable one.
    pub fn apply(&self, model: &Model) -> Model {
        let mut result = Model::new();
        for (&var, &value) in &model.bools {
            if !self.is_hidden(var) {
                result.assign_bool(var, value);
            }
        }
        for (&var, value) in &model.reals {
            if !self.is_hidden(var) {
                result.assign_real(var, value.clone());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::term::Sort;
    use num_bigint::BigInt;

    fn rational(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn evaluates_linear_arithmetic() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        let two_y = store.mk_mul(rational(2, 1), y);
        let sum = store.mk_add(vec![x, two_y]);
        let one = store.mk_int(1);
        let fml = store.mk_lt(sum, one);

        let mut model = Model::new();
        model.assign_real(x, rational(1, 2));
        model.assign_real(y, rational(1, 8));
        assert_eq!(model.is_true(&store, fml), Ok(true));
        model.register_fixed_value(y, Value::Real(rational(1, 4)));
        assert_eq!(model.is_true(&store, fml), Ok(false));
    }

    #[test]
    fn unassigned_and_quantified_terms_fail() {
        let mut store = TermStore::new();
        let p = store.mk_var("p", Sort::Bool);
        let q = store.mk_var("q", Sort::Bool);
        let fml = store.mk_or(vec![p, q]);
        let mut model = Model::new();
        model.assign_bool(p, true);
        assert_eq!(
            model.is_true(&store, fml),
            Err(EvalError::Unassigned("q".to_string()))
        );
        let quantified = store.mk_exists(vec![q], fml);
        assert_eq!(model.is_true(&store, quantified), Err(EvalError::Quantifier));
    }

    #[test]
    fn converter_hides_variables() {
        let mut store = TermStore::new();
        let p = store.mk_var("p", Sort::Bool);
        let x = store.mk_var("x", Sort::Real);
        let mut model = Model::new();
        model.assign_bool(p, true);
        model.assign_real(x, rational(3, 1));
        let mut converter = ModelConverter::new();
        converter.hide(p);
        let external = converter.apply(&model);
        assert!(!external.contains(p));
        assert_eq!(external.real_value(x), Some(&rational(3, 1)));
        assert_eq!(format!("{}", external.display(&store)), "x -> 3\n");
    }
}
