//! Predicate abstraction of quantifier-free formulas.
//!
//! Every atom of a formula is replaced by a fresh boolean predicate. The
//! predicates are filed into buckets by the quantifier level of their atom;
//! when the search descends a level, the predicates of the level just left
//! are fixed by assumptions taken from the model found there.

use crate::level::Level;
use crate::model::{EvalError, Model, ModelConverter, Value};
use crate::term::{rewrite, Sort, Term, TermKind, TermStore};
use crate::utils::cancel::{CancellationToken, Canceled};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

#[derive(Default)]
pub struct PredAbs {
    /// predicate to the atom it abstracts
    pred2lit: FxHashMap<Term, Term>,
    /// atom to its predicate, the first registration wins
    lit2pred: FxHashMap<Term, Term>,
    asm2pred: FxHashMap<Term, Term>,
    pred2asm: FxHashMap<Term, Term>,
    elevel: FxHashMap<Term, Level>,
    /// predicates by level bucket
    preds: Vec<Vec<Term>>,
    asms: Vec<Term>,
    asms_lim: Vec<usize>,
    converter: ModelConverter,
    token: CancellationToken,
}

fn is_connective(store: &TermStore, t: Term) -> bool {
    matches!(
        store.kind(t),
        TermKind::True
            | TermKind::False
            | TermKind::Not(_)
            | TermKind::And(_)
            | TermKind::Or(_)
            | TermKind::Iff(_, _)
    )
}

impl PredAbs {
    /// Every traversal polls `token`, it is kept across resets.
    pub fn new(token: CancellationToken) -> Self {
        PredAbs {
            token,
            ..PredAbs::default()
        }
    }

    pub fn reset(&mut self) {
        *self = PredAbs::new(self.token.clone());
    }

    pub fn converter(&self) -> &ModelConverter {
        &self.converter
    }

    /// Hides `var` from models handed to the caller.
    pub fn hide(&mut self, var: Term) {
        self.converter.hide(var);
    }

    pub fn fresh_bool(&mut self, store: &mut TermStore, hint: &str) -> Term {
        let p = store.mk_fresh(hint, Sort::Bool);
        self.hide(p);
        p
    }

    pub fn num_predicates(&self) -> usize {
        self.pred2lit.len()
    }

    pub fn add_pred(&mut self, p: Term, lit: Term) {
        self.pred2lit.insert(p, lit);
        self.lit2pred.entry(lit).or_insert(p);
    }

    fn add_asm(&mut self, p: Term, assumption: Term) {
        debug_assert!(!self.asm2pred.contains_key(&assumption));
        self.asm2pred.insert(assumption, p);
        self.pred2asm.insert(p, assumption);
    }

    /// Number of scopes pushed, i.e., the current search depth.
    pub fn num_scopes(&self) -> usize {
        self.asms_lim.len()
    }

    pub fn push(&mut self) {
        self.asms_lim.push(self.asms.len());
    }

    pub fn pop(&mut self, num_scopes: usize) {
        debug_assert!(num_scopes <= self.asms_lim.len());
        let l = self.asms_lim.len() - num_scopes;
        self.asms.truncate(self.asms_lim[l]);
        self.asms_lim.truncate(l);
    }

    /// Assumption literals decided so far.
    pub fn decided(&self) -> &[Term] {
        &self.asms
    }

    pub fn insert(&mut self, p: Term, level: &Level) {
        let bucket = level.bucket();
        if self.preds.len() <= bucket {
            self.preds.resize_with(bucket + 1, Vec::new);
        }
        self.preds[bucket].push(p);
    }

    pub fn set_level(&mut self, t: Term, level: Level) {
        self.elevel.insert(t, level);
    }

    pub fn level(&self, t: Term) -> Option<&Level> {
        self.elevel.get(&t)
    }

    /// The level of `t`, merged bottom-up from the levels of its sub-terms.
    /// Sub-terms without a level are unbounded; results are cached.
    pub fn compute_level(&mut self, store: &TermStore, t: Term) -> Result<Level, Canceled> {
        let mut todo = vec![t];
        while let Some(&a) = todo.last() {
            self.token.check()?;
            if self.elevel.contains_key(&a) {
                todo.pop();
                continue;
            }
            let mut level = Level::unbounded();
            let mut has_new = false;
            for c in store.children(a) {
                match self.elevel.get(&c) {
                    Some(l) => level.merge(l),
                    None => {
                        todo.push(c);
                        has_new = true;
                    }
                }
            }
            if !has_new {
                self.elevel.insert(a, level);
                todo.pop();
            }
        }
        Ok(self.elevel[&t])
    }

    /// Replaces every atom of `fml` by a predicate, appending the definition
    /// `p <=> atom` of every new predicate to `defs`. `level` accumulates the
    /// level of the whole formula. Boolean variables stand for themselves;
    /// quantified sub-formulas are atoms.
    pub fn abstract_atoms(
        &mut self,
        store: &mut TermStore,
        fml: Term,
        level: &mut Level,
        defs: &mut Vec<Term>,
    ) -> Result<(), Canceled> {
        let mut visited = FxHashSet::default();
        let mut todo = vec![fml];
        while let Some(a) = todo.pop() {
            self.token.check()?;
            if !visited.insert(a) {
                continue;
            }
            if let Some(p) = self.lit2pred.get(&a) {
                let l = self.elevel.get(p).copied().unwrap_or_default();
                level.merge(&l);
                continue;
            }
            if store.is_bool_var(a) {
                let l = self.elevel.get(&a).copied().unwrap_or_default();
                level.merge(&l);
                if !self.pred2lit.contains_key(&a) {
                    self.add_pred(a, a);
                    self.insert(a, &l);
                }
                continue;
            }
            if is_connective(store, a) {
                todo.extend(
                    store
                        .children(a)
                        .into_iter()
                        .filter(|c| !visited.contains(c)),
                );
                continue;
            }
            if store.sort(a) != Sort::Bool {
                continue;
            }
            let r = self.fresh_bool(store, "p");
            let l = self.compute_level(store, a)?;
            self.add_pred(r, a);
            self.elevel.insert(r, l);
            defs.push(store.mk_iff(r, a));
            self.insert(r, &l);
            level.merge(&l);
            trace!("abstract {} as {} at {}", store.display(a), store.display(r), l);
        }
        Ok(())
    }

    /// Rewrites `fml` over predicates only.
    pub fn mk_abstract(&self, store: &mut TermStore, fml: Term) -> Result<Term, Canceled> {
        let lit2pred = &self.lit2pred;
        let abstracted = rewrite(store, &[fml], &self.token, |_, t| lit2pred.get(&t).copied())?;
        Ok(abstracted[0])
    }

    /// Replaces every key of `map` occurring in `fmls` by its value. Terms
    /// not mentioning a key are returned unchanged.
    pub fn mk_concrete(
        store: &mut TermStore,
        fmls: &mut Vec<Term>,
        map: &FxHashMap<Term, Term>,
        token: &CancellationToken,
    ) -> Result<(), Canceled> {
        *fmls = rewrite(store, fmls, token, |_, t| map.get(&t).copied())?;
        Ok(())
    }

    /// Replaces predicates by the atoms they abstract.
    pub fn pred2lit(&self, store: &mut TermStore, fmls: &mut Vec<Term>) -> Result<(), Canceled> {
        PredAbs::mk_concrete(store, fmls, &self.pred2lit, &self.token)
    }

    /// Replaces assumption predicates by the formulas they stand for.
    pub fn pred2asm(&self, store: &mut TermStore, fml: Term) -> Result<Term, Canceled> {
        let mut fmls = vec![fml];
        PredAbs::mk_concrete(store, &mut fmls, &self.pred2asm, &self.token)?;
        Ok(store.mk_and(fmls))
    }

    fn literal(store: &mut TermStore, model: &Model, p: Term) -> Result<Term, EvalError> {
        if model.is_true(store, p)? {
            Ok(p)
        } else {
            Ok(store.mk_not(p))
        }
    }

    /// Computes the assumptions for the current depth `d`, the number of
    /// pushed scopes. Without a model, only the decided assumptions are
    /// returned. Otherwise the predicates of bucket `d - 1` are decided by the
    /// model, and predicates of the deeper buckets `d + 1, d + 3, ...` whose
    /// level does not depend on the quantifiers in between are fixed as well.
    pub fn get_assumptions(
        &mut self,
        store: &mut TermStore,
        model: Option<&Model>,
        asms: &mut Vec<Term>,
    ) -> Result<(), EvalError> {
        let level = self.asms_lim.len().min(self.preds.len());
        let model = match model {
            None => {
                asms.extend_from_slice(&self.asms);
                return Ok(());
            }
            Some(model) => model,
        };
        if level == 0 {
            return Ok(());
        }
        for j in 0..self.preds[level - 1].len() {
            let p = self.preds[level - 1][j];
            let literal = PredAbs::literal(store, model, p)?;
            self.asms.push(literal);
        }
        asms.extend_from_slice(&self.asms);

        let depth = level as u32;
        let mut i = level + 1;
        while i < self.preds.len() {
            let bucket = i as u32;
            for j in 0..self.preds[i].len() {
                let p = self.preds[i][j];
                let lvl = self.elevel.get(&p).copied().unwrap_or_default();
                let invariant = (lvl.forall == Some(bucket)
                    && lvl.exists.map_or(true, |e| e < depth))
                    || (lvl.exists == Some(bucket) && lvl.forall.map_or(true, |a| a < depth));
                if invariant {
                    asms.push(PredAbs::literal(store, model, p)?);
                }
            }
            i += 2;
        }
        Ok(())
    }

    /// Sizes of the predicate buckets, to recognize predicates added later.
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.preds.iter().map(Vec::len).collect()
    }

    /// Decides the predicates that were added to a bucket below the current
    /// depth after `sizes` was taken. Bucket `j` is decided by `models[j]`,
    /// the model found at depth `j`, and the literal joins the scope pushed
    /// when the search left depth `j`, so every depth below agrees with the
    /// model committed at depth `j`.
    pub fn fix_new_predicates(
        &mut self,
        store: &mut TermStore,
        sizes: &[usize],
        models: &[Model],
    ) -> Result<(), EvalError> {
        let depth = self.asms_lim.len().min(self.preds.len());
        for (j, model) in models.iter().enumerate().take(depth) {
            let start = sizes.get(j).copied().unwrap_or(0);
            for k in start..self.preds[j].len() {
                let p = self.preds[j][k];
                let fml = match self.pred2lit.get(&p).or_else(|| self.pred2asm.get(&p)) {
                    Some(&fml) => fml,
                    None => p,
                };
                let literal = if model.is_true(store, fml)? {
                    p
                } else {
                    store.mk_not(p)
                };
                let at = self.asms_lim.get(j + 1).copied().unwrap_or(self.asms.len());
                self.asms.insert(at, literal);
                for lim in self.asms_lim.iter_mut().skip(j + 1) {
                    *lim += 1;
                }
                trace!("fix {} at depth {}", store.display(literal), j + 1);
            }
        }
        Ok(())
    }

    /// Returns a literal standing for `a`. An existing predicate for `a` or
    /// its negation is reused; otherwise a fresh predicate is defined (the
    /// definitions are appended to `defs`) and, if a model is given, its value
    /// is fixed so that the literal agrees with `a`.
    pub fn mk_assumption_literal(
        &mut self,
        store: &mut TermStore,
        a: Term,
        model: Option<&mut Model>,
        level: &Level,
        defs: &mut Vec<Term>,
    ) -> Result<Term, Canceled> {
        let a = self.pred2asm(store, a)?;
        if let Some(&b) = self.asm2pred.get(&a) {
            return Ok(b);
        }
        let negated = match store.kind(a) {
            TermKind::Not(c) => Some(*c),
            _ => None,
        };
        if let Some(c) = negated {
            if let Some(&b) = self.asm2pred.get(&c) {
                return Ok(store.mk_not(b));
            }
            if self.pred2asm.contains_key(&c) {
                return Ok(a);
            }
        }
        if self.pred2asm.contains_key(&a) {
            return Ok(a);
        }
        let p = self.fresh_bool(store, "def");
        let (fml, q) = match negated {
            Some(c) => (c, store.mk_not(p)),
            None => (a, p),
        };
        if let Some(model) = model {
            model.register_fixed_value(p, Value::Bool(negated.is_none()));
        }
        self.elevel.insert(p, *level);
        self.insert(p, level);
        let mut ignored = Level::unbounded();
        self.abstract_atoms(store, fml, &mut ignored, defs)?;
        let abstracted = self.mk_abstract(store, fml)?;
        defs.push(store.mk_iff(p, abstracted));
        self.add_asm(p, fml);
        trace!("assumption {} |-> {}", store.display(fml), store.display(p));
        Ok(q)
    }

    pub fn display<'a>(&'a self, store: &'a TermStore) -> PredAbsDisplay<'a> {
        PredAbsDisplay {
            pred_abs: self,
            store,
        }
    }
}

pub struct PredAbsDisplay<'a> {
    pred_abs: &'a PredAbs,
    store: &'a TermStore,
}

impl<'a> fmt::Display for PredAbsDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, bucket) in self.pred_abs.preds.iter().enumerate() {
            writeln!(f, "level {}", i)?;
            for &p in bucket {
                match self.pred_abs.pred2lit.get(&p) {
                    Some(&lit) if lit != p => writeln!(
                        f,
                        "{} := {}",
                        self.store.display(p),
                        self.store.display(lit)
                    )?,
                    _ => writeln!(f, "{}", self.store.display(p))?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use num_bigint::BigInt;
    use num_rational::BigRational;

    struct Fixture {
        store: TermStore,
        pred_abs: PredAbs,
        x: Term,
        y: Term,
        b: Term,
    }

    /// `x` at level 0, `y` at level 1, `b` at level 2
    fn fixture() -> Fixture {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        let b = store.mk_var("b", Sort::Bool);
        let mut pred_abs = PredAbs::new(CancellationToken::new());
        for (depth, &v) in [x, y, b].iter().enumerate() {
            pred_abs.set_level(v, Level::of_block(depth as u32));
        }
        Fixture {
            store,
            pred_abs,
            x,
            y,
            b,
        }
    }

    #[test]
    fn abstraction_round_trip() {
        let mut f = fixture();
        let store = &mut f.store;
        let atom = store.mk_le(f.x, f.y);
        let fml = store.mk_and(vec![atom, f.b]);
        let mut level = Level::unbounded();
        let mut defs = Vec::new();
        f.pred_abs.abstract_atoms(store, fml, &mut level, &mut defs).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(level, Level::of_block(2).merged(&Level::of_block(1)));

        let abstracted = f.pred_abs.mk_abstract(store, fml).unwrap();
        assert_ne!(abstracted, fml);
        let mut concrete = vec![abstracted];
        f.pred_abs.pred2lit(store, &mut concrete).unwrap();
        assert_eq!(concrete, vec![fml]);

        // concretization is the identity on concrete formulas
        f.pred_abs.pred2lit(store, &mut concrete).unwrap();
        assert_eq!(concrete, vec![fml]);

        // re-abstraction reuses the predicate
        let mut again = Vec::new();
        let negated = store.mk_not(atom);
        f.pred_abs
            .abstract_atoms(store, negated, &mut Level::unbounded(), &mut again).unwrap();
        assert!(again.is_empty());
        assert_eq!(f.pred_abs.num_predicates(), 2);
    }

    #[test]
    fn atom_levels_merge_sub_terms() {
        let mut f = fixture();
        let store = &mut f.store;
        let two = store.mk_num(BigRational::from_integer(BigInt::from(2)));
        let sum = store.mk_add(vec![f.x, two]);
        let atom = store.mk_lt(sum, f.y);
        let level = f.pred_abs.compute_level(store, atom).unwrap();
        assert_eq!(level.exists, Some(0));
        assert_eq!(level.forall, Some(1));
        assert_eq!(level.bucket(), 1);

        let z = store.mk_var("z", Sort::Real);
        let unleveled = store.mk_lt(z, two);
        assert!(f.pred_abs.compute_level(store, unleveled).unwrap().is_unbounded());
    }

    #[test]
    fn assumption_stack_scoping() {
        let mut f = fixture();
        let store = &mut f.store;
        let zero = store.mk_int(0);
        let positive = store.mk_lt(zero, f.x);
        let mut defs = Vec::new();
        let mut level = Level::unbounded();
        f.pred_abs
            .abstract_atoms(store, positive, &mut level, &mut defs).unwrap();
        let p = f.pred_abs.mk_abstract(store, positive).unwrap();

        let mut model = Model::new();
        model.assign_bool(p, false);

        let mut asms = Vec::new();
        f.pred_abs
            .get_assumptions(store, Some(&model), &mut asms)
            .unwrap();
        assert!(asms.is_empty());

        f.pred_abs.push();
        f.pred_abs
            .get_assumptions(store, Some(&model), &mut asms)
            .unwrap();
        assert_eq!(asms, vec![store.mk_not(p)]);
        assert_eq!(f.pred_abs.decided().len(), 1);

        f.pred_abs.push();
        let mut without_model = Vec::new();
        f.pred_abs
            .get_assumptions(store, None, &mut without_model)
            .unwrap();
        assert_eq!(without_model, asms);

        f.pred_abs.pop(1);
        assert_eq!(f.pred_abs.decided().len(), 1);
        f.pred_abs.pop(1);
        assert!(f.pred_abs.decided().is_empty());
        assert_eq!(f.pred_abs.num_scopes(), 0);
    }

    #[test]
    fn deeper_invariant_predicates_are_fixed() {
        let mut f = fixture();
        let store = &mut f.store;
        // p0 over x only (bucket 0), p2 over b only (bucket 2, no universal part)
        let zero = store.mk_int(0);
        let a0 = store.mk_lt(zero, f.x);
        let mut defs = Vec::new();
        f.pred_abs
            .abstract_atoms(store, a0, &mut Level::unbounded(), &mut defs).unwrap();
        let c = store.mk_var("c", Sort::Bool);
        f.pred_abs.set_level(c, Level::of_block(2));
        let both = store.mk_and(vec![c, f.b]);
        f.pred_abs
            .abstract_atoms(store, both, &mut Level::unbounded(), &mut defs).unwrap();
        let p0 = f.pred_abs.mk_abstract(store, a0).unwrap();

        let mut model = Model::new();
        model.assign_bool(p0, true);
        model.assign_bool(c, true);
        model.assign_bool(f.b, false);

        f.pred_abs.push();
        let mut asms = Vec::new();
        f.pred_abs
            .get_assumptions(store, Some(&model), &mut asms)
            .unwrap();
        let not_b = store.mk_not(f.b);
        assert_eq!(asms, vec![p0, not_b, c]);
        // only the decided prefix is kept across calls
        assert_eq!(f.pred_abs.decided(), &[p0]);
    }

    #[test]
    fn assumption_literals_are_shared() {
        let mut f = fixture();
        let store = &mut f.store;
        let atom = store.mk_le(f.x, f.y);
        let negated = store.mk_not(atom);
        let mut model = Model::new();
        let mut defs = Vec::new();
        let level = Level::of_block(1);

        let q = f
            .pred_abs
            .mk_assumption_literal(store, negated, Some(&mut model), &level, &mut defs).unwrap();
        let p = match store.kind(q) {
            TermKind::Not(p) => *p,
            _ => panic!("expected a negated predicate"),
        };
        assert_eq!(model.bool_value(p), Some(false));
        assert!(f.pred_abs.converter().is_hidden(p));
        assert_eq!(defs.len(), 2);

        let again = f
            .pred_abs
            .mk_assumption_literal(store, atom, None, &level, &mut defs).unwrap();
        assert_eq!(again, p);
        let same = f
            .pred_abs
            .mk_assumption_literal(store, q, None, &level, &mut defs).unwrap();
        assert_eq!(same, q);
        assert_eq!(defs.len(), 2);
    }

    #[test]
    fn late_predicates_are_fixed_by_their_depth() {
        let mut f = fixture();
        let store = &mut f.store;
        f.pred_abs.push();
        f.pred_abs.push();
        let sizes = f.pred_abs.bucket_sizes();

        // learned after the search reached depth 2
        let zero = store.mk_int(0);
        let outer = store.mk_lt(zero, f.x);
        let inner = store.mk_le(f.x, f.y);
        let learned = store.mk_or(vec![outer, inner]);
        let mut defs = Vec::new();
        f.pred_abs
            .abstract_atoms(store, learned, &mut Level::unbounded(), &mut defs)
            .unwrap();
        let p = f.pred_abs.mk_abstract(store, outer).unwrap();
        let q = f.pred_abs.mk_abstract(store, inner).unwrap();

        let rational = |n: i64| BigRational::from_integer(BigInt::from(n));
        let mut m0 = Model::new();
        m0.assign_real(f.x, rational(-1));
        let mut m1 = Model::new();
        m1.assign_real(f.x, rational(3));
        m1.assign_real(f.y, rational(2));
        f.pred_abs
            .fix_new_predicates(store, &sizes, &[m0, m1])
            .unwrap();
        // `p` follows the depth 0 model even though `m1` disagrees
        let not_p = store.mk_not(p);
        let not_q = store.mk_not(q);
        assert_eq!(f.pred_abs.decided(), &[not_p, not_q]);

        f.pred_abs.pop(1);
        assert_eq!(f.pred_abs.decided(), &[not_p]);

        // nothing new, nothing fixed
        let sizes = f.pred_abs.bucket_sizes();
        f.pred_abs
            .fix_new_predicates(store, &sizes, &[Model::new()])
            .unwrap();
        assert_eq!(f.pred_abs.decided(), &[not_p]);
    }

    #[test]
    fn canceled_abstraction_registers_nothing() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let atoms: Vec<Term> = (0..500)
            .map(|i| {
                let bound = store.mk_int(i);
                store.mk_le(x, bound)
            })
            .collect();
        let fml = store.mk_and(atoms);
        let token = CancellationToken::new();
        let mut pred_abs = PredAbs::new(token.clone());
        token.cancel();
        let mut defs = Vec::new();
        let result = pred_abs.abstract_atoms(&mut store, fml, &mut Level::unbounded(), &mut defs);
        assert_eq!(result, Err(Canceled));
        assert!(defs.is_empty());
        assert_eq!(pred_abs.num_predicates(), 0);
        assert_eq!(pred_abs.mk_abstract(&mut store, fml), Err(Canceled));

        // the token survives a reset
        pred_abs.reset();
        token.reset();
        pred_abs
            .abstract_atoms(&mut store, fml, &mut Level::unbounded(), &mut defs)
            .unwrap();
        assert_eq!(defs.len(), 500);
    }
}
