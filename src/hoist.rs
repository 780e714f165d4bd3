//! Pulls quantifier blocks out of a formula, one polarity at a time.

use crate::term::{substitute, Term, TermKind, TermStore};
use crate::utils::cancel::{CancellationToken, Canceled};
use rustc_hash::FxHashMap;

/// Pulls every quantifier that acts universally (if `want_forall`) or
/// existentially out of `fml`, as long as it is reachable through `and`,
/// `or` and `not` only. The bound variables are renamed apart. Returns the
/// remaining formula and the pulled variables in order of discovery; the
/// variable list is empty if there is nothing to pull.
pub fn pull_block(
    store: &mut TermStore,
    want_forall: bool,
    fml: Term,
    token: &CancellationToken,
) -> Result<(Term, Vec<Term>), Canceled> {
    let mut pulled = Vec::new();
    let mut memo: FxHashMap<(Term, bool), Term> = FxHashMap::default();
    // quantifier (with polarity) to its renamed body
    let mut renamed: FxHashMap<(Term, bool), Term> = FxHashMap::default();
    let mut stack = vec![(fml, true)];
    while let Some(&(t, polarity)) = stack.last() {
        token.check()?;
        if memo.contains_key(&(t, polarity)) {
            stack.pop();
            continue;
        }
        let result = match store.kind(t).clone() {
            TermKind::Not(a) => match memo.get(&(a, !polarity)) {
                Some(&r) => Some(store.mk_not(r)),
                None => {
                    stack.push((a, !polarity));
                    None
                }
            },
            TermKind::And(args) | TermKind::Or(args) => {
                let pending: Vec<(Term, bool)> = args
                    .iter()
                    .filter(|&&a| !memo.contains_key(&(a, polarity)))
                    .map(|&a| (a, polarity))
                    .collect();
                if pending.is_empty() {
                    let new_args: Vec<Term> = args.iter().map(|&a| memo[&(a, polarity)]).collect();
                    Some(store.rebuild(t, &new_args))
                } else {
                    stack.extend(pending);
                    None
                }
            }
            TermKind::Exists(vars, body) | TermKind::Forall(vars, body) => {
                let is_forall = matches!(store.kind(t), TermKind::Forall(_, _));
                if (is_forall == polarity) == want_forall {
                    let inner = match renamed.get(&(t, polarity)) {
                        Some(&b) => b,
                        None => {
                            let mut map = FxHashMap::default();
                            for &v in &vars {
                                let hint = store.var_name(v).unwrap_or("v").to_string();
                                let sort = store.sort(v);
                                let fresh = store.mk_fresh(&hint, sort);
                                map.insert(v, fresh);
                                pulled.push(fresh);
                            }
                            let b = substitute(store, body, &map, token)?;
                            renamed.insert((t, polarity), b);
                            b
                        }
                    };
                    match memo.get(&(inner, polarity)) {
                        Some(&r) => Some(r),
                        None => {
                            stack.push((inner, polarity));
                            None
                        }
                    }
                } else {
                    Some(t)
                }
            }
            _ => Some(t),
        };
        if let Some(r) = result {
            memo.insert((t, polarity), r);
            stack.pop();
        }
    }
    let body = memo.get(&(fml, true)).copied().unwrap_or(fml);
    Ok((body, pulled))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::term::{free_vars, Sort};

    fn pull(store: &mut TermStore, want_forall: bool, fml: Term) -> (Term, Vec<Term>) {
        pull_block(store, want_forall, fml, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn alternating_prefix() {
        // forall x. exists y. y = x
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        let eq = store.mk_eq(y, x);
        let inner = store.mk_exists(vec![y], eq);
        let fml = store.mk_forall(vec![x], inner);

        let (rest, vars) = pull(&mut store, false, fml);
        assert!(vars.is_empty());
        assert_eq!(rest, fml);

        let (rest, universal) = pull(&mut store, true, fml);
        assert_eq!(universal.len(), 1);
        assert_eq!(store.var_name(universal[0]), Some("x!0"));
        let (matrix, existential) = pull(&mut store, false, rest);
        assert_eq!(existential.len(), 1);
        assert!(!store.is_quantifier(matrix));
        let mut free = free_vars(&store, matrix, &CancellationToken::new()).unwrap();
        free.sort();
        let mut expected = vec![universal[0], existential[0]];
        expected.sort();
        assert_eq!(free, expected);
    }

    #[test]
    fn negation_flips_polarity() {
        // not (exists p. p and q) acts universally on p
        let mut store = TermStore::new();
        let p = store.mk_var("p", Sort::Bool);
        let q = store.mk_var("q", Sort::Bool);
        let conj = store.mk_and(vec![p, q]);
        let quantified = store.mk_exists(vec![p], conj);
        let fml = store.mk_not(quantified);

        let (rest, vars) = pull(&mut store, false, fml);
        assert!(vars.is_empty());
        assert_eq!(rest, fml);

        let (rest, vars) = pull(&mut store, true, fml);
        assert_eq!(vars.len(), 1);
        let renamed = store.mk_and(vec![vars[0], q]);
        assert_eq!(rest, store.mk_not(renamed));
    }

    #[test]
    fn blocks_under_connectives_are_merged() {
        let mut store = TermStore::new();
        let a = store.mk_var("a", Sort::Bool);
        let b = store.mk_var("b", Sort::Bool);
        let c = store.mk_var("c", Sort::Bool);
        let left_body = store.mk_or(vec![a, c]);
        let left = store.mk_exists(vec![a], left_body);
        let right_body = store.mk_and(vec![b, c]);
        let right = store.mk_exists(vec![b], right_body);
        let fml = store.mk_and(vec![left, right]);

        let (rest, vars) = pull(&mut store, false, fml);
        assert_eq!(vars.len(), 2);
        assert!(!store.is_quantifier(rest));
        assert_eq!(free_vars(&store, rest, &CancellationToken::new()).unwrap().len(), 3);
    }

    #[test]
    fn canceled_before_renaming() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let zero = store.mk_int(0);
        let lt = store.mk_lt(x, zero);
        let fml = store.mk_forall(vec![x], lt);
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(pull_block(&mut store, true, fml, &token), Err(Canceled));
        // no fresh copy of x was introduced
        let (_, pulled) = pull(&mut store, true, fml);
        assert_eq!(store.var_name(pulled[0]), Some("x!0"));
    }
}
