//! Traversals over terms. All of them use explicit work stacks and per-call
//! memo tables, nested formulas never grow the call stack. The traversals
//! the engine runs on whole formulas poll a `CancellationToken` once per step.

use super::{Term, TermKind, TermStore};
use crate::utils::cancel::{CancellationToken, Canceled};
use rustc_hash::{FxHashMap, FxHashSet};

/// Free variables of `t` in order of first occurrence.
pub fn free_vars(
    store: &TermStore,
    t: Term,
    token: &CancellationToken,
) -> Result<Vec<Term>, Canceled> {
    let mut memo: FxHashMap<Term, Vec<Term>> = FxHashMap::default();
    let mut stack = vec![t];
    while let Some(&top) = stack.last() {
        token.check()?;
        if memo.contains_key(&top) {
            stack.pop();
            continue;
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
        let mut vars = Vec::new();
        let mut seen = FxHashSet::default();
        match store.kind(top) {
            TermKind::Var(_, _) => vars.push(top),
            TermKind::Exists(bound, body) | TermKind::Forall(bound, body) => {
                for &v in &memo[body] {
                    if !bound.contains(&v) {
                        vars.push(v);
                    }
                }
            }
            _ => {
                for c in &children {
                    for &v in &memo[c] {
                        if seen.insert(v) {
                            vars.push(v);
                        }
                    }
                }
            }
        }
        memo.insert(top, vars);
        stack.pop();
    }
    Ok(memo.remove(&t).unwrap_or_default())
}

/// All sub-terms of `roots` in post-order, every shared node once.
pub fn post_order(store: &TermStore, roots: &[Term]) -> Vec<Term> {
    let mut order = Vec::new();
    let mut visited = FxHashSet::default();
    let mut stack: Vec<(Term, bool)> = roots.iter().rev().map(|&r| (r, false)).collect();
    while let Some((t, expanded)) = stack.pop() {
        if expanded {
            order.push(t);
            continue;
        }
        if !visited.insert(t) {
            continue;
        }
        stack.push((t, true));
        for c in store.children(t).into_iter().rev() {
            if !visited.contains(&c) {
                stack.push((c, false));
            }
        }
    }
    order
}

/// Returns true if the variable `var` occurs anywhere in `t`.
pub fn occurs(store: &TermStore, t: Term, var: Term) -> bool {
    let mut visited = FxHashSet::default();
    let mut stack = vec![t];
    while let Some(top) = stack.pop() {
        if top == var {
            return true;
        }
        if !visited.insert(top) {
            continue;
        }
        stack.extend(store.children(top));
    }
    false
}

/// Rewrites `roots` bottom-up. `leaf` is consulted before descending into a
/// node; when it returns a replacement, the node is not traversed further.
/// Unchanged nodes keep their handle.
pub fn rewrite<F>(
    store: &mut TermStore,
    roots: &[Term],
    token: &CancellationToken,
    mut leaf: F,
) -> Result<Vec<Term>, Canceled>
where
    F: FnMut(&TermStore, Term) -> Option<Term>,
{
    let mut cache: FxHashMap<Term, Term> = FxHashMap::default();
    let mut todo: Vec<Term> = roots.to_vec();
    while let Some(&t) = todo.last() {
        token.check()?;
        if cache.contains_key(&t) {
            todo.pop();
            continue;
        }
        if let Some(r) = leaf(store, t) {
            cache.insert(t, r);
            todo.pop();
            continue;
        }
        let children = store.children(t);
        let mut args = Vec::with_capacity(children.len());
        let mut ready = true;
        for c in &children {
            match cache.get(c) {
                Some(&r) => args.push(r),
                None => {
                    todo.push(*c);
                    ready = false;
                }
            }
        }
        if ready {
            let r = if args == children {
                t
            } else {
                store.rebuild(t, &args)
            };
            cache.insert(t, r);
            todo.pop();
        }
    }
    Ok(roots
        .iter()
        .map(|r| cache.get(r).copied().unwrap_or(*r))
        .collect())
}

/// Capture-avoiding substitution of variables. Quantifiers that rebind a
/// substituted variable hide it inside their body.
pub fn substitute(
    store: &mut TermStore,
    t: Term,
    map: &FxHashMap<Term, Term>,
    token: &CancellationToken,
) -> Result<Term, Canceled> {
    if map.is_empty() {
        return Ok(t);
    }
    let mut scopes = vec![map.clone()];
    let mut binder_scope: FxHashMap<(Term, usize), usize> = FxHashMap::default();
    let mut memo: FxHashMap<(Term, usize), Term> = FxHashMap::default();
    let mut stack = vec![(t, 0_usize)];
    while let Some(&(top, scope)) = stack.last() {
        token.check()?;
        if memo.contains_key(&(top, scope)) {
            stack.pop();
            continue;
        }
        if let Some(&r) = scopes[scope].get(&top) {
            memo.insert((top, scope), r);
            stack.pop();
            continue;
        }
        let inner = match store.kind(top) {
            TermKind::Exists(bound, _) | TermKind::Forall(bound, _)
                if bound.iter().any(|v| scopes[scope].contains_key(v)) =>
            {
                if let Some(&s) = binder_scope.get(&(top, scope)) {
                    s
                } else {
                    let mut restricted = scopes[scope].clone();
                    for v in bound {
                        restricted.remove(v);
                    }
                    scopes.push(restricted);
                    let s = scopes.len() - 1;
                    binder_scope.insert((top, scope), s);
                    s
                }
            }
            _ => scope,
        };
        let children = store.children(top);
        let mut args = Vec::with_capacity(children.len());
        let mut ready = true;
        for &c in &children {
            match memo.get(&(c, inner)) {
                Some(&r) => args.push(r),
                None => {
                    stack.push((c, inner));
                    ready = false;
                }
            }
        }
        if ready {
            let r = if args == children {
                top
            } else {
                store.rebuild(top, &args)
            };
            memo.insert((top, scope), r);
            stack.pop();
        }
    }
    Ok(memo.get(&(t, 0)).copied().unwrap_or(t))
}

/// Pushes a negation one level into `t`.
pub fn push_not(store: &mut TermStore, t: Term) -> Term {
    match store.kind(t).clone() {
        TermKind::Not(a) => a,
        TermKind::And(args) => {
            let negated: Vec<Term> = args.into_iter().map(|a| store.mk_not(a)).collect();
            store.mk_or(negated)
        }
        TermKind::Or(args) => {
            let negated: Vec<Term> = args.into_iter().map(|a| store.mk_not(a)).collect();
            store.mk_and(negated)
        }
        TermKind::Exists(vars, body) => {
            let body = store.mk_not(body);
            store.mk_forall(vars, body)
        }
        TermKind::Forall(vars, body) => {
            let body = store.mk_not(body);
            store.mk_exists(vars, body)
        }
        _ => store.mk_not(t),
    }
}

#[cfg(test)]
mod tests {

    use super::super::Sort;
    use super::*;

    #[test]
    fn free_vars_respect_binders() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        let le = store.mk_le(x, y);
        let q = store.mk_exists(vec![x], le);
        let p = store.mk_var("p", Sort::Bool);
        let fml = store.mk_and(vec![q, p]);
        let token = CancellationToken::new();
        assert_eq!(free_vars(&store, fml, &token), Ok(vec![y, p]));
        assert!(occurs(&store, fml, x));
    }

    #[test]
    fn substitution_does_not_capture() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let y = store.mk_var("y", Sort::Real);
        let one = store.mk_int(1);
        let inner = store.mk_lt(x, one);
        let q = store.mk_forall(vec![x], inner);
        let outer = store.mk_le(x, y);
        let fml = store.mk_and(vec![outer, q]);

        let mut map = FxHashMap::default();
        map.insert(x, one);
        let result = substitute(&mut store, fml, &map, &CancellationToken::new()).unwrap();
        let expected_outer = store.mk_le(one, y);
        let expected = store.mk_and(vec![expected_outer, q]);
        assert_eq!(result, expected);
    }

    #[test]
    fn push_not_one_level() {
        let mut store = TermStore::new();
        let p = store.mk_var("p", Sort::Bool);
        let q = store.mk_var("q", Sort::Bool);
        let conj = store.mk_and(vec![p, q]);
        let result = push_not(&mut store, conj);
        let np = store.mk_not(p);
        let nq = store.mk_not(q);
        assert_eq!(result, store.mk_or(vec![np, nq]));
    }

    #[test]
    fn rewrite_stops_when_canceled() {
        let mut store = TermStore::new();
        let x = store.mk_var("x", Sort::Real);
        let atoms: Vec<Term> = (0..1000)
            .map(|i| {
                let bound = store.mk_int(i);
                store.mk_lt(x, bound)
            })
            .collect();
        let fml = store.mk_or(atoms);
        let negated = store.mk_not(fml);

        let token = CancellationToken::new();
        let mut visited = 0;
        let result = rewrite(&mut store, &[negated], &token, |_, _| {
            visited += 1;
            if visited == 10 {
                token.cancel();
            }
            None
        });
        assert_eq!(result, Err(Canceled));
        assert_eq!(visited, 10);

        token.reset();
        let unchanged = rewrite(&mut store, &[negated], &token, |_, _| None).unwrap();
        assert_eq!(unchanged, vec![negated]);
        assert_eq!(free_vars(&store, negated, &token), Ok(vec![x]));
        token.cancel();
        assert_eq!(free_vars(&store, negated, &token), Err(Canceled));
    }

    #[test]
    fn post_order_visits_shared_nodes_once() {
        let mut store = TermStore::new();
        let p = store.mk_var("p", Sort::Bool);
        let q = store.mk_var("q", Sort::Bool);
        let np = store.mk_not(p);
        let a = store.mk_or(vec![np, q]);
        let b = store.mk_and(vec![a, np]);
        let order = post_order(&store, &[b]);
        assert_eq!(order, vec![p, np, q, a, b]);
    }
}
