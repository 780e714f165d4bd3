//! A subset of SMT-LIB 2 for quantified linear real arithmetic.
//!
//! Supported are the commands `declare-const`, `declare-fun` without
//! arguments and `assert`; `set-logic`, `set-info`, `set-option`,
//! `check-sat`, `get-model` and `exit` are accepted and ignored.

use super::{CharIterator, ParseError, SourcePos};
use crate::term::{Sort, Term, TermStore};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Zero};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SExpr {
    Atom(String, SourcePos),
    List(Vec<SExpr>, SourcePos),
}

impl SExpr {
    fn pos(&self) -> SourcePos {
        match self {
            SExpr::Atom(_, pos) | SExpr::List(_, pos) => *pos,
        }
    }

    fn atom(&self) -> Option<&str> {
        match self {
            SExpr::Atom(s, _) => Some(s.as_str()),
            SExpr::List(_, _) => None,
        }
    }
}

fn error<T>(msg: String, pos: SourcePos) -> Result<T, ParseError> {
    Err(ParseError { msg, pos })
}

/// Reads all top-level s-expressions.
fn read_sexprs(content: &str) -> Result<Vec<SExpr>, ParseError> {
    let mut chars = CharIterator::new(content);
    let mut result = Vec::new();
    // open lists with the position of their `(`
    let mut stack: Vec<(Vec<SExpr>, SourcePos)> = Vec::new();
    loop {
        chars.skip_while(|c| c.is_whitespace());
        let pos = chars.pos;
        let c = match chars.peek() {
            None => break,
            Some(c) => c,
        };
        let expr = match c {
            ';' => {
                chars.skip_while(|c| *c != '\n');
                continue;
            }
            '(' => {
                chars.next();
                stack.push((Vec::new(), pos));
                continue;
            }
            ')' => {
                chars.next();
                match stack.pop() {
                    Some((items, start)) => SExpr::List(items, start),
                    None => return error("Unbalanced `)`".to_string(), pos),
                }
            }
            '|' => {
                chars.next();
                let symbol = chars.take_while(|c| *c != '|');
                chars.expect_char('|')?;
                SExpr::Atom(symbol, pos)
            }
            '"' => {
                chars.next();
                let string = chars.take_while(|c| *c != '"');
                chars.expect_char('"')?;
                SExpr::Atom(format!("\"{}\"", string), pos)
            }
            _ => {
                let symbol =
                    chars.take_while(|c| !c.is_whitespace() && *c != '(' && *c != ')' && *c != ';');
                SExpr::Atom(symbol, pos)
            }
        };
        match stack.last_mut() {
            Some((items, _)) => items.push(expr),
            None => result.push(expr),
        }
    }
    if let Some((_, start)) = stack.last() {
        return error("Unbalanced `(`".to_string(), *start);
    }
    Ok(result)
}

/// Parses a numeral or decimal.
fn parse_number(s: &str) -> Option<BigRational> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let mut parts = s.splitn(2, '.');
    let integer: BigInt = parts.next()?.parse().ok()?;
    match parts.next() {
        None => Some(BigRational::from_integer(integer)),
        Some(fraction) => {
            if fraction.is_empty() {
                return None;
            }
            let numerator: BigInt = fraction.parse().ok()?;
            let denominator = num_traits::pow(BigInt::from(10), fraction.len());
            Some(BigRational::from_integer(integer) + BigRational::new(numerator, denominator))
        }
    }
}

/// The assertions and declarations of an SMT-LIB script.
pub struct Smt2Script {
    pub declarations: Vec<Term>,
    pub assertions: Vec<Term>,
}

impl Smt2Script {
    /// The conjunction of all assertions.
    pub fn formula(&self, store: &mut TermStore) -> Term {
        store.mk_and(self.assertions.iter().copied())
    }
}

pub fn parse(store: &mut TermStore, content: &str) -> Result<Smt2Script, ParseError> {
    let mut parser = Parser {
        store,
        declared: FxHashMap::default(),
        scopes: Vec::new(),
    };
    let mut script = Smt2Script {
        declarations: Vec::new(),
        assertions: Vec::new(),
    };
    for command in read_sexprs(content)? {
        parser.command(&command, &mut script)?;
    }
    Ok(script)
}

struct Parser<'a> {
    store: &'a mut TermStore,
    declared: FxHashMap<String, Term>,
    /// bound variables, innermost last
    scopes: Vec<Vec<(String, Term)>>,
}

impl<'a> Parser<'a> {
    fn command(&mut self, command: &SExpr, script: &mut Smt2Script) -> Result<(), ParseError> {
        let items = match command {
            SExpr::List(items, _) if !items.is_empty() => items,
            _ => return error("Expect command".to_string(), command.pos()),
        };
        let name = match items[0].atom() {
            Some(name) => name,
            None => return error("Expect command name".to_string(), items[0].pos()),
        };
        match name {
            "set-logic" | "set-info" | "set-option" | "check-sat" | "get-model" | "exit" => Ok(()),
            "declare-const" | "declare-fun" => {
                let (symbol, sort) = match (name, items.len()) {
                    ("declare-const", 3) => (&items[1], &items[2]),
                    ("declare-fun", 4) if matches!(&items[2], SExpr::List(args, _) if args.is_empty()) => {
                        (&items[1], &items[3])
                    }
                    _ => {
                        return error(
                            format!("Malformed `{}`, only constants are supported", name),
                            command.pos(),
                        )
                    }
                };
                let symbol = self.symbol(symbol)?;
                let sort = self.sort(sort)?;
                if self.declared.contains_key(&symbol) {
                    return error(format!("`{}` is already declared", symbol), command.pos());
                }
                let var = self.store.mk_var(&symbol, sort);
                self.declared.insert(symbol, var);
                script.declarations.push(var);
                Ok(())
            }
            "assert" => {
                if items.len() != 2 {
                    return error("`assert` takes one argument".to_string(), command.pos());
                }
                let fml = self.term(&items[1])?;
                self.expect_sort(fml, Sort::Bool, &items[1])?;
                script.assertions.push(fml);
                Ok(())
            }
            _ => error(format!("Unsupported command `{}`", name), command.pos()),
        }
    }

    fn symbol(&self, e: &SExpr) -> Result<String, ParseError> {
        match e.atom() {
            Some(s) if parse_number(s).is_none() => Ok(s.to_string()),
            _ => error("Expect symbol".to_string(), e.pos()),
        }
    }

    fn sort(&self, e: &SExpr) -> Result<Sort, ParseError> {
        match e.atom() {
            Some("Bool") => Ok(Sort::Bool),
            Some("Real") | Some("Int") => Ok(Sort::Real),
            _ => error("Expect sort `Bool` or `Real`".to_string(), e.pos()),
        }
    }

    fn expect_sort(&self, t: Term, sort: Sort, e: &SExpr) -> Result<(), ParseError> {
        if self.store.sort(t) == sort {
            Ok(())
        } else {
            error(format!("Expect term of sort {}", sort), e.pos())
        }
    }

    fn lookup(&self, name: &str) -> Option<Term> {
        for scope in self.scopes.iter().rev() {
            if let Some(&(_, t)) = scope.iter().rev().find(|(n, _)| n == name) {
                return Some(t);
            }
        }
        self.declared.get(name).copied()
    }

    fn term(&mut self, e: &SExpr) -> Result<Term, ParseError> {
        match e {
            SExpr::Atom(s, pos) => match s.as_str() {
                "true" => Ok(self.store.mk_true()),
                "false" => Ok(self.store.mk_false()),
                _ => {
                    if let Some(value) = parse_number(s) {
                        return Ok(self.store.mk_num(value));
                    }
                    match self.lookup(s) {
                        Some(t) => Ok(t),
                        None => error(format!("Unknown symbol `{}`", s), *pos),
                    }
                }
            },
            SExpr::List(items, pos) => {
                let head = match items.first().and_then(SExpr::atom) {
                    Some(head) => head,
                    None => return error("Expect operator".to_string(), *pos),
                };
                match head {
                    "exists" | "forall" => self.quantifier(head == "forall", items, *pos),
                    _ => {
                        let mut args = Vec::with_capacity(items.len() - 1);
                        for item in &items[1..] {
                            args.push(self.term(item)?);
                        }
                        self.application(head, &items[1..], args, *pos)
                    }
                }
            }
        }
    }

    fn quantifier(
        &mut self,
        forall: bool,
        items: &[SExpr],
        pos: SourcePos,
    ) -> Result<Term, ParseError> {
        let bindings = match items {
            [_, SExpr::List(bindings, _), _] if !bindings.is_empty() => bindings,
            _ => return error("Malformed quantifier".to_string(), pos),
        };
        let mut scope = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let (symbol, sort) = match binding {
                SExpr::List(pair, _) if pair.len() == 2 => (self.symbol(&pair[0])?, self.sort(&pair[1])?),
                _ => return error("Malformed binding".to_string(), binding.pos()),
            };
            let var = if self.lookup(&symbol).is_some() {
                self.store.mk_fresh(&symbol, sort)
            } else {
                self.store.mk_var(&symbol, sort)
            };
            scope.push((symbol, var));
        }
        let vars = scope.iter().map(|&(_, v)| v).collect();
        self.scopes.push(scope);
        let body = self.term(&items[2]);
        self.scopes.pop();
        let body = body?;
        self.expect_sort(body, Sort::Bool, &items[2])?;
        Ok(self.store.mk_quantifier(forall, vars, body))
    }

    fn application(
        &mut self,
        op: &str,
        items: &[SExpr],
        args: Vec<Term>,
        pos: SourcePos,
    ) -> Result<Term, ParseError> {
        let expected = match op {
            "not" | "and" | "or" | "=>" => Some(Sort::Bool),
            "+" | "-" | "*" | "/" | "<" | "<=" | ">" | ">=" => Some(Sort::Real),
            _ => None,
        };
        if let Some(sort) = expected {
            for (&a, item) in args.iter().zip(items) {
                self.expect_sort(a, sort, item)?;
            }
        }
        let arity_error = || error(format!("Wrong number of arguments for `{}`", op), pos);
        let store = &mut *self.store;
        match op {
            "not" => match args.as_slice() {
                [a] => Ok(store.mk_not(*a)),
                _ => arity_error(),
            },
            "and" => Ok(store.mk_and(args)),
            "or" => Ok(store.mk_or(args)),
            "=>" => {
                let mut iter = args.into_iter().rev();
                let mut result = match iter.next() {
                    Some(last) => last,
                    None => return arity_error(),
                };
                for a in iter {
                    result = store.mk_implies(a, result);
                }
                Ok(result)
            }
            "=" | "distinct" | "<" | "<=" | ">" | ">=" => {
                if args.len() < 2 {
                    return arity_error();
                }
                if op == "=" || op == "distinct" {
                    let sort = store.sort(args[0]);
                    for (&a, item) in args.iter().zip(items) {
                        if store.sort(a) != sort {
                            return error(format!("Expect term of sort {}", sort), item.pos());
                        }
                    }
                }
                let mut conjuncts = Vec::new();
                if op == "distinct" {
                    for i in 0..args.len() {
                        for j in i + 1..args.len() {
                            conjuncts.push(store.mk_distinct(args[i], args[j]));
                        }
                    }
                } else {
                    for pair in args.windows(2) {
                        let (a, b) = (pair[0], pair[1]);
                        conjuncts.push(match op {
                            "=" => store.mk_eq(a, b),
                            "<" => store.mk_lt(a, b),
                            "<=" => store.mk_le(a, b),
                            ">" => store.mk_gt(a, b),
                            _ => store.mk_ge(a, b),
                        });
                    }
                }
                Ok(store.mk_and(conjuncts))
            }
            "+" => Ok(store.mk_add(args)),
            "-" => match args.as_slice() {
                [] => arity_error(),
                [a] => Ok(store.mk_neg(*a)),
                [first, rest @ ..] => {
                    let negated: Vec<Term> = rest.iter().map(|&a| store.mk_neg(a)).collect();
                    let mut summands = vec![*first];
                    summands.extend(negated);
                    Ok(store.mk_add(summands))
                }
            },
            "*" => {
                let mut coefficient = BigRational::one();
                let mut factor = None;
                for (&a, item) in args.iter().zip(items) {
                    match store.num_value(a) {
                        Some(value) => coefficient *= value,
                        None if factor.is_none() => factor = Some(a),
                        None => {
                            return error("Non-linear multiplication".to_string(), item.pos())
                        }
                    }
                }
                match factor {
                    Some(t) => Ok(store.mk_mul(coefficient, t)),
                    None => Ok(store.mk_num(coefficient)),
                }
            }
            "/" => match args.as_slice() {
                [a, b] => match store.num_value(*b).cloned() {
                    Some(divisor) if !divisor.is_zero() => {
                        Ok(store.mk_mul(BigRational::one() / divisor, *a))
                    }
                    _ => error("Division by non-constant or zero".to_string(), pos),
                },
                _ => arity_error(),
            },
            _ => error(format!("Unsupported operator `{}`", op), pos),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::term::TermKind;

    #[test]
    fn numbers() {
        assert_eq!(
            parse_number("12"),
            Some(BigRational::from_integer(BigInt::from(12)))
        );
        assert_eq!(
            parse_number("0.25"),
            Some(BigRational::new(BigInt::from(1), BigInt::from(4)))
        );
        assert_eq!(parse_number("1."), None);
        assert_eq!(parse_number("x1"), None);
    }

    #[test]
    fn script() {
        let mut store = TermStore::new();
        let script = parse(
            &mut store,
            "; comment\n(set-logic LRA)\n(declare-const y Real)\n(declare-fun p () Bool)\n\
             (assert (exists ((x Real)) (and (< y x) (<= x (+ y 1)) p)))\n(check-sat)\n",
        )
        .unwrap();
        assert_eq!(script.declarations.len(), 2);
        assert_eq!(script.assertions.len(), 1);
        match store.kind(script.assertions[0]) {
            TermKind::Exists(vars, _) => {
                assert_eq!(store.var_name(vars[0]), Some("x"));
            }
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn shadowing_binders_are_renamed() {
        let mut store = TermStore::new();
        let script = parse(
            &mut store,
            "(declare-const x Real)\n(assert (forall ((x Real)) (< x 1)))\n",
        )
        .unwrap();
        match store.kind(script.assertions[0]) {
            TermKind::Forall(vars, _) => {
                assert_ne!(vars[0], script.declarations[0]);
            }
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn errors_have_positions() {
        let mut store = TermStore::new();
        let err = parse(&mut store, "(assert\n  (< z 1))").err().unwrap();
        assert_eq!(err.pos.line, 2);
        assert!(err.msg.contains("`z`"));

        assert!(parse(&mut store, "(assert (and true)").is_err());
        assert!(parse(&mut store, "(declare-const q Real)(assert (* q q))").is_err());
        assert!(parse(&mut store, "(assert (+ 1 true))").is_err());
        assert!(parse(&mut store, "(push 1)").is_err());
    }
}
