use super::dimacs::*;
use super::ParseError;
use crate::dimacs::Dimacs;
use crate::literal::{Literal, Variable};
use crate::solve::qsat::QsatOutcome;
use crate::solve::SolverResult;
use crate::term::{Sort, Term, TermStore};

/// A quantified Boolean formula in prenex conjunctive normal form.
#[derive(Debug, PartialEq, Eq)]
pub struct QdimacsInstance {
    pub num_variables: usize,
    pub num_clauses: usize,
    /// quantifier blocks from the outside in, adjacent blocks alternate
    pub prefix: Vec<(QuantKind, Vec<Variable>)>,
    pub clauses: Vec<Vec<Literal>>,
}

/// Parses the QDIMACS string
pub fn parse(content: &str) -> Result<QdimacsInstance, ParseError> {
    let mut lexer = DimacsTokenStream::new(content);
    let (num_variables, num_clauses) = parse_header(&mut lexer)?;
    let mut prefix = Vec::new();
    let token = parse_prefix(&mut lexer, num_variables, &mut prefix)?;
    let clauses = parse_matrix(&mut lexer, token, num_variables, num_clauses)?;
    Ok(QdimacsInstance {
        num_variables,
        num_clauses,
        prefix,
        clauses,
    })
}

/// Parses the quantifier prefix of a QDIMACS file, e.g., `e 1 2\na 3 4\n`.
/// Returns the first token *after* the prefix.
pub fn parse_prefix(
    lexer: &mut DimacsTokenStream,
    num_variables: usize,
    prefix: &mut Vec<(QuantKind, Vec<Variable>)>,
) -> Result<DimacsToken, ParseError> {
    let mut bound = vec![false; num_variables + 1];
    loop {
        // first character after newline, either `e`, `a`, or literal (in which case we return)
        match lexer.next_token()? {
            DimacsToken::Quant(q) => {
                let mut block = Vec::new();
                loop {
                    match lexer.next_token()? {
                        DimacsToken::Lit(l) => {
                            if l.signed() {
                                return Err(ParseError {
                                    msg: format!(
                                        "Encountered signed literal `{}` in quantifier prefix",
                                        l
                                    ),
                                    pos: lexer.pos(),
                                });
                            }
                            let v = l.variable();
                            if v as usize > num_variables {
                                return Err(ParseError {
                                    msg: format!(
                                        "Variable {} exceeds the declared number of variables {}",
                                        v, num_variables
                                    ),
                                    pos: lexer.pos(),
                                });
                            }
                            if bound[v as usize] {
                                return Err(ParseError {
                                    msg: format!("Variable {} is quantified twice", v),
                                    pos: lexer.pos(),
                                });
                            }
                            bound[v as usize] = true;
                            block.push(v);
                        }
                        DimacsToken::Zero => {
                            // end of quantifier block
                            lexer.expect_next(&DimacsToken::EOL)?;
                            break;
                        }
                        token => {
                            return Err(ParseError {
                                msg: format!("Expect literal, but found `{:?}`", token),
                                pos: lexer.pos(),
                            });
                        }
                    }
                }
                match prefix.last_mut() {
                    Some((kind, vars)) if *kind == q => vars.extend(block),
                    _ => prefix.push((q, block)),
                }
            }
            DimacsToken::Lit(l) => return Ok(DimacsToken::Lit(l)),
            DimacsToken::Zero => return Ok(DimacsToken::Zero),
            DimacsToken::EOL => continue,
            DimacsToken::EOF => {
                // matrix contains no clauses
                return Ok(DimacsToken::EOF);
            }
            token => {
                return Err(ParseError {
                    msg: format!("Expect `e`, `a`, or literal, but found `{:?}`", token),
                    pos: lexer.pos(),
                })
            }
        }
    }
}

/// The variables of an instance as terms.
pub struct QdimacsEncoding {
    pub formula: Term,
    /// indexed by QDIMACS variable, `x<n>` for variable `n`
    pub variables: Vec<Term>,
}

impl QdimacsInstance {
    fn outermost_existential(&self) -> Option<&[Variable]> {
        match self.prefix.first() {
            Some((QuantKind::Exists, vars)) => Some(vars),
            _ => None,
        }
    }

    /// Builds the formula. The outermost existential block and variables
    /// without quantifier stay free, so that a model of the formula names
    /// them directly.
    pub fn to_term(&self, store: &mut TermStore) -> QdimacsEncoding {
        let variables: Vec<Term> = (0..=self.num_variables)
            .map(|v| store.mk_var(&format!("x{}", v), Sort::Bool))
            .collect();
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            let literals: Vec<Term> = clause
                .iter()
                .map(|l| {
                    let var = variables[l.variable() as usize];
                    if l.signed() {
                        store.mk_not(var)
                    } else {
                        var
                    }
                })
                .collect();
            clauses.push(store.mk_or(literals));
        }
        let mut formula = store.mk_and(clauses);
        let skip = if self.outermost_existential().is_some() {
            1
        } else {
            0
        };
        for (kind, vars) in self.prefix.iter().skip(skip).rev() {
            let bound: Vec<Term> = vars.iter().map(|&v| variables[v as usize]).collect();
            formula = store.mk_quantifier(*kind == QuantKind::Forall, bound, formula);
        }
        QdimacsEncoding { formula, variables }
    }

    /// The certificate for `outcome`: the result and, if satisfiable, the
    /// assignment of the outermost existential block.
    pub fn certificate(
        &self,
        outcome: &QsatOutcome,
        encoding: &QdimacsEncoding,
    ) -> QdimacsCertificate {
        let mut certificate =
            QdimacsCertificate::new(outcome.result(), self.num_variables, self.num_clauses);
        if let (Some(model), Some(vars)) = (outcome.external_model(), self.outermost_existential())
        {
            for &v in vars {
                let value = model
                    .bool_value(encoding.variables[v as usize])
                    .unwrap_or(true);
                certificate.add_assignment(Literal::new(v, !value));
            }
        }
        certificate
    }
}

/// A partial QDIMACS certificate is an assignment to the outermost quantifiers in the QBF
#[derive(Debug, PartialEq, Eq)]
pub struct QdimacsCertificate {
    pub result: SolverResult,
    pub num_variables: usize,
    pub num_clauses: usize,
    assignments: Vec<Literal>,
}

impl QdimacsCertificate {
    pub fn new(result: SolverResult, num_variables: usize, num_clauses: usize) -> QdimacsCertificate {
        QdimacsCertificate {
            result,
            num_variables,
            num_clauses,
            assignments: Vec::new(),
        }
    }

    pub fn add_assignment(&mut self, assignment: Literal) {
        if let Err(pos) = self.assignments.binary_search(&assignment) {
            self.assignments.insert(pos, assignment);
        }
    }

    pub fn assignments(&self) -> &[Literal] {
        &self.assignments
    }
}

impl Dimacs for QdimacsCertificate {
    fn dimacs(&self) -> String {
        let mut dimacs = String::new();
        dimacs.push_str(&format!(
            "s cnf {} {} {}\n",
            self.result.dimacs(),
            self.num_variables,
            self.num_clauses,
        ));
        for literal in self.assignments.iter() {
            dimacs.push_str(&format!("V {} 0\n", literal.dimacs()));
        }
        dimacs
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::term::{free_vars, TermKind};
    use crate::utils::cancel::CancellationToken;

    #[test]
    fn test_simple() {
        let instance = parse("p cnf 4 2\na 1 2 0\ne 3 4 0\n-1  3 0\n2 -3 -4 0\n").unwrap();
        assert_eq!(
            instance.prefix,
            vec![(QuantKind::Forall, vec![1, 2]), (QuantKind::Exists, vec![3, 4])]
        );
        assert_eq!(instance.clauses.len(), 2);
        assert_eq!(instance.clauses[1], vec![2.into(), (-3).into(), (-4).into()]);
    }

    #[test]
    fn test_adjacent_blocks_are_merged() {
        let instance = parse("p cnf 3 0\ne 1 0\ne 2 0\na 3 0\n").unwrap();
        assert_eq!(
            instance.prefix,
            vec![(QuantKind::Exists, vec![1, 2]), (QuantKind::Forall, vec![3])]
        );
    }

    #[test]
    fn test_prefix_errors() {
        assert!(parse("p cnf 2 0\ne -1 0\n").is_err());
        assert!(parse("p cnf 2 0\ne 1 0\na 1 0\n").is_err());
        assert!(parse("p cnf 2 0\ne 3 0\n").is_err());
        assert!(parse("p cnf 2 1\ne 1 0\n1 2 0\n1 0\n").is_err());
    }

    #[test]
    fn test_encoding() {
        let instance = parse("p cnf 3 1\ne 1 0\na 2 0\ne 3 0\n1 2 -3 0\n").unwrap();
        let mut store = TermStore::new();
        let encoding = instance.to_term(&mut store);
        let x1 = encoding.variables[1];
        let token = CancellationToken::new();
        assert_eq!(free_vars(&store, encoding.formula, &token), Ok(vec![x1]));
        match store.kind(encoding.formula) {
            TermKind::Forall(vars, body) => {
                assert_eq!(vars, &vec![encoding.variables[2]]);
                assert!(matches!(store.kind(*body), TermKind::Exists(_, _)));
            }
            kind => panic!("unexpected {:?}", kind),
        }
    }

    #[test]
    fn test_certificate_output() {
        let mut certificate = QdimacsCertificate::new(SolverResult::Satisfiable, 3, 2);
        certificate.add_assignment((-2).into());
        certificate.add_assignment(1.into());
        certificate.add_assignment(1.into());
        assert_eq!(certificate.dimacs(), "s cnf 1 3 2\nV 1 0\nV -2 0\n");

        let certificate = QdimacsCertificate::new(SolverResult::Unsatisfiable, 3, 2);
        assert_eq!(certificate.dimacs(), "s cnf 0 3 2\n");
    }
}
