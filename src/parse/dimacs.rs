use super::{CharIterator, ParseError, SourcePos};
use crate::literal::Literal;

#[derive(Debug, Eq, PartialEq)]
pub enum DimacsToken {
    /// p cnf header
    Header,

    /// A Literal, i.e., a signed or unsigned integer
    Lit(Literal),

    /// A zero integer, used as an ending sign
    Zero,

    /// Quantification, i.e., `e` and `a`
    Quant(QuantKind),

    /// End-of-line
    EOL,

    /// End-of-file
    EOF,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum QuantKind {
    Exists,
    Forall,
}

pub struct DimacsTokenStream<'a> {
    chars: CharIterator<'a>,
}

impl<'a> DimacsTokenStream<'a> {
    pub fn new(content: &'a str) -> DimacsTokenStream<'a> {
        DimacsTokenStream {
            chars: CharIterator::new(content),
        }
    }

    pub fn next_token(&mut self) -> Result<DimacsToken, ParseError> {
        while let Some(c) = self.chars.next() {
            match c {
                'c' => {
                    // comment line, ignore until next newline
                    self.chars.skip_while(|c| *c != '\n');
                }
                'p' => {
                    // DIMACS header
                    self.chars.expect_str(" cnf ")?;
                    return Ok(DimacsToken::Header);
                }
                'e' => return Ok(DimacsToken::Quant(QuantKind::Exists)),
                'a' => return Ok(DimacsToken::Quant(QuantKind::Forall)),
                '0' => return Ok(DimacsToken::Zero),
                '-' => {
                    // negated literal
                    return Ok(DimacsToken::Lit(self.chars.read_literal('-')?));
                }
                c if c.is_ascii_digit() => {
                    return Ok(DimacsToken::Lit(self.chars.read_literal(c)?));
                }
                '\n' => return Ok(DimacsToken::EOL),
                ' ' | '\t' | '\r' => continue,
                _ => {
                    return Err(ParseError {
                        msg: format!("Encountered unknown token `{}` during lexing", c),
                        pos: self.chars.pos,
                    });
                }
            }
        }
        // end of file
        Ok(DimacsToken::EOF)
    }

    pub fn expect_next(&mut self, token: &DimacsToken) -> Result<(), ParseError> {
        self.next_token().and_then(|next| {
            if next == *token {
                Ok(())
            } else {
                Err(ParseError {
                    msg: format!("Expected token `{:?}` but found `{:?}`", token, next),
                    pos: self.chars.pos,
                })
            }
        })
    }

    pub fn pos(&self) -> SourcePos {
        self.chars.pos
    }
}

fn parse_count(lexer: &mut DimacsTokenStream, what: &str) -> Result<usize, ParseError> {
    match lexer.next_token()? {
        DimacsToken::Zero => Ok(0),
        DimacsToken::Lit(l) => {
            if l.signed() {
                return Err(ParseError {
                    msg: format!(
                        "Malformed `p cnf` header, found negative value for number of {}",
                        what
                    ),
                    pos: lexer.pos(),
                });
            }
            Ok(l.variable() as usize)
        }
        token => Err(ParseError {
            msg: format!(
                "Malformed `p cnf` header, expected number of {}, found `{:?}`",
                what, token
            ),
            pos: lexer.pos(),
        }),
    }
}

/// Parses the `p cnf NUM NUM` header and returns number of variables and number of clauses
pub fn parse_header(lexer: &mut DimacsTokenStream) -> Result<(usize, usize), ParseError> {
    // first non-EOL token has to be `p cnf ` header
    loop {
        match lexer.next_token()? {
            DimacsToken::EOL => continue,
            DimacsToken::Header => break,
            token => {
                return Err(ParseError {
                    msg: format!("Expect `p cnf`, but found `{:?}`", token),
                    pos: lexer.pos(),
                });
            }
        }
    }
    let num_variables = parse_count(lexer, "variables")?;
    let num_clauses = parse_count(lexer, "clauses")?;
    Ok((num_variables, num_clauses))
}

/// Reads clauses until the end of input, starting with the already lexed
/// token `current`. Every variable has to be at most `num_variables`.
pub fn parse_matrix(
    lexer: &mut DimacsTokenStream,
    mut current: DimacsToken,
    num_variables: usize,
    num_clauses_expected: usize,
) -> Result<Vec<Vec<Literal>>, ParseError> {
    let mut clauses = Vec::with_capacity(num_clauses_expected);
    let mut literals: Vec<Literal> = Vec::new();

    loop {
        match current {
            DimacsToken::Zero => {
                // end of clause
                clauses.push(literals);
                literals = Vec::new();
            }
            DimacsToken::Lit(l) => {
                if l.variable() as usize > num_variables {
                    return Err(ParseError {
                        msg: format!(
                            "Variable {} exceeds the declared number of variables {}",
                            l.variable(),
                            num_variables
                        ),
                        pos: lexer.pos(),
                    });
                }
                literals.push(l);
            }
            DimacsToken::EOL => {}
            DimacsToken::EOF => {
                if !literals.is_empty() {
                    // End-of-file during clause read
                    return Err(ParseError {
                        msg: "Unexpected end of input while reading clause".to_string(),
                        pos: lexer.pos(),
                    });
                }
                if num_clauses_expected != clauses.len() {
                    return Err(ParseError {
                        msg: format!(
                            "Expected {} clauses, but found {}",
                            num_clauses_expected,
                            clauses.len()
                        ),
                        pos: lexer.pos(),
                    });
                }
                return Ok(clauses);
            }
            _ => {
                return Err(ParseError {
                    msg: format!("Unexpected token `{:?}` while reading clause", current),
                    pos: lexer.pos(),
                });
            }
        }
        current = lexer.next_token()?;
    }
}
