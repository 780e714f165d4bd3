pub mod dimacs;
pub mod qdimacs;
pub mod smt2;

use crate::literal::Literal;
use std::error::Error;
use std::str::Chars;

#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Eq, PartialEq)]
pub struct ParseError {
    pub msg: String,
    pub pos: SourcePos,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "parse error: {} at {}", self.msg, self.pos)
    }
}

impl Error for ParseError {}

/// Line and column, both starting at 1.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub line: usize,
    pub column: usize,
}

impl SourcePos {
    fn new() -> Self {
        Self { line: 1, column: 0 }
    }

    fn advance(&mut self, len: usize) {
        self.column += len;
    }

    fn newline(&mut self) {
        self.line += 1;
        self.column = 0;
    }
}

impl std::fmt::Display for SourcePos {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

struct CharIterator<'a> {
    chars: Chars<'a>,
    pos: SourcePos,
    next_char: Option<char>,
}

impl<'a> CharIterator<'a> {
    fn new(content: &'a str) -> CharIterator<'a> {
        let mut chars = content.chars();
        CharIterator {
            next_char: chars.next(),
            chars,
            pos: SourcePos::new(),
        }
    }

    fn next(&mut self) -> Option<char> {
        match self.next_char {
            None => None,
            Some(c) => {
                if c == '\n' {
                    self.pos.newline()
                } else {
                    self.pos.advance(1)
                }
                self.next_char = self.chars.next();
                Some(c)
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.next_char
    }

    fn error<T>(&self, msg: String) -> Result<T, ParseError> {
        Err(ParseError { msg, pos: self.pos })
    }

    /// Reads a DIMACS literal whose first character `first` was consumed
    /// already. The terminating whitespace is not consumed.
    fn read_literal(&mut self, first: char) -> Result<Literal, ParseError> {
        let signed = first == '-';
        let mut value: Option<u32> = if signed {
            None
        } else {
            match first.to_digit(10) {
                Some(digit) => Some(digit),
                None => {
                    return self.error(format!(
                        "Expect first character of literal to be a digit or `-`, were given `{}`",
                        first
                    ))
                }
            }
        };
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                break;
            }
            self.next();
            match c.to_digit(10) {
                Some(digit) => {
                    let prev = value.unwrap_or(0);
                    value = match prev.checked_mul(10).and_then(|v| v.checked_add(digit)) {
                        Some(v) => Some(v),
                        None => return self.error("Literal out of range".to_string()),
                    };
                }
                None => {
                    return self.error(format!(
                        "Encountered non-digit character `{}` while parsing literal",
                        c
                    ))
                }
            }
        }
        match value {
            Some(0) if signed => self.error("Expect non-zero variable after `-`".to_string()),
            Some(value) => Ok(Literal::new(value, signed)),
            None => self.error("Expect digits following `-` character".to_string()),
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        match self.next() {
            None => self.error("Unexpected end of input".to_string()),
            Some(c) => {
                if c == expected {
                    Ok(())
                } else {
                    self.error(format!(
                        "Expected character `{}`, but found `{}`",
                        expected, c
                    ))
                }
            }
        }
    }

    fn expect_str(&mut self, expected: &str) -> Result<(), ParseError> {
        for c in expected.chars() {
            self.expect_char(c)?;
        }
        Ok(())
    }

    /// Consumes characters up to, not including, the first one violating
    /// `predicate`.
    fn skip_while<P>(&mut self, predicate: P)
    where
        P: Fn(&char) -> bool,
    {
        while let Some(c) = self.peek() {
            if !predicate(&c) {
                break;
            }
            self.next();
        }
    }

    fn take_while<P>(&mut self, predicate: P) -> String
    where
        P: Fn(&char) -> bool,
    {
        let mut result = String::new();
        while let Some(c) = self.peek() {
            if !predicate(&c) {
                break;
            }
            result.push(c);
            self.next();
        }
        result
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn positions_count_lines() {
        let mut chars = CharIterator::new("ab\ncd");
        chars.skip_while(|c| *c != '\n');
        assert_eq!(chars.pos, SourcePos { line: 1, column: 2 });
        chars.next();
        assert_eq!(chars.next(), Some('c'));
        assert_eq!(chars.pos, SourcePos { line: 2, column: 1 });
        assert_eq!(chars.take_while(|c| c.is_alphabetic()), "d");
        assert_eq!(chars.next(), None);
    }

    #[test]
    fn literals() {
        let mut chars = CharIterator::new("12 ");
        let first = chars.next().unwrap();
        assert_eq!(chars.read_literal(first), Ok(Literal::new(12, false)));
        assert_eq!(chars.peek(), Some(' '));

        let mut chars = CharIterator::new("-0");
        let first = chars.next().unwrap();
        assert!(chars.read_literal(first).is_err());
    }
}
