use std::fmt;
use std::ops;

pub type Variable = u32;

/// A signed DIMACS variable as read by the (Q)DIMACS front-ends.
///
/// The variable is stored in the upper bits, the sign in the lowest bit.
#[derive(PartialEq, Eq, PartialOrd, Ord, Copy, Clone, Debug, Hash)]
pub struct Literal {
    x: u32,
}

impl Literal {
    pub fn new(variable: Variable, signed: bool) -> Literal {
        Literal {
            x: variable << 1 | (signed as u32),
        }
    }

    /// Returns true if `Literal` is signed
    ///
    /// # Examples
    ///
    /// ```
    /// assert!(qsat::Literal::new(0, true).signed());
    /// assert!(!qsat::Literal::new(0, false).signed());
    /// ```
    pub fn signed(self) -> bool {
        (self.x & 1) != 0
    }

    pub fn variable(self) -> Variable {
        self.x >> 1
    }

    pub fn dimacs(self) -> i32 {
        let base = self.variable() as i32;
        if self.signed() {
            -base
        } else {
            base
        }
    }
}

impl ops::Neg for Literal {
    type Output = Literal;

    fn neg(self) -> Literal {
        Literal { x: self.x ^ 1 }
    }
}

impl From<i32> for Literal {
    fn from(literal: i32) -> Self {
        let signed = literal < 0;
        let abs = literal.abs() as Variable;
        Literal::new(abs, signed)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.dimacs())
    }
}

#[cfg(test)]
mod tests {

    use std::mem;

    use super::*;

    #[test]
    fn size_of_literal() {
        let result = mem::size_of::<Literal>();
        assert!(
            result == 4,
            "Size of `Literal` should be 4 bytes, was `{}`",
            result
        );
    }

    #[test]
    fn negation_flips_sign_only() {
        let lit = Literal::new(7, false);
        assert_eq!((-lit).variable(), 7);
        assert!((-lit).signed());
        assert_eq!(-(-lit), lit);
    }

    #[test]
    fn dimacs_conversion() {
        let lit: Literal = (-3).into();
        assert_eq!(lit.dimacs(), -3);
        assert_eq!(lit.variable(), 3);
        assert_eq!(format!("{}", -lit), "3");
    }
}
