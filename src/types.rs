//! Type-safe wrappers for BDD variables and literals.
use std::fmt;
use std::ops::Neg;

/// A variable identifier (1-indexed).
///
/// Smaller identifiers sit closer to the root. The ordering is fixed for the
/// lifetime of a manager: this crate never reorders.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(u32);

impl Var {
    /// Creates a new variable with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`. Variables must be 1-indexed.
    pub fn new(id: u32) -> Self {
        assert_ne!(id, 0, "Variable IDs must be >= 1");
        Var(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// Positive literal of this variable.
    pub fn pos(self) -> Lit {
        Lit {
            var: self,
            negated: false,
        }
    }

    /// Negative literal of this variable.
    pub fn neg(self) -> Lit {
        Lit {
            var: self,
            negated: true,
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl From<Var> for u32 {
    fn from(var: Var) -> Self {
        var.0
    }
}

/// A variable together with a polarity.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Lit {
    var: Var,
    negated: bool,
}

impl Lit {
    pub fn var(self) -> Var {
        self.var
    }

    pub fn is_positive(self) -> bool {
        !self.negated
    }

    /// Signed DIMACS-style integer: `v` or `-v`.
    pub fn to_dimacs(self) -> i32 {
        let v = self.var.id() as i32;
        if self.negated {
            -v
        } else {
            v
        }
    }

    /// # Panics
    ///
    /// Panics if `lit == 0`.
    pub fn from_dimacs(lit: i32) -> Self {
        Lit {
            var: Var::new(lit.unsigned_abs()),
            negated: lit < 0,
        }
    }
}

impl Neg for Lit {
    type Output = Lit;

    fn neg(self) -> Self::Output {
        Lit {
            var: self.var,
            negated: !self.negated,
        }
    }
}

impl From<i32> for Lit {
    fn from(lit: i32) -> Self {
        Lit::from_dimacs(lit)
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "~{}", self.var)
        } else {
            write!(f, "{}", self.var)
        }
    }
}
