use std::fmt::{Display, Formatter};
use std::ops::Neg;

/// Handle to a BDD node, with the complement flag packed into the lowest bit.
///
/// The upper 31 bits hold the node index in the manager's storage. Index 1 is
/// the terminal node, so `Ref::ONE` is the positive terminal and `Ref::ZERO`
/// its complement.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ref(u32);

impl Ref {
    pub const ONE: Ref = Ref::positive(1);
    pub const ZERO: Ref = Ref::ONE.negate();

    pub const fn positive(index: u32) -> Self {
        Self(index << 1)
    }

    pub const fn is_negated(self) -> bool {
        self.0 & 1 == 1
    }

    pub const fn negate(self) -> Self {
        Self(self.0 ^ 1)
    }

    /// Strip the complement flag.
    pub const fn regular(self) -> Self {
        Self(self.0 & !1)
    }

    /// Index of the referenced node in the storage.
    pub const fn index(self) -> usize {
        (self.0 >> 1) as usize
    }

    /// Raw packed representation.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Neg for Ref {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self.negate()
    }
}

impl Display for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}",
            if self.is_negated() { "~" } else { "" },
            self.index()
        )
    }
}
