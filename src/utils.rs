/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// Wrapping arithmetic: the result is only used as a hash.
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing2(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Cheap structural hash used to pick a bucket in the unique table.
pub trait MyHash {
    fn hash(&self) -> u64;
}

impl MyHash for (u64, u64) {
    fn hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl MyHash for (u64, u64, u64) {
    fn hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}
