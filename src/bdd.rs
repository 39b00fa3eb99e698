//! The BDD manager: hash-consed nodes, complement edges, and the ITE core.
//!
//! All formulas built for one network snapshot live in a single [`Bdd`]
//! manager. Components that need to build or inspect formulas receive the
//! manager by reference, so there is no process-wide factory.
//!
//! ```
//! use netreach::bdd::Bdd;
//!
//! let bdd = Bdd::default();
//! let x1 = bdd.mk_var(1);
//! let x2 = bdd.mk_var(2);
//! let f = bdd.apply_and(x1, -x2);
//! assert!(!bdd.is_zero(f));
//! assert!(bdd.is_implies(f, x1));
//! assert!(bdd.is_disjoint(f, x2));
//! ```

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;

use log::debug;

use crate::cache::Cache;
use crate::reference::Ref;
use crate::table::Table;
use crate::types::Var;
use crate::utils::{pairing3, MyHash};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            variable: 0,
            low: Ref::ZERO,
            high: Ref::ZERO,
        }
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        pairing3(
            self.variable as u64,
            self.low.raw() as u64,
            self.high.raw() as u64,
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
enum OpKey {
    Ite(Ref, Ref, Ref),
    Exists(Ref, Ref),
}

/// Sizing of a [`Bdd`] manager.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BddConfig {
    /// Initial unique-table capacity, `2^storage_bits` nodes. The table grows
    /// past it when needed.
    pub storage_bits: usize,
    /// Initial operation-cache capacity, `2^cache_bits` entries.
    pub cache_bits: usize,
}

impl Default for BddConfig {
    fn default() -> Self {
        Self {
            storage_bits: 16,
            cache_bits: 14,
        }
    }
}

impl BddConfig {
    pub fn with_storage_bits(mut self, bits: usize) -> Self {
        self.storage_bits = bits;
        self
    }

    pub fn with_cache_bits(mut self, bits: usize) -> Self {
        self.cache_bits = bits;
        self
    }
}

pub struct Bdd {
    storage: RefCell<Table<Node>>,
    cache: RefCell<Cache<OpKey, Ref>>,
    size_cache: RefCell<Cache<Ref, u64>>,
}

impl Bdd {
    pub fn new(config: BddConfig) -> Self {
        let mut storage = Table::new(config.storage_bits);

        // Allocate the terminal node:
        let one = storage.add(Node::default());
        assert_eq!(one, Ref::ONE.index()); // Make sure the terminal node is (1).

        Self {
            storage: RefCell::new(storage),
            cache: RefCell::new(Cache::new(config.cache_bits)),
            size_cache: RefCell::new(Cache::new(config.cache_bits.min(10))),
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new(BddConfig::default())
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.borrow();
        f.debug_struct("Bdd")
            .field("nodes", &self.num_nodes())
            .field("cache_size", &cache.len())
            .field("cache_hits", &cache.hits())
            .field("cache_misses", &cache.misses())
            .finish()
    }
}

impl Bdd {
    pub fn zero(&self) -> Ref {
        Ref::ZERO
    }
    pub fn one(&self) -> Ref {
        Ref::ONE
    }

    /// Number of nodes in the unique table, the terminal included.
    pub fn num_nodes(&self) -> usize {
        self.storage.borrow().size()
    }

    /// Operation cache `(hits, misses)`.
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.borrow();
        (cache.hits(), cache.misses())
    }

    /// Variable labelling the node, `0` for the terminal.
    pub fn variable(&self, index: usize) -> u32 {
        self.storage.borrow().value(index).variable
    }
    fn low(&self, index: usize) -> Ref {
        self.storage.borrow().value(index).low
    }
    fn high(&self, index: usize) -> Ref {
        self.storage.borrow().value(index).high
    }

    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.low(node.index());
        if node.is_negated() {
            -low
        } else {
            low
        }
    }
    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.high(node.index());
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, node: Ref) -> bool {
        node == Ref::ZERO
    }
    pub fn is_one(&self, node: Ref) -> bool {
        node == Ref::ONE
    }
    pub fn is_terminal(&self, node: Ref) -> bool {
        node.index() == Ref::ONE.index()
    }

    /// Top variable of a node, with terminals sorting below every variable.
    fn top(&self, node: Ref) -> u32 {
        if self.is_terminal(node) {
            u32::MAX
        } else {
            self.variable(node.index())
        }
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        // Handle canonicity
        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }

        // Handle duplicates
        if low == high {
            return low;
        }

        let i = self.storage.borrow_mut().put(Node {
            variable: v,
            low,
            high,
        });
        Ref::positive(i as u32)
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");
        self.mk_node(v, Ref::ZERO, Ref::ONE)
    }

    /// Conjunction of DIMACS-style literals.
    pub fn cube(&self, literals: impl IntoIterator<Item = i32>) -> Ref {
        let mut literals = literals.into_iter().collect::<Vec<_>>();
        literals.sort_by_key(|&v| std::cmp::Reverse(v.unsigned_abs()));
        let mut current = Ref::ONE;
        for lit in literals {
            assert_ne!(lit, 0, "Variable index should not be zero");
            current = if lit < 0 {
                self.mk_node(lit.unsigned_abs(), current, Ref::ZERO)
            } else {
                self.mk_node(lit as u32, Ref::ZERO, current)
            };
        }
        current
    }

    /// Cofactors of `node` with respect to variable `v`, where `v` is at or
    /// above the node's top variable.
    pub fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        assert_ne!(v, 0, "Variable index should not be zero");
        if v < self.top(node) {
            return (node, node);
        }
        assert_eq!(v, self.variable(node.index()));
        (self.low_node(node), self.high_node(node))
    }

    /// Apply the ITE operation to the arguments.
    ///
    /// ```text
    /// ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)
    /// ```
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        // Terminal cases
        if self.is_one(f) {
            return g;
        }
        if self.is_zero(f) {
            return h;
        }
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // Standard triples:
        //   ite(F,F,H) => ite(F,1,H)
        //   ite(F,~F,H) => ite(F,0,H)
        //   ite(F,G,F) => ite(F,G,0)
        //   ite(F,G,~F) => ite(F,G,1)
        let (mut f, mut g, mut h) = (f, g, h);
        if g == f {
            g = Ref::ONE;
        } else if g == -f {
            g = Ref::ZERO;
        }
        if h == f {
            h = Ref::ZERO;
        } else if h == -f {
            h = Ref::ONE;
        }
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // ite(~F,G,H) => ite(F,H,G)
        if f.is_negated() {
            f = -f;
            std::mem::swap(&mut g, &mut h);
        }

        // ite(F,~G,H) => ~ite(F,G,~H)
        let n = g.is_negated();
        if n {
            g = -g;
            h = -h;
        }

        let key = OpKey::Ite(f, g, h);
        if let Some(&res) = self.cache.borrow_mut().get(&key) {
            return if n { -res } else { res };
        }

        let m = self.top(f).min(self.top(g)).min(self.top(h));
        assert_ne!(m, u32::MAX);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.apply_ite(f0, g0, h0);
        let t = self.apply_ite(f1, g1, h1);

        let res = self.mk_node(m, e, t);
        self.cache.borrow_mut().insert(key, res);

        if n {
            -res
        } else {
            res
        }
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, Ref::ZERO)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, Ref::ONE, v)
    }

    pub fn apply_xor(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, -v, v)
    }

    pub fn apply_imply(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, Ref::ONE)
    }

    pub fn apply_and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = Ref::ONE;
        for node in nodes {
            res = self.apply_and(res, node);
            if self.is_zero(res) {
                break;
            }
        }
        res
    }

    pub fn apply_or_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = Ref::ZERO;
        for node in nodes {
            res = self.apply_or(res, node);
            if self.is_one(res) {
                break;
            }
        }
        res
    }

    /// Does `f` imply `g`, i.e. is `f → g` valid?
    pub fn is_implies(&self, f: Ref, g: Ref) -> bool {
        self.is_one(self.apply_imply(f, g))
    }

    /// Is `f ∧ g` unsatisfiable?
    pub fn is_disjoint(&self, f: Ref, g: Ref) -> bool {
        self.is_zero(self.apply_and(f, g))
    }

    /// Existential quantification of `vars` out of `f`.
    pub fn exists(&self, f: Ref, vars: &[Var]) -> Ref {
        let cube = self.cube(vars.iter().map(|v| v.id() as i32));
        self.exists_(f, cube)
    }

    fn exists_(&self, f: Ref, cube: Ref) -> Ref {
        if self.is_terminal(f) {
            return f;
        }

        // Skip quantified variables above the top of `f`.
        let vf = self.variable(f.index());
        let mut cube = cube;
        while !self.is_one(cube) && self.variable(cube.index()) < vf {
            cube = self.high_node(cube);
        }
        if self.is_one(cube) {
            return f;
        }

        let key = OpKey::Exists(f, cube);
        if let Some(&res) = self.cache.borrow_mut().get(&key) {
            return res;
        }

        let (f0, f1) = self.top_cofactors(f, vf);
        let res = if self.variable(cube.index()) == vf {
            let rest = self.high_node(cube);
            let e = self.exists_(f0, rest);
            if self.is_one(e) {
                e
            } else {
                let t = self.exists_(f1, rest);
                self.apply_or(e, t)
            }
        } else {
            let e = self.exists_(f0, cube);
            let t = self.exists_(f1, cube);
            self.mk_node(vf, e, t)
        };

        debug!("exists(f = {}, cube = {}) -> {}", f, cube, res);
        self.cache.borrow_mut().insert(key, res);
        res
    }

    /// Indices of all nodes reachable from `nodes`, the terminal included.
    pub fn descendants(&self, nodes: impl IntoIterator<Item = Ref>) -> HashSet<usize> {
        let mut visited = HashSet::new();
        visited.insert(Ref::ONE.index());
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(node) = queue.pop_front() {
            let i = node.index();
            if visited.insert(i) {
                queue.push_back(self.low(i));
                queue.push_back(self.high(i));
            }
        }

        visited
    }

    /// Number of nodes in the graph of `f`, the terminal included.
    pub fn size(&self, f: Ref) -> u64 {
        let f = f.regular();
        if let Some(&size) = self.size_cache.borrow_mut().get(&f) {
            return size;
        }
        let size = self.descendants([f]).len() as u64;
        self.size_cache.borrow_mut().insert(f, size);
        size
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        if self.is_zero(node) {
            return "(0)".to_string();
        } else if self.is_one(node) {
            return "(1)".to_string();
        }

        let v = self.variable(node.index());
        let low = self.low_node(node);
        let high = self.high_node(node);

        format!(
            "{}:(x{}, {}, {})",
            node,
            v,
            self.to_bracket_string(high),
            self.to_bracket_string(low)
        )
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_var() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);

        assert_eq!(bdd.variable(x.index()), 1);
        assert_eq!(bdd.high_node(x), bdd.one());
        assert_eq!(bdd.low_node(x), bdd.zero());
        assert_eq!(bdd.mk_var(1), x);
    }

    #[test]
    fn test_not_var() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        let not_x = -x;

        assert_eq!(bdd.variable(not_x.index()), 1);
        assert_eq!(bdd.high_node(not_x), bdd.zero());
        assert_eq!(bdd.low_node(not_x), bdd.one());
    }

    #[test]
    fn test_terminal() {
        let bdd = Bdd::default();

        assert!(bdd.is_terminal(bdd.zero()));
        assert!(bdd.is_zero(bdd.zero()));
        assert!(!bdd.is_one(bdd.zero()));
        assert!(bdd.is_terminal(bdd.one()));
        assert!(bdd.is_one(bdd.one()));
        assert_eq!(bdd.variable(bdd.one().index()), 0);
    }

    #[test]
    fn test_cube() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let x3 = bdd.mk_var(3);

        let f = bdd.apply_and_many([x1, x2, x3]);
        assert_eq!(f, bdd.cube([3, 1, 2]));

        let f = bdd.apply_and_many([x1, -x2, -x3]);
        assert_eq!(f, bdd.cube([1, -2, -3]));
    }

    #[test]
    fn test_de_morgan() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);

        assert_eq!(-bdd.apply_and(x, y), bdd.apply_or(-x, -y));
        assert_eq!(-bdd.apply_or(x, y), bdd.apply_and(-x, -y));
    }

    #[test]
    fn test_xor() {
        let bdd = Bdd::default();

        let x = bdd.mk_var(1);
        let y = bdd.mk_var(2);
        let f = bdd.apply_and(x, y);

        assert_eq!(bdd.apply_xor(f, f), bdd.zero());
        assert_eq!(bdd.apply_xor(f, -f), bdd.one());
        assert_eq!(bdd.apply_xor(x, -y), -bdd.apply_xor(x, y));
    }

    #[test]
    fn test_apply_ite() {
        let bdd = Bdd::default();

        let g = bdd.mk_var(2);
        let h = bdd.mk_var(3);
        assert_eq!(bdd.apply_ite(bdd.one(), g, h), g);
        assert_eq!(bdd.apply_ite(bdd.zero(), g, h), h);

        let f = bdd.mk_node(1, bdd.one(), bdd.mk_var(5));
        assert_eq!(bdd.apply_ite(f, f, h), bdd.apply_or(f, h));
        assert_eq!(bdd.apply_ite(f, g, f), bdd.apply_and(f, g));
        assert_eq!(bdd.apply_ite(f, -g, bdd.one()), -bdd.apply_and(f, g));

        let f = bdd.mk_var(6);
        let g = bdd.mk_var(7);
        let h = bdd.mk_var(8);
        let expected = bdd.mk_node(6, -g, -h);
        assert_eq!(bdd.apply_ite(-f, -g, -h), expected);
    }

    #[test]
    fn test_implies_and_disjoint() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let f = bdd.apply_and(x1, x2);

        assert!(bdd.is_implies(f, x1));
        assert!(bdd.is_implies(f, bdd.apply_or(x1, x2)));
        assert!(!bdd.is_implies(x1, f));
        assert!(bdd.is_implies(bdd.zero(), x1));
        assert!(bdd.is_disjoint(f, -x2));
        assert!(!bdd.is_disjoint(f, x2));
    }

    #[test]
    fn test_exists() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        let x3 = bdd.mk_var(3);

        // ∃x2. (x1 ∧ x2) ∨ (¬x2 ∧ x3) = x1 ∨ x3
        let f = bdd.apply_or(bdd.apply_and(x1, x2), bdd.apply_and(-x2, x3));
        assert_eq!(bdd.exists(f, &[Var::new(2)]), bdd.apply_or(x1, x3));

        // Quantifying everything leaves a constant.
        let all = [Var::new(1), Var::new(2), Var::new(3)];
        assert_eq!(bdd.exists(f, &all), bdd.one());
        assert_eq!(bdd.exists(bdd.zero(), &all), bdd.zero());

        // Variables the formula does not mention are no-ops.
        assert_eq!(bdd.exists(x1, &[Var::new(5)]), x1);
    }

    #[test]
    fn test_size() {
        let bdd = Bdd::default();

        let x1 = bdd.mk_var(1);
        let x2 = bdd.mk_var(2);
        assert_eq!(bdd.size(bdd.one()), 1);
        assert_eq!(bdd.size(x1), 2);
        assert_eq!(bdd.size(-x1), 2);
        assert_eq!(bdd.size(bdd.apply_xor(x1, x2)), 3);
    }

    #[test]
    fn test_bracket_string() {
        let bdd = Bdd::default();
        let x1 = bdd.mk_var(1);
        let s = bdd.to_bracket_string(x1);
        assert!(s.contains("x1"));
        assert_eq!(bdd.to_bracket_string(bdd.zero()), "(0)");
    }
}
