use std::collections::HashMap;

use num_bigint::BigUint;

use crate::bdd::Bdd;
use crate::reference::Ref;
use crate::types::{Lit, Var};

impl Bdd {
    /// Returns one satisfying assignment for the BDD, if any exists.
    ///
    /// Only the variables on the chosen path are assigned; every other
    /// variable is a don't-care. The walk prefers the low branch, so the
    /// assignment sets as few variables to true as the path allows.
    ///
    /// Returns `None` if the BDD represents the constant false function.
    pub fn one_sat(&self, node: Ref) -> Option<Vec<Lit>> {
        if self.is_zero(node) {
            return None;
        }

        let mut path = Vec::new();
        let mut current = node;

        // Every non-terminal node is satisfiable, so only ZERO is a dead end.
        while !self.is_one(current) {
            let var = Var::new(self.variable(current.index()));
            let low = self.low_node(current);
            if !self.is_zero(low) {
                path.push(var.neg());
                current = low;
            } else {
                path.push(var.pos());
                current = self.high_node(current);
            }
        }

        Some(path)
    }

    /// Number of assignments over `num_vars` variables satisfying `node`.
    pub fn sat_count(&self, node: Ref, num_vars: usize) -> BigUint {
        let mut cache = HashMap::new();
        let max = BigUint::from(1u32) << num_vars;
        self.sat_count_(node, &max, &mut cache)
    }

    fn sat_count_(&self, node: Ref, max: &BigUint, cache: &mut HashMap<Ref, BigUint>) -> BigUint {
        if self.is_zero(node) {
            return BigUint::ZERO;
        } else if self.is_one(node) {
            return max.clone();
        }

        let regular = node.regular();
        let count = if let Some(count) = cache.get(&regular) {
            count.clone()
        } else {
            let count_low = self.sat_count_(self.low_node(regular), max, cache);
            let count_high = self.sat_count_(self.high_node(regular), max, cache);
            let count: BigUint = (count_low + count_high) >> 1;
            cache.insert(regular, count.clone());
            count
        };

        if node.is_negated() {
            max - count
        } else {
            count
        }
    }
}
