//! Atomic predicates by partition refinement.
//!
//! A family of labeled formulas is refined into the coarsest set of pairwise
//! disjoint formulas (atoms) such that every label is exactly a union of
//! atoms. Labels are then represented by [`AtomSet`]s over the atom indices,
//! and conjunctions of labels become bitwise intersections.

use std::time::Instant;

use log::{debug, info, warn};

use crate::bdd::Bdd;
use crate::bitset::AtomSet;
use crate::reference::Ref;

#[derive(Debug, Clone)]
struct Atom {
    /// Labels whose formula contains this atom, in increasing order.
    labels: Vec<usize>,
    formula: Ref,
}

/// Refines a family of formulas into atoms.
pub struct AtomicPredicateComputer<'a> {
    bdd: &'a Bdd,
    max_atoms: Option<usize>,
}

impl<'a> AtomicPredicateComputer<'a> {
    pub fn new(bdd: &'a Bdd) -> Self {
        Self {
            bdd,
            max_atoms: None,
        }
    }

    /// Stop refining once a step would produce more than `max_atoms` atoms.
    pub fn with_max_atoms(mut self, max_atoms: usize) -> Self {
        self.max_atoms = Some(max_atoms);
        self
    }

    /// Computes the atoms of `formulas`, where label `i` is `formulas[i]`.
    ///
    /// The first formula seeds the refinement as the pair `f0 {0}` and
    /// `¬f0 {}`; the seeds are kept even when one of them is unsatisfiable.
    /// Every later split that is unsatisfiable is dropped.
    pub fn compute(&self, formulas: &[Ref]) -> AtomicPredicates {
        let bdd = self.bdd;
        let start = Instant::now();

        let Some((&first, rest)) = formulas.split_first() else {
            return AtomicPredicates::finish(
                bdd,
                vec![Atom {
                    labels: Vec::new(),
                    formula: bdd.one(),
                }],
                formulas,
                0,
                self.max_atoms,
            );
        };

        let mut atoms = vec![
            Atom {
                labels: vec![0],
                formula: first,
            },
            Atom {
                labels: Vec::new(),
                formula: -first,
            },
        ];

        let mut processed = 1;
        for (i, &f) in rest.iter().enumerate() {
            let label = i + 1;
            let mut next = Vec::with_capacity(atoms.len() * 2);
            for atom in &atoms {
                let inside = bdd.apply_and(atom.formula, f);
                if !bdd.is_zero(inside) {
                    let mut labels = atom.labels.clone();
                    labels.push(label);
                    next.push(Atom {
                        labels,
                        formula: inside,
                    });
                }
                let outside = bdd.apply_and(atom.formula, -f);
                if !bdd.is_zero(outside) {
                    next.push(Atom {
                        labels: atom.labels.clone(),
                        formula: outside,
                    });
                }
            }

            if let Some(max) = self.max_atoms {
                if next.len() > max {
                    warn!(
                        "Atom cap {} reached at label {} of {}, stopping refinement",
                        max,
                        label,
                        formulas.len()
                    );
                    break;
                }
            }

            debug!("Label {}: {} -> {} atoms", label, atoms.len(), next.len());
            atoms = next;
            processed = label + 1;
        }

        let result = AtomicPredicates::finish(bdd, atoms, formulas, processed, self.max_atoms);
        info!(
            "Computed {} atoms for {} labels in {:.3} s{}",
            result.num_atoms(),
            formulas.len(),
            start.elapsed().as_secs_f64(),
            if result.is_truncated() { " (truncated)" } else { "" }
        );
        result
    }
}

/// The outcome of one refinement run.
#[derive(Debug, Clone)]
pub struct AtomicPredicates {
    formulas: Vec<Ref>,
    labels: Vec<Vec<usize>>,
    bits: Vec<AtomSet>,
    truncated: bool,
    max_atoms: Option<usize>,
}

impl AtomicPredicates {
    /// Numbers the atoms and collects the bitset of every label. Labels at
    /// or after `processed` get every atom that intersects them.
    fn finish(
        bdd: &Bdd,
        atoms: Vec<Atom>,
        formulas: &[Ref],
        processed: usize,
        max_atoms: Option<usize>,
    ) -> Self {
        let width = atoms.len();
        let truncated = processed < formulas.len();
        let mut bits = vec![AtomSet::empty(width); formulas.len()];
        for (index, atom) in atoms.iter().enumerate() {
            for &label in &atom.labels {
                bits[label].insert(index);
            }
        }
        for (label, &f) in formulas.iter().enumerate().skip(processed) {
            for (index, atom) in atoms.iter().enumerate() {
                if !bdd.is_disjoint(atom.formula, f) {
                    bits[label].insert(index);
                }
            }
        }

        let (formulas, labels): (Vec<Ref>, Vec<Vec<usize>>) =
            atoms.into_iter().map(|a| (a.formula, a.labels)).unzip();
        Self {
            formulas,
            labels,
            bits,
            truncated,
            max_atoms,
        }
    }

    pub fn num_atoms(&self) -> usize {
        self.formulas.len()
    }

    /// Atom formulas, indexed by atom.
    pub fn atoms(&self) -> &[Ref] {
        &self.formulas
    }

    /// Labels whose formula contains `atom`. Only exact for labels that were
    /// refined before truncation.
    pub fn labels_of(&self, atom: usize) -> &[usize] {
        &self.labels[atom]
    }

    pub fn num_labels(&self) -> usize {
        self.bits.len()
    }

    pub fn bits(&self, label: usize) -> &AtomSet {
        &self.bits[label]
    }

    /// Disjunction of the atoms in `bits`.
    pub fn formula_of(&self, bdd: &Bdd, bits: &AtomSet) -> Ref {
        bdd.apply_or_many(bits.iter().map(|i| self.formulas[i]))
    }

    /// Atoms that share at least one packet with `f`.
    pub fn overlapping(&self, bdd: &Bdd, f: Ref) -> AtomSet {
        AtomSet::from_indices(
            self.num_atoms(),
            self.formulas
                .iter()
                .enumerate()
                .filter(|&(_, &atom)| !bdd.is_disjoint(atom, f))
                .map(|(i, _)| i),
        )
    }

    /// Every satisfiable atom. The unsatisfiable seed of a family with a
    /// single tautological label is left out.
    pub fn full(&self) -> AtomSet {
        AtomSet::from_indices(
            self.num_atoms(),
            (0..self.num_atoms()).filter(|&i| self.formulas[i] != Ref::ZERO),
        )
    }

    /// Whether the atom cap stopped the refinement early. Bitsets of the
    /// remaining labels then over-approximate their formulas.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn max_atoms(&self) -> Option<usize> {
        self.max_atoms
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::packet::PacketVars;

    fn check_partition(bdd: &Bdd, ap: &AtomicPredicates) {
        let atoms = ap.atoms();
        for i in 0..atoms.len() {
            for j in i + 1..atoms.len() {
                assert!(bdd.is_disjoint(atoms[i], atoms[j]), "atoms {} and {}", i, j);
            }
        }
        assert!(bdd.is_one(bdd.apply_or_many(atoms.iter().copied())));
    }

    #[test]
    fn test_single_universal_label() {
        let bdd = Bdd::default();
        let ap = AtomicPredicateComputer::new(&bdd).compute(&[bdd.one()]);
        assert_eq!(ap.num_atoms(), 2);
        assert!(bdd.is_one(ap.atoms()[0]));
        assert!(bdd.is_zero(ap.atoms()[1]));
        assert_eq!(ap.bits(0).iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(ap.full(), *ap.bits(0));
        assert!(!ap.is_truncated());
    }

    #[test]
    fn test_empty_family() {
        let bdd = Bdd::default();
        let ap = AtomicPredicateComputer::new(&bdd).compute(&[]);
        assert_eq!(ap.num_atoms(), 1);
        assert_eq!(ap.num_labels(), 0);
        check_partition(&bdd, &ap);
    }

    #[test]
    fn test_refinement_reconstructs_labels() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let p = |s: &str| pkt.dst_ip_in(&bdd, &s.parse().unwrap());

        let formulas = [
            bdd.one(),
            p("10.0.0.0/8"),
            p("10.1.0.0/16"),
            p("10.0.0.0/8"),
            -p("192.168.0.0/16"),
        ];
        let ap = AtomicPredicateComputer::new(&bdd).compute(&formulas);

        check_partition(&bdd, &ap);
        // 10.1/16, 10/8 minus 10.1/16, 192.168/16, everything else
        assert_eq!(ap.num_atoms(), 4);
        for (label, &f) in formulas.iter().enumerate() {
            assert_eq!(ap.formula_of(&bdd, ap.bits(label)), f, "label {}", label);
        }
        assert_eq!(ap.bits(1), ap.bits(3));
        for atom in 0..ap.num_atoms() {
            assert_eq!(ap.labels_of(atom)[0], 0);
        }
    }

    #[test]
    fn test_overlapping() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let ten = pkt.dst_ip_in(&bdd, &"10.0.0.0/8".parse().unwrap());
        let ap = AtomicPredicateComputer::new(&bdd).compute(&[bdd.one(), ten]);

        let host = pkt.dst_ip_in(&bdd, &"10.0.0.1".parse().unwrap());
        assert_eq!(ap.overlapping(&bdd, host), *ap.bits(1));
        assert_eq!(ap.overlapping(&bdd, bdd.one()), ap.full());
        assert!(ap.overlapping(&bdd, bdd.zero()).is_empty());
    }

    #[test]
    fn test_atom_cap_truncates() {
        let bdd = Bdd::default();
        let formulas = [bdd.one(), bdd.mk_var(1), bdd.mk_var(2), bdd.mk_var(3)];
        let ap = AtomicPredicateComputer::new(&bdd)
            .with_max_atoms(2)
            .compute(&formulas);

        assert!(ap.is_truncated());
        assert_eq!(ap.max_atoms(), Some(2));
        check_partition(&bdd, &ap);
        // Refined labels stay exact.
        assert_eq!(ap.formula_of(&bdd, ap.bits(1)), formulas[1]);
        // The rest over-approximate.
        for label in 2..formulas.len() {
            assert!(bdd.is_implies(formulas[label], ap.formula_of(&bdd, ap.bits(label))));
        }
    }
}
