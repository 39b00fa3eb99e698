//! # netreach: atomic-predicate network reachability
//!
//! **`netreach`** answers questions such as "which packets sent from device A
//! reach device B, and along which paths?" over a snapshot of device
//! configurations, a computed forwarding table and a topology. No traffic is
//! sent: everything is derived symbolically.
//!
//! ## How it works
//!
//! Every ACL and every forwarding decision is compiled into a boolean formula
//! over the 128 bits of a packet header, represented as a Binary Decision
//! Diagram. Carrying those formulas along every path would be expensive, so
//! each family of formulas is first refined into **atomic predicates**: the
//! coarsest set of disjoint formulas such that every ACL (or forwarding
//! decision) is a union of atoms. From then on a set of headers is a bitset
//! over atom indices, and checking a hop is a bitwise AND.
//!
//! ## Key Features
//!
//! - **Manager-Centric BDDs**: All formula operations go through the [`Bdd`][crate::bdd::Bdd] manager, with complement edges, hash consing and an operation cache.
//! - **Two atom families**: ACL atoms and forwarding atoms are computed independently by the [`AtomicPredicateComputer`][crate::atoms::AtomicPredicateComputer].
//! - **Parallel search**: One search per start location, on a rayon pool. Failures stay local to their start location.
//! - **Explicit truncation**: Hop limits, deadlines, branch caps and atom caps produce flagged partial results, never errors.
//!
//! ## Basic Usage
//!
//! ```rust
//! use netreach::bdd::Bdd;
//! use netreach::datamodel::{Configuration, Fib, FibRow, Interface, Snapshot, Topology};
//! use netreach::network::{ModelConfig, NetworkModel};
//! use netreach::packet::PacketVars;
//! use netreach::query::{Reachability, ReachabilityQuery};
//! use netreach::search::{SearchConfig, StartLocation};
//!
//! let snapshot = Snapshot {
//!     configurations: vec![
//!         Configuration::new("a").with_interface(Interface::new("eth0")),
//!         Configuration::new("b").with_interface(Interface::new("eth0")),
//!     ],
//!     topology: Topology::default().with_link("a", "eth0", "b", "eth0"),
//!     fib: Fib::default().with_row("a", FibRow::new("10.0.2.0/24".parse().unwrap(), "eth0")),
//! };
//!
//! let bdd = Bdd::default();
//! let packet = PacketVars::new();
//! let model = NetworkModel::build(&bdd, &packet, &snapshot, &ModelConfig::default()).unwrap();
//!
//! let query = ReachabilityQuery::new(vec![StartLocation::new("a")], SearchConfig::new(8))
//!     .with_destination("b");
//! let answers = Reachability::new(&bdd, &packet, &model).answer(&query).unwrap();
//! assert_eq!(answers.answers.len(), 1);
//! ```
//!
//! ## Core Components
//!
//! - **[`bdd`]**: The formula engine. Contains the [`Bdd`][crate::bdd::Bdd] manager.
//! - **[`packet`]**: Header bit layout and concrete example packets.
//! - **[`compile`]**: ACLs, match conditions and FIB rows to formulas.
//! - **[`atoms`]**: Partition refinement into atomic predicates.
//! - **[`network`]**: The per-snapshot model with per-link bitsets.
//! - **[`search`]**: Hop-by-hop exploration.
//! - **[`query`]**: Filtering, projection back to headers, examples.

pub mod atoms;
pub mod bdd;
pub mod bitset;
pub mod cache;
pub mod compile;
pub mod datamodel;
pub mod error;
pub mod graph;
pub mod network;
pub mod packet;
pub mod path;
pub mod query;
pub mod reference;
pub mod sat;
pub mod search;
pub mod table;
pub mod types;
pub mod utils;

pub use error::{Error, Result};
