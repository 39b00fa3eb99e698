//! Hop-by-hop propagation of atom bitsets through the graph.
//!
//! A search starts from one device with a pair of bitsets and explores every
//! link that still forwards some of its atoms. At each hop the bitsets are
//! intersected with the link's forwarding atoms, the outgoing ACL at the
//! source and the incoming ACL at the target. Atoms an ACL takes away are
//! reported as denied at that link, and a branch whose bitsets become empty
//! is pruned. Branches also end when the packet is dropped, leaves the
//! network, has no further route, revisits a device, or hits the hop limit.
//!
//! Searches from different start locations share nothing but the read-only
//! [`NetworkModel`], and run in parallel on a rayon pool.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::bitset::AtomSet;
use crate::error::{Error, Result};
use crate::graph::NodeIndex;
use crate::network::{HeaderSeed, NetworkModel};
use crate::path::{PathArena, PortReachabilitySummary};

/// How a branch of the search ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Disposition {
    /// Forwarded into the drop node.
    NullRouted,
    /// Left through an interface with no neighbour.
    ExitsNetwork,
    /// No outbound link forwards these headers. For a destination the
    /// device owns, this is delivery.
    NoRoute,
    /// The next hop is a device already on the path.
    Loop,
    /// Still forwarded when the hop limit was reached.
    HopLimit,
    /// Refused by the incoming ACL of the receiving interface.
    DeniedIn,
    /// Refused by the outgoing ACL of the sending interface.
    DeniedOut,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::NullRouted => "null-routed",
            Disposition::ExitsNetwork => "exits-network",
            Disposition::NoRoute => "no-route",
            Disposition::Loop => "loop",
            Disposition::HopLimit => "hop-limit",
            Disposition::DeniedIn => "denied-in",
            Disposition::DeniedOut => "denied-out",
        };
        write!(f, "{}", s)
    }
}

/// Why a search result may be incomplete.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Truncation {
    HopLimit,
    Deadline,
    BranchLimit,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub hop_limit: usize,
    pub deadline: Option<Duration>,
    pub max_branches: Option<usize>,
    pub memoization: bool,
    pub threads: Option<usize>,
}

impl SearchConfig {
    pub fn new(hop_limit: usize) -> Self {
        Self {
            hop_limit,
            deadline: None,
            max_branches: None,
            memoization: false,
            threads: None,
        }
    }

    /// Wall-clock budget of each search, measured from its start.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_max_branches(mut self, max_branches: usize) -> Self {
        self.max_branches = Some(max_branches);
        self
    }

    /// Prune a branch whose bitsets are covered by a branch already seen at
    /// the same device and path length.
    pub fn with_memoization(mut self, memoization: bool) -> Self {
        self.memoization = memoization;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// A device, optionally with the interface the traffic enters through.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StartLocation {
    pub node: String,
    pub ingress_interface: Option<String>,
}

impl StartLocation {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            ingress_interface: None,
        }
    }

    pub fn with_ingress(mut self, iface: impl Into<String>) -> Self {
        self.ingress_interface = Some(iface.into());
        self
    }
}

impl fmt::Display for StartLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ingress_interface {
            Some(iface) => write!(f, "{}[{}]", self.node, iface),
            None => write!(f, "{}", self.node),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminalSummary {
    pub summary: PortReachabilitySummary,
    pub disposition: Disposition,
}

/// Everything one search produced.
#[derive(Debug, Clone)]
pub struct Exploration {
    pub start: StartLocation,
    pub arena: PathArena,
    pub summaries: Vec<TerminalSummary>,
    /// Branches whose bitsets became empty.
    pub pruned: Vec<PortReachabilitySummary>,
    pub truncation: BTreeSet<Truncation>,
    pub branches: usize,
}

impl Exploration {
    fn new(start: &StartLocation) -> Self {
        Self {
            start: start.clone(),
            arena: PathArena::new(),
            summaries: Vec::new(),
            pruned: Vec::new(),
            truncation: BTreeSet::new(),
            branches: 0,
        }
    }

    fn emit(&mut self, summary: PortReachabilitySummary, disposition: Disposition) {
        debug!(
            "{}: {} after {} hops",
            self.start, disposition, summary.path.len
        );
        self.summaries.push(TerminalSummary {
            summary,
            disposition,
        });
    }

    /// Reports the ACL atoms lost between `before` and `after`, for the
    /// forwarding atoms `after` still carries.
    fn deny(
        &mut self,
        before: &AtomSet,
        after: &PortReachabilitySummary,
        disposition: Disposition,
    ) {
        if after.forwarding.is_empty() {
            return;
        }
        let denied = before.difference(&after.acl);
        if denied.is_empty() {
            return;
        }
        self.emit(
            PortReachabilitySummary {
                path: after.path,
                forwarding: after.forwarding.clone(),
                acl: denied,
            },
            disposition,
        );
    }

    pub fn is_truncated(&self) -> bool {
        !self.truncation.is_empty()
    }
}

type Memo = HashMap<(NodeIndex, usize), Vec<(AtomSet, AtomSet)>>;

pub struct PathReachabilityEngine<'a> {
    model: &'a NetworkModel,
    config: &'a SearchConfig,
}

impl<'a> PathReachabilityEngine<'a> {
    pub fn new(model: &'a NetworkModel, config: &'a SearchConfig) -> Self {
        Self { model, config }
    }

    /// Explores every path from `start`, beginning with the headers in `seed`.
    pub fn search(&self, start: &StartLocation, seed: &HeaderSeed) -> Result<Exploration> {
        let model = self.model;
        let node = model.graph().node(&start.node)?;
        check_seed("forwarding", &seed.forwarding, model.forwarding_atoms().num_atoms())?;
        check_seed("ACL", &seed.acl, model.acl_atoms().num_atoms())?;
        let mut exploration = Exploration::new(start);

        let mut initial =
            PortReachabilitySummary::initial(node, seed.forwarding.clone(), seed.acl.clone());
        if let Some(iface) = &start.ingress_interface {
            let ingress = model.ingress_acl(node, iface)?;
            initial.apply_port(&model.full_forwarding(), ingress);
            exploration.deny(&seed.acl, &initial, Disposition::DeniedIn);
        }
        if initial.is_infeasible() {
            debug!("{}: nothing enters", start);
            exploration.pruned.push(initial);
            return Ok(exploration);
        }

        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        let mut memo = Memo::new();
        let mut stack = vec![initial];
        while let Some(current) = stack.pop() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("{}: deadline reached with {} open branches", start, stack.len() + 1);
                exploration.truncation.insert(Truncation::Deadline);
                break;
            }
            if self
                .step(current, &mut exploration, &mut stack, &mut memo)?
                .is_break()
            {
                warn!("{}: branch limit reached", start);
                exploration.truncation.insert(Truncation::BranchLimit);
                break;
            }
        }

        info!(
            "{}: {} terminal summaries, {} pruned, {} branches in {:.3} s",
            start,
            exploration.summaries.len(),
            exploration.pruned.len(),
            exploration.branches,
            started.elapsed().as_secs_f64()
        );
        Ok(exploration)
    }

    /// Expands one summary sitting at a device.
    fn step(
        &self,
        current: PortReachabilitySummary,
        exploration: &mut Exploration,
        stack: &mut Vec<PortReachabilitySummary>,
        memo: &mut Memo,
    ) -> Result<ControlFlow<()>> {
        let model = self.model;
        let graph = model.graph();
        let Some(node) = current.path.destination else {
            return Ok(ControlFlow::Continue(()));
        };
        let outgoing = graph.outgoing(node);

        let mut routed = AtomSet::empty(current.forwarding.width());
        for &link in outgoing {
            routed.or_assign(model.forwarding(link));
        }
        let unrouted = current.forwarding.difference(&routed);
        if !unrouted.is_empty() {
            exploration.emit(
                PortReachabilitySummary {
                    path: current.path,
                    forwarding: unrouted,
                    acl: current.acl.clone(),
                },
                Disposition::NoRoute,
            );
        }

        if current.path.len >= self.config.hop_limit {
            let continuing = current.forwarding.and(&routed);
            if !continuing.is_empty() {
                exploration.truncation.insert(Truncation::HopLimit);
                exploration.emit(
                    PortReachabilitySummary {
                        path: current.path,
                        forwarding: continuing,
                        acl: current.acl,
                    },
                    Disposition::HopLimit,
                );
            }
            return Ok(ControlFlow::Continue(()));
        }

        let full_forwarding = model.full_forwarding();
        for &l in outgoing {
            let forwarding = model.forwarding(l);
            if !current.forwarding.intersects(forwarding) {
                continue;
            }
            if let Some(max) = self.config.max_branches {
                if exploration.branches >= max {
                    return Ok(ControlFlow::Break(()));
                }
            }
            exploration.branches += 1;

            let link = graph.link(l)?;
            let mut next = current.extend_by(&mut exploration.arena, link);
            next.apply_port(forwarding, model.acl_out(l));
            exploration.deny(&current.acl, &next, Disposition::DeniedOut);
            if next.is_infeasible() {
                exploration.pruned.push(next);
                continue;
            }

            let target = match link.target {
                None => {
                    exploration.emit(next, Disposition::ExitsNetwork);
                    continue;
                }
                Some(t) if graph.node_data(t).is_drop => {
                    exploration.emit(next, Disposition::NullRouted);
                    continue;
                }
                Some(t) => t,
            };

            let sent = next.acl.clone();
            next.apply_port(&full_forwarding, model.acl_in(l));
            exploration.deny(&sent, &next, Disposition::DeniedIn);
            if next.is_infeasible() {
                exploration.pruned.push(next);
                continue;
            }
            if exploration.arena.visits(current.path, target) {
                exploration.emit(next, Disposition::Loop);
                continue;
            }
            if self.config.memoization && !remember(memo, target, &next) {
                debug!("{}: covered branch at {} pruned", exploration.start, target);
                continue;
            }
            stack.push(next);
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Runs one search per start location. Each start succeeds or fails on
    /// its own.
    pub fn search_all(
        &self,
        starts: &[StartLocation],
        seed: &HeaderSeed,
    ) -> Vec<Result<Exploration>> {
        let run = || {
            starts
                .par_iter()
                .map(|start| self.search(start, seed))
                .collect::<Vec<_>>()
        };
        match self.config.threads {
            Some(threads) => match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
            {
                Ok(pool) => pool.install(run),
                Err(e) => {
                    warn!(
                        "Cannot build a pool of {} threads ({}), using the global pool",
                        threads, e
                    );
                    run()
                }
            },
            None => run(),
        }
    }
}

fn check_seed(family: &'static str, seed: &AtomSet, atoms: usize) -> Result<()> {
    if seed.width() != atoms {
        return Err(Error::SeedWidth {
            family,
            expected: atoms,
            found: seed.width(),
        });
    }
    Ok(())
}

/// Records `summary` at `node` unless a seen pair already covers it.
/// Returns whether the summary is new.
fn remember(memo: &mut Memo, node: NodeIndex, summary: &PortReachabilitySummary) -> bool {
    let seen = memo.entry((node, summary.path.len)).or_default();
    let covered = seen
        .iter()
        .any(|(f, a)| summary.forwarding.is_subset(f) && summary.acl.is_subset(a));
    if !covered {
        seen.push((summary.forwarding.clone(), summary.acl.clone()));
    }
    !covered
}
