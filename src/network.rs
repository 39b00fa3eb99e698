//! Per-snapshot atomic-predicate model of a network.
//!
//! Two independent refinement runs are made over one manager: one over every
//! interface ACL binding and one over every per-interface forwarding
//! decision. Each link of the graph then carries three bitsets: the
//! forwarding atoms that leave through it, the atoms its outgoing ACL
//! permits, and the atoms the incoming ACL at its far end permits.

use std::collections::HashMap;
use std::time::Instant;

use log::info;

use crate::atoms::{AtomicPredicateComputer, AtomicPredicates};
use crate::bdd::Bdd;
use crate::bitset::AtomSet;
use crate::compile::{Direction, PacketFormulaCompiler};
use crate::datamodel::{Configuration, Snapshot, NULL_INTERFACE};
use crate::error::{Error, Result};
use crate::graph::{GraphModel, LinkIndex, NodeIndex};
use crate::packet::PacketVars;
use crate::reference::Ref;

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Atom cap for each family. `None` refines completely.
    pub max_atoms: Option<usize>,
    /// Feed ACL bindings to the refinement in ascending line count.
    pub sort_by_size: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_atoms: None,
            sort_by_size: true,
        }
    }
}

impl ModelConfig {
    pub fn with_max_atoms(mut self, max_atoms: usize) -> Self {
        self.max_atoms = Some(max_atoms);
        self
    }

    pub fn with_sort_by_size(mut self, sort_by_size: bool) -> Self {
        self.sort_by_size = sort_by_size;
        self
    }
}

/// Initial bitsets of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSeed {
    pub forwarding: AtomSet,
    pub acl: AtomSet,
}

struct AclBinding {
    node: NodeIndex,
    iface: String,
    direction: Direction,
    lines: usize,
    formula: Ref,
}

type PortKey = (NodeIndex, String);

#[derive(Debug, Clone)]
pub struct NetworkModel {
    graph: GraphModel,
    acl_atoms: AtomicPredicates,
    fwd_atoms: AtomicPredicates,
    acl_in: Vec<AtomSet>,
    acl_out: Vec<AtomSet>,
    forwarding: Vec<AtomSet>,
    ingress: HashMap<PortKey, AtomSet>,
}

impl NetworkModel {
    pub fn build(
        bdd: &Bdd,
        packet: &PacketVars,
        snapshot: &Snapshot,
        config: &ModelConfig,
    ) -> Result<Self> {
        let start = Instant::now();
        let graph = GraphModel::build(snapshot)?;
        let configs: HashMap<&str, &Configuration> = snapshot
            .configurations
            .iter()
            .map(|c| (c.hostname.as_str(), c))
            .collect();

        let mut computer = AtomicPredicateComputer::new(bdd);
        if let Some(max) = config.max_atoms {
            computer = computer.with_max_atoms(max);
        }

        // ACL family. Label 0 stands for "no ACL".
        let mut bindings = Vec::new();
        for node in graph.nodes().iter().filter(|n| !n.is_drop) {
            let device = configs[node.name.as_str()];
            let mut compiler =
                PacketFormulaCompiler::for_device(bdd, packet, &device.hostname, &device.acls);
            for iface in device.interfaces.values().filter(|i| i.active) {
                let filters = [
                    (Direction::Incoming, &iface.incoming_filter),
                    (Direction::Outgoing, &iface.outgoing_filter),
                ];
                for (direction, filter) in filters {
                    let Some(name) = filter else { continue };
                    let acl = device.acls.get(name).ok_or_else(|| Error::UnknownAcl {
                        node: device.hostname.clone(),
                        name: name.clone(),
                    })?;
                    bindings.push(AclBinding {
                        node: node.index,
                        iface: iface.name.clone(),
                        direction,
                        lines: acl.lines.len(),
                        formula: compiler.compile_acl(acl, direction)?,
                    });
                }
            }
        }
        if config.sort_by_size {
            bindings.sort_by_key(|b| b.lines);
        }

        let mut acl_formulas = vec![bdd.one()];
        acl_formulas.extend(bindings.iter().map(|b| b.formula));
        let acl_atoms = computer.compute(&acl_formulas);
        let acl_labels: HashMap<(NodeIndex, &str, Direction), usize> = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| ((b.node, b.iface.as_str(), b.direction), i + 1))
            .collect();

        // Forwarding family. Label 0 is the universe, as above.
        for device in snapshot.fib.devices() {
            graph.node(device)?;
        }
        let mut fwd_formulas = vec![bdd.one()];
        let mut fwd_labels: HashMap<PortKey, usize> = HashMap::new();
        let compiler = PacketFormulaCompiler::new(bdd, packet);
        for node in graph.nodes().iter().filter(|n| !n.is_drop) {
            let rows = snapshot.fib.rows(&node.name);
            let device = configs[node.name.as_str()];
            for (iface, f) in compiler.compile_forwarding(&rows) {
                if iface != NULL_INTERFACE && !device.interfaces.contains_key(&iface) {
                    return Err(Error::UnknownInterface {
                        node: node.name.clone(),
                        iface,
                    });
                }
                fwd_labels.insert((node.index, iface), fwd_formulas.len());
                fwd_formulas.push(f);
            }
        }
        let fwd_atoms = computer.compute(&fwd_formulas);

        let unfiltered = acl_atoms.bits(0);
        let acl_bits = |node: NodeIndex, iface: &str, direction: Direction| {
            acl_labels
                .get(&(node, iface, direction))
                .map_or(unfiltered, |&label| acl_atoms.bits(label))
                .clone()
        };

        let mut acl_in = Vec::with_capacity(graph.num_links());
        let mut acl_out = Vec::with_capacity(graph.num_links());
        let mut forwarding = Vec::with_capacity(graph.num_links());
        for link in graph.links() {
            forwarding.push(
                fwd_labels
                    .get(&(link.source, link.source_iface.clone()))
                    .map_or_else(
                        || AtomSet::empty(fwd_atoms.num_atoms()),
                        |&label| fwd_atoms.bits(label).clone(),
                    ),
            );
            acl_out.push(acl_bits(link.source, &link.source_iface, Direction::Outgoing));
            acl_in.push(match (link.target, &link.target_iface) {
                (Some(target), Some(target_iface)) => {
                    acl_bits(target, target_iface, Direction::Incoming)
                }
                _ => unfiltered.clone(),
            });
        }

        let mut ingress = HashMap::new();
        for node in graph.nodes() {
            for iface in &node.interfaces {
                ingress.insert(
                    (node.index, iface.clone()),
                    acl_bits(node.index, iface, Direction::Incoming),
                );
            }
        }

        info!(
            "Built network model: {} devices, {} links, {} ACL atoms ({} bindings), \
             {} forwarding atoms ({} decisions) in {:.3} s",
            graph.num_nodes() - 1,
            graph.num_links(),
            acl_atoms.num_atoms(),
            bindings.len(),
            fwd_atoms.num_atoms(),
            fwd_formulas.len() - 1,
            start.elapsed().as_secs_f64()
        );

        Ok(Self {
            graph,
            acl_atoms,
            fwd_atoms,
            acl_in,
            acl_out,
            forwarding,
            ingress,
        })
    }

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn acl_atoms(&self) -> &AtomicPredicates {
        &self.acl_atoms
    }

    pub fn forwarding_atoms(&self) -> &AtomicPredicates {
        &self.fwd_atoms
    }

    /// Atoms permitted by the incoming ACL where `link` lands.
    pub fn acl_in(&self, link: LinkIndex) -> &AtomSet {
        &self.acl_in[link.0]
    }

    /// Atoms permitted by the outgoing ACL where `link` leaves.
    pub fn acl_out(&self, link: LinkIndex) -> &AtomSet {
        &self.acl_out[link.0]
    }

    /// Forwarding atoms routed out through `link`.
    pub fn forwarding(&self, link: LinkIndex) -> &AtomSet {
        &self.forwarding[link.0]
    }

    /// Atoms permitted by the incoming ACL of an active interface.
    pub fn ingress_acl(&self, node: NodeIndex, iface: &str) -> Result<&AtomSet> {
        self.ingress
            .get(&(node, iface.to_string()))
            .ok_or_else(|| Error::UnknownInterface {
                node: self.graph.node_data(node).name.clone(),
                iface: iface.to_string(),
            })
    }

    pub fn full_acl(&self) -> AtomSet {
        self.acl_atoms.full()
    }

    pub fn full_forwarding(&self) -> AtomSet {
        self.fwd_atoms.full()
    }

    /// Whether either family hit the atom cap.
    pub fn is_truncated(&self) -> bool {
        self.acl_atoms.is_truncated() || self.fwd_atoms.is_truncated()
    }

    /// The headers a pair of bitsets stands for.
    pub fn project(&self, bdd: &Bdd, forwarding: &AtomSet, acl: &AtomSet) -> Ref {
        let f = self.fwd_atoms.formula_of(bdd, forwarding);
        if bdd.is_zero(f) {
            return f;
        }
        bdd.apply_and(f, self.acl_atoms.formula_of(bdd, acl))
    }

    /// Atoms of each family that share headers with `query`.
    pub fn seed(&self, bdd: &Bdd, query: Ref) -> HeaderSeed {
        HeaderSeed {
            forwarding: self.fwd_atoms.overlapping(bdd, query),
            acl: self.acl_atoms.overlapping(bdd, query),
        }
    }

    /// A seed admitting every header.
    pub fn unconstrained(&self) -> HeaderSeed {
        HeaderSeed {
            forwarding: self.full_forwarding(),
            acl: self.full_acl(),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::datamodel::{
        Acl, AclLine, Fib, FibRow, HeaderSpace, Interface, IpProtocol, Prefix, Topology,
    };

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    fn two_routers(acl_on_a: Option<Acl>) -> Snapshot {
        let mut a = Configuration::new("a").with_interface(Interface::new("eth0"));
        if let Some(acl) = acl_on_a {
            a.interfaces
                .insert("eth0".into(), Interface::new("eth0").with_incoming_filter(&acl.name));
            a = a.with_acl(acl);
        }
        Snapshot {
            configurations: vec![a, Configuration::new("b").with_interface(Interface::new("eth0"))],
            topology: Topology::default().with_link("a", "eth0", "b", "eth0"),
            fib: Fib::default().with_row("a", FibRow::new(prefix("10.0.2.0/24"), "eth0")),
        }
    }

    #[test]
    fn test_model_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NetworkModel>();
    }

    #[test]
    fn test_no_acls() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let model =
            NetworkModel::build(&bdd, &pkt, &two_routers(None), &ModelConfig::default()).unwrap();

        assert_eq!(model.acl_atoms().num_atoms(), 2);
        assert!(!model.is_truncated());

        let g = model.graph();
        let a = g.node("a").unwrap();
        let ab = g.link_for(a, "eth0")[0];
        let fwd = model.forwarding(ab);
        assert_eq!(fwd.count(), 1);
        let subnet = pkt.dst_ip_in(&bdd, &prefix("10.0.2.0/24"));
        assert_eq!(model.forwarding_atoms().formula_of(&bdd, fwd), subnet);

        // b has no FIB, so nothing leaves it.
        let b = g.node("b").unwrap();
        for &link in g.outgoing(b) {
            assert!(model.forwarding(link).is_empty());
        }
        assert_eq!(model.project(&bdd, fwd, model.acl_in(ab)), subnet);
    }

    #[test]
    fn test_acl_bindings() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let deny_icmp = Acl::new(
            "no-icmp",
            vec![
                AclLine::deny("1", HeaderSpace::default().with_protocol(IpProtocol::ICMP)),
                AclLine::permit("2", crate::datamodel::MatchExpr::True),
            ],
        );
        let model = NetworkModel::build(
            &bdd,
            &pkt,
            &two_routers(Some(deny_icmp)),
            &ModelConfig::default(),
        )
        .unwrap();

        let g = model.graph();
        let a = g.node("a").unwrap();
        let b = g.node("b").unwrap();
        let ba = g.link_for(b, "eth0")[0];
        let icmp = pkt.ip_protocol.value(&bdd, IpProtocol::ICMP as u64);

        let permitted = model.acl_atoms().formula_of(&bdd, model.acl_in(ba));
        assert_eq!(permitted, -icmp);
        assert_eq!(model.ingress_acl(a, "eth0").unwrap(), model.acl_in(ba));
        assert!(model.acl_out(ba).is_full());

        let seed = model.seed(&bdd, icmp);
        assert!(!seed.acl.intersects(model.acl_in(ba)));
        assert!(matches!(
            model.ingress_acl(a, "eth7"),
            Err(Error::UnknownInterface { .. })
        ));
    }

    #[test]
    fn test_unknown_references() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();

        let mut s = two_routers(None);
        s.configurations[0]
            .interfaces
            .insert("eth0".into(), Interface::new("eth0").with_outgoing_filter("missing"));
        assert!(matches!(
            NetworkModel::build(&bdd, &pkt, &s, &ModelConfig::default()),
            Err(Error::UnknownAcl { .. })
        ));

        let mut s = two_routers(None);
        s.fib.add_row("a", "default", FibRow::new(Prefix::any(), "eth3"));
        assert!(matches!(
            NetworkModel::build(&bdd, &pkt, &s, &ModelConfig::default()),
            Err(Error::UnknownInterface { .. })
        ));

        let mut s = two_routers(None);
        s.fib.add_row("zz", "default", FibRow::new(Prefix::any(), "eth0"));
        assert_eq!(
            NetworkModel::build(&bdd, &pkt, &s, &ModelConfig::default()).unwrap_err(),
            Error::UnknownNode("zz".into())
        );
    }

    #[test]
    fn test_null_route() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let mut s = two_routers(None);
        s.fib
            .add_row("a", "default", FibRow::new(prefix("10.9.0.0/16"), NULL_INTERFACE));
        let model = NetworkModel::build(&bdd, &pkt, &s, &ModelConfig::default()).unwrap();

        let g = model.graph();
        let a = g.node("a").unwrap();
        let null = g.link_for(a, NULL_INTERFACE)[0];
        assert_eq!(
            model.forwarding_atoms().formula_of(&bdd, model.forwarding(null)),
            pkt.dst_ip_in(&bdd, &prefix("10.9.0.0/16"))
        );
    }
}
