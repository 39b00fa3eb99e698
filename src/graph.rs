//! Densely indexed topology: devices as nodes, interfaces as directed links.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use log::debug;

use crate::datamodel::{Snapshot, NULL_INTERFACE};
use crate::error::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkIndex(pub usize);

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for LinkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "l{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub index: NodeIndex,
    pub is_drop: bool,
    /// Active interfaces.
    pub interfaces: BTreeSet<String>,
}

/// A directed edge leaving `source:source_iface`.
///
/// A link without a target leaves the network. Links compare by index only.
#[derive(Debug, Clone)]
pub struct GraphLink {
    pub index: LinkIndex,
    pub source: NodeIndex,
    pub source_iface: String,
    pub target: Option<NodeIndex>,
    pub target_iface: Option<String>,
}

impl PartialEq for GraphLink {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for GraphLink {}

#[derive(Debug, Clone)]
pub struct GraphModel {
    nodes: Vec<GraphNode>,
    links: Vec<GraphLink>,
    by_name: HashMap<String, NodeIndex>,
    outgoing: Vec<Vec<LinkIndex>>,
    by_port: HashMap<(NodeIndex, String), Vec<LinkIndex>>,
}

impl GraphModel {
    /// Index of the drop sentinel.
    pub const DROP: NodeIndex = NodeIndex(0);
    pub const DROP_NAME: &'static str = "(drop)";

    pub fn build(snapshot: &Snapshot) -> Result<Self> {
        let mut configs = snapshot.configurations.iter().collect::<Vec<_>>();
        configs.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        let mut model = GraphModel {
            nodes: Vec::with_capacity(configs.len() + 1),
            links: Vec::new(),
            by_name: HashMap::new(),
            outgoing: Vec::new(),
            by_port: HashMap::new(),
        };
        model.add_node(Self::DROP_NAME, true, BTreeSet::new());

        for config in &configs {
            if model.by_name.contains_key(&config.hostname) {
                return Err(Error::DuplicateNode(config.hostname.clone()));
            }
            let interfaces = config
                .interfaces
                .values()
                .filter(|i| i.active)
                .map(|i| i.name.clone())
                .collect();
            model.add_node(&config.hostname, false, interfaces);
        }

        let mut adjacent: HashMap<(NodeIndex, &str), Vec<(NodeIndex, &str)>> = HashMap::new();
        for edge in &snapshot.topology.edges {
            let (n1, ok1) = model.check_port(snapshot, &edge.node1, &edge.iface1)?;
            let (n2, ok2) = model.check_port(snapshot, &edge.node2, &edge.iface2)?;
            if !ok1 || !ok2 {
                debug!(
                    "Skipping edge {}:{} -> {}:{} on an inactive interface",
                    edge.node1, edge.iface1, edge.node2, edge.iface2
                );
                continue;
            }
            adjacent
                .entry((n1, edge.iface1.as_str()))
                .or_default()
                .push((n2, edge.iface2.as_str()));
        }

        for (i, config) in configs.iter().enumerate() {
            let node = NodeIndex(i + 1);
            for iface in config.interfaces.values().filter(|i| i.active) {
                let iface = iface.name.as_str();
                match adjacent.get_mut(&(node, iface)) {
                    Some(targets) => {
                        targets.sort();
                        targets.dedup();
                        for &(target, target_iface) in targets.iter() {
                            model.add_link(node, iface, Some(target), Some(target_iface));
                        }
                    }
                    None => model.add_link(node, iface, None, None),
                }
            }
            model.add_link(node, NULL_INTERFACE, Some(Self::DROP), None);
        }

        debug!(
            "Built graph with {} nodes and {} links",
            model.nodes.len(),
            model.links.len()
        );
        Ok(model)
    }

    fn add_node(&mut self, name: &str, is_drop: bool, interfaces: BTreeSet<String>) {
        let index = NodeIndex(self.nodes.len());
        self.nodes.push(GraphNode {
            name: name.to_string(),
            index,
            is_drop,
            interfaces,
        });
        self.by_name.insert(name.to_string(), index);
        self.outgoing.push(Vec::new());
    }

    fn add_link(
        &mut self,
        source: NodeIndex,
        source_iface: &str,
        target: Option<NodeIndex>,
        target_iface: Option<&str>,
    ) {
        let index = LinkIndex(self.links.len());
        self.links.push(GraphLink {
            index,
            source,
            source_iface: source_iface.to_string(),
            target,
            target_iface: target_iface.map(str::to_string),
        });
        self.outgoing[source.0].push(index);
        self.by_port
            .entry((source, source_iface.to_string()))
            .or_default()
            .push(index);
    }

    /// Resolves a port; the flag tells whether the interface is active.
    fn check_port(&self, snapshot: &Snapshot, node: &str, iface: &str) -> Result<(NodeIndex, bool)> {
        let index = self.node(node)?;
        let defined = snapshot
            .configurations
            .iter()
            .any(|c| c.hostname == node && c.interfaces.contains_key(iface));
        if !defined {
            return Err(Error::UnknownInterface {
                node: node.to_string(),
                iface: iface.to_string(),
            });
        }
        let active = self.nodes[index.0].interfaces.contains(iface);
        Ok((index, active))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_links(&self) -> usize {
        self.links.len()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn links(&self) -> &[GraphLink] {
        &self.links
    }

    /// Looks up a device by name. The drop sentinel is not a device.
    pub fn node(&self, name: &str) -> Result<NodeIndex> {
        match self.by_name.get(name) {
            Some(&index) if index != Self::DROP => Ok(index),
            _ => Err(Error::UnknownNode(name.to_string())),
        }
    }

    pub fn node_data(&self, index: NodeIndex) -> &GraphNode {
        &self.nodes[index.0]
    }

    pub fn link(&self, index: LinkIndex) -> Result<&GraphLink> {
        self.links.get(index.0).ok_or(Error::InvalidLink(index.0))
    }

    /// Links leaving `node` through `iface`; empty for an inactive interface.
    pub fn link_for(&self, node: NodeIndex, iface: &str) -> &[LinkIndex] {
        self.by_port
            .get(&(node, iface.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn outgoing(&self, node: NodeIndex) -> &[LinkIndex] {
        &self.outgoing[node.0]
    }

    /// Renders a link as `device:iface -> device:iface`.
    pub fn describe(&self, link: LinkIndex) -> String {
        let Some(l) = self.links.get(link.0) else {
            return format!("{}", link);
        };
        let source = &self.nodes[l.source.0].name;
        match (l.target, &l.target_iface) {
            (Some(t), Some(ti)) => format!(
                "{}:{} -> {}:{}",
                source, l.source_iface, self.nodes[t.0].name, ti
            ),
            (Some(t), None) => format!("{}:{} -> {}", source, l.source_iface, self.nodes[t.0].name),
            (None, _) => format!("{}:{} -> (outside)", source, l.source_iface),
        }
    }
}
