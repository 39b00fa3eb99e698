//! Reachability questions answered over a [`NetworkModel`].

use std::collections::BTreeSet;
use std::fmt;

use log::{info, warn};

use crate::bdd::Bdd;
use crate::compile::PacketFormulaCompiler;
use crate::datamodel::HeaderSpace;
use crate::error::{Error, Result};
use crate::graph::NodeIndex;
use crate::network::NetworkModel;
use crate::packet::{Packet, PacketVars};
use crate::path::{Path, PathArena};
use crate::reference::Ref;
use crate::search::{
    Disposition, PathReachabilityEngine, SearchConfig, StartLocation, Truncation,
};

/// Which headers, starting where, can end up where, and how.
///
/// Empty `destinations` or `dispositions` accept everything.
#[derive(Debug, Clone)]
pub struct ReachabilityQuery {
    pub starts: Vec<StartLocation>,
    pub destinations: BTreeSet<String>,
    pub headers: HeaderSpace,
    pub dispositions: BTreeSet<Disposition>,
    pub search: SearchConfig,
}

impl ReachabilityQuery {
    pub fn new(starts: Vec<StartLocation>, search: SearchConfig) -> Self {
        Self {
            starts,
            destinations: BTreeSet::new(),
            headers: HeaderSpace::default(),
            dispositions: BTreeSet::new(),
            search,
        }
    }

    pub fn with_destination(mut self, node: impl Into<String>) -> Self {
        self.destinations.insert(node.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderSpace) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_disposition(mut self, disposition: Disposition) -> Self {
        self.dispositions.insert(disposition);
        self
    }
}

/// One class of packets that share a path and a fate.
#[derive(Debug, Clone)]
pub struct Answer {
    pub start: StartLocation,
    pub disposition: Disposition,
    /// The last device the packets were on.
    pub device: String,
    /// `device:iface -> device:iface`, first hop first.
    pub hops: Vec<String>,
    pub headers: Ref,
    pub example: Packet,
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} => {} at {} ({} hops), e.g. {}",
            self.start,
            self.disposition,
            self.device,
            self.hops.len(),
            self.example
        )?;
        for hop in &self.hops {
            writeln!(f, "    {}", hop)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Answers {
    pub answers: Vec<Answer>,
    /// Start locations that could not be searched.
    pub errors: Vec<(StartLocation, Error)>,
    pub truncation: BTreeSet<Truncation>,
    /// Whether the atom cap made the model coarser than the configuration.
    pub atoms_truncated: bool,
}

impl Answers {
    pub fn is_truncated(&self) -> bool {
        self.atoms_truncated || !self.truncation.is_empty()
    }
}

pub struct Reachability<'a> {
    bdd: &'a Bdd,
    packet: &'a PacketVars,
    model: &'a NetworkModel,
}

impl<'a> Reachability<'a> {
    pub fn new(bdd: &'a Bdd, packet: &'a PacketVars, model: &'a NetworkModel) -> Self {
        Self { bdd, packet, model }
    }

    pub fn answer(&self, query: &ReachabilityQuery) -> Result<Answers> {
        let bdd = self.bdd;
        let model = self.model;
        let graph = model.graph();

        let wanted =
            PacketFormulaCompiler::new(bdd, self.packet).compile_header_space(&query.headers)?;
        let destinations = query
            .destinations
            .iter()
            .map(|d| graph.node(d))
            .collect::<Result<BTreeSet<_>>>()?;

        let seed = model.seed(bdd, wanted);
        let engine = PathReachabilityEngine::new(model, &query.search);
        let results = engine.search_all(&query.starts, &seed);

        let mut answers = Answers {
            atoms_truncated: model.is_truncated(),
            ..Default::default()
        };
        for (start, result) in query.starts.iter().zip(results) {
            let exploration = match result {
                Ok(exploration) => exploration,
                Err(e) => {
                    warn!("Cannot search from {}: {}", start, e);
                    answers.errors.push((start.clone(), e));
                    continue;
                }
            };
            answers.truncation.extend(exploration.truncation.iter().copied());

            for terminal in &exploration.summaries {
                if !query.dispositions.is_empty()
                    && !query.dispositions.contains(&terminal.disposition)
                {
                    continue;
                }
                let summary = &terminal.summary;
                let device =
                    self.last_device(&exploration.arena, summary.path, terminal.disposition);
                if !destinations.is_empty() && !destinations.contains(&device) {
                    continue;
                }
                let headers = bdd.apply_and(
                    model.project(bdd, &summary.forwarding, &summary.acl),
                    wanted,
                );
                let Some(example) = self.packet.example(bdd, headers) else {
                    continue;
                };
                answers.answers.push(Answer {
                    start: start.clone(),
                    disposition: terminal.disposition,
                    device: graph.node_data(device).name.clone(),
                    hops: exploration
                        .arena
                        .links(summary.path)
                        .into_iter()
                        .map(|l| graph.describe(l))
                        .collect(),
                    headers,
                    example,
                });
            }
        }

        info!(
            "Answered query from {} start(s): {} answers, {} errors{}",
            query.starts.len(),
            answers.answers.len(),
            answers.errors.len(),
            if answers.is_truncated() { " (truncated)" } else { "" }
        );
        Ok(answers)
    }

    /// Where the packets of a terminal summary stopped. Packets refused on
    /// the way out stay on the sending device.
    fn last_device(
        &self,
        arena: &PathArena,
        path: Path,
        disposition: Disposition,
    ) -> NodeIndex {
        let graph = self.model.graph();
        let sender = disposition == Disposition::DeniedOut;
        match path.destination {
            Some(node) if !sender && !graph.node_data(node).is_drop => node,
            _ => arena
                .last_link(path)
                .and_then(|l| graph.link(l).ok())
                .map_or(path.source, |l| l.source),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::datamodel::{
        Acl, AclLine, Configuration, Fib, FibRow, Interface, IpProtocol, MatchExpr, Prefix,
        Snapshot, SubRange, Topology,
    };
    use crate::network::ModelConfig;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    /// a -- b, where b only lets TCP in and owns 10.0.2.0/24.
    fn snapshot() -> Snapshot {
        let tcp_only = Acl::new(
            "tcp-only",
            vec![AclLine::permit(
                "1",
                HeaderSpace::default().with_protocol(IpProtocol::TCP),
            )],
        );
        Snapshot {
            configurations: vec![
                Configuration::new("a").with_interface(Interface::new("eth0")),
                Configuration::new("b")
                    .with_interface(Interface::new("eth0").with_incoming_filter("tcp-only"))
                    .with_acl(tcp_only),
            ],
            topology: Topology::default().with_link("a", "eth0", "b", "eth0"),
            fib: Fib::default().with_row("a", FibRow::new(prefix("10.0.2.0/24"), "eth0")),
        }
    }

    #[test]
    fn test_answer_filters_and_examples() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let model = NetworkModel::build(&bdd, &pkt, &snapshot(), &ModelConfig::default()).unwrap();
        let reach = Reachability::new(&bdd, &pkt, &model);

        let query = ReachabilityQuery::new(vec![StartLocation::new("a")], SearchConfig::new(4))
            .with_destination("b")
            .with_disposition(Disposition::NoRoute);
        let answers = reach.answer(&query).unwrap();

        assert_eq!(answers.answers.len(), 1);
        assert!(!answers.is_truncated());
        let answer = &answers.answers[0];
        assert_eq!(answer.device, "b");
        assert_eq!(answer.hops, vec!["a:eth0 -> b:eth0".to_string()]);
        assert_eq!(answer.example.ip_protocol, IpProtocol::TCP);
        assert!(prefix("10.0.2.0/24").contains(answer.example.dst_ip));

        let expected = bdd.apply_and(
            pkt.dst_ip_in(&bdd, &prefix("10.0.2.0/24")),
            pkt.ip_protocol.value(&bdd, IpProtocol::TCP as u64),
        );
        assert_eq!(answer.headers, expected);
    }

    #[test]
    fn test_header_query_restricts_answers() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let model = NetworkModel::build(&bdd, &pkt, &snapshot(), &ModelConfig::default()).unwrap();
        let reach = Reachability::new(&bdd, &pkt, &model);

        let udp = HeaderSpace::default()
            .with_protocol(IpProtocol::UDP)
            .with_dst_ip(prefix("10.0.2.7"));
        let query = ReachabilityQuery::new(vec![StartLocation::new("a")], SearchConfig::new(4))
            .with_headers(udp)
            .with_destination("b");
        let answers = reach.answer(&query.clone().with_disposition(Disposition::NoRoute)).unwrap();
        assert!(answers.answers.is_empty());

        // The UDP packets are refused by b's inbound filter.
        let answers = reach.answer(&query).unwrap();
        assert_eq!(answers.answers.len(), 1);
        let denied = &answers.answers[0];
        assert_eq!(denied.disposition, Disposition::DeniedIn);
        assert_eq!(denied.device, "b");
        assert_eq!(denied.example.ip_protocol, IpProtocol::UDP);
        assert_eq!(denied.hops, vec!["a:eth0 -> b:eth0".to_string()]);
    }

    #[test]
    fn test_denied_out_stays_on_the_sender() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let no_telnet = Acl::new(
            "no-telnet",
            vec![
                AclLine::deny(
                    "1",
                    HeaderSpace::default()
                        .with_protocol(IpProtocol::TCP)
                        .with_dst_ports(SubRange::single(23)),
                ),
                AclLine::permit("2", MatchExpr::True),
            ],
        );
        let mut snapshot = snapshot();
        snapshot.configurations[0] = Configuration::new("a")
            .with_interface(Interface::new("eth0").with_outgoing_filter("no-telnet"))
            .with_acl(no_telnet);
        let model = NetworkModel::build(&bdd, &pkt, &snapshot, &ModelConfig::default()).unwrap();
        let reach = Reachability::new(&bdd, &pkt, &model);

        let query = ReachabilityQuery::new(vec![StartLocation::new("a")], SearchConfig::new(4))
            .with_disposition(Disposition::DeniedOut);
        let answers = reach.answer(&query).unwrap();
        assert_eq!(answers.answers.len(), 1);
        let denied = &answers.answers[0];
        assert_eq!(denied.device, "a");
        assert_eq!(denied.example.dst_port, 23);
        let expected = bdd.apply_and_many([
            pkt.dst_ip_in(&bdd, &prefix("10.0.2.0/24")),
            pkt.ip_protocol.value(&bdd, IpProtocol::TCP as u64),
            pkt.dst_port.value(&bdd, 23),
        ]);
        assert_eq!(denied.headers, expected);

        // Filtering on the destination drops answers that never left a.
        let answers = reach.answer(&query.with_destination("b")).unwrap();
        assert!(answers.answers.is_empty());
    }

    #[test]
    fn test_bad_queries() {
        let bdd = Bdd::default();
        let pkt = PacketVars::new();
        let model = NetworkModel::build(&bdd, &pkt, &snapshot(), &ModelConfig::default()).unwrap();
        let reach = Reachability::new(&bdd, &pkt, &model);

        let query = ReachabilityQuery::new(vec![StartLocation::new("a")], SearchConfig::new(4))
            .with_destination("zz");
        assert!(matches!(reach.answer(&query), Err(Error::UnknownNode(_))));

        let query = ReachabilityQuery::new(
            vec![StartLocation::new("zz"), StartLocation::new("a")],
            SearchConfig::new(4),
        )
        .with_headers(HeaderSpace::default().with_protocol(IpProtocol::TCP));
        let answers = reach.answer(&query).unwrap();
        assert_eq!(answers.errors.len(), 1);
        assert_eq!(answers.errors[0].0, StartLocation::new("zz"));
        assert!(!answers.answers.is_empty());
    }
}
