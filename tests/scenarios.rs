//! End-to-end reachability scenarios over small hand-built networks.

use test_log::test;

use netreach::atoms::AtomicPredicateComputer;
use netreach::bdd::Bdd;
use netreach::compile::PacketFormulaCompiler;
use netreach::datamodel::{
    Acl, AclLine, Configuration, Fib, FibRow, HeaderSpace, Interface, IpProtocol, MatchExpr,
    Prefix, Snapshot, Topology,
};
use netreach::network::{ModelConfig, NetworkModel};
use netreach::packet::PacketVars;
use netreach::query::{Reachability, ReachabilityQuery};
use netreach::search::{Disposition, PathReachabilityEngine, SearchConfig, StartLocation};

fn prefix(s: &str) -> Prefix {
    s.parse().unwrap()
}

/// `a:eth0 <-> b:eth0`, with `a` routing 10.0.2.0/24 towards `b`.
fn two_devices(a: Configuration, fib: Fib) -> Snapshot {
    Snapshot {
        configurations: vec![
            a,
            Configuration::new("b").with_interface(Interface::new("eth0")),
        ],
        topology: Topology::default().with_link("a", "eth0", "b", "eth0"),
        fib,
    }
}

#[test]
fn test_two_devices_without_acls() {
    let bdd = Bdd::default();
    let pkt = PacketVars::new();
    let snapshot = two_devices(
        Configuration::new("a").with_interface(Interface::new("eth0")),
        Fib::default().with_row("a", FibRow::new(prefix("10.0.2.0/24"), "eth0")),
    );
    let model = NetworkModel::build(&bdd, &pkt, &snapshot, &ModelConfig::default()).unwrap();

    // Match-all and none.
    assert_eq!(model.acl_atoms().num_atoms(), 2);

    let g = model.graph();
    let a = g.node("a").unwrap();
    let b = g.node("b").unwrap();
    let ab = g.link_for(a, "eth0")[0];
    let fwd = model.forwarding(ab);
    assert_eq!(fwd.count(), 1);
    let atom = fwd.iter().next().unwrap();
    assert_eq!(
        model.forwarding_atoms().atoms()[atom],
        pkt.dst_ip_in(&bdd, &prefix("10.0.2.0/24"))
    );

    let config = SearchConfig::new(4);
    let e = PathReachabilityEngine::new(&model, &config)
        .search(&StartLocation::new("a"), &model.unconstrained())
        .unwrap();
    let at_b = e
        .summaries
        .iter()
        .filter(|t| t.summary.path.destination == Some(b))
        .collect::<Vec<_>>();
    assert_eq!(at_b.len(), 1);
    assert!(!at_b[0].summary.is_infeasible());
    assert_eq!(at_b[0].summary.path.len, 1);

    let query = ReachabilityQuery::new(vec![StartLocation::new("a")], SearchConfig::new(4))
        .with_destination("b");
    let answers = Reachability::new(&bdd, &pkt, &model).answer(&query).unwrap();
    assert_eq!(answers.answers.len(), 1);
    assert_eq!(answers.answers[0].disposition, Disposition::NoRoute);
}

#[test]
fn test_icmp_denied_at_ingress_is_infeasible() {
    let bdd = Bdd::default();
    let pkt = PacketVars::new();
    let deny_icmp = Acl::new(
        "no-icmp",
        vec![
            AclLine::deny("deny icmp", HeaderSpace::default().with_protocol(IpProtocol::ICMP)),
            AclLine::permit("permit any", MatchExpr::True),
        ],
    );
    let a = Configuration::new("a")
        .with_interface(Interface::new("eth0").with_incoming_filter("no-icmp"))
        .with_acl(deny_icmp);
    let fib = Fib::default()
        .with_row("a", FibRow::new(prefix("10.0.2.0/24"), "eth0"))
        .with_row("b", FibRow::new(Prefix::any(), "eth0"));
    let model =
        NetworkModel::build(&bdd, &pkt, &two_devices(a, fib), &ModelConfig::default()).unwrap();

    let icmp = PacketFormulaCompiler::new(&bdd, &pkt)
        .compile_header_space(&HeaderSpace::default().with_protocol(IpProtocol::ICMP))
        .unwrap();
    let seed = model.seed(&bdd, icmp);
    let config = SearchConfig::new(4);
    let engine = PathReachabilityEngine::new(&model, &config);

    // Entering a:eth0 directly: the whole flow is refused at the door.
    let e = engine
        .search(&StartLocation::new("a").with_ingress("eth0"), &seed)
        .unwrap();
    assert_eq!(e.pruned.len(), 1);
    assert!(e.pruned[0].acl.is_empty());
    assert!(e.pruned[0].is_infeasible());
    assert_eq!(e.summaries.len(), 1);
    assert_eq!(e.summaries[0].disposition, Disposition::DeniedIn);
    assert_eq!(e.summaries[0].summary.path.len, 0);
    let denied = &e.summaries[0].summary;
    assert_eq!(model.project(&bdd, &denied.forwarding, &denied.acl), icmp);

    // Arriving from b.
    let a_index = model.graph().node("a").unwrap();
    let e = engine.search(&StartLocation::new("b"), &seed).unwrap();
    let at_a = e
        .summaries
        .iter()
        .filter(|t| t.summary.path.destination == Some(a_index))
        .collect::<Vec<_>>();
    assert_eq!(at_a.len(), 1);
    assert_eq!(at_a[0].disposition, Disposition::DeniedIn);
    let entry = e
        .pruned
        .iter()
        .find(|s| s.path.destination == Some(a_index))
        .unwrap();
    assert!(entry.acl.is_empty());

    // Non-ICMP traffic still gets through.
    let query = ReachabilityQuery::new(vec![StartLocation::new("b")], SearchConfig::new(4))
        .with_headers(HeaderSpace::default().with_protocol(IpProtocol::TCP))
        .with_destination("a");
    let answers = Reachability::new(&bdd, &pkt, &model).answer(&query).unwrap();
    assert!(!answers.answers.is_empty());
    assert!(answers.errors.is_empty());
}

#[test]
fn test_shared_three_line_acl() {
    let bdd = Bdd::default();
    let pkt = PacketVars::new();
    let lines = vec![
        AclLine::permit("10", HeaderSpace::default().with_dst_ip(prefix("10.0.0.0/8"))),
        AclLine::deny("20", HeaderSpace::default().with_dst_ip(prefix("10.1.0.0/16"))),
        AclLine::permit("30", MatchExpr::True),
    ];

    let mut compiler = PacketFormulaCompiler::new(&bdd, &pkt);
    let conditions = lines
        .iter()
        .map(|l| compiler.compile_match(&l.matches).unwrap())
        .collect::<Vec<_>>();
    let ap = AtomicPredicateComputer::new(&bdd).compute(&conditions);
    assert!(ap.num_atoms() >= 3);
    for (label, &f) in conditions.iter().enumerate() {
        assert_eq!(ap.formula_of(&bdd, ap.bits(label)), f, "line {}", label);
    }

    let acl = Acl::new("shared", lines);
    let r1 = Configuration::new("r1")
        .with_interface(Interface::new("eth0").with_incoming_filter("shared"))
        .with_interface(Interface::new("eth1").with_outgoing_filter("shared"))
        .with_acl(acl.clone());
    let snapshot = Snapshot {
        configurations: vec![r1],
        ..Default::default()
    };
    let model = NetworkModel::build(&bdd, &pkt, &snapshot, &ModelConfig::default()).unwrap();
    let g = model.graph();
    let r1 = g.node("r1").unwrap();
    let eth1 = g.link_for(r1, "eth1")[0];
    let permitted = model.ingress_acl(r1, "eth0").unwrap();
    assert_eq!(permitted, model.acl_out(eth1));

    let expected = compiler
        .compile_acl(&acl, netreach::compile::Direction::Incoming)
        .unwrap();
    assert_eq!(model.acl_atoms().formula_of(&bdd, permitted), expected);
}

#[test]
fn test_equal_length_fib_rows_claim_once() {
    let bdd = Bdd::default();
    let pkt = PacketVars::new();
    let r1 = Configuration::new("r1")
        .with_interface(Interface::new("eth0"))
        .with_interface(Interface::new("eth1"));
    let fib = Fib::default()
        .with_row("r1", FibRow::new(prefix("10.5.0.0/16"), "eth1"))
        .with_row("r1", FibRow::new(prefix("10.5.0.0/16"), "eth0"));
    let snapshot = Snapshot {
        configurations: vec![r1],
        fib,
        ..Default::default()
    };
    let model = NetworkModel::build(&bdd, &pkt, &snapshot, &ModelConfig::default()).unwrap();

    let g = model.graph();
    let r1 = g.node("r1").unwrap();
    let eth0 = model.forwarding(g.link_for(r1, "eth0")[0]);
    let eth1 = model.forwarding(g.link_for(r1, "eth1")[0]);
    assert!(!eth0.intersects(eth1));

    let atoms = model.forwarding_atoms();
    let dst = pkt.dst_ip_in(&bdd, &prefix("10.5.0.0/16"));
    let claimed = bdd.apply_or(atoms.formula_of(&bdd, eth0), atoms.formula_of(&bdd, eth1));
    assert_eq!(claimed, dst);
    assert!(eth0.is_empty() != eth1.is_empty());

    // Same answer with the rows in the other order.
    let fib = Fib::default()
        .with_row("r1", FibRow::new(prefix("10.5.0.0/16"), "eth0"))
        .with_row("r1", FibRow::new(prefix("10.5.0.0/16"), "eth1"));
    let snapshot = Snapshot { fib, ..snapshot };
    let again = NetworkModel::build(&bdd, &pkt, &snapshot, &ModelConfig::default()).unwrap();
    let eth0_again = again.forwarding(again.graph().link_for(r1, "eth0")[0]);
    assert_eq!(
        again.forwarding_atoms().formula_of(&bdd, eth0_again),
        atoms.formula_of(&bdd, eth0)
    );
}

#[test]
fn test_forwarding_loop_terminates() {
    let bdd = Bdd::default();
    let pkt = PacketVars::new();
    let snapshot = Snapshot {
        configurations: vec![
            Configuration::new("a").with_interface(Interface::new("eth0")),
            Configuration::new("b").with_interface(Interface::new("eth0")),
        ],
        topology: Topology::default().with_link("a", "eth0", "b", "eth0"),
        fib: Fib::default()
            .with_row("a", FibRow::new(Prefix::any(), "eth0"))
            .with_row("b", FibRow::new(prefix("10.7.0.0/16"), "eth0")),
    };
    let model = NetworkModel::build(&bdd, &pkt, &snapshot, &ModelConfig::default()).unwrap();

    let config = SearchConfig::new(4);
    let e = PathReachabilityEngine::new(&model, &config)
        .search(&StartLocation::new("a"), &model.unconstrained())
        .unwrap();
    assert!(e.summaries.iter().all(|t| t.summary.path.len <= 4));

    let looped = e
        .summaries
        .iter()
        .find(|t| t.disposition == Disposition::Loop)
        .unwrap();
    let headers = model.project(&bdd, &looped.summary.forwarding, &looped.summary.acl);
    assert_eq!(headers, pkt.dst_ip_in(&bdd, &prefix("10.7.0.0/16")));
    assert_eq!(
        e.arena.links(looped.summary.path).len(),
        looped.summary.path.len
    );
}
