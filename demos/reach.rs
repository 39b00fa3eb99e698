use clap::Parser;

use netreach::bdd::Bdd;
use netreach::datamodel::{
    Acl, AclLine, Configuration, Fib, FibRow, HeaderSpace, Interface, IpProtocol, MatchExpr,
    Prefix, Snapshot, SubRange, Topology, NULL_INTERFACE,
};
use netreach::network::{ModelConfig, NetworkModel};
use netreach::packet::PacketVars;
use netreach::query::{Reachability, ReachabilityQuery};
use netreach::search::{SearchConfig, StartLocation};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// Device the traffic starts from.
    #[arg(value_name = "DEVICE", default_value = "r1")]
    src: String,

    /// Only report packets ending on this device.
    #[clap(long, value_name = "DEVICE")]
    dst: Option<String>,

    /// Destination prefix of the traffic.
    #[clap(long, value_name = "PREFIX")]
    dst_ip: Option<Prefix>,

    /// IP protocol number (1 = ICMP, 6 = TCP, 17 = UDP).
    #[clap(long, value_name = "INT")]
    protocol: Option<u8>,

    /// Destination port.
    #[clap(long, value_name = "INT")]
    port: Option<u16>,

    /// Maximum number of hops.
    #[clap(long, value_name = "INT", default_value = "8")]
    hop_limit: usize,

    /// Number of search threads.
    #[clap(long, value_name = "INT")]
    threads: Option<usize>,
}

/// Three routers in a line:
///
/// ```text
/// r1:eth0 -- r2:eth0   r2:eth1 -- r3:eth0   r3:eth1 -> hosts 10.3.0.0/16
/// ```
///
/// `r2` filters what it forwards to `r3`: no telnet, no ICMP echo.
fn snapshot() -> color_eyre::Result<Snapshot> {
    let to_r3 = Acl::new(
        "to-r3",
        vec![
            AclLine::deny(
                "no telnet",
                HeaderSpace::default()
                    .with_protocol(IpProtocol::TCP)
                    .with_dst_ports(SubRange::single(23)),
            ),
            AclLine::deny(
                "no ping",
                HeaderSpace::default()
                    .with_protocol(IpProtocol::ICMP)
                    .with_icmp_type(SubRange::single(8)),
            ),
            AclLine::permit("rest", MatchExpr::True),
        ],
    );

    let fib = Fib::default()
        .with_row("r1", FibRow::new(Prefix::any(), "eth0"))
        .with_row("r2", FibRow::new("10.1.0.0/16".parse()?, "eth0"))
        .with_row("r2", FibRow::new("10.3.0.0/16".parse()?, "eth1"))
        .with_row("r2", FibRow::new("10.66.0.0/16".parse()?, NULL_INTERFACE))
        .with_row("r3", FibRow::new("10.3.0.0/16".parse()?, "eth1"))
        .with_row("r3", FibRow::new("10.1.0.0/16".parse()?, "eth0"));

    Ok(Snapshot {
        configurations: vec![
            Configuration::new("r1").with_interface(Interface::new("eth0")),
            Configuration::new("r2")
                .with_interface(Interface::new("eth0"))
                .with_interface(Interface::new("eth1").with_outgoing_filter("to-r3"))
                .with_acl(to_r3),
            Configuration::new("r3")
                .with_interface(Interface::new("eth0"))
                .with_interface(Interface::new("eth1")),
        ],
        topology: Topology::default()
            .with_link("r1", "eth0", "r2", "eth0")
            .with_link("r2", "eth1", "r3", "eth0"),
        fib,
    })
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    let bdd = Bdd::default();
    let packet = PacketVars::new();
    let model = NetworkModel::build(&bdd, &packet, &snapshot()?, &ModelConfig::default())?;
    println!(
        "atoms: {} ACL, {} forwarding",
        model.acl_atoms().num_atoms(),
        model.forwarding_atoms().num_atoms()
    );

    let mut headers = HeaderSpace::default();
    if let Some(prefix) = args.dst_ip {
        headers = headers.with_dst_ip(prefix);
    }
    if let Some(protocol) = args.protocol {
        headers = headers.with_protocol(protocol);
    }
    if let Some(port) = args.port {
        headers = headers.with_dst_ports(SubRange::single(port as u32));
    }

    let mut search = SearchConfig::new(args.hop_limit);
    if let Some(threads) = args.threads {
        search = search.with_threads(threads);
    }
    let mut query =
        ReachabilityQuery::new(vec![StartLocation::new(&args.src)], search).with_headers(headers);
    if let Some(dst) = &args.dst {
        query = query.with_destination(dst);
    }

    let answers = Reachability::new(&bdd, &packet, &model).answer(&query)?;
    for answer in &answers.answers {
        print!("{}", answer);
    }
    for (start, error) in &answers.errors {
        println!("{}: {}", start, error);
    }
    if answers.is_truncated() {
        println!("(results truncated: {:?})", answers.truncation);
    }

    let (hits, misses) = bdd.cache_stats();
    println!("BDD nodes: {}, cache hits/misses: {}/{}", bdd.num_nodes(), hits, misses);
    println!("Total time: {:.3} s", time_total.elapsed().as_secs_f64());
    Ok(())
}
