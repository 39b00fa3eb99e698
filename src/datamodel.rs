//! Already-parsed inputs for one network snapshot.
//!
//! Vendor parsing and data-plane computation happen elsewhere; this module
//! only holds their results as plain owned data.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Name of the pseudo-interface that FIB rows use for null routes.
pub const NULL_INTERFACE: &str = "null_interface";

/// An IPv4 prefix. Host bits past `length` are ignored when matching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix {
    network: Ipv4Addr,
    length: u8,
}

impl Prefix {
    pub fn new(network: Ipv4Addr, length: u8) -> Result<Self> {
        if length > 32 {
            return Err(Error::InvalidPrefix(format!("{}/{}", network, length)));
        }
        Ok(Self { network, length })
    }

    /// The prefix matching every address.
    pub fn any() -> Self {
        Self {
            network: Ipv4Addr::UNSPECIFIED,
            length: 0,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    fn mask(&self) -> u32 {
        if self.length == 0 {
            0
        } else {
            u32::MAX << (32 - self.length as u32)
        }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        (u32::from(ip) ^ u32::from(self.network)) & self.mask() == 0
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

impl FromStr for Prefix {
    type Err = Error;

    /// Parses `a.b.c.d/len`; a bare address is a `/32`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPrefix(s.to_string());
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, len.parse::<u8>().map_err(|_| invalid())?),
            None => (s, 32),
        };
        let network = addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
        Prefix::new(network, len).map_err(|_| invalid())
    }
}

/// Inclusive integer range over a header field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubRange {
    pub start: u32,
    pub end: u32,
}

impl SubRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(value: u32) -> Self {
        Self::new(value, value)
    }
}

/// Well-known IP protocol numbers.
pub struct IpProtocol;

impl IpProtocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
}

/// Exact TCP flag values.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags {
    pub ack: bool,
    pub cwr: bool,
    pub ece: bool,
    pub fin: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// Flags in the order the packet encoding lays them out.
    pub fn bits(&self) -> [bool; 8] {
        [
            self.ack, self.cwr, self.ece, self.fin, self.psh, self.rst, self.syn, self.urg,
        ]
    }

    pub fn from_bits(bits: [bool; 8]) -> Self {
        let [ack, cwr, ece, fin, psh, rst, syn, urg] = bits;
        Self {
            ack,
            cwr,
            ece,
            fin,
            psh,
            rst,
            syn,
            urg,
        }
    }
}

/// A set of packet headers, described field by field.
///
/// An empty positive list leaves its field unconstrained. Every `not_*` list
/// removes headers. `negate` complements the whole space.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSpace {
    pub dst_ips: Vec<Prefix>,
    pub src_ips: Vec<Prefix>,
    pub not_dst_ips: Vec<Prefix>,
    pub not_src_ips: Vec<Prefix>,
    pub dst_ports: Vec<SubRange>,
    pub src_ports: Vec<SubRange>,
    pub not_dst_ports: Vec<SubRange>,
    pub not_src_ports: Vec<SubRange>,
    pub ip_protocols: Vec<u8>,
    pub not_ip_protocols: Vec<u8>,
    pub icmp_types: Vec<SubRange>,
    pub icmp_codes: Vec<SubRange>,
    pub tcp_flags: Vec<TcpFlags>,
    pub negate: bool,
}

impl HeaderSpace {
    pub fn with_dst_ip(mut self, prefix: Prefix) -> Self {
        self.dst_ips.push(prefix);
        self
    }

    pub fn with_src_ip(mut self, prefix: Prefix) -> Self {
        self.src_ips.push(prefix);
        self
    }

    pub fn without_dst_ip(mut self, prefix: Prefix) -> Self {
        self.not_dst_ips.push(prefix);
        self
    }

    pub fn with_dst_ports(mut self, range: SubRange) -> Self {
        self.dst_ports.push(range);
        self
    }

    pub fn with_src_ports(mut self, range: SubRange) -> Self {
        self.src_ports.push(range);
        self
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.ip_protocols.push(protocol);
        self
    }

    pub fn with_icmp_type(mut self, range: SubRange) -> Self {
        self.icmp_types.push(range);
        self
    }

    pub fn with_tcp_flags(mut self, flags: TcpFlags) -> Self {
        self.tcp_flags.push(flags);
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }
}

/// An ACL line condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchExpr {
    True,
    False,
    Header(HeaderSpace),
    Not(Box<MatchExpr>),
    And(Vec<MatchExpr>),
    Or(Vec<MatchExpr>),
    /// Matches exactly the packets the named ACL of the same device permits.
    PermittedBy(String),
}

impl From<HeaderSpace> for MatchExpr {
    fn from(hs: HeaderSpace) -> Self {
        MatchExpr::Header(hs)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LineAction {
    Permit,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclLine {
    pub name: String,
    pub action: LineAction,
    pub matches: MatchExpr,
}

impl AclLine {
    pub fn permit(name: impl Into<String>, matches: impl Into<MatchExpr>) -> Self {
        Self {
            name: name.into(),
            action: LineAction::Permit,
            matches: matches.into(),
        }
    }

    pub fn deny(name: impl Into<String>, matches: impl Into<MatchExpr>) -> Self {
        Self {
            name: name.into(),
            action: LineAction::Deny,
            matches: matches.into(),
        }
    }
}

/// An ordered access list; the first matching line decides, and a packet
/// that matches no line is denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub name: String,
    pub lines: Vec<AclLine>,
}

impl Acl {
    pub fn new(name: impl Into<String>, lines: Vec<AclLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub incoming_filter: Option<String>,
    pub outgoing_filter: Option<String>,
    pub active: bool,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            incoming_filter: None,
            outgoing_filter: None,
            active: true,
        }
    }

    pub fn with_incoming_filter(mut self, acl: impl Into<String>) -> Self {
        self.incoming_filter = Some(acl.into());
        self
    }

    pub fn with_outgoing_filter(mut self, acl: impl Into<String>) -> Self {
        self.outgoing_filter = Some(acl.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// One device's configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub hostname: String,
    pub interfaces: BTreeMap<String, Interface>,
    pub acls: BTreeMap<String, Acl>,
}

impl Configuration {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            interfaces: BTreeMap::new(),
            acls: BTreeMap::new(),
        }
    }

    pub fn with_interface(mut self, iface: Interface) -> Self {
        self.interfaces.insert(iface.name.clone(), iface);
        self
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acls.insert(acl.name.clone(), acl);
        self
    }
}

/// A winning forwarding decision: packets to `prefix` leave via `interface`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FibRow {
    pub prefix: Prefix,
    pub interface: String,
}

impl FibRow {
    pub fn new(prefix: Prefix, interface: impl Into<String>) -> Self {
        Self {
            prefix,
            interface: interface.into(),
        }
    }
}

/// Computed forwarding tables: device -> VRF -> rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fib {
    tables: BTreeMap<String, BTreeMap<String, Vec<FibRow>>>,
}

impl Fib {
    pub fn add_row(&mut self, device: impl Into<String>, vrf: impl Into<String>, row: FibRow) {
        self.tables
            .entry(device.into())
            .or_default()
            .entry(vrf.into())
            .or_default()
            .push(row);
    }

    pub fn with_row(mut self, device: &str, row: FibRow) -> Self {
        self.add_row(device, "default", row);
        self
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// All rows of a device, every VRF merged.
    pub fn rows(&self, device: &str) -> Vec<&FibRow> {
        self.tables
            .get(device)
            .map(|vrfs| vrfs.values().flatten().collect())
            .unwrap_or_default()
    }
}

/// A directed adjacency `node1:iface1 -> node2:iface2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    pub node1: String,
    pub iface1: String,
    pub node2: String,
    pub iface2: String,
}

impl Edge {
    pub fn new(node1: &str, iface1: &str, node2: &str, iface2: &str) -> Self {
        Self {
            node1: node1.to_string(),
            iface1: iface1.to_string(),
            node2: node2.to_string(),
            iface2: iface2.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub edges: Vec<Edge>,
}

impl Topology {
    /// Adds the edge in both directions.
    pub fn with_link(mut self, node1: &str, iface1: &str, node2: &str, iface2: &str) -> Self {
        self.edges.push(Edge::new(node1, iface1, node2, iface2));
        self.edges.push(Edge::new(node2, iface2, node1, iface1));
        self
    }
}

/// Everything the analysis consumes for one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub configurations: Vec<Configuration>,
    pub topology: Topology,
    pub fib: Fib,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_parse() {
        let p: Prefix = "10.1.0.0/16".parse().unwrap();
        assert_eq!(p.network(), Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(p.length(), 16);
        assert_eq!(p.to_string(), "10.1.0.0/16");

        let host: Prefix = "192.168.1.1".parse().unwrap();
        assert_eq!(host.length(), 32);
    }

    #[test]
    fn test_prefix_parse_errors() {
        assert!(matches!(
            "10.0.0.0/33".parse::<Prefix>(),
            Err(Error::InvalidPrefix(_))
        ));
        assert!("10.0.0/8".parse::<Prefix>().is_err());
        assert!("10.0.0.0/x".parse::<Prefix>().is_err());
    }

    #[test]
    fn test_prefix_contains() {
        let p: Prefix = "10.0.0.0/8".parse().unwrap();
        assert!(p.contains(Ipv4Addr::new(10, 200, 3, 4)));
        assert!(!p.contains(Ipv4Addr::new(11, 0, 0, 0)));
        assert!(Prefix::any().contains(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn test_fib_merges_vrfs() {
        let mut fib = Fib::default();
        fib.add_row("r1", "default", FibRow::new(Prefix::any(), "eth0"));
        fib.add_row("r1", "mgmt", FibRow::new(Prefix::any(), "mgmt0"));
        assert_eq!(fib.rows("r1").len(), 2);
        assert!(fib.rows("r2").is_empty());
    }

    #[test]
    fn test_tcp_flags_bits_round_trip() {
        let flags = TcpFlags {
            syn: true,
            ack: true,
            ..Default::default()
        };
        assert_eq!(TcpFlags::from_bits(flags.bits()), flags);
    }
}
