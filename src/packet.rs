//! Symbolic packet headers.
//!
//! Each header field is a vector of BDD variables, most significant bit
//! first, laid out in a fixed order:
//!
//! ```text
//! ipProtocol(8) dstIp(32) srcIp(32) dstPort(16) srcPort(16)
//! icmpCode(8) icmpType(8) tcpAck tcpCwr tcpEce tcpFin tcpPsh tcpRst tcpSyn tcpUrg
//! ```
//!
//! Destination address bits sit near the top of the order, which keeps the
//! forwarding formulas (prefix matches on the destination) small.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use crate::bdd::Bdd;
use crate::datamodel::{Prefix, SubRange, TcpFlags};
use crate::error::{Error, Result};
use crate::reference::Ref;
use crate::types::{Lit, Var};

/// An unsigned integer header field encoded as BDD variables, MSB first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitVec {
    vars: Vec<Var>,
}

impl BitVec {
    fn new(first: u32, width: u32) -> Self {
        Self {
            vars: (first..first + width).map(Var::new).collect(),
        }
    }

    pub fn width(&self) -> u32 {
        self.vars.len() as u32
    }

    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    fn max_value(&self) -> u64 {
        (1u64 << self.width()) - 1
    }

    /// `bit` counts from the most significant end.
    fn bit_of(&self, value: u64, bit: usize) -> bool {
        (value >> (self.vars.len() - 1 - bit)) & 1 == 1
    }

    /// The field equals `value`.
    pub fn value(&self, bdd: &Bdd, value: u64) -> Ref {
        assert!(value <= self.max_value(), "Value {} overflows field", value);
        bdd.cube(self.vars.iter().enumerate().map(|(i, v)| {
            let lit = v.id() as i32;
            if self.bit_of(value, i) {
                lit
            } else {
                -lit
            }
        }))
    }

    /// The top `len` bits of the field equal the top `len` bits of `value`.
    pub fn prefix(&self, bdd: &Bdd, value: u64, len: u32) -> Ref {
        assert!(len <= self.width(), "Prefix length {} overflows field", len);
        bdd.cube(self.vars.iter().take(len as usize).enumerate().map(|(i, v)| {
            let lit = v.id() as i32;
            if self.bit_of(value, i) {
                lit
            } else {
                -lit
            }
        }))
    }

    /// The field is at least `bound`.
    pub fn geq(&self, bdd: &Bdd, bound: u64) -> Ref {
        // Built from the least significant bit upwards:
        //   geq_i = b_i ? (x_i ∧ geq_{i+1}) : (x_i ∨ geq_{i+1})
        let mut acc = bdd.one();
        for (i, &v) in self.vars.iter().enumerate().rev() {
            let x = bdd.mk_var(v.id());
            acc = if self.bit_of(bound, i) {
                bdd.apply_and(x, acc)
            } else {
                bdd.apply_or(x, acc)
            };
        }
        acc
    }

    /// The field is at most `bound`.
    pub fn leq(&self, bdd: &Bdd, bound: u64) -> Ref {
        let mut acc = bdd.one();
        for (i, &v) in self.vars.iter().enumerate().rev() {
            let x = bdd.mk_var(v.id());
            acc = if self.bit_of(bound, i) {
                bdd.apply_or(-x, acc)
            } else {
                bdd.apply_and(-x, acc)
            };
        }
        acc
    }

    /// The field lies in `[start, end]`.
    pub fn range(&self, bdd: &Bdd, range: SubRange) -> Result<Ref> {
        let (start, end) = (range.start as u64, range.end as u64);
        if start > end || end > self.max_value() {
            return Err(Error::InvalidRange {
                start: range.start,
                end: range.end,
                bits: self.width(),
            });
        }
        if start == end {
            return Ok(self.value(bdd, start));
        }
        Ok(bdd.apply_and(self.geq(bdd, start), self.leq(bdd, end)))
    }

    /// Reads the field out of a (partial) assignment; unassigned bits are 0.
    pub fn decode(&self, model: &HashMap<Var, bool>) -> u64 {
        self.vars.iter().fold(0u64, |acc, v| {
            (acc << 1) | u64::from(model.get(v).copied().unwrap_or(false))
        })
    }
}

/// The BDD variables of a symbolic packet.
#[derive(Debug, Clone)]
pub struct PacketVars {
    pub ip_protocol: BitVec,
    pub dst_ip: BitVec,
    pub src_ip: BitVec,
    pub dst_port: BitVec,
    pub src_port: BitVec,
    pub icmp_code: BitVec,
    pub icmp_type: BitVec,
    /// ack, cwr, ece, fin, psh, rst, syn, urg.
    pub tcp_flags: [Var; 8],
}

const TCP_FLAG_NAMES: [&str; 8] = [
    "tcpAck", "tcpCwr", "tcpEce", "tcpFin", "tcpPsh", "tcpRst", "tcpSyn", "tcpUrg",
];

impl Default for PacketVars {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketVars {
    /// Total number of packet variables.
    pub const NUM_VARS: u32 = 8 + 32 + 32 + 16 + 16 + 8 + 8 + 8;

    pub fn new() -> Self {
        let mut next = 1;
        let mut field = |width: u32| {
            let bv = BitVec::new(next, width);
            next += width;
            bv
        };
        let ip_protocol = field(8);
        let dst_ip = field(32);
        let src_ip = field(32);
        let dst_port = field(16);
        let src_port = field(16);
        let icmp_code = field(8);
        let icmp_type = field(8);
        let tcp_flags = std::array::from_fn(|i| Var::new(next + i as u32));
        Self {
            ip_protocol,
            dst_ip,
            src_ip,
            dst_port,
            src_port,
            icmp_code,
            icmp_type,
            tcp_flags,
        }
    }

    fn fields(&self) -> [(&'static str, &BitVec); 7] {
        [
            ("ipProtocol", &self.ip_protocol),
            ("dstIp", &self.dst_ip),
            ("srcIp", &self.src_ip),
            ("dstPort", &self.dst_port),
            ("srcPort", &self.src_port),
            ("icmpCode", &self.icmp_code),
            ("icmpType", &self.icmp_type),
        ]
    }

    /// Debug name of a packet variable, e.g. `dstIp1` for the MSB of the
    /// destination address.
    pub fn var_name(&self, var: Var) -> Option<String> {
        for (name, field) in self.fields() {
            if let Some(pos) = field.vars().iter().position(|&v| v == var) {
                return Some(format!("{}{}", name, pos + 1));
            }
        }
        self.tcp_flags
            .iter()
            .position(|&v| v == var)
            .map(|pos| TCP_FLAG_NAMES[pos].to_string())
    }

    pub fn dst_ip_in(&self, bdd: &Bdd, prefix: &Prefix) -> Ref {
        self.dst_ip.prefix(
            bdd,
            u32::from(prefix.network()) as u64,
            prefix.length() as u32,
        )
    }

    pub fn src_ip_in(&self, bdd: &Bdd, prefix: &Prefix) -> Ref {
        self.src_ip.prefix(
            bdd,
            u32::from(prefix.network()) as u64,
            prefix.length() as u32,
        )
    }

    pub fn tcp_flags_eq(&self, bdd: &Bdd, flags: &TcpFlags) -> Ref {
        bdd.cube(self.tcp_flags.iter().zip(flags.bits()).map(|(v, b)| {
            let lit = v.id() as i32;
            if b {
                lit
            } else {
                -lit
            }
        }))
    }

    /// A concrete packet satisfying `f`, or `None` when `f` is unsatisfiable.
    pub fn example(&self, bdd: &Bdd, f: Ref) -> Option<Packet> {
        let model: HashMap<Var, bool> = bdd
            .one_sat(f)?
            .into_iter()
            .map(|lit: Lit| (lit.var(), lit.is_positive()))
            .collect();
        let flag = |i: usize| model.get(&self.tcp_flags[i]).copied().unwrap_or(false);
        Some(Packet {
            ip_protocol: self.ip_protocol.decode(&model) as u8,
            dst_ip: Ipv4Addr::from(self.dst_ip.decode(&model) as u32),
            src_ip: Ipv4Addr::from(self.src_ip.decode(&model) as u32),
            dst_port: self.dst_port.decode(&model) as u16,
            src_port: self.src_port.decode(&model) as u16,
            icmp_code: self.icmp_code.decode(&model) as u8,
            icmp_type: self.icmp_type.decode(&model) as u8,
            tcp_flags: TcpFlags::from_bits(std::array::from_fn(flag)),
        })
    }
}

/// A concrete packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub ip_protocol: u8,
    pub dst_ip: Ipv4Addr,
    pub src_ip: Ipv4Addr,
    pub dst_port: u16,
    pub src_port: u16,
    pub icmp_code: u8,
    pub icmp_type: u8,
    pub tcp_flags: TcpFlags,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto={}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.ip_protocol
        )?;
        if self.ip_protocol == crate::datamodel::IpProtocol::ICMP {
            write!(f, " icmp={}/{}", self.icmp_type, self.icmp_code)?;
        }
        Ok(())
    }
}
