//! Compilation of ACLs, match conditions and FIB rows into packet formulas.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use log::debug;

use crate::bdd::Bdd;
use crate::datamodel::{Acl, FibRow, HeaderSpace, LineAction, MatchExpr};
use crate::error::{Error, Result};
use crate::packet::{BitVec, PacketVars};
use crate::reference::Ref;

static NO_ACLS: BTreeMap<String, Acl> = BTreeMap::new();

/// Where an ACL is bound on an interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => write!(f, "in"),
            Direction::Outgoing => write!(f, "out"),
        }
    }
}

/// Compiles one device's packet conditions.
///
/// `PermittedBy` references resolve against the device's own ACL table.
/// Compiled ACLs are memoized by name for the lifetime of the compiler.
pub struct PacketFormulaCompiler<'a> {
    bdd: &'a Bdd,
    packet: &'a PacketVars,
    node: String,
    acls: &'a BTreeMap<String, Acl>,
    memo: HashMap<String, Ref>,
    in_progress: HashSet<String>,
}

impl<'a> PacketFormulaCompiler<'a> {
    /// A compiler with no ACL table, for device-independent header spaces.
    pub fn new(bdd: &'a Bdd, packet: &'a PacketVars) -> Self {
        Self::for_device(bdd, packet, "", &NO_ACLS)
    }

    pub fn for_device(
        bdd: &'a Bdd,
        packet: &'a PacketVars,
        node: &str,
        acls: &'a BTreeMap<String, Acl>,
    ) -> Self {
        Self {
            bdd,
            packet,
            node: node.to_string(),
            acls,
            memo: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// The packets `acl` permits.
    ///
    /// Lines are folded into an if-then-else chain from the last line
    /// backwards, so the first matching line decides. Unmatched packets
    /// are denied.
    pub fn compile_acl(&mut self, acl: &Acl, direction: Direction) -> Result<Ref> {
        if let Some(&f) = self.memo.get(&acl.name) {
            return Ok(f);
        }
        if !self.in_progress.insert(acl.name.clone()) {
            return Err(Error::CyclicAclReference(acl.name.clone()));
        }

        let result = self.compile_lines(acl);
        self.in_progress.remove(&acl.name);
        let result = result?;
        self.memo.insert(acl.name.clone(), result);
        debug!(
            "Compiled ACL {}:{} ({}, {} lines) into {} nodes",
            self.node,
            acl.name,
            direction,
            acl.lines.len(),
            self.bdd.size(result)
        );
        Ok(result)
    }

    fn compile_lines(&mut self, acl: &Acl) -> Result<Ref> {
        let mut result = self.bdd.zero();
        for line in acl.lines.iter().rev() {
            let matched = self.compile_match(&line.matches)?;
            let action = match line.action {
                LineAction::Permit => self.bdd.one(),
                LineAction::Deny => self.bdd.zero(),
            };
            result = self.bdd.apply_ite(matched, action, result);
        }
        Ok(result)
    }

    fn compile_acl_named(&mut self, name: &str) -> Result<Ref> {
        if let Some(&f) = self.memo.get(name) {
            return Ok(f);
        }
        let acls = self.acls;
        let acl = acls.get(name).ok_or_else(|| Error::UnknownAcl {
            node: self.node.clone(),
            name: name.to_string(),
        })?;
        self.compile_acl(acl, Direction::Incoming)
    }

    pub fn compile_match(&mut self, expr: &MatchExpr) -> Result<Ref> {
        let bdd = self.bdd;
        Ok(match expr {
            MatchExpr::True => bdd.one(),
            MatchExpr::False => bdd.zero(),
            MatchExpr::Header(hs) => self.compile_header_space(hs)?,
            MatchExpr::Not(inner) => -self.compile_match(inner)?,
            MatchExpr::And(exprs) => {
                let parts = exprs
                    .iter()
                    .map(|e| self.compile_match(e))
                    .collect::<Result<Vec<_>>>()?;
                bdd.apply_and_many(parts)
            }
            MatchExpr::Or(exprs) => {
                let parts = exprs
                    .iter()
                    .map(|e| self.compile_match(e))
                    .collect::<Result<Vec<_>>>()?;
                bdd.apply_or_many(parts)
            }
            MatchExpr::PermittedBy(name) => self.compile_acl_named(name)?,
        })
    }

    /// The headers in `hs`.
    pub fn compile_header_space(&self, hs: &HeaderSpace) -> Result<Ref> {
        let bdd = self.bdd;
        let pkt = self.packet;

        let dst_ips = bdd.apply_and(
            self.any_of(&hs.dst_ips, |p| Ok(pkt.dst_ip_in(bdd, p)))?,
            self.none_of(&hs.not_dst_ips, |p| Ok(pkt.dst_ip_in(bdd, p)))?,
        );
        let src_ips = bdd.apply_and(
            self.any_of(&hs.src_ips, |p| Ok(pkt.src_ip_in(bdd, p)))?,
            self.none_of(&hs.not_src_ips, |p| Ok(pkt.src_ip_in(bdd, p)))?,
        );
        let dst_ports = bdd.apply_and(
            self.ranges(&pkt.dst_port, &hs.dst_ports, true)?,
            self.ranges(&pkt.dst_port, &hs.not_dst_ports, false)?,
        );
        let src_ports = bdd.apply_and(
            self.ranges(&pkt.src_port, &hs.src_ports, true)?,
            self.ranges(&pkt.src_port, &hs.not_src_ports, false)?,
        );
        let protocols = bdd.apply_and(
            self.any_of(&hs.ip_protocols, |&p| {
                Ok(pkt.ip_protocol.value(bdd, p as u64))
            })?,
            self.none_of(&hs.not_ip_protocols, |&p| {
                Ok(pkt.ip_protocol.value(bdd, p as u64))
            })?,
        );
        let icmp = bdd.apply_and(
            self.ranges(&pkt.icmp_type, &hs.icmp_types, true)?,
            self.ranges(&pkt.icmp_code, &hs.icmp_codes, true)?,
        );
        let tcp_flags = self.any_of(&hs.tcp_flags, |flags| Ok(pkt.tcp_flags_eq(bdd, flags)))?;

        let result =
            bdd.apply_and_many([protocols, dst_ips, src_ips, dst_ports, src_ports, icmp, tcp_flags]);
        Ok(if hs.negate { -result } else { result })
    }

    /// Disjunction over `items`, or true when there are none.
    fn any_of<T>(&self, items: &[T], f: impl Fn(&T) -> Result<Ref>) -> Result<Ref> {
        if items.is_empty() {
            return Ok(self.bdd.one());
        }
        let parts = items.iter().map(f).collect::<Result<Vec<_>>>()?;
        Ok(self.bdd.apply_or_many(parts))
    }

    /// Negated disjunction over `items`, or true when there are none.
    fn none_of<T>(&self, items: &[T], f: impl Fn(&T) -> Result<Ref>) -> Result<Ref> {
        let parts = items.iter().map(f).collect::<Result<Vec<_>>>()?;
        Ok(-self.bdd.apply_or_many(parts))
    }

    fn ranges(
        &self,
        field: &BitVec,
        ranges: &[crate::datamodel::SubRange],
        positive: bool,
    ) -> Result<Ref> {
        if positive {
            self.any_of(ranges, |r| field.range(self.bdd, *r))
        } else {
            self.none_of(ranges, |r| field.range(self.bdd, *r))
        }
    }

    /// Longest-prefix-match forwarding formulas, one per egress interface.
    ///
    /// Rows are claimed in decreasing prefix length. Equal lengths are
    /// ordered by interface name, then by network address. Each row only
    /// receives the destinations no earlier row claimed, so every address
    /// covered by some row belongs to exactly one interface.
    pub fn compile_forwarding(&self, rows: &[&FibRow]) -> BTreeMap<String, Ref> {
        let bdd = self.bdd;
        let mut rows = rows.to_vec();
        rows.sort_by(|a, b| {
            (Reverse(a.prefix.length()), &a.interface, a.prefix.network()).cmp(&(
                Reverse(b.prefix.length()),
                &b.interface,
                b.prefix.network(),
            ))
        });

        let mut claimed = bdd.zero();
        let mut result: BTreeMap<String, Ref> = BTreeMap::new();
        for row in rows {
            let matched = self.packet.dst_ip_in(bdd, &row.prefix);
            let fresh = bdd.apply_and(matched, -claimed);
            let entry = result.entry(row.interface.clone()).or_insert(bdd.zero());
            *entry = bdd.apply_or(*entry, fresh);
            claimed = bdd.apply_or(claimed, matched);
        }
        result
    }
}
