//! Paths through the graph and the reachability summaries carried along them.

use crate::bitset::AtomSet;
use crate::graph::{GraphLink, LinkIndex, NodeIndex};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PathId(usize);

#[derive(Debug, Clone)]
struct PathEntry {
    link: LinkIndex,
    target: Option<NodeIndex>,
    parent: Option<PathId>,
}

/// Backing storage for paths explored by one search.
///
/// Each entry is a link plus a back-reference to the path it extends, so
/// paths that share a prefix share its entries.
#[derive(Debug, Clone, Default)]
pub struct PathArena {
    entries: Vec<PathEntry>,
}

/// A path of links starting at `source`.
///
/// `destination` is `None` once the path has left the network.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    pub tail: Option<PathId>,
    pub source: NodeIndex,
    pub destination: Option<NodeIndex>,
    pub len: usize,
}

impl Path {
    /// The empty path sitting at `node`.
    pub fn empty(node: NodeIndex) -> Self {
        Self {
            tail: None,
            source: node,
            destination: Some(node),
            len: 0,
        }
    }
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, path: Path, link: &GraphLink) -> Path {
        let id = PathId(self.entries.len());
        self.entries.push(PathEntry {
            link: link.index,
            target: link.target,
            parent: path.tail,
        });
        Path {
            tail: Some(id),
            source: path.source,
            destination: link.target,
            len: path.len + 1,
        }
    }

    fn chain(&self, path: Path) -> impl Iterator<Item = &PathEntry> {
        std::iter::successors(path.tail.map(|id| &self.entries[id.0]), |e| {
            e.parent.map(|id| &self.entries[id.0])
        })
    }

    /// Whether `node` is the source of `path` or the target of one of its links.
    pub fn visits(&self, path: Path, node: NodeIndex) -> bool {
        path.source == node || self.chain(path).any(|e| e.target == Some(node))
    }

    /// Links of `path`, first hop first.
    pub fn links(&self, path: Path) -> Vec<LinkIndex> {
        let mut links = self.chain(path).map(|e| e.link).collect::<Vec<_>>();
        links.reverse();
        links
    }

    pub fn last_link(&self, path: Path) -> Option<LinkIndex> {
        path.tail.map(|id| self.entries[id.0].link)
    }
}

/// The headers still alive at the end of a path.
///
/// The alive headers are those in some forwarding atom of `forwarding` and
/// in some ACL atom of `acl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortReachabilitySummary {
    pub path: Path,
    pub forwarding: AtomSet,
    pub acl: AtomSet,
}

impl PortReachabilitySummary {
    pub fn initial(source: NodeIndex, forwarding: AtomSet, acl: AtomSet) -> Self {
        Self {
            path: Path::empty(source),
            forwarding,
            acl,
        }
    }

    /// The same headers, one hop further along `link`.
    pub fn extend_by(&self, arena: &mut PathArena, link: &GraphLink) -> Self {
        Self {
            path: arena.extend(self.path, link),
            forwarding: self.forwarding.clone(),
            acl: self.acl.clone(),
        }
    }

    /// Keeps only the atoms in both `forwarding` and `acl`.
    pub fn apply_port(&mut self, forwarding: &AtomSet, acl: &AtomSet) {
        self.forwarding.and_assign(forwarding);
        self.acl.and_assign(acl);
    }

    /// No header survives. An empty ACL family has no atoms to lose, so only
    /// the forwarding bits count then.
    pub fn is_infeasible(&self) -> bool {
        self.forwarding.is_empty() || (self.acl.width() > 0 && self.acl.is_empty())
    }
}
