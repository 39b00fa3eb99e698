//! Precondition violations.
//!
//! Every variant describes inconsistent input. None of them is retried:
//! the analysis is only meaningful over a well-formed snapshot. Infeasible
//! paths and truncated searches are ordinary results, not errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unknown device '{0}'")]
    UnknownNode(String),

    #[error("unknown interface '{iface}' on device '{node}'")]
    UnknownInterface { node: String, iface: String },

    #[error("device '{node}' references undefined ACL '{name}'")]
    UnknownAcl { node: String, name: String },

    #[error("ACL '{0}' references itself through permitted-by conditions")]
    CyclicAclReference(String),

    #[error("invalid prefix '{0}'")]
    InvalidPrefix(String),

    #[error("invalid range [{start}, {end}] for a {bits}-bit field")]
    InvalidRange { start: u32, end: u32, bits: u32 },

    #[error("device '{0}' is defined more than once")]
    DuplicateNode(String),

    #[error("link {0} does not exist in the graph")]
    InvalidLink(usize),

    #[error("{family} seed has {found} atoms, the model has {expected}")]
    SeedWidth {
        family: &'static str,
        expected: usize,
        found: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
