use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// What a full-id points at: a seed leaf or an internal cluster node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NodeKind {
    Leaf = 0,
    Cluster = 1,
}

/// Points at a node anywhere in a tree (or a proto-node during building).
///
/// The ordering puts every leaf before every cluster and is the tie-breaking
/// order of the merge loops, so changing it changes which of two equidistant
/// pairs merges first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub kind: NodeKind,
    pub index: u32,
}

impl NodeId {
    pub const fn leaf(index: u32) -> NodeId {
        NodeId { kind: NodeKind::Leaf, index }
    }

    pub const fn cluster(index: u32) -> NodeId {
        NodeId { kind: NodeKind::Cluster, index }
    }

    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    pub const fn is_cluster(&self) -> bool {
        matches!(self.kind, NodeKind::Cluster)
    }

    /// Returns the index if this is a leaf. Panics otherwise.
    #[track_caller]
    pub fn unwrap_leaf(&self) -> u32 {
        assert_eq!(self.kind, NodeKind::Leaf, "unwrap_leaf called on {self}");
        self.index
    }

    /// Returns the index if this is a cluster node. Panics otherwise.
    #[track_caller]
    pub fn unwrap_cluster(&self) -> u32 {
        assert_eq!(self.kind, NodeKind::Cluster, "unwrap_cluster called on {self}");
        self.index
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeKind::Leaf => write!(f, "l{}", self.index),
            NodeKind::Cluster => write!(f, "c{}", self.index),
        }
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<NodeId> {
        let bad = || Error::InvalidTree(format!("malformed node id {s:?}"));
        let (kind, index) = s.split_at(s.len().min(1));
        let index = index.parse().map_err(|_| bad())?;
        match kind {
            "l" => Ok(NodeId::leaf(index)),
            "c" => Ok(NodeId::cluster(index)),
            _ => Err(bad()),
        }
    }
}
