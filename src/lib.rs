//! Binary hierarchical clustering trees over regions of interest of seed
//! voxels, where every seed carries a probabilistic-connectivity tractogram.
//!
//! Two builders produce the same [`Tree`] model: [`CentroidBuilder`] merges
//! neighbourhood-restricted clusters from mean tractograms kept on disk
//! behind bounded caches, [`GraphBuilder`] reduces a precomputed pairwise
//! distance matrix with a classical linkage rule.

mod cache;
mod centroid;
mod coord;
mod dist_block;
mod error;
mod graph;
mod node_id;
mod parser;
mod proto;
mod roi;
mod storage;
mod tract;
mod tree;

#[cfg(test)]
mod tests;

pub use cache::{CacheStats, TractCache};
pub use centroid::{BasePhase, CentroidBuilder, CentroidParams};
pub use coord::{Coord, Grid};
pub use dist_block::DistBlockStore;
pub use error::Error;
pub use graph::{GraphBuilder, Linkage};
pub use node_id::{NodeId, NodeKind};
pub use proto::ProtoNode;
pub use roi::Roi;
pub use storage::{CompactStore, TractStore};
pub use tract::{ByteTract, ResidentSize, Tract};
pub use tree::{Tree, TreeNode};

pub type Result<T, E = Error> = std::result::Result<T, E>;
