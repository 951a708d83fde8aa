use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use tracing::{debug, info};

use crate::cache::TractCache;
use crate::coord::Coord;
use crate::node_id::{NodeId, NodeKind};
use crate::proto::ProtoNode;
use crate::roi::Roi;
use crate::storage::TractStore;
use crate::tract::Tract;
use crate::tree::Tree;
use crate::{Error, Result};

/// The homogeneous-merging restriction applied before the main loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BasePhase {
    /// No base phase.
    Off,
    /// Grow base nodes of at most this many leaves.
    Size(u32),
    /// Grow base nodes until this many clusters remain.
    Num(u32),
}

impl FromStr for BasePhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<BasePhase> {
        let bad = || Error::InvalidBasePhase(s.to_string());
        match s.split_once(':') {
            None if s == "off" => Ok(BasePhase::Off),
            Some(("size", n)) => n.parse().map(BasePhase::Size).map_err(|_| bad()),
            Some(("num", n)) => n.parse().map(BasePhase::Num).map_err(|_| bad()),
            _ => Err(bad()),
        }
    }
}

impl fmt::Display for BasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasePhase::Off => f.write_str("off"),
            BasePhase::Size(s) => write!(f, "size:{s}"),
            BasePhase::Num(n) => write!(f, "num:{n}"),
        }
    }
}

/// Parameters of a centroid build.
#[derive(Debug, Clone)]
pub struct CentroidParams {
    /// Seed neighbourhood restriction level.
    pub nb_level: u32,
    /// Total byte budget for the two tract caches.
    pub cache_bytes: usize,
    /// Relative number of streamlines a voxel needs to contribute to the
    /// metric; determines the threshold applied after the log transform.
    pub threshold_ratio: f32,
    /// Seeds farther than this from every neighbour are outliers.
    pub max_nb_dist: f64,
    pub base: BasePhase,
    /// Record discarded seeds in the tree file.
    pub keep_discarded: bool,
    /// Skip the logarithmic normalisation (unit flags only).
    pub no_log: bool,
}

/// Builds a tree by agglomerative merging restricted to spatial
/// neighbourhoods, with mean tractograms kept on disk behind two bounded
/// caches (byte precision for leaves, float precision for nodes).
pub struct CentroidBuilder<'a, S> {
    roi: &'a Roi,
    store: &'a S,
    params: CentroidParams,
    log_factor: f32,
    threshold: f32,
    leaf_cache: TractCache<crate::tract::ByteTract>,
    node_cache: TractCache<Tract>,
    leaf_norms: Vec<f64>,
    node_norms: Vec<f64>,
    comparisons: AtomicU64,
}

/// The proto-nodes of one build, addressed like the tree they turn into.
struct ProtoArena {
    leaves: Vec<ProtoNode>,
    nodes: Vec<ProtoNode>,
}

impl ProtoArena {
    fn get(&self, id: NodeId) -> &ProtoNode {
        match id.kind {
            NodeKind::Leaf => &self.leaves[id.index as usize],
            NodeKind::Cluster => &self.nodes[id.index as usize],
        }
    }

    fn get_mut(&mut self, id: NodeId) -> &mut ProtoNode {
        match id.kind {
            NodeKind::Leaf => &mut self.leaves[id.index as usize],
            NodeKind::Cluster => &mut self.nodes[id.index as usize],
        }
    }

    fn live_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        let leaves = self
            .leaves
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_active())
            .map(|(i, _)| NodeId::leaf(i as u32));
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_active())
            .map(|(i, _)| NodeId::cluster(i as u32));
        leaves.chain(nodes)
    }
}

impl<'a, S: TractStore> CentroidBuilder<'a, S> {
    pub fn new(roi: &'a Roi, store: &'a S, params: CentroidParams) -> Result<CentroidBuilder<'a, S>> {
        if !(0.0..1.0).contains(&params.threshold_ratio) {
            return Err(Error::ParamOutOfRange {
                name: "threshold_ratio",
                value: params.threshold_ratio as f64,
            });
        }
        if !(0.0..=1.0).contains(&params.max_nb_dist) || params.max_nb_dist == 0.0 {
            return Err(Error::ParamOutOfRange { name: "max_nb_dist", value: params.max_nb_dist });
        }
        // reject bad levels before touching any tract
        Coord::new(0, 0, 0).neighbours(params.nb_level, Coord::new(1, 1, 1))?;

        let streams = roi.streamlines as f32;
        let (log_factor, threshold) = if params.no_log {
            (0.0, params.threshold_ratio)
        } else {
            let factor = streams.log10();
            (factor, (params.threshold_ratio * streams).log10() / factor)
        };

        // the budget is shared evenly between the two precisions
        let per_cache = params.cache_bytes / 2;
        Ok(CentroidBuilder {
            roi,
            store,
            log_factor,
            threshold,
            leaf_cache: TractCache::new(per_cache),
            node_cache: TractCache::new(per_cache),
            leaf_norms: Vec::new(),
            node_norms: Vec::new(),
            comparisons: AtomicU64::new(0),
            params,
        })
    }

    /// Runs the whole build and returns the checked tree.
    pub fn build(mut self) -> Result<Tree> {
        let n = self.roi.len();
        let mut tree = Tree::new(
            format!("c{}", self.params.nb_level),
            self.roi.grid,
            self.roi.dims,
            self.roi.streamlines,
        );
        if n == 0 {
            return Err(Error::InvalidTree("roi is empty".to_string()));
        }
        if n == 1 {
            tree.push_leaf(self.roi.seeds[0], self.roi.trackids[0]);
            tree.check()?;
            return Ok(tree);
        }

        self.compute_leaf_norms()?;
        let (mut protos, discarded) = self.initialize()?;

        // leaves keep roi order; merges reference them through this map
        let mut leaf_slot: Vec<Option<NodeId>> = Vec::with_capacity(n);
        for s in 0..n as u32 {
            if discarded.contains(s) {
                leaf_slot.push(None);
                if self.params.keep_discarded {
                    tree.discarded.push(self.roi.seeds[s as usize]);
                }
            } else {
                leaf_slot.push(Some(tree.push_leaf(
                    self.roi.seeds[s as usize],
                    self.roi.trackids[s as usize],
                )));
            }
        }

        let mut active = tree.num_leaves();
        if active == 0 {
            return Err(Error::InvalidTree("every seed was discarded as an outlier".to_string()));
        }

        match self.params.base {
            BasePhase::Off => {}
            BasePhase::Size(limit) if limit > 1 => {
                let before = tree.num_nodes();
                while active > 1 {
                    let Some((a, b, dist)) = self.closest_sized_pair(&protos, &tree, limit) else {
                        break;
                    };
                    self.merge(a, b, dist, &mut protos, &mut tree, &leaf_slot)?;
                    active -= 1;
                }
                info!(base_nodes = active, merges = tree.num_nodes() - before, "base phase done");
            }
            BasePhase::Num(target) => {
                let before = tree.num_nodes();
                while active > target.max(1) as usize {
                    let Some((a, b, dist)) = self.closest_pair(&protos) else { break };
                    self.merge(a, b, dist, &mut protos, &mut tree, &leaf_slot)?;
                    active -= 1;
                }
                info!(base_nodes = active, merges = tree.num_nodes() - before, "base phase done");
            }
            BasePhase::Size(_) => {}
        }

        while active > 1 {
            let (a, b, dist) = self
                .closest_pair(&protos)
                .ok_or(Error::DisconnectedRoi { remaining: active })?;
            self.merge(a, b, dist, &mut protos, &mut tree, &leaf_slot)?;
            active -= 1;
        }

        tree.check()?;
        let leaf_stats = self.leaf_cache.stats();
        let node_stats = self.node_cache.stats();
        info!(
            comparisons = self.comparisons.load(Ordering::Relaxed),
            leaf_hits = leaf_stats.hits,
            leaf_misses = leaf_stats.misses,
            node_hits = node_stats.hits,
            node_misses = node_stats.misses,
            "{}",
            tree.report(),
        );
        Ok(tree)
    }

    /// Loads every leaf once to precompute its thresholded norm.
    fn compute_leaf_norms(&mut self) -> Result<()> {
        let threshold = self.threshold;
        self.leaf_norms = (0..self.roi.len() as u32)
            .into_par_iter()
            .map(|leaf| {
                let mut tract = self.store.read_leaf(leaf)?;
                tract.threshold(threshold)?;
                tract.compute_norm()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    /// Scans every seed's neighbourhood, fills the proto-leaves and discards
    /// the outliers. Returns the proto arena and the discarded seed set.
    fn initialize(&self) -> Result<(ProtoArena, RoaringBitmap)> {
        let n = self.roi.len();
        let coord_index: BTreeMap<Coord, u32> = self
            .roi
            .seeds
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u32))
            .collect();

        // upper-triangular scan: every seed measures its neighbours above it
        let upper: Vec<Vec<(u32, f64)>> = (0..n as u32)
            .into_par_iter()
            .map(|seed| {
                let nbs = self.roi.seeds[seed as usize]
                    .neighbours(self.params.nb_level, self.roi.dims)?;
                let mut dists = Vec::new();
                let mut this_tract = None;
                for nb in nbs {
                    let Some(&other) = coord_index.get(&nb) else { continue };
                    if other <= seed {
                        continue;
                    }
                    if this_tract.is_none() {
                        this_tract = Some(self.load_leaf(seed)?);
                    }
                    let a = this_tract.as_ref().expect("tract was loaded right above");
                    let b = self.load_leaf(other)?;
                    self.comparisons.fetch_add(1, Ordering::Relaxed);
                    dists.push((other, a.distance(&b)?));
                }
                Ok(dists)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut maps: Vec<BTreeMap<NodeId, f64>> = vec![BTreeMap::new(); n];
        for (seed, dists) in upper.iter().enumerate() {
            for &(other, dist) in dists {
                maps[seed].insert(NodeId::leaf(other), dist);
                maps[other as usize].insert(NodeId::leaf(seed as u32), dist);
            }
        }
        let mut leaves: Vec<ProtoNode> = maps.into_iter().map(ProtoNode::new).collect();

        // outliers are judged against their full neighbourhood before any
        // erasure takes place
        let mut discarded = RoaringBitmap::new();
        for (seed, proto) in leaves.iter().enumerate() {
            if !proto.has_nearest() || proto.nearest().1 > self.params.max_nb_dist {
                discarded.insert(seed as u32);
            }
        }
        for seed in &discarded {
            let id = NodeId::leaf(seed);
            let nbs: Vec<NodeId> = leaves[seed as usize].neighbour_ids().collect();
            for nb in nbs {
                leaves[nb.index as usize].remove_neighbour(id);
            }
            leaves[seed as usize].discard();
            debug!(seed, coord = %self.roi.seeds[seed as usize], "seed discarded as outlier");
        }
        if !discarded.is_empty() {
            info!(discarded = discarded.len(), "outlier seeds removed");
        }

        Ok((ProtoArena { leaves, nodes: Vec::new() }, discarded))
    }

    /// The globally closest live pair, by each proto-node's nearest slot.
    /// Equal distances fall back to the lexical pair order.
    fn closest_pair(&self, protos: &ProtoArena) -> Option<(NodeId, NodeId, f64)> {
        let mut best: Option<(OrderedFloat<f64>, (NodeId, NodeId))> = None;
        for id in protos.live_ids() {
            let proto = protos.get(id);
            if !proto.has_nearest() {
                continue;
            }
            let (nb, dist) = proto.nearest();
            let key = (OrderedFloat(dist), (id.min(nb), id.max(nb)));
            if best.map_or(true, |b| key < b) {
                best = Some(key);
            }
        }
        best.map(|(d, (a, b))| (a, b, d.into_inner()))
    }

    /// The closest live pair whose combined size stays within `limit`,
    /// scanning whole neighbour maps since the nearest slot may be
    /// ineligible.
    fn closest_sized_pair(
        &self,
        protos: &ProtoArena,
        tree: &Tree,
        limit: u32,
    ) -> Option<(NodeId, NodeId, f64)> {
        let mut best: Option<(OrderedFloat<f64>, (NodeId, NodeId))> = None;
        for id in protos.live_ids() {
            let size = self.cluster_size(tree, id);
            for (&nb, &dist) in protos.get(id).neighbours() {
                if nb <= id || !protos.get(nb).is_active() {
                    continue;
                }
                if size + self.cluster_size(tree, nb) > limit {
                    continue;
                }
                let key = (OrderedFloat(dist), (id, nb));
                if best.map_or(true, |b| key < b) {
                    best = Some(key);
                }
            }
        }
        best.map(|(d, (a, b))| (a, b, d.into_inner()))
    }

    /// Merges two live clusters into a new node: mean tract on disk, fresh
    /// distances to the union of the children's neighbourhoods, proto and
    /// tree bookkeeping, child cleanup.
    fn merge(
        &mut self,
        a: NodeId,
        b: NodeId,
        dist: f64,
        protos: &mut ProtoArena,
        tree: &mut Tree,
        leaf_slot: &[Option<NodeId>],
    ) -> Result<()> {
        let new_index = tree.num_nodes() as u32;
        let new_id = NodeId::cluster(new_index);
        debug!(%a, %b, %new_id, dist, "merging");

        let size_a = self.cluster_size(tree, a);
        let size_b = self.cluster_size(tree, b);
        let tract_a = self.fetch_natural(a)?;
        let tract_b = self.fetch_natural(b)?;
        let mut mean = Tract::join_average(&tract_a, &tract_b, size_a, size_b)?;
        drop((tract_a, tract_b));
        mean.do_log(self.log_factor)?;
        self.store.write_node(new_index, &mean)?;

        // the canonical node tract is what future loads will see
        let mut node_tract = self.store.read_node(new_index)?;
        node_tract.threshold(self.threshold)?;
        let norm = node_tract.compute_norm()?;
        self.node_norms.push(norm);
        let node_tract = self.node_cache.insert(new_index, node_tract);

        let map_id = |id: NodeId| -> Result<NodeId> {
            match id.kind {
                NodeKind::Cluster => Ok(id),
                NodeKind::Leaf => leaf_slot[id.index as usize]
                    .ok_or_else(|| Error::InvalidTree(format!("merge references discarded seed {id}"))),
            }
        };
        tree.push_node(vec![map_id(a)?, map_id(b)?], dist)?;

        let mut union: BTreeSet<NodeId> = protos.get(a).neighbour_ids().collect();
        union.extend(protos.get(b).neighbour_ids());
        union.remove(&a);
        union.remove(&b);

        let mut neighbours = BTreeMap::new();
        for other in union {
            let dist_to = self.distance_to(&node_tract, other)?;
            protos.get_mut(other).update_nbhood(a, b, new_id, dist_to);
            neighbours.insert(other, dist_to);
        }
        protos.nodes.push(ProtoNode::new(neighbours));

        for child in [a, b] {
            protos.get_mut(child).retire();
            match child.kind {
                NodeKind::Leaf => self.leaf_cache.evict(child.index),
                NodeKind::Cluster => {
                    self.node_cache.evict(child.index);
                    self.store.delete_node(child.index)?;
                }
            }
        }
        Ok(())
    }

    fn cluster_size(&self, tree: &Tree, id: NodeId) -> u32 {
        match id.kind {
            NodeKind::Leaf => 1,
            NodeKind::Cluster => tree.node(id).size,
        }
    }

    fn load_leaf(&self, leaf: u32) -> Result<Arc<crate::tract::ByteTract>> {
        self.leaf_cache.get_or_load(leaf, || {
            let mut tract = self.store.read_leaf(leaf)?;
            tract.threshold(self.threshold)?;
            tract.set_norm(self.leaf_norms[leaf as usize]);
            Ok(tract)
        })
    }

    fn load_node(&self, node: u32) -> Result<Arc<Tract>> {
        self.node_cache.get_or_load(node, || {
            let mut tract = self.store.read_node(node)?;
            tract.threshold(self.threshold)?;
            tract.set_norm(self.node_norms[node as usize]);
            Ok(tract)
        })
    }

    /// A cluster's tract in natural units, read fresh from disk: the cached
    /// copies are thresholded and cannot be averaged.
    fn fetch_natural(&self, id: NodeId) -> Result<Tract> {
        let mut tract = match id.kind {
            NodeKind::Leaf => self.store.read_leaf_f32(id.index)?,
            NodeKind::Cluster => self.store.read_node(id.index)?,
        };
        tract.un_log(self.log_factor)?;
        Ok(tract)
    }

    fn distance_to(&self, node_tract: &Tract, other: NodeId) -> Result<f64> {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
        match other.kind {
            NodeKind::Leaf => node_tract.distance_to_bytes(&*self.load_leaf(other.index)?),
            NodeKind::Cluster => node_tract.distance(&*self.load_node(other.index)?),
        }
    }
}
