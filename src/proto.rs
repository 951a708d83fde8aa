use std::collections::BTreeMap;

use crate::node_id::NodeId;

/// Sentinel distance meaning "no neighbour known".
pub const NO_NB_DIST: f64 = 999.0;
const NO_NB_ID: NodeId = NodeId::leaf(0);

/// Transient per-cluster state kept while a tree is being built: the known
/// neighbours with their current dissimilarities and a cached nearest slot.
///
/// The map is a `BTreeMap` on purpose: rescans walk it in id order, which is
/// what makes equal-distance ties deterministic.
#[derive(Debug, Clone)]
pub struct ProtoNode {
    near: (NodeId, f64),
    neighbours: BTreeMap<NodeId, f64>,
    active: bool,
    discarded: bool,
}

impl ProtoNode {
    pub fn new(neighbours: BTreeMap<NodeId, f64>) -> ProtoNode {
        let mut proto = ProtoNode {
            near: (NO_NB_ID, NO_NB_DIST),
            neighbours,
            active: true,
            discarded: false,
        };
        proto.rescan_near();
        proto
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_discarded(&self) -> bool {
        self.discarded
    }

    /// Id and distance of the nearest known neighbour.
    pub fn nearest(&self) -> (NodeId, f64) {
        self.near
    }

    pub fn has_nearest(&self) -> bool {
        self.near.1 != NO_NB_DIST
    }

    pub fn neighbours(&self) -> &BTreeMap<NodeId, f64> {
        &self.neighbours
    }

    pub fn neighbour_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.neighbours.keys().copied()
    }

    /// Marks the proto-node as an outlier and drops its neighbourhood.
    pub fn discard(&mut self) {
        self.neighbours.clear();
        self.near = (NO_NB_ID, NO_NB_DIST);
        self.discarded = true;
        self.active = false;
    }

    /// Retires the proto-node once it has been merged into a parent.
    pub fn retire(&mut self) {
        self.neighbours.clear();
        self.near = (NO_NB_ID, NO_NB_DIST);
        self.active = false;
    }

    /// Updates the stored distance to one neighbour.
    pub fn update_dist(&mut self, id: NodeId, dist: f64) {
        self.neighbours.insert(id, dist);
        if id == self.near.0 {
            self.rescan_near();
        } else if dist < self.near.1 {
            self.near = (id, dist);
        }
    }

    /// Replaces the two just-merged neighbours by their new parent.
    ///
    /// Returns true when the nearest neighbour changed: either a removed id
    /// was the nearest (full rescan) or the new node is closer.
    pub fn update_nbhood(&mut self, old1: NodeId, old2: NodeId, new: NodeId, dist: f64) -> bool {
        self.neighbours.remove(&old1);
        self.neighbours.remove(&old2);
        self.neighbours.insert(new, dist);
        if self.near.0 == old1 || self.near.0 == old2 {
            self.rescan_near();
            true
        } else if dist < self.near.1 {
            self.near = (new, dist);
            true
        } else {
            false
        }
    }

    /// Removes a neighbour entirely (a discarded seed), rescanning the
    /// nearest slot when it pointed at it.
    pub fn remove_neighbour(&mut self, id: NodeId) -> bool {
        self.neighbours.remove(&id);
        if self.near.0 == id {
            self.rescan_near();
            true
        } else {
            false
        }
    }

    fn rescan_near(&mut self) {
        self.near = (NO_NB_ID, NO_NB_DIST);
        for (&id, &dist) in &self.neighbours {
            if dist < self.near.1 {
                self.near = (id, dist);
            }
        }
    }
}
