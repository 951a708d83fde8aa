use std::fmt;
use std::path::Path;
use std::str::FromStr;

use enum_iterator::Sequence;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::dist_block::DistBlockStore;
use crate::node_id::NodeId;
use crate::roi::Roi;
use crate::tree::Tree;
use crate::{Error, Result};

// row minima start above any real distance and discarded cells sit above that
const FRESH_DIST: f32 = 2.0;
const DISCARDED_DIST: f32 = 3.0;

/// The rule used to recompute cluster distances after each merge.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Sequence)]
pub enum Linkage {
    Single,
    Complete,
    Average,
    Weighted,
    Ward,
}

impl Linkage {
    /// The distance of `k` to the merge of two clusters of sizes `s1`, `s2`
    /// sitting at distances `d1`, `d2` from it.
    ///
    /// Ward is not a cell rule: its matrix stays average-maintained and the
    /// correction is applied to the merge heights instead, see
    /// [`GraphBuilder::build`].
    fn combine(self, d1: f32, d2: f32, s1: u32, s2: u32) -> f32 {
        match self {
            Linkage::Single => d1.min(d2),
            Linkage::Complete => d1.max(d2),
            Linkage::Average | Linkage::Ward => {
                (s1 as f32 * d1 + s2 as f32 * d2) / (s1 + s2) as f32
            }
            Linkage::Weighted => (d1 + d2) / 2.0,
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
            Linkage::Weighted => "weighted",
            Linkage::Ward => "ward",
        };
        f.write_str(name)
    }
}

impl FromStr for Linkage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Linkage> {
        enum_iterator::all::<Linkage>()
            .find(|linkage| linkage.to_string() == s)
            .ok_or_else(|| Error::UnknownLinkage {
                name: s.to_string(),
                expected: enum_iterator::all::<Linkage>()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Builds a tree from a precomputed pairwise distance matrix held in memory
/// as its lower triangle, loaded block by block from disk.
pub struct GraphBuilder {
    roi: Roi,
    store: DistBlockStore,
}

impl GraphBuilder {
    pub fn new(roi: Roi, block_dir: &Path) -> Result<GraphBuilder> {
        let store = DistBlockStore::open(block_dir)?;
        Ok(GraphBuilder { roi, store })
    }

    pub fn build(&mut self, linkage: Linkage) -> Result<Tree> {
        let n = self.roi.len();
        if n == 0 {
            return Err(Error::InvalidTree("roi is empty".to_string()));
        }

        let mut tree = Tree::new(
            linkage.to_string(),
            self.roi.grid,
            self.roi.dims,
            self.roi.streamlines,
        );
        if n == 1 {
            tree.push_leaf(self.roi.seeds[0], self.roi.trackids[0]);
            tree.check()?;
            return Ok(tree);
        }

        let mut matrix = self.load_matrix()?;
        // slot -> id of the cluster currently occupying that matrix row
        let mut lookup: Vec<NodeId> = (0..n as u32).map(NodeId::leaf).collect();
        for (&seed, &trackid) in self.roi.seeds.iter().zip(&self.roi.trackids) {
            tree.push_leaf(seed, trackid);
        }
        // the raw (average-maintained for ward) height each slot merged at
        let mut slot_height: Vec<f32> = vec![0.0; n];

        let mut lowest_dist: Vec<f32> = vec![FRESH_DIST; n];
        let mut lowest_loc: Vec<(usize, usize)> = vec![(0, 0); n];
        lowest_dist
            .par_iter_mut()
            .zip(lowest_loc.par_iter_mut())
            .enumerate()
            .for_each(|(row, (dist, loc))| {
                for (col, &cell) in matrix[row].iter().enumerate() {
                    if cell < *dist {
                        *dist = cell;
                        // the greater slot always sits in the second position
                        *loc = (col, row);
                    }
                }
            });

        while tree.num_nodes() < n - 1 {
            // find the closest pair over the tracked row minima
            let mut merge_dist = f32::INFINITY;
            let mut merge_loc = (0, 0);
            for (row, &dist) in lowest_dist.iter().enumerate().skip(1) {
                if dist < merge_dist {
                    merge_dist = dist;
                    merge_loc = lowest_loc[row];
                }
            }
            let (p, q) = merge_loc;
            if merge_dist >= FRESH_DIST {
                return Err(Error::InvalidTree(format!(
                    "no valid pair left after {} merges",
                    tree.num_nodes()
                )));
            }

            let id_p = lookup[p];
            let id_q = lookup[q];
            let size_p = tree.node(id_p).size;
            let size_q = tree.node(id_q).size;
            let height = match linkage {
                Linkage::Ward => {
                    let correction = merge_dist as f64
                        - slot_height[p] as f64 / 2.0
                        - slot_height[q] as f64 / 2.0;
                    (size_p as f64 * size_q as f64 / (size_p + size_q) as f64) * correction
                }
                _ => merge_dist as f64,
            };
            let new_id = tree.push_node(vec![id_p, id_q], height)?;
            debug!(%id_p, %id_q, %new_id, merge_dist, "merged");

            // fold column q into column p and poison q
            for i in 0..n {
                if i < p {
                    matrix[p][i] = linkage.combine(matrix[p][i], matrix[q][i], size_p, size_q);
                    matrix[q][i] = DISCARDED_DIST;
                } else if i == p {
                    matrix[q][i] = DISCARDED_DIST;
                } else if i < q {
                    matrix[i][p] = linkage.combine(matrix[i][p], matrix[q][i], size_p, size_q);
                    matrix[q][i] = DISCARDED_DIST;
                } else if i > q {
                    matrix[i][p] = linkage.combine(matrix[i][p], matrix[i][q], size_p, size_q);
                    matrix[i][q] = DISCARDED_DIST;
                }
            }

            lookup[p] = new_id;
            lookup[q] = NodeId::leaf(0);
            slot_height[p] = merge_dist;

            // refresh the tracked minima; rows whose cached minimum pointed
            // at p or q rescan, the rest only look at the new cell in p
            let matrix_ref = &matrix;
            lowest_dist
                .par_iter_mut()
                .zip(lowest_loc.par_iter_mut())
                .enumerate()
                .skip(1)
                .for_each(|(row, (dist, loc))| {
                    if *dist == DISCARDED_DIST || row < p {
                        return;
                    }
                    if row == q {
                        *dist = DISCARDED_DIST;
                        *loc = (0, 0);
                    } else if row == p || loc.0 == p || loc.0 == q {
                        *dist = FRESH_DIST;
                        *loc = (0, 0);
                        for (col, &cell) in matrix_ref[row].iter().enumerate() {
                            if cell < *dist {
                                *dist = cell;
                                *loc = (col, row);
                            }
                        }
                    } else if matrix_ref[row][p] < *dist {
                        *dist = matrix_ref[row][p];
                        *loc = (p, row);
                    }
                });
        }

        tree.check()?;
        info!("{}", tree.report());
        Ok(tree)
    }

    /// Reads the whole matrix into the lower triangle, sweeping the on-disk
    /// blocks row-major. The upper-triangular blocks are transposed on the
    /// fly so that only half the cells are kept.
    fn load_matrix(&mut self) -> Result<Vec<Vec<f32>>> {
        let n = self.roi.len();
        let seeds = &self.roi.seeds;
        let mut matrix: Vec<Vec<f32>> = (0..n).map(|i| vec![0.0; i]).collect();
        info!(
            blocks = self.store.num_blocks(),
            cells = n * (n - 1) / 2,
            "loading distance matrix"
        );

        let mut row_start = 0usize;
        let mut col_start = 0usize;
        while row_start < n {
            self.store.load_block_for(seeds[row_start], seeds[col_start])?;
            let ((_, row_last), (_, col_last)) = self.store.block_range()?;

            let row_end = seeds.partition_point(|c| *c <= row_last);
            let col_end = if col_start == row_start {
                row_end
            } else {
                seeds.partition_point(|c| *c <= col_last)
            };

            let store = &self.store;
            if row_start == col_start {
                // diagonal block: fill the wedge below its own diagonal
                matrix[row_start + 1..col_end].par_iter_mut().enumerate().try_for_each(
                    |(offset, row)| {
                        let j = row_start + 1 + offset;
                        for i in row_start..j.min(row_end) {
                            row[i] = store.get_distance(seeds[i], seeds[j])?;
                        }
                        Ok::<(), Error>(())
                    },
                )?;
            } else {
                matrix[col_start..col_end].par_iter_mut().enumerate().try_for_each(
                    |(offset, row)| {
                        let j = col_start + offset;
                        for i in row_start..row_end {
                            row[i] = store.get_distance(seeds[i], seeds[j])?;
                        }
                        Ok::<(), Error>(())
                    },
                )?;
            }

            if col_end == n {
                row_start = row_end;
                col_start = row_start;
            } else {
                col_start = col_end;
            }
        }

        Ok(matrix)
    }
}
