use std::path::Path;

use tempfile::TempDir;

use crate::coord::{Coord, Grid};
use crate::roi::Roi;
use crate::storage::write_compact_u8;

mod roi_file;
mod storage;
mod tract;
mod tree;

/// A roi over the given seeds in the nifti grid with identity track ids.
pub fn roi(seeds: &[Coord], streamlines: u32) -> Roi {
    Roi {
        grid: Grid::Nifti,
        dims: Coord::new(10, 10, 10),
        streamlines,
        seeds: seeds.to_vec(),
        trackids: (0..seeds.len() as u32).collect(),
    }
}

/// Writes one byte leaf tract per seed, named by track id.
pub fn write_leaf_tracts(dir: &Path, tracts: &[&[u8]]) {
    for (trackid, data) in tracts.iter().enumerate() {
        let path = dir.join(format!("probtract_{trackid}.cmpct"));
        write_compact_u8(&path, data, false).unwrap();
    }
}

pub struct TractDirs {
    pub leaves: TempDir,
    pub nodes: TempDir,
}

pub fn tract_dirs(tracts: &[&[u8]]) -> TractDirs {
    let leaves = tempfile::tempdir().unwrap();
    let nodes = tempfile::tempdir().unwrap();
    write_leaf_tracts(leaves.path(), tracts);
    TractDirs { leaves, nodes }
}
