use std::path::PathBuf;

use crate::coord::Coord;
use crate::node_id::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("could not parse {}: {msg}", path.display())]
    Parse { path: PathBuf, msg: String },

    #[error("section #{tag} is missing or empty in {}", path.display())]
    MissingSection { path: PathBuf, tag: &'static str },

    #[error("section #{tag} in {} must contain exactly one line", path.display())]
    MultiLineSection { path: PathBuf, tag: &'static str },

    #[error("unrecognized grid type {0:?}")]
    UnknownGrid(String),

    #[error("unrecognized linkage {name:?}, expected one of {expected}")]
    UnknownLinkage { name: String, expected: String },

    #[error("invalid neighbourhood level {0}, expected one of 6, 18, 26, 32, 56, 92, 116 or 124")]
    InvalidNbLevel(u32),

    #[error("base phase must be `off`, `size:S` or `num:N`, got {0:?}")]
    InvalidBasePhase(String),

    #[error("parameter {name} is out of range: {value}")]
    ParamOutOfRange { name: &'static str, value: f64 },

    #[error("roi file {} declares {coords} coordinates but {ids} track ids", path.display())]
    TrackIdMismatch { path: PathBuf, coords: usize, ids: usize },

    #[error("roi file {} is in nifti grid but has no #trackindex section", .0.display())]
    MissingTrackIds(PathBuf),

    #[error("tract file {} is missing", .0.display())]
    MissingTractFile(PathBuf),

    #[error("distance block file {} is missing", .0.display())]
    MissingBlockFile(PathBuf),

    #[error("corrupt tract file {}: {reason}", path.display())]
    CorruptTractFile { path: PathBuf, reason: String },

    #[error("tractograms are not of the same size ({left} != {right})")]
    TractLenMismatch { left: usize, right: usize },

    #[error("{op}: {reason}")]
    TractPrecondition { op: &'static str, reason: &'static str },

    #[error("block id ({b1}, {b2}) is out of bounds, highest block is {max}")]
    BlockOutOfRange { b1: u32, b2: u32, max: u32 },

    #[error("no distance block is loaded")]
    NoBlockLoaded,

    #[error("coordinate {0} is not listed in the distance matrix index")]
    CoordNotInIndex(Coord),

    #[error("coordinate {coord} is not covered by the resident block ({b1}, {b2})")]
    CoordNotInBlock { coord: Coord, b1: u32, b2: u32 },

    #[error("node {0} was merged twice")]
    DuplicateMerge(NodeId),

    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("neighbourhood graph is disconnected: {remaining} clusters left with no neighbour pair to merge")]
    DisconnectedRoi { remaining: usize },
}
