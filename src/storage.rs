use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::coord::{Coord, Grid};
use crate::roi::Roi;
use crate::tract::{ByteTract, Tract};
use crate::{Error, Result};

const COMPACT_EXT: &str = "cmpct";
const COMPACT_FLOAT: u32 = 32;
const COMPACT_UINT8: u32 = 8;

/// The tract I/O surface the builders work against.
///
/// Leaf tracts are the 8-bit tractograms the tracking pipeline produced;
/// node tracts are the float mean tractograms written during tree building.
/// Both are stored in log units, un-thresholded.
pub trait TractStore: Send + Sync {
    /// Reads a seed tractogram in byte precision.
    fn read_leaf(&self, leaf: u32) -> Result<ByteTract>;

    /// Reads a seed tractogram widened to float precision.
    fn read_leaf_f32(&self, leaf: u32) -> Result<Tract> {
        self.read_leaf(leaf).map(|byte| Tract::from(&byte))
    }

    /// Reads a mean node tractogram.
    fn read_node(&self, node: u32) -> Result<Tract>;

    /// Writes a mean node tractogram.
    fn write_node(&self, node: u32, tract: &Tract) -> Result<()>;

    /// Removes a node tractogram that is no longer needed.
    fn delete_node(&self, node: u32) -> Result<()>;

    /// Rearranges a compact tract to match an x-axis flip of the underlying
    /// image, given the precomputed compact-index permutation.
    fn flip_x(&self, tract: &mut Tract, permutation: &[u32]) -> Result<()> {
        if tract.len() != permutation.len() {
            return Err(Error::TractLenMismatch { left: tract.len(), right: permutation.len() });
        }
        let flipped: Vec<f32> =
            permutation.iter().map(|&source| tract.data()[source as usize]).collect();
        *tract = Tract::new(flipped);
        Ok(())
    }
}

/// A [`TractStore`] over directories of compact binary files.
///
/// Leaf files follow the tracking pipeline's naming: `probtract_<trackid>`
/// in the nifti grid, `connect_<XXX>_<YYY>_<ZZZ>` in the vista grid. Node
/// files are `compact_<node, zero-padded to 6>`. All carry the `.cmpct`
/// extension, optionally gzip-compressed with a `.gz` suffix.
pub struct CompactStore {
    leaf_dir: PathBuf,
    node_dir: PathBuf,
    grid: Grid,
    trackids: Vec<u32>,
    coords: Vec<Coord>,
    zip_nodes: bool,
}

impl CompactStore {
    pub fn new(leaf_dir: &Path, node_dir: &Path, roi: &Roi, zip_nodes: bool) -> CompactStore {
        CompactStore {
            leaf_dir: leaf_dir.to_path_buf(),
            node_dir: node_dir.to_path_buf(),
            grid: roi.grid,
            trackids: roi.trackids.clone(),
            coords: roi.seeds.clone(),
            zip_nodes,
        }
    }

    fn leaf_path(&self, leaf: u32) -> Result<PathBuf> {
        let name = match self.grid {
            Grid::Vista => {
                let coord = self.coords.get(leaf as usize).ok_or_else(|| {
                    Error::Parse {
                        path: self.leaf_dir.clone(),
                        msg: format!("leaf {leaf} is outside the roi"),
                    }
                })?;
                format!("connect_{}.{COMPACT_EXT}", coord.name_string())
            }
            Grid::Nifti | Grid::Surf => {
                let trackid = self.trackids.get(leaf as usize).ok_or_else(|| {
                    Error::Parse {
                        path: self.leaf_dir.clone(),
                        msg: format!("leaf {leaf} has no track id"),
                    }
                })?;
                format!("probtract_{trackid}.{COMPACT_EXT}")
            }
        };
        Ok(self.leaf_dir.join(name))
    }

    fn node_path(&self, node: u32) -> PathBuf {
        let mut name = format!("compact_{node:06}.{COMPACT_EXT}");
        if self.zip_nodes {
            name.push_str(".gz");
        }
        self.node_dir.join(name)
    }
}

impl TractStore for CompactStore {
    fn read_leaf(&self, leaf: u32) -> Result<ByteTract> {
        let path = self.leaf_path(leaf)?;
        match read_compact(&path)? {
            CompactData::Bytes(data) => Ok(ByteTract::new(data)),
            CompactData::Floats(_) => Err(Error::CorruptTractFile {
                path,
                reason: "expected an 8-bit leaf tract, found a 32-bit file".to_string(),
            }),
        }
    }

    fn read_node(&self, node: u32) -> Result<Tract> {
        let path = self.node_path(node);
        match read_compact(&path)? {
            CompactData::Floats(data) => Ok(Tract::new(data)),
            CompactData::Bytes(_) => Err(Error::CorruptTractFile {
                path,
                reason: "expected a 32-bit node tract, found an 8-bit file".to_string(),
            }),
        }
    }

    fn write_node(&self, node: u32, tract: &Tract) -> Result<()> {
        let path = self.node_path(node);
        debug!(node, path = %path.display(), "writing mean tract");
        write_compact_f32(&path, tract.data(), self.zip_nodes)
    }

    fn delete_node(&self, node: u32) -> Result<()> {
        let path = self.node_path(node);
        fs::remove_file(&path).map_err(|_| Error::MissingTractFile(path))
    }
}

enum CompactData {
    Bytes(Vec<u8>),
    Floats(Vec<f32>),
}

/// Reads a compact tract file: `[u32 bit_width][u32 length]` then `length`
/// raw elements, all little-endian. Falls back to `<path>.gz` when the
/// plain file does not exist.
fn read_compact(path: &Path) -> Result<CompactData> {
    let mut reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        let file = open_tract(path)?;
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(_) => {
                let zipped = gz_sibling(path);
                let file = File::open(&zipped).map_err(|_| Error::MissingTractFile(path.to_path_buf()))?;
                Box::new(GzDecoder::new(BufReader::new(file)))
            }
        }
    };

    let corrupt = |reason: String| Error::CorruptTractFile { path: path.to_path_buf(), reason };
    let bit_width = reader.read_u32::<LittleEndian>()?;
    let length = reader.read_u32::<LittleEndian>()? as usize;
    match bit_width {
        COMPACT_UINT8 => {
            let mut data = vec![0u8; length];
            reader
                .read_exact(&mut data)
                .map_err(|e| corrupt(format!("truncated data ({e})")))?;
            Ok(CompactData::Bytes(data))
        }
        COMPACT_FLOAT => {
            let mut data = vec![0f32; length];
            reader
                .read_f32_into::<LittleEndian>(&mut data)
                .map_err(|e| corrupt(format!("truncated data ({e})")))?;
            Ok(CompactData::Floats(data))
        }
        other => Err(corrupt(format!("unsupported bit width {other}"))),
    }
}

fn write_compact_f32(path: &Path, data: &[f32], zip: bool) -> Result<()> {
    let file = File::create(path)?;
    let mut writer: Box<dyn Write> = if zip {
        Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    writer.write_u32::<LittleEndian>(COMPACT_FLOAT)?;
    writer.write_u32::<LittleEndian>(data.len() as u32)?;
    for &value in data {
        writer.write_f32::<LittleEndian>(value)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes an 8-bit compact tract; used by the tracking-side tools and the
/// test fixtures.
pub fn write_compact_u8(path: &Path, data: &[u8], zip: bool) -> Result<()> {
    let file = File::create(path)?;
    let mut writer: Box<dyn Write> = if zip {
        Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
    } else {
        Box::new(BufWriter::new(file))
    };
    writer.write_u32::<LittleEndian>(COMPACT_UINT8)?;
    writer.write_u32::<LittleEndian>(data.len() as u32)?;
    writer.write_all(data)?;
    writer.flush()?;
    Ok(())
}

fn open_tract(path: &Path) -> Result<File> {
    File::open(path).map_err(|_| Error::MissingTractFile(path.to_path_buf()))
}

fn gz_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".gz");
    PathBuf::from(os)
}
