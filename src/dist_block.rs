use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use tracing::debug;

use crate::coord::Coord;
use crate::parser::SectionFile;
use crate::{Error, Result};

pub const INDEX_FILENAME: &str = "roi_index.txt";

/// An on-disk symmetric pairwise distance matrix, partitioned into square
/// blocks with one binary file per block pair `(b1, b2)`, `b1 <= b2`.
///
/// The text index maps every roi coordinate to its block and offset. Exactly
/// one block is resident at a time.
pub struct DistBlockStore {
    dir: PathBuf,
    // coordinate -> (block id, offset inside the block)
    index: BTreeMap<Coord, (u32, u32)>,
    max_block: u32,
    resident: Option<ResidentBlock>,
}

struct ResidentBlock {
    id: (u32, u32),
    rows: BTreeMap<Coord, u32>,
    cols: BTreeMap<Coord, u32>,
    n_rows: usize,
    n_cols: usize,
    cells: Vec<f32>,
}

impl DistBlockStore {
    /// Opens a block directory and parses its index file.
    pub fn open(dir: &Path) -> Result<DistBlockStore> {
        let path = dir.join(INDEX_FILENAME);
        let file = SectionFile::read(&path)?;
        if file.is_empty() {
            return Err(file.parse_error("index file is empty"));
        }

        let mut index = BTreeMap::new();
        let mut max_block = 0;
        for line in file.split_lines_for_tag("distindex") {
            // x y z b <block> i <offset>
            if line.len() != 7 || line[3] != "b" || line[5] != "i" {
                return Err(file.parse_error(format!("malformed index line {line:?}")));
            }
            let parse = |token: &str| {
                token
                    .parse::<i32>()
                    .map_err(|e| file.parse_error(format!("bad index value {token:?}: {e}")))
            };
            let coord = Coord::new(parse(line[0])?, parse(line[1])?, parse(line[2])?);
            let block = parse(line[4])? as u32;
            let offset = parse(line[6])? as u32;
            index.insert(coord, (block, offset));
            max_block = max_block.max(block);
        }
        if index.is_empty() {
            return Err(Error::MissingSection { path, tag: "distindex" });
        }

        debug!(seeds = index.len(), blocks = max_block + 1, "distance matrix index loaded");
        Ok(DistBlockStore { dir: dir.to_path_buf(), index, max_block, resident: None })
    }

    /// Number of rows/columns of the resident block.
    pub fn size(&self) -> usize {
        self.resident.as_ref().map_or(0, |b| b.n_rows)
    }

    /// Number of rows/columns of the whole matrix.
    pub fn matrix_size(&self) -> usize {
        self.index.len()
    }

    pub fn block_id(&self) -> Option<(u32, u32)> {
        self.resident.as_ref().map(|b| b.id)
    }

    pub fn top_block(&self) -> u32 {
        self.max_block
    }

    pub fn num_blocks(&self) -> u32 {
        (self.max_block + 1) * (self.max_block + 2) / 2
    }

    /// The block holding the distance between two seeds, `(row, col)` with
    /// `row <= col`.
    pub fn which_block(&self, c1: Coord, c2: Coord) -> Result<(u32, u32)> {
        let (b1, _) = self.index.get(&c1).ok_or(Error::CoordNotInIndex(c1))?;
        let (b2, _) = self.index.get(&c2).ok_or(Error::CoordNotInIndex(c2))?;
        Ok((*b1.min(b2), *b1.max(b2)))
    }

    /// Brings the block holding the distance of a seed pair into memory.
    pub fn load_block_for(&mut self, c1: Coord, c2: Coord) -> Result<()> {
        let (b1, b2) = self.which_block(c1, c2)?;
        self.load_block(b1, b2)
    }

    /// Brings a single block into memory, replacing the resident one.
    pub fn load_block(&mut self, b1: u32, b2: u32) -> Result<()> {
        let (b1, b2) = (b1.min(b2), b1.max(b2));
        if b2 > self.max_block {
            return Err(Error::BlockOutOfRange { b1, b2, max: self.max_block });
        }
        if self.resident.as_ref().is_some_and(|b| b.id == (b1, b2)) {
            return Ok(());
        }

        let path = self.dir.join(block_filename(b1, b2));
        let file = File::open(&path).map_err(|_| Error::MissingBlockFile(path.clone()))?;
        // safety: block files are written once by the matrix tools and never
        // rewritten while a build is running
        let mmap = unsafe { Mmap::map(&file)? };
        let corrupt = |reason: String| Error::CorruptTractFile { path: path.clone(), reason };
        if mmap.len() < 8 {
            return Err(corrupt("missing header".to_string()));
        }
        let n_rows = LittleEndian::read_u32(&mmap[0..]) as usize;
        let n_cols = LittleEndian::read_u32(&mmap[4..]) as usize;
        let payload = &mmap[8..];
        if payload.len() != n_rows * n_cols * std::mem::size_of::<f32>() {
            return Err(corrupt(format!(
                "expected {n_rows}x{n_cols} cells, found {} bytes",
                payload.len()
            )));
        }
        let cells = match bytemuck::try_cast_slice::<u8, f32>(payload) {
            Ok(cast) => cast.to_vec(),
            Err(_) => bytemuck::pod_collect_to_vec(payload),
        };

        let mut rows = BTreeMap::new();
        let mut cols = BTreeMap::new();
        for (coord, &(block, offset)) in &self.index {
            if block == b1 {
                rows.insert(*coord, offset);
            }
            if block == b2 {
                cols.insert(*coord, offset);
            }
        }

        debug!(b1, b2, n_rows, n_cols, "distance block loaded");
        self.resident = Some(ResidentBlock { id: (b1, b2), rows, cols, n_rows, n_cols, cells });
        Ok(())
    }

    /// The distance between two seeds, read from the resident block.
    pub fn get_distance(&self, c1: Coord, c2: Coord) -> Result<f32> {
        let block = self.resident.as_ref().ok_or(Error::NoBlockLoaded)?;
        // the pair may come in either order; diagonal blocks hold both
        let (row, col) = match (block.rows.get(&c1), block.cols.get(&c2)) {
            (Some(row), Some(col)) => (*row, *col),
            _ => match (block.rows.get(&c2), block.cols.get(&c1)) {
                (Some(row), Some(col)) => (*row, *col),
                _ => {
                    let coord = if block.rows.contains_key(&c1) || block.cols.contains_key(&c1) {
                        c2
                    } else {
                        c1
                    };
                    return Err(Error::CoordNotInBlock { coord, b1: block.id.0, b2: block.id.1 });
                }
            },
        };
        Ok(block.cells[row as usize * block.n_cols + col as usize])
    }

    /// First and last coordinate of the resident block's rows and columns.
    pub fn block_range(&self) -> Result<((Coord, Coord), (Coord, Coord))> {
        let block = self.resident.as_ref().ok_or(Error::NoBlockLoaded)?;
        let bounds = |map: &BTreeMap<Coord, u32>| {
            let first = *map.keys().next().unwrap();
            let last = *map.keys().next_back().unwrap();
            (first, last)
        };
        Ok((bounds(&block.rows), bounds(&block.cols)))
    }
}

pub fn block_filename(b1: u32, b2: u32) -> String {
    format!("dist_block_{b1:03}_{b2:03}")
}

/// Writes one block file; the counterpart of [`DistBlockStore::load_block`],
/// used by the matrix-generation tools and the test fixtures.
pub fn write_block(dir: &Path, b1: u32, b2: u32, n_rows: usize, n_cols: usize, cells: &[f32]) -> Result<()> {
    assert_eq!(cells.len(), n_rows * n_cols);
    let mut writer = BufWriter::new(File::create(dir.join(block_filename(b1, b2)))?);
    writer.write_u32::<LittleEndian>(n_rows as u32)?;
    writer.write_u32::<LittleEndian>(n_cols as u32)?;
    for &cell in cells {
        writer.write_f32::<LittleEndian>(cell)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the `roi_index.txt` of a block directory.
pub fn write_index(dir: &Path, entries: &[(Coord, u32, u32)]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(dir.join(INDEX_FILENAME))?);
    writeln!(writer, "#distindex")?;
    for (coord, block, offset) in entries {
        writeln!(writer, "{coord} b {block} i {offset}")?;
    }
    writeln!(writer, "#enddistindex")?;
    writer.flush()?;
    Ok(())
}
