use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::coord::{Coord, Grid};
use crate::parser::SectionFile;
use crate::{Error, Result};

/// The region of interest a tree is built over: the ordered seed voxel list
/// plus the dataset metadata the builders need.
#[derive(Debug, Clone)]
pub struct Roi {
    pub grid: Grid,
    pub dims: Coord,
    pub streamlines: u32,
    pub seeds: Vec<Coord>,
    pub trackids: Vec<u32>,
}

impl Roi {
    /// Reads a roi file.
    ///
    /// `#imagesize`, `#streams` and `#roi` are mandatory. `#trackindex` is
    /// mandatory in the nifti grid, where tract files are named after track
    /// ids; in the other grids a missing section falls back to identity ids.
    pub fn read(path: &Path) -> Result<Roi> {
        let file = SectionFile::read(path)?;
        if file.is_empty() {
            return Err(file.parse_error("file is empty"));
        }

        let size_line = file.single_line_for_tag("imagesize")?;
        if size_line.len() != 4 {
            return Err(file.parse_error(format!(
                "#imagesize expects `sx sy sz grid`, got {size_line:?}"
            )));
        }
        let dims = parse_coord(&file, &size_line[..3])?;
        let grid: Grid = size_line[3].parse()?;

        let streams_line = file.single_line_for_tag("streams")?;
        if streams_line.len() != 1 {
            return Err(file.parse_error("#streams expects a single integer"));
        }
        let streamlines = streams_line[0]
            .parse::<u32>()
            .map_err(|e| file.parse_error(format!("bad streamline count: {e}")))?;

        let coord_lines = file.split_lines_for_tag("roi");
        if coord_lines.is_empty() {
            return Err(Error::MissingSection { path: path.to_path_buf(), tag: "roi" });
        }
        let mut seeds = Vec::with_capacity(coord_lines.len());
        for line in &coord_lines {
            seeds.push(parse_coord(&file, line)?);
        }

        let id_lines = file.split_lines_for_tag("trackindex");
        let trackids = if id_lines.is_empty() {
            if grid == Grid::Nifti {
                return Err(Error::MissingTrackIds(path.to_path_buf()));
            }
            (0..seeds.len() as u32).collect()
        } else {
            let mut ids = Vec::with_capacity(id_lines.len());
            for line in &id_lines {
                let id = line
                    .first()
                    .ok_or_else(|| file.parse_error("empty #trackindex line"))?
                    .parse::<u32>()
                    .map_err(|e| file.parse_error(format!("bad track id: {e}")))?;
                ids.push(id);
            }
            ids
        };
        if trackids.len() != seeds.len() {
            return Err(Error::TrackIdMismatch {
                path: path.to_path_buf(),
                coords: seeds.len(),
                ids: trackids.len(),
            });
        }

        info!(seeds = seeds.len(), %grid, streamlines, "roi loaded");
        Ok(Roi { grid, dims, streamlines, seeds, trackids })
    }

    /// Converts every seed into the target grid frame.
    pub fn to_grid(&mut self, target: Grid) {
        if self.grid == target {
            return;
        }
        let dims = self.dims;
        let source = self.grid;
        let convert = |c: &Coord| match (source, target) {
            (Grid::Vista, Grid::Nifti) => c.vista2nifti(dims),
            (Grid::Nifti, Grid::Vista) => c.nifti2vista(dims),
            (Grid::Surf, Grid::Vista) => c.surf2vista(dims),
            (Grid::Surf, Grid::Nifti) => c.surf2nifti(dims),
            // vista/nifti are full frames, there is no way back onto a surface
            (_, Grid::Surf) | (Grid::Vista, Grid::Vista) | (Grid::Nifti, Grid::Nifti) => *c,
        };
        for seed in &mut self.seeds {
            *seed = convert(seed);
        }
        self.grid = target;
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        writeln!(out, "#imagesize\n{} {} {} {}\n#endimagesize\n", self.dims.x, self.dims.y, self.dims.z, self.grid).unwrap();
        writeln!(out, "#streams\n{}\n#endstreams\n", self.streamlines).unwrap();
        out.push_str("#roi\n");
        for seed in &self.seeds {
            writeln!(out, "{seed}").unwrap();
        }
        out.push_str("#endroi\n\n#trackindex\n");
        for id in &self.trackids {
            writeln!(out, "{id}").unwrap();
        }
        out.push_str("#endtrackindex\n");
        fs::write(path, out)?;
        Ok(())
    }
}

fn parse_coord(file: &SectionFile, tokens: &[&str]) -> Result<Coord> {
    if tokens.len() < 3 {
        return Err(file.parse_error(format!("expected `x y z`, got {tokens:?}")));
    }
    let mut parts = [0i32; 3];
    for (slot, token) in parts.iter_mut().zip(tokens) {
        *slot = token
            .parse()
            .map_err(|e| file.parse_error(format!("bad coordinate {token:?}: {e}")))?;
    }
    Ok(Coord::new(parts[0], parts[1], parts[2]))
}
