use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// The coordinate frame the seed voxels are expressed in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Grid {
    Vista,
    Nifti,
    Surf,
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grid::Vista => f.write_str("vista"),
            Grid::Nifti => f.write_str("nifti"),
            Grid::Surf => f.write_str("surf"),
        }
    }
}

impl FromStr for Grid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Grid> {
        match s {
            "vista" => Ok(Grid::Vista),
            "nifti" => Ok(Grid::Nifti),
            "surf" => Ok(Grid::Surf),
            other => Err(Error::UnknownGrid(other.to_string())),
        }
    }
}

/// A seed voxel coordinate.
///
/// The ordering is the roi file ordering: z first, then y, then x.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Coord {
    pub const fn new(x: i32, y: i32, z: i32) -> Coord {
        Coord { x, y, z }
    }

    /// Euclidean distance between two voxel centres.
    pub fn phys_dist(&self, other: Coord) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        let dz = (self.z - other.z) as f32;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// The `XXX_YYY_ZZZ` form used in vista-grid tract file names.
    pub fn name_string(&self) -> String {
        format!("{:03}_{:03}_{:03}", self.x, self.y, self.z)
    }

    /// Enumerates the in-bounds neighbours of this voxel at the given
    /// neighbourhood level, sorted by the coordinate order.
    ///
    /// A level keeps the offsets `(i, j, k)` with `|i|+|j|+|k| <= c` and
    /// `max(|i|,|j|,|k|) <= r`; level 32 is level 26 plus the six offsets
    /// two steps away along an axis.
    pub fn neighbours(&self, level: u32, dims: Coord) -> Result<Vec<Coord>> {
        let (city, range, axis_ring): (i32, i32, bool) = match level {
            6 => (1, 1, false),
            18 => (2, 1, false),
            26 => (3, 1, false),
            32 => (3, 1, true),
            56 => (3, 2, false),
            92 => (4, 2, false),
            116 => (5, 2, false),
            124 => (6, 2, false),
            other => return Err(Error::InvalidNbLevel(other)),
        };

        let mut nbs = Vec::with_capacity(level as usize);
        let mut push = |this: &Coord, i: i32, j: i32, k: i32| {
            let nb = Coord::new(this.x + i, this.y + j, this.z + k);
            let in_bounds = (0..dims.x).contains(&nb.x)
                && (0..dims.y).contains(&nb.y)
                && (0..dims.z).contains(&nb.z);
            if in_bounds {
                nbs.push(nb);
            }
        };

        for i in -range..=range {
            for j in -range..=range {
                for k in -range..=range {
                    if (i, j, k) == (0, 0, 0) || i.abs() + j.abs() + k.abs() > city {
                        continue;
                    }
                    push(self, i, j, k);
                }
            }
        }
        if axis_ring {
            for offset in [-2, 2] {
                push(self, offset, 0, 0);
                push(self, 0, offset, 0);
                push(self, 0, 0, offset);
            }
        }

        nbs.sort_unstable();
        Ok(nbs)
    }

    /// Converts a nifti-frame coordinate to the vista frame (flips y and z).
    pub fn nifti2vista(&self, dims: Coord) -> Coord {
        Coord::new(self.x, dims.y - 1 - self.y, dims.z - 1 - self.z)
    }

    /// Converts a vista-frame coordinate to the nifti frame.
    pub fn vista2nifti(&self, dims: Coord) -> Coord {
        // the flip is its own inverse
        self.nifti2vista(dims)
    }

    /// Converts a surface-frame coordinate to the vista frame: recentre on
    /// the dataset, then flip y and z.
    pub fn surf2vista(&self, dims: Coord) -> Coord {
        self.surf2nifti(dims).nifti2vista(dims)
    }

    /// Converts a surface-frame coordinate to the nifti frame.
    pub fn surf2nifti(&self, dims: Coord) -> Coord {
        Coord::new(
            self.x + (dims.x - 1) / 2,
            self.y + (dims.y - 1) / 2,
            self.z + (dims.z - 1) / 2,
        )
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Coord) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Coord) -> Ordering {
        (self.z, self.y, self.x).cmp(&(other.z, other.y, other.x))
    }
}
