use std::path::Path;

use crate::coord::{Coord, Grid};
use crate::roi::Roi;
use crate::Error;

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

#[test]
fn reads_a_complete_nifti_roi() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roi.txt");
    write(
        &path,
        "#imagesize\n10 12 14 nifti\n#endimagesize\n\n\
         #streams\n5000\n#endstreams\n\n\
         #roi\n1 2 3\n2 2 3\n#endroi\n\n\
         #trackindex\n17\n18\n#endtrackindex\n",
    );
    let roi = Roi::read(&path).unwrap();
    assert_eq!(roi.grid, Grid::Nifti);
    assert_eq!(roi.dims, Coord::new(10, 12, 14));
    assert_eq!(roi.streamlines, 5000);
    assert_eq!(roi.seeds, vec![Coord::new(1, 2, 3), Coord::new(2, 2, 3)]);
    assert_eq!(roi.trackids, vec![17, 18]);
}

#[test]
fn nifti_requires_track_ids_but_vista_defaults_them() {
    let dir = tempfile::tempdir().unwrap();
    let nifti = dir.path().join("nifti.txt");
    write(
        &nifti,
        "#imagesize\n10 10 10 nifti\n#endimagesize\n#streams\n100\n#endstreams\n#roi\n1 2 3\n#endroi\n",
    );
    assert!(matches!(Roi::read(&nifti), Err(Error::MissingTrackIds(_))));

    let vista = dir.path().join("vista.txt");
    write(
        &vista,
        "#imagesize\n10 10 10 vista\n#endimagesize\n#streams\n100\n#endstreams\n#roi\n1 2 3\n4 5 6\n#endroi\n",
    );
    let roi = Roi::read(&vista).unwrap();
    assert_eq!(roi.trackids, vec![0, 1]);
}

#[test]
fn length_mismatch_and_unknown_grid_fail() {
    let dir = tempfile::tempdir().unwrap();
    let mismatch = dir.path().join("mismatch.txt");
    write(
        &mismatch,
        "#imagesize\n10 10 10 vista\n#endimagesize\n#streams\n100\n#endstreams\n\
         #roi\n1 2 3\n4 5 6\n#endroi\n#trackindex\n7\n#endtrackindex\n",
    );
    assert!(matches!(
        Roi::read(&mismatch),
        Err(Error::TrackIdMismatch { coords: 2, ids: 1, .. })
    ));

    let grid = dir.path().join("grid.txt");
    write(
        &grid,
        "#imagesize\n10 10 10 analyze\n#endimagesize\n#streams\n100\n#endstreams\n#roi\n1 2 3\n#endroi\n",
    );
    assert!(matches!(Roi::read(&grid), Err(Error::UnknownGrid(g)) if g == "analyze"));
}

#[test]
fn grid_conversion_moves_every_seed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roi.txt");
    write(
        &path,
        "#imagesize\n10 20 30 vista\n#endimagesize\n#streams\n100\n#endstreams\n\
         #roi\n1 2 3\n4 5 6\n#endroi\n",
    );
    let mut roi = Roi::read(&path).unwrap();
    roi.to_grid(Grid::Nifti);
    assert_eq!(roi.grid, Grid::Nifti);
    assert_eq!(roi.seeds, vec![Coord::new(1, 17, 26), Coord::new(4, 14, 23)]);
}

#[test]
fn write_read_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roi.txt");
    let roi = crate::tests::roi(&[Coord::new(1, 2, 3), Coord::new(2, 2, 3)], 777);
    roi.write(&path).unwrap();
    let reread = Roi::read(&path).unwrap();
    assert_eq!(reread.grid, roi.grid);
    assert_eq!(reread.dims, roi.dims);
    assert_eq!(reread.streamlines, roi.streamlines);
    assert_eq!(reread.seeds, roi.seeds);
    assert_eq!(reread.trackids, roi.trackids);
}
