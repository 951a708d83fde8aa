use crate::coord::{Coord, Grid};
use crate::storage::{write_compact_u8, CompactStore, TractStore};
use crate::tract::Tract;
use crate::tests::roi;
use crate::Error;

#[test]
fn node_tract_round_trip() {
    let seeds = [Coord::new(0, 0, 0)];
    let roi = roi(&seeds, 100);
    let dir = tempfile::tempdir().unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &roi, false);

    let tract = Tract::new(vec![0.5, 0.0, 0.25, 1.0]);
    store.write_node(3, &tract).unwrap();
    let loaded = store.read_node(3).unwrap();
    assert_eq!(loaded.data(), tract.data());
    assert!(loaded.in_log_units() && !loaded.thresholded());

    store.delete_node(3).unwrap();
    assert!(matches!(store.read_node(3), Err(Error::MissingTractFile(_))));
}

#[test]
fn zipped_node_tract_round_trip() {
    let seeds = [Coord::new(0, 0, 0)];
    let roi = roi(&seeds, 100);
    let dir = tempfile::tempdir().unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &roi, true);

    let tract = Tract::new(vec![0.125; 32]);
    store.write_node(0, &tract).unwrap();
    assert!(dir.path().join("compact_000000.cmpct.gz").exists());
    assert_eq!(store.read_node(0).unwrap().data(), tract.data());
}

#[test]
fn leaf_read_falls_back_to_gzip() {
    let seeds = [Coord::new(0, 0, 0)];
    let roi = roi(&seeds, 100);
    let dir = tempfile::tempdir().unwrap();
    write_compact_u8(&dir.path().join("probtract_0.cmpct.gz"), &[1, 2, 3], true).unwrap();

    let store = CompactStore::new(dir.path(), dir.path(), &roi, false);
    assert_eq!(store.read_leaf(0).unwrap().data(), &[1, 2, 3]);
}

#[test]
fn leaf_names_follow_the_grid() {
    let dir = tempfile::tempdir().unwrap();

    // nifti names come from the track id map
    let mut nifti_roi = roi(&[Coord::new(3, 4, 5)], 100);
    nifti_roi.trackids = vec![42];
    write_compact_u8(&dir.path().join("probtract_42.cmpct"), &[9], false).unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &nifti_roi, false);
    assert_eq!(store.read_leaf(0).unwrap().data(), &[9]);

    // vista names come from the padded coordinate triplet
    let mut vista_roi = roi(&[Coord::new(3, 4, 5)], 100);
    vista_roi.grid = Grid::Vista;
    write_compact_u8(&dir.path().join("connect_003_004_005.cmpct"), &[7], false).unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &vista_roi, false);
    assert_eq!(store.read_leaf(0).unwrap().data(), &[7]);
}

#[test]
fn width_mismatch_is_corrupt() {
    let seeds = [Coord::new(0, 0, 0)];
    let roi = roi(&seeds, 100);
    let dir = tempfile::tempdir().unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &roi, false);

    // a float file where a byte leaf is expected
    store.write_node(0, &Tract::new(vec![1.0])).unwrap();
    std::fs::rename(
        dir.path().join("compact_000000.cmpct"),
        dir.path().join("probtract_0.cmpct"),
    )
    .unwrap();
    assert!(matches!(store.read_leaf(0), Err(Error::CorruptTractFile { .. })));
}

#[test]
fn missing_leaf_is_reported_with_its_path() {
    let seeds = [Coord::new(0, 0, 0)];
    let roi = roi(&seeds, 100);
    let dir = tempfile::tempdir().unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &roi, false);
    match store.read_leaf(0) {
        Err(Error::MissingTractFile(path)) => {
            assert!(path.ends_with("probtract_0.cmpct"));
        }
        other => panic!("expected a missing-file error, got {other:?}"),
    }
}

#[test]
fn flip_x_applies_the_permutation() {
    let seeds = [Coord::new(0, 0, 0)];
    let roi = roi(&seeds, 100);
    let dir = tempfile::tempdir().unwrap();
    let store = CompactStore::new(dir.path(), dir.path(), &roi, false);

    let mut tract = Tract::new(vec![10.0, 20.0, 30.0]);
    store.flip_x(&mut tract, &[2, 1, 0]).unwrap();
    assert_eq!(tract.data(), &[30.0, 20.0, 10.0]);
    assert!(store.flip_x(&mut tract, &[0, 1]).is_err());
}
