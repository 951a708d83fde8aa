use crate::coord::{Coord, Grid};
use crate::node_id::NodeId;
use crate::tree::Tree;
use crate::Error;

/// Four leaves merged pairwise, then at the root.
fn sample_tree() -> Tree {
    let mut tree = Tree::new("single", Grid::Nifti, Coord::new(3, 3, 3), 100);
    for i in 0..4 {
        tree.push_leaf(Coord::new(i, 0, 0), i as u32);
    }
    tree.push_node(vec![NodeId::leaf(0), NodeId::leaf(1)], 0.125).unwrap();
    tree.push_node(vec![NodeId::leaf(2), NodeId::leaf(3)], 0.25).unwrap();
    tree.push_node(vec![NodeId::cluster(0), NodeId::cluster(1)], 0.5).unwrap();
    tree
}

#[test]
fn derived_fields_and_check() {
    let tree = sample_tree();
    tree.check().unwrap();

    let root = tree.root().unwrap();
    assert_eq!(root, NodeId::cluster(2));
    assert_eq!(tree.node(root).size, 4);
    assert_eq!(tree.node(root).hlevel, 2);
    assert_eq!(tree.node(NodeId::cluster(0)).hlevel, 1);
    assert_eq!(tree.node(NodeId::leaf(3)).parent, Some(NodeId::cluster(1)));
}

#[test]
fn a_leaf_cannot_be_merged_twice() {
    let mut tree = Tree::new("x", Grid::Nifti, Coord::new(3, 3, 3), 100);
    for i in 0..3 {
        tree.push_leaf(Coord::new(i, 0, 0), i as u32);
    }
    tree.push_node(vec![NodeId::leaf(0), NodeId::leaf(1)], 0.1).unwrap();
    assert!(matches!(
        tree.push_node(vec![NodeId::leaf(1), NodeId::leaf(2)], 0.2),
        Err(Error::DuplicateMerge(id)) if id == NodeId::leaf(1)
    ));
}

#[test]
fn check_rejects_an_unfinished_tree() {
    let mut tree = Tree::new("x", Grid::Nifti, Coord::new(3, 3, 3), 100);
    for i in 0..4 {
        tree.push_leaf(Coord::new(i, 0, 0), i as u32);
    }
    tree.push_node(vec![NodeId::leaf(0), NodeId::leaf(1)], 0.1).unwrap();
    let err = tree.check().unwrap_err();
    assert!(err.to_string().contains("4 leaves need 3 nodes"));
}

#[test]
fn serialised_form() {
    let mut tree = sample_tree();
    tree.discarded.push(Coord::new(9, 9, 9));
    insta::assert_snapshot!(tree_text(&tree), @r###"
    #name
    single
    #endname

    #imagesize
    3 3 3 nifti
    #endimagesize

    #streams
    100
    #endstreams

    #coordinates
    0 0 0
    1 0 0
    2 0 0
    3 0 0
    #endcoordinates

    #trackindex
    0
    1
    2
    3
    #endtrackindex

    #clusters
    c0 0.125000 2 1 l0 l1
    c1 0.250000 2 1 l2 l3
    c2 0.500000 4 2 c0 c1
    #endclusters

    #discarded
    9 9 9
    #enddiscarded
    "###);
}

fn tree_text(tree: &Tree) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.txt");
    tree.write(&path).unwrap();
    std::fs::read_to_string(path).unwrap()
}

#[test]
fn write_read_round_trip() {
    let mut tree = sample_tree();
    tree.discarded.push(Coord::new(9, 9, 9));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.txt");
    tree.write(&path).unwrap();

    let reread = Tree::read(&path).unwrap();
    reread.check().unwrap();
    assert_eq!(reread.name, tree.name);
    assert_eq!(reread.grid, tree.grid);
    assert_eq!(reread.streamlines, tree.streamlines);
    assert_eq!(reread.coords(), tree.coords());
    assert_eq!(reread.trackids(), tree.trackids());
    assert_eq!(reread.discarded, tree.discarded);
    assert_eq!(reread.num_nodes(), tree.num_nodes());
    for i in 0..tree.num_nodes() as u32 {
        let id = NodeId::cluster(i);
        let (a, b) = (tree.node(id), reread.node(id));
        assert_eq!(a.children, b.children);
        assert_eq!(a.size, b.size);
        assert_eq!(a.hlevel, b.hlevel);
        assert!((a.height - b.height).abs() < 1e-6);
    }

    // writing the parsed tree again reproduces the file byte for byte
    let path2 = dir.path().join("tree2.txt");
    reread.write(&path2).unwrap();
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        std::fs::read_to_string(&path2).unwrap()
    );
}

#[test]
fn debug_form_repeats_the_parents() {
    let tree = sample_tree();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree_debug.txt");
    tree.write_debug(&path).unwrap();
    let text = std::fs::read_to_string(path).unwrap();
    assert!(text.contains("c0 0.125000 2 1 p c2 l0 l1"));
    assert!(text.contains("c2 0.500000 4 2 p root c0 c1"));
    assert!(text.contains("#leafparents"));
}

#[test]
fn read_rejects_inconsistent_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tree.txt");
    std::fs::write(
        &path,
        "#imagesize\n3 3 3 nifti\n#endimagesize\n#streams\n10\n#endstreams\n\
         #coordinates\n0 0 0\n1 0 0\n#endcoordinates\n\
         #clusters\nc0 0.100000 3 1 l0 l1\n#endclusters\n",
    )
    .unwrap();
    assert!(matches!(Tree::read(&path), Err(Error::InvalidTree(_))));
}
