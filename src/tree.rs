use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::coord::{Coord, Grid};
use crate::node_id::{NodeId, NodeKind};
use crate::parser::SectionFile;
use crate::{Error, Result};

/// One node of a hierarchical tree.
///
/// `size` counts the leaves under the node, `height` is the dissimilarity at
/// which its children merged, `hlevel` is one more than the deepest child's.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub size: u32,
    pub height: f64,
    pub hlevel: u32,
}

impl TreeNode {
    fn leaf(index: u32) -> TreeNode {
        TreeNode {
            id: NodeId::leaf(index),
            parent: None,
            children: Vec::new(),
            size: 1,
            height: 0.0,
            hlevel: 0,
        }
    }
}

/// A binary hierarchical clustering tree over a roi.
///
/// Leaves follow the roi order (discarded seeds excluded), internal nodes
/// follow merge order. Parent and child links are ids into those two
/// vectors, never owning references.
#[derive(Debug, Clone)]
pub struct Tree {
    pub name: String,
    pub grid: Grid,
    pub dims: Coord,
    pub streamlines: u32,
    leaves: Vec<TreeNode>,
    nodes: Vec<TreeNode>,
    coords: Vec<Coord>,
    trackids: Vec<u32>,
    pub discarded: Vec<Coord>,
}

impl Tree {
    pub fn new(name: impl Into<String>, grid: Grid, dims: Coord, streamlines: u32) -> Tree {
        Tree {
            name: name.into(),
            grid,
            dims,
            streamlines,
            leaves: Vec::new(),
            nodes: Vec::new(),
            coords: Vec::new(),
            trackids: Vec::new(),
            discarded: Vec::new(),
        }
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn trackids(&self) -> &[u32] {
        &self.trackids
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        match id.kind {
            NodeKind::Leaf => &self.leaves[id.index as usize],
            NodeKind::Cluster => &self.nodes[id.index as usize],
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        match id.kind {
            NodeKind::Leaf => &mut self.leaves[id.index as usize],
            NodeKind::Cluster => &mut self.nodes[id.index as usize],
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        let len = match id.kind {
            NodeKind::Leaf => self.leaves.len(),
            NodeKind::Cluster => self.nodes.len(),
        };
        (id.index as usize) < len
    }

    /// Appends a leaf for the next roi seed; returns its id.
    pub fn push_leaf(&mut self, coord: Coord, trackid: u32) -> NodeId {
        let id = NodeId::leaf(self.leaves.len() as u32);
        self.leaves.push(TreeNode::leaf(id.index));
        self.coords.push(coord);
        self.trackids.push(trackid);
        id
    }

    /// Appends the internal node merging `children` at the given height,
    /// parent-linking the children. Size and hlevel are derived.
    pub fn push_node(&mut self, children: Vec<NodeId>, height: f64) -> Result<NodeId> {
        let id = NodeId::cluster(self.nodes.len() as u32);
        let mut size = 0;
        let mut hlevel = 0;
        for &child in &children {
            if !self.contains(child) {
                return Err(Error::InvalidTree(format!("node {id} references unknown child {child}")));
            }
            let child_node = self.node(child);
            size += child_node.size;
            hlevel = hlevel.max(child_node.hlevel + 1);
        }
        for &child in &children {
            let child_node = self.node_mut(child);
            if child_node.parent.is_some() {
                return Err(Error::DuplicateMerge(child));
            }
            child_node.parent = Some(id);
        }
        self.nodes.push(TreeNode { id, parent: None, children, size, height, hlevel });
        Ok(id)
    }

    /// The single parentless cluster node, once building has finished.
    pub fn root(&self) -> Option<NodeId> {
        match self.nodes.iter().rev().find(|n| n.parent.is_none()) {
            Some(node) => Some(node.id),
            None if self.leaves.len() == 1 => Some(NodeId::leaf(0)),
            None => None,
        }
    }

    /// Verifies the structural invariants; the ids in the message name the
    /// first offender found.
    pub fn check(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidTree(msg));
        if self.leaves.is_empty() {
            return fail("tree has no leaves".to_string());
        }
        if self.coords.len() != self.leaves.len() || self.trackids.len() != self.leaves.len() {
            return fail("coordinate or track id list does not match the leaves".to_string());
        }
        if self.nodes.len() + 1 != self.leaves.len() {
            return fail(format!(
                "{} leaves need {} nodes, found {}",
                self.leaves.len(),
                self.leaves.len() - 1,
                self.nodes.len()
            ));
        }

        let mut roots = 0;
        for node in self.leaves.iter().chain(&self.nodes) {
            match node.parent {
                None if node.id.is_cluster() => roots += 1,
                None if self.leaves.len() > 1 => {
                    return fail(format!("leaf {} is not connected", node.id));
                }
                None => roots += 1,
                Some(parent) => {
                    if !self.contains(parent) {
                        return fail(format!("node {} has unknown parent {parent}", node.id));
                    }
                    if !self.node(parent).children.contains(&node.id) {
                        return fail(format!(
                            "node {} is not among the children of its parent {parent}",
                            node.id
                        ));
                    }
                }
            }
        }
        if roots != 1 {
            return fail(format!("expected a single root, found {roots}"));
        }

        let mut reached = 0u32;
        for node in &self.nodes {
            let mut size = 0;
            for &child in &node.children {
                let child_node = self.node(child);
                if child_node.parent != Some(node.id) {
                    return fail(format!("child {child} of {} has a different parent", node.id));
                }
                if child_node.hlevel >= node.hlevel {
                    return fail(format!(
                        "hlevel of {} ({}) does not dominate child {child} ({})",
                        node.id, node.hlevel, child_node.hlevel
                    ));
                }
                size += child_node.size;
                if child.is_leaf() {
                    reached += 1;
                }
            }
            if size != node.size {
                return fail(format!(
                    "size of {} is {} but its children sum to {size}",
                    node.id, node.size
                ));
            }
        }
        // every leaf has a parent and parents agree, so counting the leaf
        // children of all nodes counts each leaf at most once
        if !self.nodes.is_empty() && reached != self.leaves.len() as u32 {
            return fail(format!(
                "{} leaves reachable from the nodes, expected {}",
                reached,
                self.leaves.len()
            ));
        }
        let root_size = self.root().map(|id| self.node(id).size);
        if root_size != Some(self.leaves.len() as u32) {
            return fail(format!(
                "root covers {root_size:?} leaves, expected {}",
                self.leaves.len()
            ));
        }
        Ok(())
    }

    /// One-paragraph summary for logs.
    pub fn report(&self) -> String {
        let max_hlevel = self.nodes.iter().map(|n| n.hlevel).max().unwrap_or(0);
        let top_height = self.nodes.last().map(|n| n.height).unwrap_or(0.0);
        format!(
            "tree {:?}: {} leaves, {} nodes, {} discarded seeds, max hlevel {}, top height {:.6}",
            self.name,
            self.leaves.len(),
            self.nodes.len(),
            self.discarded.len(),
            max_hlevel,
            top_height,
        )
    }

    fn render(&self, debug: bool) -> String {
        let mut out = String::new();
        writeln!(out, "#name\n{}\n#endname\n", self.name).unwrap();
        writeln!(
            out,
            "#imagesize\n{} {} {} {}\n#endimagesize\n",
            self.dims.x, self.dims.y, self.dims.z, self.grid
        )
        .unwrap();
        writeln!(out, "#streams\n{}\n#endstreams\n", self.streamlines).unwrap();

        out.push_str("#coordinates\n");
        for coord in &self.coords {
            writeln!(out, "{coord}").unwrap();
        }
        out.push_str("#endcoordinates\n\n#trackindex\n");
        for id in &self.trackids {
            writeln!(out, "{id}").unwrap();
        }
        out.push_str("#endtrackindex\n\n#clusters\n");
        for node in &self.nodes {
            write!(out, "{} {:.6} {} {}", node.id, node.height, node.size, node.hlevel).unwrap();
            if debug {
                match node.parent {
                    Some(parent) => write!(out, " p {parent}").unwrap(),
                    None => out.push_str(" p root"),
                }
            }
            for child in &node.children {
                write!(out, " {child}").unwrap();
            }
            out.push('\n');
        }
        out.push_str("#endclusters\n");

        if debug {
            out.push_str("\n#leafparents\n");
            for leaf in &self.leaves {
                match leaf.parent {
                    Some(parent) => writeln!(out, "{parent}").unwrap(),
                    None => out.push_str("root\n"),
                }
            }
            out.push_str("#endleafparents\n");
        }
        if !self.discarded.is_empty() {
            out.push_str("\n#discarded\n");
            for coord in &self.discarded {
                writeln!(out, "{coord}").unwrap();
            }
            out.push_str("#enddiscarded\n");
        }
        out
    }

    /// Writes the standard tree file.
    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render(false))?;
        Ok(())
    }

    /// Writes the debug variant, with the redundant parent columns.
    pub fn write_debug(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render(true))?;
        Ok(())
    }

    /// Parses a tree file written by [`Tree::write`].
    pub fn read(path: &Path) -> Result<Tree> {
        let file = SectionFile::read(path)?;

        let name = file
            .lines_for_tag("name")
            .first()
            .map(|l| l.trim().to_string())
            .unwrap_or_default();
        let size_line = file.single_line_for_tag("imagesize")?;
        if size_line.len() != 4 {
            return Err(file.parse_error("#imagesize expects `sx sy sz grid`"));
        }
        let parse_i32 = |token: &str| {
            token
                .parse::<i32>()
                .map_err(|e| file.parse_error(format!("bad integer {token:?}: {e}")))
        };
        let dims = Coord::new(parse_i32(size_line[0])?, parse_i32(size_line[1])?, parse_i32(size_line[2])?);
        let grid: Grid = size_line[3].parse()?;
        let streams_line = file.single_line_for_tag("streams")?;
        let streamlines = streams_line
            .first()
            .ok_or_else(|| file.parse_error("#streams expects a single integer"))?
            .parse::<u32>()
            .map_err(|e| file.parse_error(format!("bad streamline count: {e}")))?;

        let mut tree = Tree::new(name, grid, dims, streamlines);
        let coord_lines = file.split_lines_for_tag("coordinates");
        if coord_lines.is_empty() {
            return Err(Error::MissingSection { path: path.to_path_buf(), tag: "coordinates" });
        }
        let id_lines = file.split_lines_for_tag("trackindex");
        for (i, line) in coord_lines.iter().enumerate() {
            if line.len() != 3 {
                return Err(file.parse_error(format!("bad coordinate line {line:?}")));
            }
            let coord = Coord::new(parse_i32(line[0])?, parse_i32(line[1])?, parse_i32(line[2])?);
            let trackid = match id_lines.get(i).and_then(|line| line.first()) {
                Some(token) => token
                    .parse::<u32>()
                    .map_err(|e| file.parse_error(format!("bad track id: {e}")))?,
                None => i as u32,
            };
            tree.push_leaf(coord, trackid);
        }

        for line in file.split_lines_for_tag("clusters") {
            if line.len() < 5 {
                return Err(file.parse_error(format!("bad cluster line {line:?}")));
            }
            let id: NodeId = line[0].parse()?;
            if id != NodeId::cluster(tree.nodes.len() as u32) {
                return Err(Error::InvalidTree(format!(
                    "cluster lines out of order, expected c{}, found {id}",
                    tree.nodes.len()
                )));
            }
            let height = line[1]
                .parse::<f64>()
                .map_err(|e| file.parse_error(format!("bad height: {e}")))?;
            let size = line[2]
                .parse::<u32>()
                .map_err(|e| file.parse_error(format!("bad size: {e}")))?;
            // hlevel (line[3]) is redundant, recomputed by push_node
            let children = line[4..]
                .iter()
                .map(|token| token.parse())
                .collect::<Result<Vec<NodeId>>>()?;
            let id = tree.push_node(children, height)?;
            let node = tree.node(id);
            if node.size != size {
                return Err(Error::InvalidTree(format!(
                    "declared size {size} of {id} does not match its children ({})",
                    node.size
                )));
            }
        }

        for line in file.split_lines_for_tag("discarded") {
            if line.len() != 3 {
                return Err(file.parse_error(format!("bad discarded line {line:?}")));
            }
            tree.discarded.push(Coord::new(
                parse_i32(line[0])?,
                parse_i32(line[1])?,
                parse_i32(line[2])?,
            ));
        }

        Ok(tree)
    }
}
