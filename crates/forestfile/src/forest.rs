//! The partitioned forest: trees, cells, and partition metadata.
//!
//! The forest here is the serialization core's view of the mesh: the
//! connectivity is opaque, refinement and balance live elsewhere.  What
//! matters is the contiguous range of locally present trees, the cells of
//! each local tree in space-filling-curve order, and the partition vector
//! assigning every rank its contiguous global cell range.

use forestfile_io::Communicator;

use crate::cell::{Cell, GlobalPosition};
use forestfile_format::Dim;

/// Opaque connectivity of the trees.  The serialization core only ever
/// asks how many trees exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connectivity {
    /// Number of trees in the forest.
    pub num_trees: i64,
}

impl Connectivity {
    /// Connectivity over `num_trees` trees.
    pub fn new(num_trees: i64) -> Connectivity {
        assert!(num_trees > 0);
        Connectivity { num_trees }
    }
}

/// One tree of the forest with its local cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    /// Local cells in space-filling-curve order; empty for trees outside
    /// the local range.
    pub cells: Vec<Cell>,
    /// Per-cell user data, `cells.len() * data_size` bytes, concatenated
    /// in cell order.
    pub user_data: Vec<u8>,
    /// Offset of this tree's first cell within the rank-local cell
    /// sequence.
    pub cells_offset: i64,
    /// Histogram of local cells by level, `max_cell_level + 1` entries.
    pub cells_per_level: Vec<i64>,
    /// Deepest level among local cells; zero when empty.
    pub maxlevel: i8,
    /// Deepest first descendant of the first local cell.
    pub first_desc: Option<Cell>,
    /// Deepest last descendant of the last local cell.
    pub last_desc: Option<Cell>,
}

impl Tree {
    /// A tree with no local cells, positioned at `cells_offset`.
    pub fn empty(dim: Dim, cells_offset: i64) -> Tree {
        Tree {
            cells: Vec::new(),
            user_data: Vec::new(),
            cells_offset,
            cells_per_level: vec![0; dim.max_cell_level() as usize + 1],
            maxlevel: 0,
            first_desc: None,
            last_desc: None,
        }
    }
}

/// A forest partitioned across the ranks of a communicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forest {
    /// Spatial dimension.
    pub dim: Dim,
    /// Tree connectivity, opaque to this crate.
    pub connectivity: Connectivity,
    /// Bytes of user data per cell; zero when cells carry none.
    pub data_size: usize,
    /// This process's rank.
    pub rank: usize,
    /// Number of ranks in the job.
    pub size: usize,
    /// Index of the first locally present tree, or `-1` when no cells are
    /// local.
    pub first_local_tree: i64,
    /// Index of the last locally present tree, or `-2` when no cells are
    /// local.
    pub last_local_tree: i64,
    /// Number of cells on this rank.
    pub local_num_cells: i64,
    /// Number of cells across all ranks.
    pub global_num_cells: i64,
    /// Partition vector: `gfq[r]` is the global index of rank `r`'s first
    /// cell, `size + 1` entries, `gfq[size] == global_num_cells`.
    pub gfq: Vec<i64>,
    /// All trees, `connectivity.num_trees` entries; trees outside the
    /// local range are empty.
    pub trees: Vec<Tree>,
    /// First-cell position of every rank plus a closing sentinel,
    /// `size + 1` entries.
    pub global_first_position: Vec<GlobalPosition>,
    /// Bumped by refinement and coarsening elsewhere; reset to zero by
    /// inflate.
    pub revision: u64,
}

impl Forest {
    /// Number of trees in the connectivity.
    pub fn num_trees(&self) -> i64 {
        self.connectivity.num_trees
    }

    /// Cheap structural validation of the partition bookkeeping.
    pub fn is_valid(&self) -> bool {
        if self.gfq.len() != self.size + 1 || self.gfq[0] != 0 {
            return false;
        }
        if self.gfq.windows(2).any(|w| w[0] > w[1]) {
            return false;
        }
        if self.gfq[self.size] != self.global_num_cells {
            return false;
        }
        if self.gfq[self.rank + 1] - self.gfq[self.rank] != self.local_num_cells {
            return false;
        }
        if self.trees.len() as i64 != self.connectivity.num_trees {
            return false;
        }
        let counted: i64 = self.trees.iter().map(|t| t.cells.len() as i64).sum();
        if counted != self.local_num_cells {
            return false;
        }
        if self.local_num_cells == 0 {
            self.first_local_tree == -1 && self.last_local_tree == -2
        } else {
            self.first_local_tree >= 0 && self.first_local_tree <= self.last_local_tree
        }
    }

    /// Reconstruct the cumulative per-tree cell counts, `num_trees + 1`
    /// entries, by combining every rank's local counts.  Collective.
    pub fn count_pertree<C: Communicator>(&self, comm: &C) -> Vec<i64> {
        let num_trees = self.num_trees() as usize;
        let mut local = vec![0i64; num_trees];
        for (jt, tree) in self.trees.iter().enumerate() {
            local[jt] = tree.cells.len() as i64;
        }

        let mut send = Vec::with_capacity(num_trees * 8);
        for count in &local {
            send.extend_from_slice(&count.to_le_bytes());
        }
        let mut recv = vec![0u8; send.len() * comm.size()];
        comm.allgather(&send, &mut recv);

        let mut pertree = vec![0i64; num_trees + 1];
        for rank in 0..comm.size() {
            let base = rank * num_trees * 8;
            for jt in 0..num_trees {
                let mut word = [0u8; 8];
                word.copy_from_slice(&recv[base + jt * 8..base + (jt + 1) * 8]);
                pertree[jt + 1] += i64::from_le_bytes(word);
            }
        }
        for jt in 0..num_trees {
            pertree[jt + 1] += pertree[jt];
        }
        debug_assert_eq!(pertree[num_trees], self.global_num_cells);
        pertree
    }
}

/// The uniform partition of `global_num_cells` cells over `size` ranks:
/// `gfq[r] = floor(global_num_cells * r / size)`.
pub fn uniform_partition(global_num_cells: i64, size: usize) -> Vec<i64> {
    assert!(global_num_cells >= 0);
    (0..=size)
        .map(|r| ((global_num_cells as i128 * r as i128) / size as i128) as i64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_partition_covers_all_cells() {
        for global in [0i64, 1, 5, 6, 7, 100] {
            for size in [1usize, 2, 3, 4, 7] {
                let gfq = uniform_partition(global, size);
                assert_eq!(gfq.len(), size + 1);
                assert_eq!(gfq[0], 0);
                assert_eq!(gfq[size], global);
                assert!(gfq.windows(2).all(|w| w[0] <= w[1]));
                // Ranks differ by at most one cell.
                let counts: Vec<i64> = gfq.windows(2).map(|w| w[1] - w[0]).collect();
                let max = counts.iter().max().unwrap();
                let min = counts.iter().min().unwrap();
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn uniform_partition_matches_convention() {
        // floor(6 * r / 3) for r = 0..=3
        assert_eq!(uniform_partition(6, 3), vec![0, 2, 4, 6]);
        assert_eq!(uniform_partition(7, 2), vec![0, 3, 7]);
    }

    #[test]
    fn empty_tree_has_zeroed_histogram() {
        let t = Tree::empty(Dim::Quad, 4);
        assert_eq!(t.cells_per_level.len(), 30);
        assert!(t.cells_per_level.iter().all(|&c| c == 0));
        assert_eq!(t.cells_offset, 4);
        assert!(t.first_desc.is_none());
    }
}
