//! Deflating a forest to flat records and inflating it back.
//!
//! A deflated forest is a partition-independent sequence of per-cell
//! records, `dim + 1` integers each: the coordinates followed by the
//! level.  Tree boundaries are not part of the records; they travel
//! separately as the cumulative per-tree counts (`pertree`), and the
//! partition travels as the partition vector (`gfq`).  Inflate rebuilds an
//! equivalent forest on any rank count whose partition vector sums to the
//! same global cell count.

use forestfile_format::Dim;
use forestfile_io::Communicator;

use crate::cell::{Cell, GlobalPosition};
use crate::forest::{Connectivity, Forest, Tree};

/// Flatten the local cells of `forest` into records, tree by tree in
/// space-filling-curve order.
///
/// Returns the record array of `(dim + 1) * local_num_cells` integers and,
/// if `with_data` is set, the concatenated per-cell user data.
///
/// # Panics
///
/// If `with_data` is set on a forest whose `data_size` is zero.
pub fn deflate(forest: &Forest, with_data: bool) -> (Vec<i32>, Option<Vec<u8>>) {
    let words = forest.dim.words_per_cell();
    let mut records = Vec::with_capacity(words * forest.local_num_cells as usize);
    let mut data = if with_data {
        assert!(forest.data_size > 0);
        Some(Vec::with_capacity(
            forest.data_size * forest.local_num_cells as usize,
        ))
    } else {
        None
    };

    if forest.first_local_tree >= 0 {
        for jt in forest.first_local_tree..=forest.last_local_tree {
            let tree = &forest.trees[jt as usize];
            for cell in &tree.cells {
                records.push(cell.x);
                records.push(cell.y);
                if forest.dim == Dim::Oct {
                    records.push(cell.z);
                }
                records.push(cell.level as i32);
            }
            if let Some(ref mut bytes) = data {
                bytes.extend_from_slice(&tree.user_data);
            }
        }
    }

    debug_assert_eq!(records.len(), words * forest.local_num_cells as usize);
    if let Some(ref bytes) = data {
        debug_assert_eq!(bytes.len(), forest.data_size * forest.local_num_cells as usize);
    }
    (records, data)
}

/// Largest tree index `t` with `pertree[t] <= key`; a tree whose lower
/// boundary equals `key` owns it.
fn locate_tree(pertree: &[i64], key: i64) -> usize {
    debug_assert!(key >= 0 && key < pertree[pertree.len() - 1]);
    pertree.partition_point(|&v| v <= key) - 1
}

/// Rebuild a forest from deflated records and global partition metadata.
///
/// `gfq` has one entry per rank plus one; `pertree` one entry per tree
/// plus one; `records` holds this rank's `(dim + 1) * local_num_cells`
/// integers; `user_data`, when present, is `(data_size, bytes)` with one
/// `data_size`-byte region per local cell.  Collective.
///
/// # Panics
///
/// On any violated precondition: non-monotonic or misanchored `gfq` or
/// `pertree`, mismatched array lengths, or a record level outside
/// `[0, max_cell_level]`.  These are caller errors, not file errors.
pub fn inflate<C: Communicator>(
    comm: &C,
    dim: Dim,
    connectivity: Connectivity,
    gfq: &[i64],
    pertree: &[i64],
    records: &[i32],
    user_data: Option<(usize, &[u8])>,
) -> Forest {
    let rank = comm.rank();
    let size = comm.size();
    let num_trees = connectivity.num_trees;

    assert_eq!(gfq.len(), size + 1);
    assert_eq!(pertree.len(), num_trees as usize + 1);
    assert_eq!(gfq[0], 0);
    assert!(gfq.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(pertree[0], 0);
    assert!(pertree.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(gfq[size], pertree[num_trees as usize]);

    let local_num_cells = gfq[rank + 1] - gfq[rank];
    let words = dim.words_per_cell();
    assert_eq!(records.len(), words * local_num_cells as usize);

    let data_size = user_data.map_or(0, |(elem, _)| elem);
    if let Some((elem, bytes)) = user_data {
        assert!(elem > 0);
        assert_eq!(bytes.len(), elem * local_num_cells as usize);
    }

    log::debug!("inflate: {local_num_cells} local cells on rank {rank}");

    // Locate the local tree range by bisection on the cumulative counts.
    let (first_local_tree, last_local_tree, mut gtreeskip) = if local_num_cells > 0 {
        let t1 = locate_tree(pertree, gfq[rank]);
        let t2 = locate_tree(pertree, gfq[rank + 1] - 1);
        debug_assert!(t1 <= t2 && t2 < num_trees as usize);
        (t1 as i64, t2 as i64, gfq[rank] - pertree[t1])
    } else {
        (-1, -2, 0)
    };

    // Populate the trees.
    let mut trees = Vec::with_capacity(num_trees as usize);
    let mut offset = 0i64;
    let mut remaining = local_num_cells;
    let mut word_iter = records.iter().copied();
    let mut data_pos = 0usize;

    for jt in 0..num_trees {
        let mut tree = Tree::empty(dim, offset);
        if jt >= first_local_tree && jt <= last_local_tree {
            let tree_remain = pertree[jt as usize + 1] - pertree[jt as usize] - gtreeskip;
            debug_assert!(tree_remain > 0 && remaining > 0);
            let take = tree_remain.min(remaining);

            tree.cells.reserve(take as usize);
            let mut maxlevel = 0i8;
            for _ in 0..take {
                let x = word_iter.next().expect("record array exhausted");
                let y = word_iter.next().expect("record array exhausted");
                let z = if dim == Dim::Oct {
                    word_iter.next().expect("record array exhausted")
                } else {
                    0
                };
                let level = word_iter.next().expect("record array exhausted") as i8;
                assert!(
                    level >= 0 && level <= dim.max_cell_level(),
                    "record level {level} out of range"
                );
                tree.cells_per_level[level as usize] += 1;
                maxlevel = maxlevel.max(level);
                tree.cells.push(Cell { x, y, z, level });
            }
            if data_size > 0 {
                let (_, bytes) = user_data.expect("data_size implies user data");
                let len = take as usize * data_size;
                tree.user_data
                    .extend_from_slice(&bytes[data_pos..data_pos + len]);
                data_pos += len;
            }

            let deepest = dim.max_cell_level();
            tree.first_desc = Some(tree.cells[0].first_descendant(dim, deepest));
            tree.last_desc = Some(tree.cells[take as usize - 1].last_descendant(dim, deepest));
            tree.maxlevel = maxlevel;

            offset += take;
            remaining -= take;
            gtreeskip = 0;
        }
        trees.push(tree);
    }
    assert_eq!(offset, local_num_cells);
    assert_eq!(remaining, 0);
    debug_assert!(word_iter.next().is_none());

    let mut forest = Forest {
        dim,
        connectivity,
        data_size,
        rank,
        size,
        first_local_tree,
        last_local_tree,
        local_num_cells,
        global_num_cells: gfq[size],
        gfq: gfq.to_vec(),
        trees,
        global_first_position: Vec::new(),
        revision: 0,
    };
    forest.global_first_position = publish_global_first_positions(comm, &forest);

    debug_assert!(forest.is_valid());
    log::debug!("inflate: done on rank {rank}");
    forest
}

/// Replicate every rank's first-cell position: `size + 1` entries, where
/// empty ranks inherit the following rank's entry and the last entry is a
/// sentinel one past the final tree.  Collective.
pub fn publish_global_first_positions<C: Communicator>(
    comm: &C,
    forest: &Forest,
) -> Vec<GlobalPosition> {
    let dim = forest.dim;

    // 20-byte wire entry: tree index, then x, y, z.  Tree -1 marks an
    // empty rank to be backfilled.
    let mine = if forest.local_num_cells > 0 {
        let tree = &forest.trees[forest.first_local_tree as usize];
        let first = tree.cells[0].first_descendant(dim, dim.max_cell_level());
        GlobalPosition {
            tree: forest.first_local_tree,
            x: first.x,
            y: first.y,
            z: first.z,
        }
    } else {
        GlobalPosition {
            tree: -1,
            x: 0,
            y: 0,
            z: 0,
        }
    };

    let mut send = Vec::with_capacity(20);
    send.extend_from_slice(&mine.tree.to_le_bytes());
    send.extend_from_slice(&mine.x.to_le_bytes());
    send.extend_from_slice(&mine.y.to_le_bytes());
    send.extend_from_slice(&mine.z.to_le_bytes());
    let mut recv = vec![0u8; 20 * comm.size()];
    comm.allgather(&send, &mut recv);

    let mut positions: Vec<GlobalPosition> = (0..comm.size())
        .map(|r| {
            let e = &recv[r * 20..(r + 1) * 20];
            GlobalPosition {
                tree: i64::from_le_bytes(e[0..8].try_into().expect("wire entry")),
                x: i32::from_le_bytes(e[8..12].try_into().expect("wire entry")),
                y: i32::from_le_bytes(e[12..16].try_into().expect("wire entry")),
                z: i32::from_le_bytes(e[16..20].try_into().expect("wire entry")),
            }
        })
        .collect();
    positions.push(GlobalPosition {
        tree: forest.num_trees(),
        x: 0,
        y: 0,
        z: 0,
    });

    // Empty ranks start where the next non-empty rank starts.
    for r in (0..comm.size()).rev() {
        if positions[r].tree < 0 {
            positions[r] = positions[r + 1];
        }
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;
    use forestfile_io::SelfComm;

    /// Records of a two-tree 2D forest: tree 0 holds one root cell, tree 1
    /// holds its four level-1 children in curve order.
    fn two_tree_records(dim: Dim) -> (Vec<i32>, Vec<i64>) {
        let h = dim.cell_len(1);
        let mut records = vec![0, 0, 0];
        if dim == Dim::Oct {
            records.insert(2, 0);
        }
        let corners2 = [(0, 0), (h, 0), (0, h), (h, h)];
        for (x, y) in corners2 {
            records.push(x);
            records.push(y);
            if dim == Dim::Oct {
                records.push(0);
            }
            records.push(1);
        }
        let pertree = vec![0, 1, 5];
        (records, pertree)
    }

    #[test]
    fn inflate_single_rank() {
        let comm = SelfComm;
        let (records, pertree) = two_tree_records(Dim::Quad);
        let forest = inflate(
            &comm,
            Dim::Quad,
            Connectivity::new(2),
            &[0, 5],
            &pertree,
            &records,
            None,
        );

        assert!(forest.is_valid());
        assert_eq!(forest.local_num_cells, 5);
        assert_eq!(forest.global_num_cells, 5);
        assert_eq!(forest.first_local_tree, 0);
        assert_eq!(forest.last_local_tree, 1);
        assert_eq!(forest.trees[0].cells.len(), 1);
        assert_eq!(forest.trees[1].cells.len(), 4);
        assert_eq!(forest.trees[0].maxlevel, 0);
        assert_eq!(forest.trees[1].maxlevel, 1);
        assert_eq!(forest.trees[1].cells_offset, 1);
        assert_eq!(forest.trees[1].cells_per_level[1], 4);
        assert_eq!(forest.revision, 0);

        let first = forest.trees[0].first_desc.unwrap();
        assert_eq!((first.x, first.y, first.level), (0, 0, 29));
        let last = forest.trees[1].last_desc.unwrap();
        let h = Dim::Quad.cell_len(1);
        let far = h + h - Dim::Quad.cell_len(29);
        assert_eq!((last.x, last.y), (far, far));
        assert_eq!(last.level, 29);

        assert_eq!(forest.global_first_position.len(), 2);
        assert_eq!(forest.global_first_position[0].tree, 0);
        assert_eq!(forest.global_first_position[1].tree, 2);
    }

    #[test]
    fn deflate_inverts_inflate() {
        let comm = SelfComm;
        let (records, pertree) = two_tree_records(Dim::Quad);
        let forest = inflate(
            &comm,
            Dim::Quad,
            Connectivity::new(2),
            &[0, 5],
            &pertree,
            &records,
            None,
        );
        let (out, data) = deflate(&forest, false);
        assert_eq!(out, records);
        assert!(data.is_none());
    }

    #[test]
    fn user_data_rides_along() {
        let comm = SelfComm;
        let (records, pertree) = two_tree_records(Dim::Quad);
        let payload: Vec<u8> = (0..10).collect();
        let forest = inflate(
            &comm,
            Dim::Quad,
            Connectivity::new(2),
            &[0, 5],
            &pertree,
            &records,
            Some((2, &payload)),
        );

        assert_eq!(forest.data_size, 2);
        assert_eq!(forest.trees[0].user_data, &[0, 1]);
        assert_eq!(forest.trees[1].user_data, &[2, 3, 4, 5, 6, 7, 8, 9]);

        let (out, data) = deflate(&forest, true);
        assert_eq!(out, records);
        assert_eq!(data.unwrap(), payload);
    }

    #[test]
    fn oct_records_carry_z() {
        let comm = SelfComm;
        let (records, pertree) = two_tree_records(Dim::Oct);
        let forest = inflate(
            &comm,
            Dim::Oct,
            Connectivity::new(2),
            &[0, 5],
            &pertree,
            &records,
            None,
        );
        assert_eq!(forest.trees[1].cells[1].x, Dim::Oct.cell_len(1));
        assert_eq!(forest.trees[1].cells[1].z, 0);
        let (out, _) = deflate(&forest, false);
        assert_eq!(out, records);
    }

    #[test]
    fn locate_tree_boundaries() {
        let pertree = [0i64, 4, 4, 10];
        assert_eq!(locate_tree(&pertree, 0), 0);
        assert_eq!(locate_tree(&pertree, 3), 0);
        // Tree 1 is empty: cell 4 starts tree 2.
        assert_eq!(locate_tree(&pertree, 4), 2);
        assert_eq!(locate_tree(&pertree, 9), 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn inflate_rejects_bad_level() {
        let comm = SelfComm;
        let records = vec![0, 0, 99];
        inflate(
            &comm,
            Dim::Quad,
            Connectivity::new(1),
            &[0, 1],
            &[0, 1],
            &records,
            None,
        );
    }
}
