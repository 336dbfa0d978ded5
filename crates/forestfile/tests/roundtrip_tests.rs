//! Deflate/inflate round trips, including repartitioning across rank
//! counts and the file-based path.

mod common;

use forestfile::{deflate, inflate, Connectivity, Dim, FileContext, Forest};
use forestfile_io::{spmd, Communicator, SelfComm};

use common::{line_forest, line_records, local_slice, temp_path};

/// Records of a forest with three trees holding 1, 4, and 2 cells.
fn three_tree_records(dim: Dim) -> (Vec<i32>, Vec<i64>) {
    let h = dim.cell_len(1);
    let mut records = Vec::new();
    let mut push = |x: i32, y: i32, level: i32| {
        records.push(x);
        records.push(y);
        if dim == Dim::Oct {
            records.push(0);
        }
        records.push(level);
    };
    push(0, 0, 0);
    push(0, 0, 1);
    push(h, 0, 1);
    push(0, h, 1);
    push(h, h, 1);
    push(0, 0, 1);
    push(h, h, 1);
    (records, vec![0, 1, 5, 7])
}

fn inflate_local<C: Communicator>(
    comm: &C,
    dim: Dim,
    records: &[i32],
    gfq: &[i64],
    pertree: &[i64],
) -> Forest {
    let num_trees = pertree.len() as i64 - 1;
    let local = local_slice(records, dim, gfq, comm.rank());
    inflate(
        comm,
        dim,
        Connectivity::new(num_trees),
        gfq,
        pertree,
        local,
        None,
    )
}

// ---------------------------------------------------------------------------
// Same-partition round trips
// ---------------------------------------------------------------------------

#[test]
fn single_rank_roundtrip_is_identity() {
    let comm = SelfComm;
    for dim in [Dim::Quad, Dim::Oct] {
        let (records, pertree) = three_tree_records(dim);
        let gfq = [0i64, 7];
        let forest = inflate_local(&comm, dim, &records, &gfq, &pertree);

        let (out, _) = deflate(&forest, false);
        let rebuilt = inflate(
            &comm,
            dim,
            forest.connectivity.clone(),
            &forest.gfq,
            &pertree,
            &out,
            None,
        );
        assert_eq!(rebuilt, forest);
        assert_eq!(rebuilt.revision, 0);
    }
}

#[test]
fn multi_rank_roundtrip_is_identity() {
    for gfq in [vec![0i64, 3, 7], vec![0, 1, 5, 7], vec![0, 0, 7, 7]] {
        let size = gfq.len() - 1;
        let gfq_ref = &gfq;
        spmd(size, move |comm| {
            let (records, pertree) = three_tree_records(Dim::Quad);
            let forest = inflate_local(&comm, Dim::Quad, &records, gfq_ref, &pertree);
            assert!(forest.is_valid());

            let (out, _) = deflate(&forest, false);
            let rebuilt = inflate(
                &comm,
                Dim::Quad,
                forest.connectivity.clone(),
                gfq_ref,
                &pertree,
                &out,
                None,
            );
            assert_eq!(rebuilt, forest);
        });
    }
}

#[test]
fn empty_rank_gets_the_empty_local_convention() {
    let gfq = vec![0i64, 0, 7, 7];
    spmd(3, |comm| {
        let (records, pertree) = three_tree_records(Dim::Quad);
        let forest = inflate_local(&comm, Dim::Quad, &records, &gfq, &pertree);

        if comm.rank() == 1 {
            assert_eq!(forest.first_local_tree, 0);
            assert_eq!(forest.last_local_tree, 2);
            assert_eq!(forest.local_num_cells, 7);
        } else {
            assert_eq!(forest.first_local_tree, -1);
            assert_eq!(forest.last_local_tree, -2);
            assert_eq!(forest.local_num_cells, 0);
            // All trees are still allocated, just empty.
            assert_eq!(forest.trees.len(), 3);
            assert!(forest.trees.iter().all(|t| t.cells.is_empty()));
        }

        let (out, _) = deflate(&forest, false);
        assert_eq!(
            out.len(),
            Dim::Quad.words_per_cell() * forest.local_num_cells as usize
        );

        // Every rank agrees on the first-cell positions: the empty ranks
        // inherit their successor's entry.
        assert_eq!(forest.global_first_position.len(), 4);
        assert_eq!(forest.global_first_position[0].tree, 0);
        assert_eq!(forest.global_first_position[1].tree, 0);
        assert_eq!(forest.global_first_position[2].tree, 3);
        assert_eq!(forest.global_first_position[3].tree, 3);
    });
}

// ---------------------------------------------------------------------------
// Repartitioning
// ---------------------------------------------------------------------------

#[test]
fn repartition_preserves_the_global_sequence() {
    let (records, pertree) = three_tree_records(Dim::Quad);
    let words = Dim::Quad.words_per_cell();

    // Deflate under one partition on two ranks.
    let gfq_a = vec![0i64, 4, 7];
    let parts = spmd(2, |comm| {
        let forest = inflate_local(&comm, Dim::Quad, &records, &gfq_a, &pertree);
        deflate(&forest, false).0
    });
    let global: Vec<i32> = parts.concat();
    assert_eq!(global, records);

    // Inflate under a different partition on three ranks and deflate
    // again: the global sequence is unchanged.
    let gfq_b = vec![0i64, 2, 5, 7];
    let parts = spmd(3, |comm| {
        let forest = inflate_local(&comm, Dim::Quad, &records, &gfq_b, &pertree);
        assert_eq!(forest.local_num_cells, gfq_b[comm.rank() + 1] - gfq_b[comm.rank()]);
        deflate(&forest, false).0
    });
    let reglobal: Vec<i32> = parts.concat();
    assert_eq!(reglobal, records);
    assert_eq!(reglobal.len(), words * 7);
}

#[test]
fn file_carries_records_across_rank_counts() {
    let path = temp_path("across_ranks");
    let (records, pertree) = three_tree_records(Dim::Quad);

    // Two writer ranks.
    let gfq_a = vec![0i64, 4, 7];
    spmd(2, |comm| {
        let forest = inflate_local(&comm, Dim::Quad, &records, &gfq_a, &pertree);
        let (out, _) = deflate(&forest, false);
        let ctx = FileContext::create(&comm, &forest, &path, "mesh").unwrap();
        let ctx = ctx.write_cell_records(&out, "cells").unwrap();
        ctx.close().unwrap();
    });

    // Three reader ranks, uniform partition, full reconstruction.
    let parts = spmd(3, |comm| {
        let (ctx, user, global) =
            FileContext::open_read_ext(&comm, Dim::Quad, &path).unwrap();
        assert_eq!(user, "mesh");
        assert_eq!(global, 7);
        let (ctx, local_records, block_user) = ctx.read_cell_records().unwrap();
        assert_eq!(block_user, "cells");
        ctx.close().unwrap();

        let gfq = forestfile::uniform_partition(global, comm.size());
        let forest = inflate(
            &comm,
            Dim::Quad,
            Connectivity::new(3),
            &gfq,
            &pertree,
            &local_records,
            None,
        );
        deflate(&forest, false).0
    });
    assert_eq!(parts.concat(), records);

    std::fs::remove_file(&path).unwrap();
}

// ---------------------------------------------------------------------------
// User data
// ---------------------------------------------------------------------------

#[test]
fn user_data_roundtrips_through_deflate() {
    let comm = SelfComm;
    let (records, pertree) = three_tree_records(Dim::Quad);
    let data_size = 3usize;
    let payload: Vec<u8> = (0..(7 * data_size) as u8).collect();

    let forest = inflate(
        &comm,
        Dim::Quad,
        Connectivity::new(3),
        &[0, 7],
        &pertree,
        &records,
        Some((data_size, &payload)),
    );
    assert_eq!(forest.data_size, data_size);

    let (out, out_data) = deflate(&forest, true);
    assert_eq!(out, records);
    assert_eq!(out_data.unwrap(), payload);
}

#[test]
fn user_data_travels_the_file_with_the_records() {
    let path = temp_path("user_data");
    let gfq = [0i64, 3, 6];
    let data_size = 2usize;

    spmd(2, |comm| {
        let forest = line_forest(&comm, Dim::Quad, 6, &gfq);
        let base = (gfq[comm.rank()] * data_size as i64) as u8;
        let local_data: Vec<u8> = (0..forest.local_num_cells as usize * data_size)
            .map(|i| base + i as u8)
            .collect();

        let (records, _) = deflate(&forest, false);
        let ctx = FileContext::create(&comm, &forest, &path, "").unwrap();
        let ctx = ctx.write_cell_records(&records, "cells").unwrap();
        let ctx = ctx.write_field(data_size, &local_data, "payload").unwrap();
        ctx.close().unwrap();
    });

    // One reader rank rebuilds the whole forest with its data.
    let comm = SelfComm;
    let (ctx, _, global) = FileContext::open_read_ext(&comm, Dim::Quad, &path).unwrap();
    let (ctx, records, _) = ctx.read_cell_records().unwrap();
    let (ctx, data, user) = ctx.read_field(data_size).unwrap();
    assert_eq!(user, "payload");
    ctx.close().unwrap();

    let expected_data: Vec<u8> = (0..(global * data_size as i64) as u8).collect();
    assert_eq!(data, expected_data);

    let forest = inflate(
        &comm,
        Dim::Quad,
        Connectivity::new(1),
        &[0, global],
        &[0, global],
        &records,
        Some((data_size, &data)),
    );
    assert_eq!(forest.global_num_cells, 6);
    assert_eq!(forest.trees[0].user_data, expected_data);
    assert_eq!(deflate(&forest, false).0, line_records(Dim::Quad, 6));

    std::fs::remove_file(&path).unwrap();
}

// ---------------------------------------------------------------------------
// Per-tree counts
// ---------------------------------------------------------------------------

#[test]
fn count_pertree_recovers_the_cumulative_counts() {
    let (records, pertree) = three_tree_records(Dim::Quad);
    for gfq in [vec![0i64, 7], vec![0, 4, 7], vec![0, 2, 5, 7]] {
        let size = gfq.len() - 1;
        let gfq_ref = &gfq;
        let pertree_ref = &pertree;
        let records_ref = &records;
        let counted = spmd(size, move |comm| {
            let forest = inflate_local(&comm, Dim::Quad, records_ref, gfq_ref, pertree_ref);
            forest.count_pertree(&comm)
        });
        for c in counted {
            assert_eq!(c, pertree);
        }
    }
}
