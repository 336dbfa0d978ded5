//! Shared builders for the integration suites.
#![allow(dead_code)]

use std::path::PathBuf;

use forestfile::{inflate, Connectivity, Dim, Forest};
use forestfile_io::Communicator;

/// Unique temp path per test; tests run in parallel in one process.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("forestfile_test_{}_{name}", std::process::id()))
}

/// Global records of a single-tree forest with `global` cells, every cell
/// at level 2 walking along the x axis.  The geometry is synthetic; the
/// serialization core never interprets coordinates.
pub fn line_records(dim: Dim, global: i64) -> Vec<i32> {
    let h = dim.cell_len(2);
    let mut records = Vec::new();
    for i in 0..global {
        records.push((i as i32) * h);
        records.push(0);
        if dim == Dim::Oct {
            records.push(0);
        }
        records.push(2);
    }
    records
}

/// This rank's slice of a global record array under `gfq`.
pub fn local_slice<'r>(records: &'r [i32], dim: Dim, gfq: &[i64], rank: usize) -> &'r [i32] {
    let words = dim.words_per_cell();
    &records[gfq[rank] as usize * words..gfq[rank + 1] as usize * words]
}

/// Build the rank-local forest of a single-tree line of `global` cells
/// partitioned by `gfq`.
pub fn line_forest<C: Communicator>(comm: &C, dim: Dim, global: i64, gfq: &[i64]) -> Forest {
    let records = line_records(dim, global);
    let local = local_slice(&records, dim, gfq, comm.rank());
    inflate(
        comm,
        dim,
        Connectivity::new(1),
        gfq,
        &[0, global],
        local,
        None,
    )
}

/// An empty forest: one tree, zero cells everywhere.
pub fn empty_forest<C: Communicator>(comm: &C, dim: Dim) -> Forest {
    let gfq = vec![0i64; comm.size() + 1];
    inflate(comm, dim, Connectivity::new(1), &gfq, &[0, 0], &[], None)
}
