//! Rank communicators: the collective operations the file protocol uses.
//!
//! Every operation is collective: all ranks of a communicator must call it
//! at the same logical step.  The trait is deliberately small — broadcast,
//! logical-OR all-reduce, all-gather, barrier — which is the entire
//! vocabulary of the file protocol.
//!
//! Collective transport failures are not part of the error surface; an
//! implementation aborts the process rather than return, mirroring how a
//! died-peer condition is unrecoverable for SPMD code.

use std::sync::{Arc, Condvar, Mutex};

/// Collective operations over the ranks of one parallel job.
pub trait Communicator: Sync {
    /// This process's rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the communicator.
    fn size(&self) -> usize;

    /// Replace `buf` on every rank with root's `buf`.  The buffer length
    /// must match across ranks.
    fn broadcast(&self, root: usize, buf: &mut [u8]);

    /// Logical OR of `value` across all ranks, returned on every rank.
    fn allreduce_or(&self, value: bool) -> bool;

    /// Concatenate every rank's equally-sized `send` into `recv`, in rank
    /// order, on every rank.  `recv.len()` must be `send.len() * size()`.
    fn allgather(&self, send: &[u8], recv: &mut [u8]);

    /// Wait until every rank has entered the barrier.
    fn barrier(&self);
}

// ---------------------------------------------------------------------------
// SelfComm — the one-rank communicator
// ---------------------------------------------------------------------------

/// Trivial communicator for a single-rank job.  Every collective is local.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, root: usize, _buf: &mut [u8]) {
        assert_eq!(root, 0);
    }

    fn allreduce_or(&self, value: bool) -> bool {
        value
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        recv.copy_from_slice(send);
    }

    fn barrier(&self) {}
}

// ---------------------------------------------------------------------------
// ThreadComm — a team of ranks on threads of one process
// ---------------------------------------------------------------------------

/// State of the current collective round.
#[derive(Debug)]
struct Round {
    /// Ranks arrived in the current round.
    arrived: usize,
    /// Monotonic round counter; a bump wakes the waiters.
    generation: u64,
    /// Per-rank contributions to the current round.
    inputs: Vec<Option<Vec<u8>>>,
    /// Snapshot of the completed round, tagged with its generation.
    output: Option<(u64, Arc<Vec<Vec<u8>>>)>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    round: Mutex<Round>,
    done: Condvar,
}

/// Communicator connecting `size` ranks running on threads of one process.
///
/// All collectives are built on a single exchange primitive: every rank
/// deposits a byte contribution, the last rank to arrive snapshots the
/// round, and every rank receives the same immutable snapshot.  A snapshot
/// stays valid while any rank of its round still holds it, because the next
/// round cannot complete until that rank arrives again.
#[derive(Debug)]
pub struct ThreadComm {
    shared: Arc<Shared>,
    rank: usize,
}

impl ThreadComm {
    /// Create one connected handle per rank.
    pub fn split(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0);
        let shared = Arc::new(Shared {
            size,
            round: Mutex::new(Round {
                arrived: 0,
                generation: 0,
                inputs: (0..size).map(|_| None).collect(),
                output: None,
            }),
            done: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                shared: shared.clone(),
                rank,
            })
            .collect()
    }

    /// One collective rendezvous: deposit `mine`, receive everyone's
    /// contribution in rank order.
    fn exchange(&self, mine: Vec<u8>) -> Arc<Vec<Vec<u8>>> {
        let shared = &*self.shared;
        let mut round = shared
            .round
            .lock()
            .expect("a peer rank panicked inside a collective");
        let gen = round.generation;

        debug_assert!(round.inputs[self.rank].is_none(), "collective mismatch");
        round.inputs[self.rank] = Some(mine);
        round.arrived += 1;

        if round.arrived == shared.size {
            let all: Vec<Vec<u8>> = round
                .inputs
                .iter_mut()
                .map(|slot| slot.take().expect("missing contribution"))
                .collect();
            let snapshot = Arc::new(all);
            round.output = Some((gen, snapshot.clone()));
            round.arrived = 0;
            round.generation += 1;
            shared.done.notify_all();
            return snapshot;
        }

        while round.generation == gen {
            round = shared
                .done
                .wait(round)
                .expect("a peer rank panicked inside a collective");
        }
        let (out_gen, snapshot) = round.output.as_ref().expect("round completed without output");
        debug_assert_eq!(*out_gen, gen);
        snapshot.clone()
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, root: usize, buf: &mut [u8]) {
        assert!(root < self.size());
        let mine = if self.rank == root {
            buf.to_vec()
        } else {
            Vec::new()
        };
        let all = self.exchange(mine);
        buf.copy_from_slice(&all[root]);
    }

    fn allreduce_or(&self, value: bool) -> bool {
        let all = self.exchange(vec![value as u8]);
        all.iter().any(|v| v[0] != 0)
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        assert_eq!(recv.len(), send.len() * self.size());
        let all = self.exchange(send.to_vec());
        for (rank, part) in all.iter().enumerate() {
            assert_eq!(part.len(), send.len(), "allgather length mismatch");
            recv[rank * send.len()..(rank + 1) * send.len()].copy_from_slice(part);
        }
    }

    fn barrier(&self) {
        self.exchange(Vec::new());
    }
}

// ---------------------------------------------------------------------------
// spmd — run a closure once per rank on its own thread
// ---------------------------------------------------------------------------

/// Run `body` on `size` rank threads connected by a fresh [`ThreadComm`],
/// returning the per-rank results in rank order.
///
/// This is the harness behind every multi-rank test: each thread behaves
/// like one process of an SPMD job.
pub fn spmd<F, R>(size: usize, body: F) -> Vec<R>
where
    F: Fn(ThreadComm) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::split(size);
    let mut results: Vec<Option<R>> = Vec::new();
    results.resize_with(size, || None);

    std::thread::scope(|scope| {
        let body = &body;
        for (slot, comm) in results.iter_mut().zip(comms) {
            scope.spawn(move || {
                *slot = Some(body(comm));
            });
        }
    });

    results
        .into_iter()
        .map(|slot| slot.expect("rank thread did not finish"))
        .collect()
}
