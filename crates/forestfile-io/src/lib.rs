//! I/O and collective-communication primitives consumed by `forestfile`.
//!
//! The parallel protocol needs exactly two things from its environment: a
//! [`Communicator`](comm::Communicator) over which the ranks of a job
//! synchronize, and a [`FileHandle`](file::FileHandle) giving positioned
//! reads and writes with explicit byte counts.  Both are defined here as
//! seams, together with in-process realizations: [`SelfComm`](comm::SelfComm)
//! for a single rank and [`ThreadComm`](comm::ThreadComm) for a team of
//! ranks on threads of one process, which also backs the multi-rank test
//! suites via [`spmd`](comm::spmd).

pub mod comm;
pub mod file;

pub use comm::{spmd, Communicator, SelfComm, ThreadComm};
pub use file::FileHandle;
