//! Parallel serialization and data files for partitioned forests of
//! quadtrees and octrees.
//!
//! Two tightly coupled facilities live here.  [`deflate`] and [`inflate`]
//! convert between the in-memory, partitioned forest and a flat,
//! partition-independent sequence of per-cell records, so a forest saved
//! on one rank count can be rebuilt on another.  [`FileContext`] writes
//! and reads the companion data-file format: a text-readable fixed-width
//! header, then a chain of blocks holding either global header data or
//! per-cell field arrays striped across ranks by the partition vector.
//!
//! Every public file operation is collective over a
//! [`Communicator`](forestfile_io::Communicator): all ranks call it at
//! the same step with consistent arguments, observe the same cursor, and
//! fail with the same error class.  Operations take the context by value
//! and return it on success; on failure the context is consumed and the
//! file is closed on every rank.
//!
//! ```no_run
//! use forestfile::{deflate, FileContext};
//! use forestfile_io::SelfComm;
//! # fn demo(forest: &forestfile::Forest) -> Result<(), forestfile::Error> {
//! let comm = SelfComm;
//! let (records, _) = deflate(forest, false);
//! let ctx = FileContext::create(&comm, forest, "mesh.ffd".as_ref(), "step 42")?;
//! let ctx = ctx.write_cell_records(&records, "cells")?;
//! ctx.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod context;
pub mod deflate;
pub mod error;
pub mod file_info;
pub mod forest;

mod file_read;
mod file_write;

pub use cell::{Cell, GlobalPosition};
pub use context::{FileContext, Partition};
pub use deflate::{deflate, inflate, publish_global_first_positions};
pub use error::{Error, ErrorClass};
pub use file_info::{file_info, SectionInfo};
pub use forest::{uniform_partition, Connectivity, Forest, Tree};

pub use forestfile_format::{BlockType, Dim, FormatError};
