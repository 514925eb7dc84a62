//! # bspseq - Bulk-Synchronous Distributed Sequences
//!
//! A distributed sequence abstraction for SPMD/MPI programs: every rank
//! runs the same program and holds a shard of a logical, globally
//! ordered sequence. Operations (`map`, `filter`, `flat_map`, `reduce`,
//! `scan`, `collect`, `node_map`, `head`, `group`, `repartition`) are
//! collective -- every rank must call the same operation, in the same
//! order, with arguments that agree on shape.
//!
//! The [`Comm`] trait abstracts the underlying transport; [`MpiComm`]
//! drives it over a real MPI communicator and [`LocalComm`] provides a
//! single-rank loopback implementation for running the algebra in a
//! plain `#[test]` without an `mpirun` launcher.

pub mod bulk;
pub mod context;
pub mod error;
pub mod exec;
pub mod fill;
pub mod func;
pub mod gather;
pub mod partition;
pub mod pscan;
pub mod reducer;
pub mod repartition;
pub mod scan;
pub mod seq;
pub mod segment;

pub use bulk::BulkBuffer;
pub use context::{Comm, Context, LocalComm, MpiComm, RecvHandle, SendHandle};
pub use error::{Error, Result};
pub use func::AlgFn;
pub use seq::DistSeq;

/// Install a `tracing-subscriber` `fmt` layer at `RUST_LOG`-controlled
/// verbosity. The library never calls this itself -- only a driver
/// binary should install a global subscriber, since a library doing so
/// would clobber whatever the host application already set up.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
