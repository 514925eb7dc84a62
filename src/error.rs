//! Crate-wide error type

/// Main error type for bspseq operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("MPI error: {0}")]
    Mpi(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("contract violation: {0}")]
    Contract(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
