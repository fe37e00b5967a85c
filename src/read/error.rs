//! Errors from reading dataset partitions.

use std::path::PathBuf;

use thiserror::Error;

use super::PartitionKey;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Dataset has no partition '{0}'")]
    MissingPartition(PartitionKey),

    #[error("The file {} does not exist", .0.display())]
    MissingFile(PathBuf),

    #[error("Can't tell what kind of data {} is; expected a .ms, .uvfits or .uvf", .0.display())]
    UnknownInputType(PathBuf),

    #[error("Data variable '{name}' has {ndim} dimensions but {num_dims} dimension names")]
    DimMismatch {
        name: String,
        ndim: usize,
        num_dims: usize,
    },

    #[error("Table {table} in {} has no rows", file.display())]
    EmptyTable { file: PathBuf, table: String },

    #[error("The ANTENNA table has {names} names but {positions} positions")]
    AntennaMismatch { names: usize, positions: usize },

    #[error("Couldn't work out the {what} of {}: {reason}", file.display())]
    BadLayout {
        file: PathBuf,
        what: &'static str,
        reason: String,
    },

    #[error("Error from casacore table {table}: {message}")]
    Casacore { table: String, message: String },

    #[error(transparent)]
    Fits(#[from] super::fits::FitsError),
}
