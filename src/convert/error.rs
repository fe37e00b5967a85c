//! Errors from converting partitions.

use thiserror::Error;

use crate::{astro::AstroError, chunks::ChunkError, read::PartitionKey, read::ReadError};

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Partition {key} has no data variable '{variable}'")]
    MissingVariable { key: PartitionKey, variable: String },

    #[error("The global partition holds no spectral data to convert")]
    GlobalPartition,

    #[error("The target is a mix of metadata and defaults (defaulted: {defaulted}); refusing to convert")]
    InconsistentTarget { defaulted: String },

    #[error("Invalid conversion option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Astro(#[from] AstroError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),
}
