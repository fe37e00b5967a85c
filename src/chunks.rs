//! Apply a function to an array chunk-by-chunk, in parallel.

use log::trace;
use ndarray::{concatenate, prelude::*};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("The chunk length must be at least 1")]
    ZeroChunkLen,

    #[error("Axis {axis} doesn't exist in a {ndim}-dimensional array")]
    AxisOutOfRange { axis: usize, ndim: usize },

    #[error("Chunk {index} changed shape from {expected:?} to {got:?}")]
    ShapeChanged {
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Couldn't reassemble chunks: {0}")]
    Reassemble(#[from] ndarray::ShapeError),
}

/// Split `array` into chunks of `chunk_len` along `axis`, apply `f` to each
/// chunk on the rayon thread pool, and stitch the results back together. The
/// last chunk may be shorter than the others. `f` must not change the shape of
/// its chunk.
///
/// For a function that treats elements independently, the result is the same
/// as `f(array)`.
pub fn map_over_chunks<F>(
    f: F,
    array: ArrayViewD<f64>,
    axis: Axis,
    chunk_len: usize,
) -> Result<ArrayD<f64>, ChunkError>
where
    F: Fn(ArrayViewD<f64>) -> ArrayD<f64> + Sync + Send,
{
    if chunk_len == 0 {
        return Err(ChunkError::ZeroChunkLen);
    }
    if axis.index() >= array.ndim() {
        return Err(ChunkError::AxisOutOfRange {
            axis: axis.index(),
            ndim: array.ndim(),
        });
    }

    let len = array.len_of(axis);
    if len == 0 {
        let out = f(array.view());
        if out.shape() != array.shape() {
            return Err(ChunkError::ShapeChanged {
                index: 0,
                expected: array.shape().to_vec(),
                got: out.shape().to_vec(),
            });
        }
        return Ok(out);
    }
    trace!(
        "Splitting an array of shape {:?} into {} chunks along axis {}",
        array.shape(),
        len.div_ceil(chunk_len),
        axis.index()
    );

    let chunks = array
        .axis_chunks_iter(axis, chunk_len)
        .into_par_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let out = f(chunk.view());
            if out.shape() != chunk.shape() {
                return Err(ChunkError::ShapeChanged {
                    index,
                    expected: chunk.shape().to_vec(),
                    got: out.shape().to_vec(),
                });
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>, ChunkError>>()?;

    let views: Vec<ArrayViewD<f64>> = chunks.iter().map(|c| c.view()).collect();
    Ok(concatenate(axis, &views)?)
}
