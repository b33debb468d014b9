use thiserror::Error;

use crate::{PoolTag, PoolType};

/// Errors reported by the typed pool allocation helpers.
///
/// The raw allocation functions of [`TaggedAllocatable`][crate::TaggedAllocatable] do not use
/// this type; they report exhaustion as `None`, exactly as the pool allocator does.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool could not satisfy an allocation request.
    #[error("pool exhausted: {size} bytes requested from {pool_type:?} pool with tag '{tag}'")]
    PoolExhausted {
        /// The pool the request was made to.
        pool_type: PoolType,

        /// The tag the request was made with.
        tag: PoolTag,

        /// The number of bytes requested. For array requests whose size does not fit into
        /// `usize`, this is `usize::MAX`.
        size: usize,
    },
}

/// A specialized `Result` type for pool allocation, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
