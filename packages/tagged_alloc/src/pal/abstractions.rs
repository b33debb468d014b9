use std::fmt::Debug;
use std::ptr::NonNull;

use crate::{PoolTag, PoolType};

/// The pool allocator provided by the environment.
///
/// All pool traffic must go through this trait, enabling it to be mocked.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait PoolAllocator: Debug + Send + Sync + 'static {
    /// Requests `size` bytes from the pool of the given type, attributing them to `tag`.
    ///
    /// Returns `None` if the pool cannot satisfy the request.
    fn allocate(&self, pool_type: PoolType, size: usize, tag: PoolTag) -> Option<NonNull<u8>>;

    /// Returns a block to the pool it was allocated from.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by `allocate()` on the same allocator
    /// with the same `tag` and that it has not already been freed.
    unsafe fn free(&self, ptr: NonNull<u8>, tag: PoolTag);
}
