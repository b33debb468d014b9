use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

use crate::pal::PoolAllocator;
use crate::{POOL_ALIGNMENT, PoolTag, PoolType};

/// Bookkeeping stored in front of every block, so that a block can be freed given only its
/// address and tag.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
struct BlockHeader {
    /// Size of the whole block, header included.
    block_size: usize,
    tag: PoolTag,
}

/// The payload starts this many bytes into the block, which keeps it at `POOL_ALIGNMENT`.
const HEADER_SIZE: usize = POOL_ALIGNMENT;

const _: () = assert!(size_of::<BlockHeader>() <= HEADER_SIZE);
const _: () = assert!(align_of::<BlockHeader>() <= POOL_ALIGNMENT);

pub(crate) static SYSTEM_POOL: SystemPool = SystemPool;

/// Pool allocator for the build target, serving every pool type from the host system allocator.
///
/// A hosted build has no pageable/non-pageable distinction to make, so the pool type only
/// travels through for diagnostics. Tags are recorded per block and, in debug builds, checked
/// when the block is freed.
#[derive(Debug)]
pub(crate) struct SystemPool;

impl PoolAllocator for SystemPool {
    fn allocate(&self, _pool_type: PoolType, size: usize, tag: PoolTag) -> Option<NonNull<u8>> {
        let layout = block_layout(size)?;

        // SAFETY: The layout always has a non-zero size because it includes the header.
        let block = NonNull::new(unsafe { System.alloc(layout) })?;

        let header = BlockHeader {
            block_size: layout.size(),
            tag,
        };

        // SAFETY: The block is at least HEADER_SIZE bytes and aligned to POOL_ALIGNMENT,
        // which is enough for a BlockHeader (see the const assertions above).
        unsafe {
            block.cast::<BlockHeader>().write(header);
        }

        // SAFETY: The block is at least HEADER_SIZE bytes, so the payload starts in bounds
        // (or one past the end for a zero-sized request).
        Some(unsafe { block.add(HEADER_SIZE) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, tag: PoolTag) {
        // SAFETY: The caller guarantees that `ptr` came from `allocate()`, which placed the
        // payload HEADER_SIZE bytes into the block.
        let block = unsafe { ptr.sub(HEADER_SIZE) };

        // SAFETY: `allocate()` wrote a header at the start of the block and nothing touches it
        // until the block is freed, which the caller guarantees has not happened yet.
        let header = unsafe { block.cast::<BlockHeader>().read() };

        debug_assert_eq!(
            header.tag, tag,
            "pool block freed with a tag different from the one it was allocated with"
        );

        // SAFETY: The same size and alignment formed a valid layout when the block was allocated.
        let layout = unsafe { Layout::from_size_align_unchecked(header.block_size, POOL_ALIGNMENT) };

        // SAFETY: The block was allocated by the system allocator with exactly this layout.
        unsafe {
            System.dealloc(block.as_ptr(), layout);
        }
    }
}

fn block_layout(payload_size: usize) -> Option<Layout> {
    let block_size = payload_size.checked_add(HEADER_SIZE)?;

    Layout::from_size_align(block_size, POOL_ALIGNMENT).ok()
}
