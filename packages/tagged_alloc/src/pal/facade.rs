use std::fmt::Debug;
use std::ptr::NonNull;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPoolAllocator;
use crate::pal::{PoolAllocator, SYSTEM_POOL, SystemPool};
use crate::{PoolTag, PoolType};

#[derive(Clone)]
pub(crate) enum PoolAllocatorFacade {
    Real(&'static SystemPool),

    #[cfg(test)]
    Mock(Arc<MockPoolAllocator>),
}

impl PoolAllocatorFacade {
    pub(crate) fn real() -> Self {
        Self::Real(&SYSTEM_POOL)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPoolAllocator) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl PoolAllocator for PoolAllocatorFacade {
    fn allocate(&self, pool_type: PoolType, size: usize, tag: PoolTag) -> Option<NonNull<u8>> {
        match self {
            Self::Real(p) => p.allocate(pool_type, size, tag),
            #[cfg(test)]
            Self::Mock(p) => p.allocate(pool_type, size, tag),
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>, tag: PoolTag) {
        match self {
            // SAFETY: Forwarding safety requirements to the caller.
            Self::Real(p) => unsafe { p.free(ptr, tag) },
            #[cfg(test)]
            // SAFETY: Forwarding safety requirements to the caller.
            Self::Mock(p) => unsafe { p.free(ptr, tag) },
        }
    }
}

#[cfg(test)]
impl From<MockPoolAllocator> for PoolAllocatorFacade {
    fn from(p: MockPoolAllocator) -> Self {
        Self::Mock(Arc::new(p))
    }
}

impl Debug for PoolAllocatorFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real(p) => p.fmt(f),
            #[cfg(test)]
            Self::Mock(p) => p.fmt(f),
        }
    }
}
