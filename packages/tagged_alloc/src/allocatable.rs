use std::ptr::{self, NonNull};

use scopeguard::ScopeGuard;
use tracing::debug;

use crate::error::Result;
use crate::pal::{PoolAllocator, PoolAllocatorFacade};
use crate::{Error, POOL_ALIGNMENT, PoolTag, PoolType};

/// Routes allocation and deallocation of a type through a tagged memory pool instead of the
/// general-purpose allocator.
///
/// The pool descriptor is bound at compile time through the two associated constants. The trait
/// carries no per-instance state: implementing it only changes where instances of the type come
/// from and where their memory goes back to.
///
/// Allocation failure is never raised as a panic. The raw functions report it as `None`, the typed
/// helpers as [`Error::PoolExhausted`]. Neither retries nor falls back to another pool.
///
/// Memory must be returned with the same descriptor it was obtained with. This is a caller
/// obligation that the trait cannot check, since the descriptor is not stored per instance.
///
/// # Examples
///
/// ```
/// use tagged_alloc::{PoolTag, PoolType, TaggedAllocatable};
///
/// struct Widget {
///     id: u32,
/// }
///
/// impl TaggedAllocatable for Widget {
///     const POOL_TYPE: PoolType = PoolType::NonPaged;
///     const TAG: PoolTag = PoolTag::new(*b"Wdgt");
/// }
///
/// let widget = Widget::pool_new(Widget { id: 42 }).expect("pool has room for a widget");
///
/// // SAFETY: The widget was just created and nothing else references it.
/// assert_eq!(unsafe { widget.as_ref() }.id, 42);
///
/// // SAFETY: The widget came from `pool_new()` and is deleted exactly once.
/// unsafe { Widget::pool_delete(widget) };
/// ```
pub trait TaggedAllocatable: Sized {
    /// The class of memory instances of this type are allocated from.
    const POOL_TYPE: PoolType;

    /// The diagnostic tag attached to every allocation made for this type.
    const TAG: PoolTag;

    /// Requests `size` bytes for a single object from this type's pool.
    ///
    /// Returns the pool's answer verbatim: `None` if the pool is exhausted.
    #[must_use]
    #[inline]
    fn allocate(size: usize) -> Option<NonNull<u8>> {
        allocate_via(&PoolAllocatorFacade::real(), Self::POOL_TYPE, Self::TAG, size)
    }

    /// Requests `size` bytes for an array of objects from this type's pool.
    ///
    /// Arrays take the same pool path as single objects.
    #[must_use]
    #[inline]
    fn allocate_array(size: usize) -> Option<NonNull<u8>> {
        Self::allocate(size)
    }

    /// Placement form of allocation: returns the caller-supplied storage unchanged, without
    /// touching the pool.
    ///
    /// Used when an instance is constructed in place inside storage owned by someone else.
    #[must_use]
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Identity function, nothing to mutate meaningfully.
    fn allocate_at(place: NonNull<u8>, _size: usize) -> NonNull<u8> {
        place
    }

    /// Returns a single-object block to this type's pool. Does nothing if `ptr` is `None`.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, it must have been returned by [`allocate()`](Self::allocate) or
    /// [`allocate_array()`](Self::allocate_array) of a type with the same pool descriptor and
    /// must not have been deallocated already. Any object in the block must already be dropped.
    #[inline]
    unsafe fn deallocate(ptr: Option<NonNull<u8>>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            deallocate_via(&PoolAllocatorFacade::real(), Self::TAG, ptr);
        }
    }

    /// Returns an array block to this type's pool. Does nothing if `ptr` is `None`.
    ///
    /// # Safety
    ///
    /// Same as [`deallocate()`](Self::deallocate).
    #[inline]
    unsafe fn deallocate_array(ptr: Option<NonNull<u8>>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            Self::deallocate(ptr);
        }
    }

    /// Allocates memory for one instance from this type's pool and only then constructs the
    /// instance by calling `init`.
    ///
    /// If the pool is exhausted, `init` is never called.
    ///
    /// The returned pointer owns the instance. Release it with
    /// [`pool_delete()`](Self::pool_delete), which is also usable as a holder deletion strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool cannot satisfy the request.
    #[inline]
    fn pool_new_with<F>(init: F) -> Result<NonNull<Self>>
    where
        F: FnOnce() -> Self,
    {
        pool_new_with_via(&PoolAllocatorFacade::real(), init)
    }

    /// Moves `value` into memory allocated from this type's pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool cannot satisfy the request. The value is
    /// dropped in that case.
    #[inline]
    fn pool_new(value: Self) -> Result<NonNull<Self>> {
        Self::pool_new_with(|| value)
    }

    /// Allocates an array of `len` instances from this type's pool, constructing element `i`
    /// by calling `init(i)`.
    ///
    /// If `init` panics, the elements constructed so far are dropped and the memory is returned
    /// to the pool before the panic continues.
    ///
    /// Release the array with [`pool_delete_slice()`](Self::pool_delete_slice).
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the pool cannot satisfy the request or if the array
    /// size does not fit into `usize`. No element is constructed in that case.
    #[inline]
    fn pool_new_slice_with<F>(len: usize, init: F) -> Result<NonNull<[Self]>>
    where
        F: FnMut(usize) -> Self,
    {
        pool_new_slice_with_via(&PoolAllocatorFacade::real(), len, init)
    }

    /// Drops an instance created by [`pool_new()`](Self::pool_new) or
    /// [`pool_new_with()`](Self::pool_new_with) and returns its memory to the pool.
    ///
    /// # Safety
    ///
    /// The pointer must have been returned by one of the single-object pool constructors of this
    /// type, must not have been deleted already and must not be used afterwards.
    #[inline]
    unsafe fn pool_delete(ptr: NonNull<Self>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            pool_delete_via(&PoolAllocatorFacade::real(), ptr);
        }
    }

    /// Drops every element of an array created by
    /// [`pool_new_slice_with()`](Self::pool_new_slice_with) and returns its memory to the pool.
    ///
    /// # Safety
    ///
    /// The pointer must have been returned by `pool_new_slice_with()` of this type, must not
    /// have been deleted already and must not be used afterwards.
    #[inline]
    unsafe fn pool_delete_slice(ptr: NonNull<[Self]>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            pool_delete_slice_via(&PoolAllocatorFacade::real(), ptr);
        }
    }
}

pub(crate) fn allocate_via(
    pal: &impl PoolAllocator,
    pool_type: PoolType,
    tag: PoolTag,
    size: usize,
) -> Option<NonNull<u8>> {
    let block = pal.allocate(pool_type, size, tag);

    if block.is_none() {
        debug!(?pool_type, %tag, size, "pool allocation failed");
    }

    block
}

/// # Safety
///
/// See `TaggedAllocatable::deallocate()`.
pub(crate) unsafe fn deallocate_via(
    pal: &impl PoolAllocator,
    tag: PoolTag,
    ptr: Option<NonNull<u8>>,
) {
    let Some(ptr) = ptr else {
        return;
    };

    // SAFETY: Forwarding safety requirements to the caller.
    unsafe {
        pal.free(ptr, tag);
    }
}

pub(crate) fn pool_new_with_via<T, F>(pal: &impl PoolAllocator, init: F) -> Result<NonNull<T>>
where
    T: TaggedAllocatable,
    F: FnOnce() -> T,
{
    const {
        assert!(
            align_of::<T>() <= POOL_ALIGNMENT,
            "type alignment exceeds the alignment guaranteed by pool allocations"
        );
    }

    let size = size_of::<T>();

    let block = allocate_via(pal, T::POOL_TYPE, T::TAG, size).ok_or(Error::PoolExhausted {
        pool_type: T::POOL_TYPE,
        tag: T::TAG,
        size,
    })?;

    // If the constructor panics, the memory goes back to the pool.
    let block = scopeguard::guard(block, |block| {
        // SAFETY: The block came from this pool and nothing was constructed in it.
        unsafe {
            deallocate_via(pal, T::TAG, Some(block));
        }
    });

    let value = init();

    let ptr = ScopeGuard::into_inner(block).cast::<T>();

    // SAFETY: The block is large enough for a T and aligned to POOL_ALIGNMENT, which satisfies
    // the alignment of T (asserted above).
    unsafe {
        ptr.write(value);
    }

    Ok(ptr)
}

pub(crate) fn pool_new_slice_with_via<T, F>(
    pal: &impl PoolAllocator,
    len: usize,
    mut init: F,
) -> Result<NonNull<[T]>>
where
    T: TaggedAllocatable,
    F: FnMut(usize) -> T,
{
    const {
        assert!(
            align_of::<T>() <= POOL_ALIGNMENT,
            "type alignment exceeds the alignment guaranteed by pool allocations"
        );
    }

    let exhausted = |size| Error::PoolExhausted {
        pool_type: T::POOL_TYPE,
        tag: T::TAG,
        size,
    };

    let size = size_of::<T>()
        .checked_mul(len)
        .ok_or_else(|| exhausted(usize::MAX))?;

    let block = allocate_via(pal, T::POOL_TYPE, T::TAG, size).ok_or_else(|| exhausted(size))?;
    let first = block.cast::<T>();

    // Counts the leading elements that have been constructed. If a constructor panics, those
    // are dropped and the memory goes back to the pool.
    let mut constructed = scopeguard::guard(0_usize, |constructed| {
        // SAFETY: Exactly `constructed` leading elements have been written and not yet dropped.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(first.as_ptr(), constructed));
        }

        // SAFETY: The block came from this pool and its contents have been dropped.
        unsafe {
            deallocate_via(pal, T::TAG, Some(block));
        }
    });

    for index in 0..len {
        let value = init(index);

        // SAFETY: `index < len`, so the element is inside the block, which is aligned for T.
        unsafe {
            first.add(index).write(value);
        }

        // Cannot wrap: index < len <= usize::MAX.
        *constructed = index.wrapping_add(1);
    }

    let constructed = ScopeGuard::into_inner(constructed);
    debug_assert_eq!(constructed, len);

    Ok(NonNull::slice_from_raw_parts(first, len))
}

/// # Safety
///
/// See `TaggedAllocatable::pool_delete()`.
pub(crate) unsafe fn pool_delete_via<T>(pal: &impl PoolAllocator, ptr: NonNull<T>)
where
    T: TaggedAllocatable,
{
    // SAFETY: The caller guarantees the instance is alive and owned by the caller.
    unsafe {
        ptr::drop_in_place(ptr.as_ptr());
    }

    // SAFETY: The caller guarantees the block came from this type's pool; its content is dropped.
    unsafe {
        deallocate_via(pal, T::TAG, Some(ptr.cast()));
    }
}

/// # Safety
///
/// See `TaggedAllocatable::pool_delete_slice()`.
pub(crate) unsafe fn pool_delete_slice_via<T>(pal: &impl PoolAllocator, ptr: NonNull<[T]>)
where
    T: TaggedAllocatable,
{
    // SAFETY: The caller guarantees every element is alive and owned by the caller.
    unsafe {
        ptr::drop_in_place(ptr.as_ptr());
    }

    // SAFETY: The caller guarantees the block came from this type's pool; its content is dropped.
    unsafe {
        deallocate_via(pal, T::TAG, Some(ptr.cast()));
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;

    use mockall::predicate::eq;

    use super::*;
    use crate::pal::{MockPoolAllocator, SYSTEM_POOL};

    const WIDGET_TAG: PoolTag = PoolTag::new(*b"Wdgt");

    #[derive(Debug)]
    struct Widget {
        id: usize,
        drops: Option<Rc<Cell<usize>>>,
    }

    impl Widget {
        fn new(id: usize) -> Self {
            Self { id, drops: None }
        }

        fn tracked(id: usize, drops: &Rc<Cell<usize>>) -> Self {
            Self {
                id,
                drops: Some(Rc::clone(drops)),
            }
        }
    }

    impl Drop for Widget {
        fn drop(&mut self) {
            if let Some(drops) = &self.drops {
                drops.set(drops.get().wrapping_add(1));
            }
        }
    }

    impl TaggedAllocatable for Widget {
        const POOL_TYPE: PoolType = PoolType::Paged;
        const TAG: PoolTag = WIDGET_TAG;
    }

    /// A mock that forwards to the real pool, so that typed helpers can write into the blocks.
    fn forwarding_mock() -> MockPoolAllocator {
        let mut mock = MockPoolAllocator::new();

        mock.expect_allocate()
            .returning(|pool_type, size, tag| SYSTEM_POOL.allocate(pool_type, size, tag));

        mock.expect_free().returning(|ptr, tag| {
            // SAFETY: Every pointer the code under test frees came from the forwarding allocate.
            unsafe { SYSTEM_POOL.free(ptr, tag) }
        });

        mock
    }

    fn exhausted_mock() -> MockPoolAllocator {
        let mut mock = MockPoolAllocator::new();
        mock.expect_allocate().returning(|_, _, _| None);
        mock.expect_free().never();
        mock
    }

    #[test]
    fn allocate_forwards_pool_descriptor_and_size() {
        let mut mock = MockPoolAllocator::new();
        mock.expect_allocate()
            .with(eq(PoolType::Paged), eq(24), eq(WIDGET_TAG))
            .times(1)
            .returning(|_, _, _| Some(NonNull::dangling()));

        let pal = PoolAllocatorFacade::from_mock(mock);

        let block = allocate_via(&pal, Widget::POOL_TYPE, Widget::TAG, 24);
        assert_eq!(block, Some(NonNull::dangling()));
    }

    #[test]
    fn allocate_returns_none_verbatim_on_exhaustion() {
        let mut mock = MockPoolAllocator::new();
        mock.expect_allocate().times(1).returning(|_, _, _| None);

        let pal: PoolAllocatorFacade = mock.into();

        assert!(allocate_via(&pal, PoolType::NonPaged, WIDGET_TAG, 16).is_none());
    }

    #[test]
    fn deallocate_none_does_not_touch_pool() {
        let mut mock = MockPoolAllocator::new();
        mock.expect_free().never();

        // SAFETY: Deallocating `None` has no requirements.
        unsafe {
            deallocate_via(&mock, WIDGET_TAG, None);
        }
    }

    #[test]
    fn deallocate_returns_block_with_tag() {
        let block = NonNull::<u8>::dangling();
        let block_addr = block.as_ptr().addr();

        let mut mock = MockPoolAllocator::new();
        mock.expect_free()
            .withf(move |ptr, tag| ptr.as_ptr().addr() == block_addr && *tag == WIDGET_TAG)
            .times(1)
            .return_const(());

        // SAFETY: The mock does not touch the memory.
        unsafe {
            deallocate_via(&mock, WIDGET_TAG, Some(block));
        }
    }

    #[test]
    fn allocate_at_returns_place_unchanged() {
        let mut storage = [0_u8; 32];
        let place = NonNull::from(&mut storage).cast::<u8>();

        assert_eq!(Widget::allocate_at(place, size_of::<Widget>()), place);
    }

    #[test]
    fn pool_new_with_does_not_construct_on_exhaustion() {
        let pal = PoolAllocatorFacade::from_mock(exhausted_mock());
        let constructed = Cell::new(false);

        let result = pool_new_with_via(&pal, || {
            constructed.set(true);
            Widget::new(1)
        });

        assert!(matches!(
            result,
            Err(Error::PoolExhausted {
                pool_type: PoolType::Paged,
                tag: WIDGET_TAG,
                size,
            }) if size == size_of::<Widget>()
        ));
        assert!(!constructed.get());
    }

    #[test]
    fn pool_new_and_delete_round_trip_through_pool() {
        let pal = forwarding_mock();
        let drops = Rc::new(Cell::new(0));

        let widget = pool_new_with_via(&pal, || Widget::tracked(7, &drops)).unwrap();

        // SAFETY: The widget is alive and not shared.
        assert_eq!(unsafe { widget.as_ref() }.id, 7);
        assert_eq!(drops.get(), 0);

        // SAFETY: The widget came from pool_new_with_via() on the same allocator.
        unsafe {
            pool_delete_via(&pal, widget);
        }

        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn panicking_constructor_returns_memory_to_pool() {
        let mut mock = MockPoolAllocator::new();
        mock.expect_allocate()
            .times(1)
            .returning(|pool_type, size, tag| SYSTEM_POOL.allocate(pool_type, size, tag));
        mock.expect_free().times(1).returning(|ptr, tag| {
            // SAFETY: The pointer came from the forwarding allocate.
            unsafe { SYSTEM_POOL.free(ptr, tag) }
        });

        let result = catch_unwind(AssertUnwindSafe(|| {
            pool_new_with_via::<Widget, _>(&mock, || panic!("constructor failure"))
        }));

        assert!(result.is_err());
    }

    #[test]
    fn pool_new_slice_constructs_every_element() {
        let pal = forwarding_mock();
        let drops = Rc::new(Cell::new(0));

        let widgets = pool_new_slice_with_via(&pal, 5, |i| Widget::tracked(i * 10, &drops))
            .unwrap();

        // SAFETY: The slice is alive and not shared.
        let ids: Vec<usize> = unsafe { widgets.as_ref() }.iter().map(|w| w.id).collect();
        assert_eq!(ids, [0, 10, 20, 30, 40]);

        // SAFETY: The slice came from pool_new_slice_with_via() on the same allocator.
        unsafe {
            pool_delete_slice_via(&pal, widgets);
        }

        assert_eq!(drops.get(), 5);
    }

    #[test]
    fn pool_new_slice_of_zero_length() {
        let pal = forwarding_mock();

        let widgets = pool_new_slice_with_via::<Widget, _>(&pal, 0, |_| unreachable!()).unwrap();
        assert_eq!(widgets.len(), 0);

        // SAFETY: The slice came from pool_new_slice_with_via() on the same allocator.
        unsafe {
            pool_delete_slice_via(&pal, widgets);
        }
    }

    #[test]
    fn pool_new_slice_drops_constructed_prefix_on_panic() {
        let pal = forwarding_mock();
        let drops = Rc::new(Cell::new(0));

        let result = catch_unwind(AssertUnwindSafe(|| {
            pool_new_slice_with_via(&pal, 4, |i| {
                assert!(i < 3, "constructor failure");
                Widget::tracked(i, &drops)
            })
        }));

        assert!(result.is_err());
        assert_eq!(drops.get(), 3);
    }

    #[test]
    fn pool_new_slice_with_overflowing_size_is_exhaustion() {
        let pal = PoolAllocatorFacade::from_mock(exhausted_mock());

        let result = pool_new_slice_with_via::<Widget, _>(&pal, usize::MAX, |_| unreachable!());

        assert!(matches!(
            result,
            Err(Error::PoolExhausted { size: usize::MAX, .. })
        ));
    }

    #[test]
    fn pool_new_slice_does_not_construct_on_exhaustion() {
        let pal = PoolAllocatorFacade::from_mock(exhausted_mock());

        let result = pool_new_slice_with_via::<Widget, _>(&pal, 3, |_| unreachable!());

        assert!(result.is_err());
    }

    #[test]
    fn trait_functions_use_real_pool() {
        let block = Widget::allocate(64).expect("small allocation from the system pool");

        // SAFETY: The block came from Widget::allocate() and is returned once.
        unsafe {
            Widget::deallocate(Some(block));
        }

        let block = Widget::allocate_array(128).expect("small allocation from the system pool");

        // SAFETY: The block came from Widget::allocate_array() and is returned once.
        unsafe {
            Widget::deallocate_array(Some(block));
        }

        // SAFETY: Deallocating `None` has no requirements.
        unsafe {
            Widget::deallocate(None);
        }
    }

    #[test]
    fn trait_allocate_reports_exhaustion_as_none() {
        assert!(Widget::allocate(usize::MAX).is_none());
    }
}
