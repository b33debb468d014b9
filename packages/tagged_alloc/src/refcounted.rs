use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::trace;

use crate::{DeleteFn, PoolTag, PoolType, TaggedAllocatable, box_delete};

/// Shared owner of a single object with an intrusive, atomically updated reference count.
///
/// The holder starts with a count of zero and no object. An object is published with
/// [`assign()`](Self::assign) and references are taken and dropped with explicit calls:
///
/// * [`initial_add_ref()`](Self::initial_add_ref) takes a reference and reports whether it was
///   the one that took the count from zero to one, which lets racing callers agree on who
///   initializes the object.
/// * [`add_ref()`](Self::add_ref) takes a reference.
/// * [`release()`](Self::release) gives back a reference taken earlier. The call that brings the
///   count to zero releases the object with the deletion strategy, exactly once.
///
/// Once the count has reached zero the holder is spent: it no longer tracks an object and must
/// not be brought back to life. Releasing is `unsafe` because releasing a reference that was
/// never taken would free the object under another reference holder.
///
/// The holder is shared by reference, never duplicated, so it is not [`Clone`]. Dropping the
/// holder does not release the tracked object; only the reference count does. The holder
/// itself may be allocated from the non-paged pool through [`TaggedAllocatable`].
///
/// # Examples
///
/// ```
/// use std::ptr::NonNull;
///
/// use tagged_alloc::RefCountedHolder;
///
/// let holder = RefCountedHolder::new();
///
/// if holder.initial_add_ref() {
///     let device_name = NonNull::from(Box::leak(Box::new(String::from("usb0"))));
///
///     // SAFETY: The string came from a Box, matching the default deletion strategy,
///     // and the holder becomes its only owner.
///     _ = unsafe { holder.assign(Some(device_name)) };
/// }
///
/// holder.add_ref();
///
/// // SAFETY: Gives back the reference taken by add_ref().
/// unsafe { holder.release() };
/// assert!(holder.get().is_some());
///
/// // SAFETY: Gives back the reference taken by initial_add_ref(). It is the last one, so the
/// // string is released here.
/// unsafe { holder.release() };
/// assert!(holder.get().is_none());
/// ```
pub struct RefCountedHolder<T> {
    ptr: AtomicPtr<T>,
    ref_count: AtomicUsize,
    deleter: DeleteFn<T>,

    _owns: PhantomData<T>,
}

impl<T> RefCountedHolder<T> {
    /// Creates a holder with no object and a count of zero, using the default deletion strategy
    /// ([`box_delete()`]).
    #[must_use]
    pub fn new() -> Self {
        Self::with_deleter(box_delete::<T>)
    }

    /// Creates a holder with no object and a count of zero, using `deleter` to release the object
    /// once the count drops to zero.
    #[must_use]
    pub fn with_deleter(deleter: DeleteFn<T>) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            ref_count: AtomicUsize::new(0),
            deleter,
            _owns: PhantomData,
        }
    }

    /// Sets the tracked object, without affecting the reference count.
    ///
    /// Returns the previously tracked object, which is no longer released by the holder.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, it must be valid for reads, calling the deletion strategy with it must
    /// correctly release the object and no other owner may release the object. Other threads
    /// that access the object must synchronize with this call.
    #[must_use = "the previously tracked object is no longer released by the holder"]
    pub unsafe fn assign(&self, ptr: Option<NonNull<T>>) -> Option<NonNull<T>> {
        let new = ptr.map_or(ptr::null_mut(), NonNull::as_ptr);

        NonNull::new(self.ptr.swap(new, Ordering::SeqCst))
    }

    /// Takes a reference and returns whether this call took the count from zero to one.
    ///
    /// Exactly one of any number of racing first callers observes `true`.
    #[must_use]
    pub fn initial_add_ref(&self) -> bool {
        self.ref_count.fetch_add(1, Ordering::SeqCst) == 0
    }

    /// Takes a reference.
    pub fn add_ref(&self) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Gives back a reference. If this was the last one and an object is tracked, the object is
    /// released with the deletion strategy.
    ///
    /// Giving back a reference requires having taken one:
    ///
    /// ```compile_fail
    /// use tagged_alloc::RefCountedHolder;
    ///
    /// let holder = RefCountedHolder::<u32>::new();
    /// holder.add_ref();
    /// holder.release();
    /// ```
    ///
    /// # Safety
    ///
    /// The caller must give back a reference that it took with
    /// [`initial_add_ref()`](Self::initial_add_ref) or [`add_ref()`](Self::add_ref) and has not
    /// given back yet. Neither the caller nor anything it lent the object to may use the object
    /// through that reference afterwards.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if the count is already zero.
    pub unsafe fn release(&self) {
        let previous = self.ref_count.fetch_sub(1, Ordering::SeqCst);

        debug_assert_ne!(
            previous, 0,
            "RefCountedHolder released more references than were taken"
        );

        if previous != 1 {
            return;
        }

        // Taking the pointer out guarantees it is released at most once, even if the holder is
        // misused after reaching zero.
        let Some(ptr) = NonNull::new(self.ptr.swap(ptr::null_mut(), Ordering::SeqCst)) else {
            return;
        };

        trace!("last reference released, releasing shared object");

        // SAFETY: The assign() caller guaranteed that the deleter releases this object and that
        // the holder is its only owner. Every reference was given back by its taker (release()
        // requirement) and the count reached zero on this thread, so nobody may still use it.
        unsafe {
            (self.deleter)(ptr);
        }
    }

    /// The tracked object, if any. Does not affect the reference count.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        NonNull::new(self.as_ptr())
    }

    /// The tracked object as a raw pointer, or null if there is none. Does not affect the
    /// reference count.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.load(Ordering::SeqCst)
    }

    /// A shared reference to the tracked object, if any.
    ///
    /// # Safety
    ///
    /// The caller must hold a reference (through `initial_add_ref()` or `add_ref()`) for as
    /// long as the returned reference is used, so that the object cannot be released meanwhile.
    #[must_use]
    #[inline]
    pub unsafe fn as_ref(&self) -> Option<&T> {
        // SAFETY: The object is valid (assign() requirement) and stays alive while the caller
        // holds a reference, which the caller guarantees.
        unsafe { self.as_ptr().as_ref() }
    }

    /// The current reference count.
    ///
    /// Other threads may change the count at any time, so this is only a snapshot.
    #[must_use]
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }
}

impl<T> Default for RefCountedHolder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaggedAllocatable for RefCountedHolder<T> {
    const POOL_TYPE: PoolType = PoolType::NonPaged;
    const TAG: PoolTag = PoolTag::new(*b"CRHR");
}

impl<T> fmt::Debug for RefCountedHolder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCountedHolder")
            .field("ptr", &self.as_ptr())
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

// SAFETY: The holder owns the object, so moving the holder between threads moves the object.
// The deletion strategy is a plain function pointer.
unsafe impl<T: Send> Send for RefCountedHolder<T> {}

// SAFETY: Shared access grants shared access to the object (requires Sync) and any thread that
// drops the last reference releases the object there (requires Send). The count and the pointer
// are atomics.
unsafe impl<T: Send + Sync> Sync for RefCountedHolder<T> {}
