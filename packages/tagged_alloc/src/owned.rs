use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use tracing::trace;

/// A deletion strategy: releases the object behind the pointer, however that object was created.
///
/// Any function with this signature can be used, including non-capturing closures. The holder
/// types call the strategy at most once per object they own.
pub type DeleteFn<T> = unsafe fn(NonNull<T>);

/// The default deletion strategy: ordinary single-object deletion through the global allocator.
///
/// # Safety
///
/// The pointer must have been obtained from [`Box::into_raw()`] (or equivalent), must not have
/// been released already and must not be used afterwards.
pub unsafe fn box_delete<T: ?Sized>(ptr: NonNull<T>) {
    // SAFETY: Forwarding safety requirements to the caller.
    drop(unsafe { Box::from_raw(ptr.as_ptr()) });
}

/// Exclusive owner of a single object, releasing it with a pluggable deletion strategy when the
/// holder goes out of scope.
///
/// The holder owns at most one object. Ownership can be handed elsewhere with
/// [`detach()`](Self::detach) and the object can be released early with
/// [`destroy()`](Self::destroy). Otherwise the object is released when the holder is dropped,
/// including during unwinding.
///
/// The holder is not [`Clone`]: there is only ever one holder responsible for an object. It can
/// be moved, which moves that responsibility along with it.
///
/// # Examples
///
/// ```
/// use tagged_alloc::OwnedHolder;
///
/// let mut holder = OwnedHolder::from_box(Box::new(String::from("owned")));
/// holder.push_str(" value");
/// assert_eq!(&*holder, "owned value");
///
/// // The string is released here.
/// holder.destroy();
/// assert!(!holder.is_owning());
/// ```
///
/// Pool-allocated objects plug their pool deletion in as the strategy:
///
/// ```
/// use tagged_alloc::{OwnedHolder, PoolTag, PoolType, TaggedAllocatable};
///
/// struct Frame([u8; 64]);
///
/// impl TaggedAllocatable for Frame {
///     const POOL_TYPE: PoolType = PoolType::NonPaged;
///     const TAG: PoolTag = PoolTag::new(*b"Frme");
/// }
///
/// let frame = Frame::pool_new(Frame([0; 64])).expect("pool has room for a frame");
///
/// // SAFETY: The frame came from the pool and the holder becomes its only owner.
/// let holder = unsafe { OwnedHolder::with_deleter(Some(frame), Frame::pool_delete) };
/// assert_eq!(holder.0.len(), 64);
/// ```
pub struct OwnedHolder<T: ?Sized> {
    ptr: Option<NonNull<T>>,
    deleter: DeleteFn<T>,

    _owns: PhantomData<T>,
}

impl<T: ?Sized> OwnedHolder<T> {
    /// Creates a holder that owns nothing and will use the default deletion strategy for any
    /// object later assigned to it.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            ptr: None,
            deleter: box_delete::<T>,
            _owns: PhantomData,
        }
    }

    /// Takes ownership of a boxed object.
    #[must_use]
    pub fn from_box(value: Box<T>) -> Self {
        // SAFETY: The pointer comes straight from Box::into_raw() and nothing else owns it.
        unsafe { Self::new(Some(NonNull::from(Box::leak(value)))) }
    }

    /// Takes ownership of `ptr`, to be released with the default deletion strategy
    /// ([`box_delete()`]).
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, it must satisfy the safety requirements of [`box_delete()`] and no
    /// other owner may release the object.
    #[must_use]
    pub unsafe fn new(ptr: Option<NonNull<T>>) -> Self {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe { Self::with_deleter(ptr, box_delete::<T>) }
    }

    /// Takes ownership of `ptr`, to be released with `deleter`.
    ///
    /// # Safety
    ///
    /// If `ptr` is `Some`, it must be valid for reads and writes, calling `deleter` with it
    /// must correctly release the object and no other owner may release the object.
    #[must_use]
    pub unsafe fn with_deleter(ptr: Option<NonNull<T>>, deleter: DeleteFn<T>) -> Self {
        Self {
            ptr,
            deleter,
            _owns: PhantomData,
        }
    }

    /// Whether the holder currently owns an object.
    #[must_use]
    #[inline]
    pub fn is_owning(&self) -> bool {
        self.ptr.is_some()
    }

    /// The owned object, if any. Ownership stays with the holder.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Gives up ownership without releasing the object.
    ///
    /// The caller becomes responsible for releasing the returned object (for example, by handing
    /// it to another holder). The holder is empty afterwards.
    #[must_use = "the detached object is no longer released by the holder"]
    #[inline]
    pub fn detach(&mut self) -> Option<NonNull<T>> {
        self.ptr.take()
    }

    /// Releases the owned object now, leaving the holder empty.
    ///
    /// Does nothing if the holder is empty, so calling it repeatedly is harmless.
    pub fn destroy(&mut self) {
        let Some(ptr) = self.ptr.take() else {
            return;
        };

        trace!("releasing exclusively owned object");

        // SAFETY: The constructor or assign() caller guaranteed that the deleter releases this
        // object and that we are its only owner. We have taken it out, so it is released once.
        unsafe {
            (self.deleter)(ptr);
        }
    }

    /// Replaces the tracked object with `ptr` without releasing the previously tracked one.
    ///
    /// This is a raw replacement, not a reset: the previously tracked object (if any) is returned
    /// and the caller becomes responsible for releasing it. Call [`destroy()`](Self::destroy)
    /// first if the previous object should simply be released.
    ///
    /// # Safety
    ///
    /// Same requirements as [`with_deleter()`](Self::with_deleter), for the deletion strategy
    /// this holder was created with.
    #[must_use = "the previously owned object is no longer released by the holder"]
    pub unsafe fn assign(&mut self, ptr: Option<NonNull<T>>) -> Option<NonNull<T>> {
        mem::replace(&mut self.ptr, ptr)
    }
}

impl<T> OwnedHolder<T> {
    /// The owned object as a raw pointer, or null if the holder is empty. Ownership stays with
    /// the holder.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

impl<T> OwnedHolder<[T]> {
    /// Deletion strategy for objects allocated as arrays (boxed slices): drops every element and
    /// releases the array.
    ///
    /// # Safety
    ///
    /// The pointer must have been obtained from [`Box::into_raw()`] on a `Box<[T]>`, must not
    /// have been released already and must not be used afterwards.
    pub unsafe fn array_delete(ptr: NonNull<[T]>) {
        // SAFETY: Forwarding safety requirements to the caller.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }

    /// Takes ownership of an array, releasing it with [`array_delete()`](Self::array_delete).
    #[must_use]
    pub fn from_boxed_slice(values: Box<[T]>) -> Self {
        let ptr = NonNull::from(Box::leak(values));

        // SAFETY: The pointer comes straight from a leaked Box<[T]> and nothing else owns it.
        unsafe { Self::with_deleter(Some(ptr), Self::array_delete) }
    }
}

impl<T: ?Sized> Default for OwnedHolder<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Deref for OwnedHolder<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the holder is empty.
    fn deref(&self) -> &Self::Target {
        let ptr = self.ptr.expect("dereferenced an OwnedHolder that owns nothing");

        // SAFETY: We exclusively own a valid object (constructor requirement) and the shared
        // borrow of the holder prevents it from being released or mutated meanwhile.
        unsafe { ptr.as_ref() }
    }
}

impl<T: ?Sized> DerefMut for OwnedHolder<T> {
    /// # Panics
    ///
    /// Panics if the holder is empty.
    fn deref_mut(&mut self) -> &mut Self::Target {
        let mut ptr = self.ptr.expect("dereferenced an OwnedHolder that owns nothing");

        // SAFETY: We exclusively own a valid object (constructor requirement) and the exclusive
        // borrow of the holder guarantees nobody else accesses it meanwhile.
        unsafe { ptr.as_mut() }
    }
}

impl<T: ?Sized> Drop for OwnedHolder<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: ?Sized> fmt::Debug for OwnedHolder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHolder")
            .field("ptr", &self.ptr)
            .finish_non_exhaustive()
    }
}

// SAFETY: The holder is the exclusive owner of the object, so moving the holder moves the
// object. That is fine whenever T itself may move between threads. The deletion strategy is a
// plain function pointer.
unsafe impl<T: ?Sized + Send> Send for OwnedHolder<T> {}

// SAFETY: Shared access to the holder only ever grants shared access to the object.
unsafe impl<T: ?Sized + Sync> Sync for OwnedHolder<T> {}
