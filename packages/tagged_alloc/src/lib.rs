#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Ownership and allocation primitives for environments where every allocation must come from
//! a typed, tagged memory pool and where allocation failure must not panic.
//!
//! The crate offers three independent building blocks:
//!
//! * [`TaggedAllocatable`] routes the allocation of a type through a memory pool identified by a
//!   [`PoolType`] and a 4-byte diagnostic [`PoolTag`], both bound at compile time.
//! * [`OwnedHolder`] exclusively owns one object and releases it with a pluggable deletion
//!   strategy when it goes out of scope, unless ownership was detached first.
//! * [`RefCountedHolder`] shares one object through an intrusive atomic reference count and
//!   releases it exactly once, when the count drops to zero.
//!
//! Pool exhaustion is the only failure this crate reports. Raw allocation returns `None` and the
//! typed helpers return [`Error::PoolExhausted`]; nothing is retried.
//!
//! # Example
//!
//! ```
//! use tagged_alloc::{OwnedHolder, PoolTag, PoolType, RefCountedHolder, TaggedAllocatable};
//!
//! #[derive(Debug)]
//! struct Endpoint {
//!     address: u8,
//! }
//!
//! impl TaggedAllocatable for Endpoint {
//!     const POOL_TYPE: PoolType = PoolType::NonPaged;
//!     const TAG: PoolTag = PoolTag::new(*b"EndP");
//! }
//!
//! // Allocate from the pool and take exclusive ownership.
//! let endpoint = Endpoint::pool_new(Endpoint { address: 0x81 }).expect("pool has room");
//!
//! // SAFETY: The endpoint came from the pool and the holder becomes its only owner.
//! let mut exclusive = unsafe { OwnedHolder::with_deleter(Some(endpoint), Endpoint::pool_delete) };
//! assert_eq!(exclusive.address, 0x81);
//!
//! // Hand ownership over to a reference-counted holder that releases it into the same pool.
//! let shared = RefCountedHolder::with_deleter(Endpoint::pool_delete);
//!
//! // SAFETY: The endpoint was detached from its previous owner, so the holder is its only owner.
//! _ = unsafe { shared.assign(exclusive.detach()) };
//!
//! assert!(shared.initial_add_ref());
//!
//! // SAFETY: Gives back the reference taken by initial_add_ref(). It is the last one, so the
//! // endpoint goes back to the pool here.
//! unsafe { shared.release() };
//! ```

mod allocatable;
mod error;
mod owned;
mod pal;
mod pool;
mod refcounted;

pub use allocatable::*;
pub use error::Error;
pub use owned::*;
pub use pool::*;
pub use refcounted::*;
