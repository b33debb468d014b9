//! Behavior of the pool allocation functions when the pool cannot satisfy a request.

use std::cell::Cell;

use tagged_alloc::{Error, PoolTag, PoolType, TaggedAllocatable};

#[derive(Debug)]
struct Packet {
    _bytes: [u8; 8],
}

impl TaggedAllocatable for Packet {
    const POOL_TYPE: PoolType = PoolType::Paged;
    const TAG: PoolTag = PoolTag::new(*b"Pckt");
}

#[test]
fn raw_allocation_failure_is_none() {
    assert!(Packet::allocate(usize::MAX).is_none());
    assert!(Packet::allocate_array(usize::MAX).is_none());
}

#[test]
fn deallocating_none_is_a_no_op() {
    // SAFETY: Deallocating `None` has no requirements.
    unsafe {
        Packet::deallocate(None);
        Packet::deallocate_array(None);
    }
}

#[test]
fn array_allocation_failure_constructs_nothing() {
    let constructed = Cell::new(0_usize);

    let result = Packet::pool_new_slice_with(usize::MAX / 16, |_| {
        constructed.set(constructed.get().wrapping_add(1));
        Packet { _bytes: [0; 8] }
    });

    match result {
        Err(Error::PoolExhausted { pool_type, tag, .. }) => {
            assert_eq!(pool_type, PoolType::Paged);
            assert_eq!(tag, Packet::TAG);
        }
        other => panic!("expected pool exhaustion, got {other:?}"),
    }

    assert_eq!(constructed.get(), 0);
}

#[test]
fn array_size_overflow_is_exhaustion() {
    let result = Packet::pool_new_slice_with(usize::MAX, |_| Packet { _bytes: [0; 8] });

    assert!(matches!(
        result,
        Err(Error::PoolExhausted {
            size: usize::MAX,
            ..
        })
    ));
}

#[test]
fn successful_allocation_can_be_returned() {
    let block = Packet::allocate(size_of::<Packet>()).expect("pool has room for a packet");

    // SAFETY: The block came from Packet::allocate() and is returned once, empty.
    unsafe { Packet::deallocate(Some(block)) };
}
