//! Lazily creating a shared device context: the first caller to take a reference creates the
//! context in the non-paged pool, the last caller to let go returns it to the pool.

use std::ptr::NonNull;
use std::sync::Barrier;
use std::thread;

use tagged_alloc::{OwnedHolder, PoolTag, PoolType, RefCountedHolder, TaggedAllocatable};

#[derive(Debug)]
struct DeviceContext {
    name: String,
    max_packet_size: u16,
}

impl TaggedAllocatable for DeviceContext {
    const POOL_TYPE: PoolType = PoolType::NonPaged;
    const TAG: PoolTag = PoolTag::new(*b"DevC");
}

fn create_context() -> Option<NonNull<DeviceContext>> {
    let context = DeviceContext::pool_new_with(|| DeviceContext {
        name: "usb-storage".to_string(),
        max_packet_size: 512,
    });

    match context {
        Ok(context) => Some(context),
        Err(error) => {
            println!("could not create device context: {error}");
            None
        }
    }
}

fn main() {
    const WORKERS: usize = 4;

    let holder = RefCountedHolder::with_deleter(DeviceContext::pool_delete);
    let ready = Barrier::new(WORKERS);

    thread::scope(|s| {
        for worker in 0..WORKERS {
            let (holder, ready) = (&holder, &ready);

            s.spawn(move || {
                if holder.initial_add_ref() {
                    // Build under exclusive ownership first, so that a failure along the way
                    // would still return the context to the pool.
                    // SAFETY: The context came from the pool and the holder is its only owner.
                    let mut context = unsafe {
                        OwnedHolder::with_deleter(create_context(), DeviceContext::pool_delete)
                    };

                    if let Some(context) = context.get() {
                        println!("worker {worker} created context at {context:p}");
                    }

                    // SAFETY: The context was detached from its only other owner.
                    _ = unsafe { holder.assign(context.detach()) };
                }

                // Every worker holds a reference before anyone lets go.
                ready.wait();

                // SAFETY: We hold a reference while using the context.
                if let Some(context) = unsafe { holder.as_ref() } {
                    println!(
                        "worker {worker} sees {} with packets up to {} bytes",
                        context.name, context.max_packet_size
                    );
                }

                // SAFETY: Gives back the reference this worker took with initial_add_ref().
                unsafe { holder.release() };
            });
        }
    });

    println!("context released: {}", holder.get().is_none());
}
