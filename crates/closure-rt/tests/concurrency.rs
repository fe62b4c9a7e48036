//! Refcount integrity under concurrent copy/release traffic.

use std::ffi::c_void;
use std::mem;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::thread;

use closure_rt::{
    CLOSURE_HAS_COPY_DISPOSE, CLOSURE_REFCOUNT_MASK, ClosureDescriptor, ClosureLayout,
    CopyDisposeDescriptor, STACK_CLOSURE_CLASS, copy_closure, release_closure, try_retain,
};

unsafe extern "C" fn invoke_stub(_closure: *mut c_void) {}

#[repr(C)]
struct CountingClosure {
    header: ClosureLayout,
    dispose_count: *const AtomicUsize,
}

unsafe extern "C" fn counting_copy(_dst: *mut c_void, _src: *const c_void) {}

unsafe extern "C" fn counting_dispose(closure: *const c_void) {
    let this = unsafe { &*(closure as *const CountingClosure) };
    unsafe { (*this.dispose_count).fetch_add(1, Ordering::SeqCst) };
}

#[repr(C)]
struct HelperedDescriptor {
    base: ClosureDescriptor,
    helpers: CopyDisposeDescriptor,
}

static COUNTING_DESC: HelperedDescriptor = HelperedDescriptor {
    base: ClosureDescriptor {
        reserved: 0,
        size: mem::size_of::<CountingClosure>(),
    },
    helpers: CopyDisposeDescriptor {
        copy: counting_copy,
        dispose: counting_dispose,
    },
};

fn counting_closure(dispose_count: &AtomicUsize) -> CountingClosure {
    CountingClosure {
        header: ClosureLayout {
            class_ptr: STACK_CLOSURE_CLASS.as_class_ptr(),
            flags: AtomicI32::new(CLOSURE_HAS_COPY_DISPOSE),
            reserved: 0,
            invoke: invoke_stub as *const c_void,
            descriptor: &COUNTING_DESC.base,
        },
        dispose_count,
    }
}

// Raw record pointer that can cross thread boundaries in tests.
#[derive(Clone, Copy)]
struct SendPtr(*mut c_void);
unsafe impl Send for SendPtr {}

#[test]
fn test_interleaved_copy_release_from_many_threads() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let dispose_count = AtomicUsize::new(0);
    let stack = counting_closure(&dispose_count);
    let heap = unsafe { copy_closure(&stack.header as *const ClosureLayout as *const c_void) };
    assert!(!heap.is_null());

    thread::scope(|scope| {
        for _ in 0..THREADS {
            let heap = SendPtr(heap);
            scope.spawn(move || {
                let heap = heap;
                for _ in 0..ROUNDS {
                    unsafe {
                        let copied = copy_closure(heap.0);
                        assert_eq!(copied, heap.0);
                        release_closure(copied);
                    }
                }
            });
        }
    });

    // Every thread balanced its traffic; only the base reference is left.
    unsafe {
        let record = &*(heap as *const ClosureLayout);
        assert_eq!(record.flags_value() & CLOSURE_REFCOUNT_MASK, 2);
        assert_eq!(dispose_count.load(Ordering::SeqCst), 0);
        release_closure(heap);
    }
    assert_eq!(dispose_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_try_retain_races_a_non_final_release() {
    // With the count held at 2, one racing release can never reach the
    // zero transition, so try_retain must always win; what is under test
    // is that the CAS traffic keeps the count exact.
    const ROUNDS: usize = 2_000;

    let dispose_count = AtomicUsize::new(0);
    let stack = counting_closure(&dispose_count);
    let heap = unsafe { copy_closure(&stack.header as *const ClosureLayout as *const c_void) };
    assert!(!heap.is_null());

    for _ in 0..ROUNDS {
        unsafe {
            // Second reference for the racing release to consume.
            copy_closure(heap);
        }
        thread::scope(|scope| {
            let retain_side = {
                let heap = SendPtr(heap);
                scope.spawn(move || {
                    let heap = heap;
                    unsafe { try_retain(heap.0) }
                })
            };
            let release_side = {
                let heap = SendPtr(heap);
                scope.spawn(move || {
                    let heap = heap;
                    unsafe { release_closure(heap.0) }
                })
            };
            assert!(retain_side.join().unwrap());
            release_side.join().unwrap();
        });
        // Drop the reference try_retain took.
        unsafe { release_closure(heap) };
    }

    unsafe {
        let record = &*(heap as *const ClosureLayout);
        assert_eq!(record.flags_value() & CLOSURE_REFCOUNT_MASK, 2);
        assert_eq!(dispose_count.load(Ordering::SeqCst), 0);
        release_closure(heap);
    }
    assert_eq!(dispose_count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_parallel_promotions_of_one_stack_record_are_independent() {
    const THREADS: usize = 8;

    let dispose_count = AtomicUsize::new(0);
    let stack = counting_closure(&dispose_count);
    let p = SendPtr(&stack.header as *const ClosureLayout as *mut c_void);

    thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(move || {
                    let p = p;
                    unsafe { SendPtr(copy_closure(p.0)) }
                })
            })
            .collect();
        let copies: Vec<SendPtr> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Concurrent copies of a stack record each promote their own
        // heap record.
        for (i, a) in copies.iter().enumerate() {
            assert!(!a.0.is_null());
            for b in &copies[i + 1..] {
                assert_ne!(a.0, b.0);
            }
        }
        for copy in copies {
            unsafe { release_closure(copy.0) };
        }
    });

    assert_eq!(dispose_count.load(Ordering::SeqCst), THREADS);
}
