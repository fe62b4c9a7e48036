//! Collector-mode paths: hook replacement, class tagging, and the
//! refcount-presence notifications.
//!
//! Turning the collector on is process-wide and irreversible, so the
//! whole flow lives in a single test in its own binary.

use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use closure_rt::{
    CLOSURE_HAS_CTOR, CLOSURE_IS_GC, CLOSURE_REFCOUNT_MASK, CaptureCell, ClosureDescriptor,
    ClosureLayout, FIELD_IS_CAPTURE_CELL, GC_FINALIZING_HEAP_CLOSURE_CLASS,
    GC_HEAP_CLOSURE_CLASS, STACK_CLOSURE_CLASS, CELL_IS_GC, copy_closure, destroy_closure,
    object_assign, object_dispose, release_closure, use_gc,
};

static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
static REFCOUNT_GAINED: AtomicUsize = AtomicUsize::new(0);
static REFCOUNT_LOST: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn gc_alloc(size: usize, _count_is_one: bool, _is_object: bool) -> *mut c_void {
    ALLOCATED.fetch_add(1, Ordering::SeqCst);
    unsafe { libc::malloc(size) }
}

unsafe extern "C" fn gc_set_has_refcount(_ptr: *const c_void, has_refcount: bool) {
    if has_refcount {
        REFCOUNT_GAINED.fetch_add(1, Ordering::SeqCst);
    } else {
        REFCOUNT_LOST.fetch_add(1, Ordering::SeqCst);
    }
}

unsafe extern "C" fn gc_assign(value: *mut c_void, dest: *mut *mut c_void) {
    unsafe { *dest = value };
}

unsafe extern "C" fn gc_assign_weak(value: *const c_void, dest: *mut c_void) {
    unsafe { *(dest as *mut *const c_void) = value };
}

unsafe extern "C" fn gc_memmove(dst: *mut c_void, src: *mut c_void, size: usize) {
    unsafe { ptr::copy(src as *const u8, dst as *mut u8, size) };
}

unsafe extern "C" fn invoke_stub(_closure: *mut c_void) {}

static PLAIN_DESC: ClosureDescriptor = ClosureDescriptor {
    reserved: 0,
    size: mem::size_of::<ClosureLayout>(),
};

fn stack_record(flags: i32) -> ClosureLayout {
    ClosureLayout {
        class_ptr: STACK_CLOSURE_CLASS.as_class_ptr(),
        flags: AtomicI32::new(flags),
        reserved: 0,
        invoke: invoke_stub as *const c_void,
        descriptor: &PLAIN_DESC,
    }
}

#[test]
fn test_collector_mode_lifecycle() {
    unsafe {
        use_gc(gc_alloc, gc_set_has_refcount, gc_assign, gc_assign_weak, gc_memmove);
    }

    unsafe {
        // Promotion now allocates through the collector and tags the
        // record as collector-owned with one logical reference.
        let stack = stack_record(0);
        let heap = copy_closure(&stack as *const ClosureLayout as *const c_void);
        assert!(!heap.is_null());
        assert_eq!(ALLOCATED.load(Ordering::SeqCst), 1);
        let record = &*(heap as *const ClosureLayout);
        assert_ne!(record.flags_value() & CLOSURE_IS_GC, 0);
        assert_eq!(record.flags_value() & CLOSURE_REFCOUNT_MASK, 2);
        assert_eq!(record.class_ptr, GC_HEAP_CLOSURE_CLASS.as_class_ptr());

        // Copying a collector-owned record is refcount traffic, not an
        // allocation; going 1 -> 2 does not re-notify.
        assert_eq!(copy_closure(heap), heap);
        assert_eq!(ALLOCATED.load(Ordering::SeqCst), 1);
        assert_eq!(REFCOUNT_GAINED.load(Ordering::SeqCst), 0);

        // Dropping back to zero tells the collector we no longer hold a
        // count of our own; the memory stays the collector's.
        release_closure(heap);
        release_closure(heap);
        assert_eq!(REFCOUNT_LOST.load(Ordering::SeqCst), 1);

        // The obsolete destroy entry point ignores collector records.
        destroy_closure(heap);
        assert_eq!(REFCOUNT_LOST.load(Ordering::SeqCst), 1);

        // Records whose captures run constructors get the finalizing
        // class so their destructors are driven by finalization.
        let ctor_stack = stack_record(CLOSURE_HAS_CTOR);
        let ctor_heap = copy_closure(&ctor_stack as *const ClosureLayout as *const c_void);
        let ctor_record = &*(ctor_heap as *const ClosureLayout);
        assert_eq!(
            ctor_record.class_ptr,
            GC_FINALIZING_HEAP_CLOSURE_CLASS.as_class_ptr()
        );
    }

    unsafe {
        // Cells promoted under the collector carry no refcount and are
        // never freed by this runtime.
        #[repr(C)]
        struct IntCell {
            header: CaptureCell,
            value: i64,
        }
        let mut cell = IntCell {
            header: CaptureCell {
                class_ptr: ptr::null(),
                forwarding: ptr::null_mut(),
                flags: AtomicI32::new(0),
                size: mem::size_of::<IntCell>() as u32,
            },
            value: 11,
        };
        let stack = &mut cell.header as *mut CaptureCell;
        cell.header.forwarding = stack;

        let mut slot: *mut c_void = ptr::null_mut();
        object_assign(
            &mut slot as *mut *mut c_void as *mut c_void,
            stack as *const c_void,
            FIELD_IS_CAPTURE_CELL,
        );
        let heap = cell.header.forwarding;
        assert!(!ptr::eq(heap, stack));
        assert_ne!((*heap).flags_value() & CELL_IS_GC, 0);
        assert_eq!((*heap).flags_value() & CLOSURE_REFCOUNT_MASK, 0);
        assert_eq!((*(heap as *const IntCell)).value, 11);

        // A second fixup finds the collector-owned twin and just stores.
        let mut other_slot: *mut c_void = ptr::null_mut();
        object_assign(
            &mut other_slot as *mut *mut c_void as *mut c_void,
            stack as *const c_void,
            FIELD_IS_CAPTURE_CELL,
        );
        assert_eq!(other_slot, heap as *mut c_void);
        assert_eq!((*heap).flags_value() & CLOSURE_REFCOUNT_MASK, 0);

        // Releases are no-ops without NEEDS_FREE.
        object_dispose(slot as *const c_void, FIELD_IS_CAPTURE_CELL);
        object_dispose(other_slot as *const c_void, FIELD_IS_CAPTURE_CELL);
    }
}
