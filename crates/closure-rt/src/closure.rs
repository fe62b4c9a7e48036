//! Copy and release engines for closure records.
//!
//! A record is in exactly one of three storage classes. Global records
//! ignore the whole lifecycle; heap records are plain refcount traffic;
//! stack records get promoted — allocated, byte-copied, re-tagged, and
//! handed to their copy helper — on the first copy.

use std::ffi::c_void;
use std::ptr;

use log::trace;

use crate::flags::{
    CLOSURE_DEALLOCATING, CLOSURE_HAS_CTOR, CLOSURE_IS_GC, CLOSURE_IS_GLOBAL, CLOSURE_NEEDS_FREE,
    CLOSURE_REFCOUNT_MASK,
};
use crate::hooks::{self, hooks};
use crate::layout::ClosureLayout;
use crate::refcount::{
    latching_decr_now_zero, latching_decr_should_deallocate, latching_incr,
    latching_incr_not_deallocating,
};

/// Copy a closure: promote a stack record to the heap, or add a reference
/// to a heap record. Global records pass through untouched.
///
/// Returns the (possibly new) record, or null on allocation failure or
/// null input. Every non-null return must eventually be balanced by a
/// [`release_closure`].
///
/// # Safety
///
/// `closure` must be null or point to a valid closure record whose
/// descriptor chain matches its flags.
pub unsafe fn copy_closure(closure: *const c_void) -> *mut c_void {
    unsafe { copy_internal(closure, true) }
}

/// Collector-path copy that does not take a refcount of its own.
/// Useless outside collector mode.
///
/// # Safety
///
/// Same contract as [`copy_closure`].
pub unsafe fn copy_closure_collectable(closure: *const c_void) -> *mut c_void {
    unsafe { copy_internal(closure, false) }
}

pub(crate) unsafe fn copy_internal(arg: *const c_void, wants_one: bool) -> *mut c_void {
    if arg.is_null() {
        return ptr::null_mut();
    }
    let closure = unsafe { &*(arg as *const ClosureLayout) };
    let flags = closure.flags_value();

    if flags & CLOSURE_NEEDS_FREE != 0 {
        // Already on the heap: just another reference.
        latching_incr(&closure.flags);
        return arg as *mut c_void;
    }
    if flags & CLOSURE_IS_GC != 0 {
        // Collector-owned. Refcounting is only bookkeeping for the
        // collector, which wants to know about the 0 -> 1 transition.
        if wants_one && (latching_incr(&closure.flags) & CLOSURE_REFCOUNT_MASK) == 2 {
            unsafe { (hooks().set_has_refcount)(arg, true) };
        }
        return arg as *mut c_void;
    }
    if flags & CLOSURE_IS_GLOBAL != 0 {
        return arg as *mut c_void;
    }

    // A stack record: make the heap copy.
    let size = unsafe { (*closure.descriptor).size };
    if !hooks::is_gc() {
        let copy = unsafe { (hooks().allocate)(size, false, false) };
        if copy.is_null() {
            return ptr::null_mut();
        }
        // Bit-copy first so the copy helper observes the new record's
        // addresses for its destination stores.
        unsafe { ptr::copy(arg as *const u8, copy as *mut u8, size) };
        let heap = copy as *mut ClosureLayout;
        let new_flags =
            (flags & !(CLOSURE_REFCOUNT_MASK | CLOSURE_DEALLOCATING)) | CLOSURE_NEEDS_FREE | 2;
        unsafe {
            (*heap).flags.store(new_flags, std::sync::atomic::Ordering::Relaxed);
            (*heap).class_ptr = hooks::copy_class();
        }
        trace!("promoted closure {:p} to heap record {:p} ({} bytes)", arg, copy, size);
        unsafe { closure.call_copy_helper(copy) };
        copy
    } else {
        // Collector branch: records with constructors need a finalizing
        // class so the destructor runs; records with object layouts need
        // to be scanned.
        let has_ctor = flags & CLOSURE_HAS_CTOR != 0;
        let is_object = has_ctor || unsafe { closure.has_layout() };
        let copy = unsafe { (hooks().allocate)(size, wants_one, is_object) };
        if copy.is_null() {
            return ptr::null_mut();
        }
        unsafe { ptr::copy(arg as *const u8, copy as *mut u8, size) };
        let heap = copy as *mut ClosureLayout;
        let mut new_flags =
            flags & !(CLOSURE_NEEDS_FREE | CLOSURE_REFCOUNT_MASK | CLOSURE_DEALLOCATING);
        new_flags |= CLOSURE_IS_GC | if wants_one { 2 } else { 0 };
        unsafe {
            (*heap).flags.store(new_flags, std::sync::atomic::Ordering::Relaxed);
            (*heap).class_ptr = if has_ctor {
                hooks::finalizing_copy_class()
            } else {
                hooks::copy_class()
            };
        }
        unsafe { closure.call_copy_helper(copy) };
        copy
    }
}

/// Drop a reference to a closure.
///
/// Stack and global records are untouched — the stack frame and the
/// binary own them. On the heap, the decrement that reaches zero runs the
/// dispose helper, the object system's finalizer lookup, and the
/// deallocator, in that order.
///
/// # Safety
///
/// `closure` must be null or point to a valid closure record, and each
/// call must balance a prior [`copy_closure`].
pub unsafe fn release_closure(closure: *const c_void) {
    if closure.is_null() {
        return;
    }
    let record = unsafe { &*(closure as *const ClosureLayout) };
    let flags = record.flags_value();
    if flags & CLOSURE_IS_GLOBAL != 0 || flags & (CLOSURE_IS_GC | CLOSURE_NEEDS_FREE) == 0 {
        return;
    }

    if flags & CLOSURE_IS_GC != 0 {
        if latching_decr_now_zero(&record.flags) {
            // The collector reclaims the record once it learns we no
            // longer hold our own count.
            unsafe { (hooks().set_has_refcount)(closure, false) };
        }
    } else if latching_decr_should_deallocate(&record.flags) {
        trace!("deallocating heap closure {:p}", closure);
        unsafe {
            record.call_dispose_helper();
            (hooks().destruct_instance)(closure);
            (hooks().deallocate)(closure);
        }
    }
}

/// Obsolete compiler entry point; old dispose helpers call this instead
/// of [`release_closure`].
///
/// # Safety
///
/// Same contract as [`release_closure`].
pub unsafe fn destroy_closure(closure: *const c_void) {
    if closure.is_null() {
        return;
    }
    let record = unsafe { &*(closure as *const ClosureLayout) };
    if record.flags_value() & CLOSURE_IS_GC != 0 {
        // Collector teardown called us because of a destructor; the
        // record itself is the collector's to reclaim.
        return;
    }
    unsafe { release_closure(closure) };
}

/// Take a reference only if the record is not already tearing down.
///
/// The failure case is what a weak-reference subsystem needs: once the
/// deallocating bit is set the record cannot be resurrected.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn try_retain(closure: *const c_void) -> bool {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    latching_incr_not_deallocating(&record.flags)
}

/// Whether the final teardown of the record has begun.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn is_deallocating(closure: *const c_void) -> bool {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    record.flags_value() & CLOSURE_DEALLOCATING != 0
}
