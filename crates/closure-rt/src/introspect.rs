//! Read-only views into closure records.

use std::ffi::{c_char, c_void};
use std::fmt::Write as _;

use crate::flags::{
    CLOSURE_DEALLOCATING, CLOSURE_HAS_COPY_DISPOSE, CLOSURE_HAS_CTOR, CLOSURE_HAS_EXTENDED_LAYOUT,
    CLOSURE_HAS_SIGNATURE, CLOSURE_IS_GC, CLOSURE_IS_GLOBAL, CLOSURE_NEEDS_FREE,
    CLOSURE_REFCOUNT_MASK, CLOSURE_USE_STRET,
};
use crate::layout::ClosureLayout;

/// Total size in bytes of the closure record, header plus captures.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn closure_size(closure: *const c_void) -> usize {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    unsafe { (*record.descriptor).size }
}

/// Whether the invoke function returns through a hidden pointer argument.
///
/// The stret bit is undefined without a signature, so both bits are
/// required.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn uses_struct_return(closure: *const c_void) -> bool {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    let required = CLOSURE_HAS_SIGNATURE | CLOSURE_USE_STRET;
    record.flags_value() & required == required
}

/// The type-encoding string, or null when the record carries none.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn signature(closure: *const c_void) -> *const c_char {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    match unsafe { record.signature_descriptor() } {
        Some(desc) => desc.signature,
        None => std::ptr::null(),
    }
}

/// Whether the record carries an actual signature string, not merely the
/// flag bit.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn has_signature(closure: *const c_void) -> bool {
    !unsafe { signature(closure) }.is_null()
}

/// The legacy collector layout string.
///
/// Returns null when the record uses the extended encoding — callers
/// expecting the collector encoding must not be handed the other one.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn gc_layout(closure: *const c_void) -> *const c_char {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    if record.flags_value() & CLOSURE_HAS_EXTENDED_LAYOUT != 0 {
        return std::ptr::null();
    }
    match unsafe { record.signature_descriptor() } {
        Some(desc) => desc.layout,
        None => std::ptr::null(),
    }
}

/// The extended layout string.
///
/// Returns null when the record does not use the extended encoding, and
/// an empty string when it does but stored no bytes — so callers can
/// tell "no layout" from "all non-pointer".
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn extended_layout(closure: *const c_void) -> *const c_char {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    if record.flags_value() & CLOSURE_HAS_EXTENDED_LAYOUT == 0 {
        return std::ptr::null();
    }
    let Some(desc) = (unsafe { record.signature_descriptor() }) else {
        return std::ptr::null();
    };
    if desc.layout.is_null() {
        c"".as_ptr()
    } else {
        desc.layout
    }
}

/// Human-readable dump of a record's header state, for diagnostics.
///
/// # Safety
///
/// `closure` must point to a valid closure record.
pub unsafe fn describe(closure: *const c_void) -> String {
    let record = unsafe { &*(closure as *const ClosureLayout) };
    let flags = record.flags_value();

    let storage = if flags & CLOSURE_IS_GLOBAL != 0 {
        "global"
    } else if flags & CLOSURE_IS_GC != 0 {
        "gc"
    } else if flags & CLOSURE_NEEDS_FREE != 0 {
        "heap"
    } else {
        "stack"
    };

    let mut out = String::new();
    let _ = write!(
        out,
        "closure {:p}: {} refcount={} invoke={:p} size={}",
        closure,
        storage,
        (flags & CLOSURE_REFCOUNT_MASK) >> 1,
        record.invoke,
        unsafe { closure_size(closure) },
    );
    for (bit, name) in [
        (CLOSURE_DEALLOCATING, "DEALLOCATING"),
        (CLOSURE_HAS_COPY_DISPOSE, "HAS_COPY_DISPOSE"),
        (CLOSURE_HAS_CTOR, "HAS_CTOR"),
        (CLOSURE_USE_STRET, "USE_STRET"),
        (CLOSURE_HAS_SIGNATURE, "HAS_SIGNATURE"),
        (CLOSURE_HAS_EXTENDED_LAYOUT, "HAS_EXTENDED_LAYOUT"),
    ] {
        if flags & bit != 0 {
            let _ = write!(out, " {name}");
        }
    }
    out
}
