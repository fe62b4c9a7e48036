//! The entry points compiler-generated helpers call for each captured
//! field.
//!
//! A copy helper calls [`object_assign`] once per capture; a dispose
//! helper calls [`object_dispose`]. The flags argument identifies what
//! the field is — object, closure, or capture cell, optionally weak —
//! and whether the caller is a cell's own helper working on the cell's
//! payload slot ([`BYREF_CALLER`]) rather than a closure helper working
//! on a capture slot. The two caller kinds need different retention:
//! the cell owner is responsible for its payload, so the cell-helper
//! paths store without retaining or copying.
//!
//! Unknown flag combinations are ignored; the compiler is trusted to emit
//! only the documented values.

use std::ffi::c_void;

use crate::cell::{assign_cell, release_cell};
use crate::closure::{copy_internal, release_closure};
use crate::flags::{
    ALL_COPY_DISPOSE_FLAGS, BYREF_CALLER, FIELD_IS_CAPTURE_CELL, FIELD_IS_CLOSURE,
    FIELD_IS_OBJECT, FIELD_IS_WEAK,
};
use crate::hooks::hooks;

const CELL_WEAK: i32 = FIELD_IS_CAPTURE_CELL | FIELD_IS_WEAK;
const CALLER_OBJECT: i32 = BYREF_CALLER | FIELD_IS_OBJECT;
const CALLER_CLOSURE: i32 = BYREF_CALLER | FIELD_IS_CLOSURE;
const CALLER_OBJECT_WEAK: i32 = CALLER_OBJECT | FIELD_IS_WEAK;
const CALLER_CLOSURE_WEAK: i32 = CALLER_CLOSURE | FIELD_IS_WEAK;

/// Fix up one captured field while copying a closure or a cell payload.
///
/// `dest` addresses the capture slot in the destination record; `object`
/// is the captured value from the source. Null `object` is a no-op.
///
/// # Safety
///
/// `dest` must address a writable pointer slot, `object` must be valid
/// for the kind named by `flags`, and `flags` must come from the
/// documented set.
pub unsafe fn object_assign(dest: *mut c_void, object: *const c_void, flags: i32) {
    if object.is_null() {
        return;
    }
    let destp = dest as *mut *mut c_void;
    match flags & ALL_COPY_DISPOSE_FLAGS {
        FIELD_IS_OBJECT => unsafe {
            // A captured object: retained through the integrator, stored
            // as-is.
            (hooks().retain_object)(object);
            (hooks().assign)(object as *mut c_void, destp);
        },
        FIELD_IS_CLOSURE => unsafe {
            // A captured closure is itself copied (promoted or bumped).
            (hooks().assign)(copy_internal(object, false), destp);
        },
        FIELD_IS_CAPTURE_CELL | CELL_WEAK => unsafe {
            assign_cell(dest, object, flags);
        },
        CALLER_OBJECT | CALLER_CLOSURE => unsafe {
            // A cell's keep helper copying its payload: the cell owns the
            // reference, so no retain and no copy here.
            (hooks().assign)(object as *mut c_void, destp);
        },
        CALLER_OBJECT_WEAK | CALLER_CLOSURE_WEAK => unsafe {
            (hooks().assign_weak)(object, dest);
        },
        _ => {}
    }
}

/// Drop one captured field while disposing a closure or a cell payload.
///
/// Null `object` is a no-op, as are all [`BYREF_CALLER`] combinations —
/// the cell's own destroy helper handles its payload directly.
///
/// # Safety
///
/// `object` must be null or valid for the kind named by `flags`, with a
/// reference to give up.
pub unsafe fn object_dispose(object: *const c_void, flags: i32) {
    if object.is_null() {
        return;
    }
    match flags & ALL_COPY_DISPOSE_FLAGS {
        FIELD_IS_CAPTURE_CELL | CELL_WEAK => unsafe {
            release_cell(object);
        },
        FIELD_IS_CLOSURE => unsafe {
            release_closure(object);
        },
        FIELD_IS_OBJECT => unsafe {
            (hooks().release_object)(object);
        },
        CALLER_OBJECT | CALLER_CLOSURE | CALLER_OBJECT_WEAK | CALLER_CLOSURE_WEAK => {}
        _ => {}
    }
}
