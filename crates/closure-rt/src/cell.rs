//! Capture cells: heap-promotable boxes for shared mutable captures.
//!
//! A variable captured by shared mutable reference lives in a cell rather
//! than in the closure record itself. Compilers emit the cell on the
//! stack; the first enclosing copy promotes it to the heap and rewrites
//! the stack instance's `forwarding` pointer at the heap twin. Every
//! access — from the original frame or from any closure — dereferences
//! `forwarding` first, so all users observe the same storage once
//! promotion has happened.

use std::ffi::{c_char, c_void};
use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};

use log::trace;

use crate::classes::WEAK_CAPTURE_CELL_CLASS;
use crate::flags::{
    CELL_HAS_COPY_DISPOSE, CELL_IS_GC, CELL_NEEDS_FREE, CLOSURE_REFCOUNT_MASK, CellLayoutKind,
    FIELD_IS_CAPTURE_CELL, FIELD_IS_WEAK,
};
use crate::hooks::{self, hooks};
use crate::refcount::{latching_decr_should_deallocate, latching_incr};

/// Cell keep helper: `keep(dst, src)`, responsible for copying the
/// captured variable itself into the fresh heap cell.
pub type KeepHelper = unsafe extern "C" fn(dst: *mut CaptureCell, src: *mut CaptureCell);

/// Cell destroy helper, run when the heap cell's count reaches zero.
pub type DestroyHelper = unsafe extern "C" fn(cell: *mut CaptureCell);

/// The capture cell header. The captured variable, and optionally the
/// helper pair and layout pointer, follow in the same allocation.
#[repr(C)]
pub struct CaptureCell {
    /// Weak-cell marker slot; unused otherwise outside collector mode.
    pub class_ptr: *const c_void,
    /// The canonical instance. Self on heap cells; on stack cells,
    /// initially self, permanently redirected to the heap twin by
    /// promotion.
    pub forwarding: *mut CaptureCell,
    /// Packed refcount and status word, same encoding as closures.
    pub flags: AtomicI32,
    /// Total cell size: header plus optional helpers, layout, and the
    /// captured variable.
    pub size: u32,
}

/// Helper pair stored directly after the header.
///
/// Present iff [`CELL_HAS_COPY_DISPOSE`] is set.
#[repr(C)]
pub struct CellHelpers {
    /// Copies the captured variable into the heap twin.
    pub keep: KeepHelper,
    /// Destroys the captured variable.
    pub destroy: DestroyHelper,
}

/// Extended layout pointer stored after the helpers.
///
/// Present iff the layout kind is [`CellLayoutKind::Extended`].
#[repr(C)]
pub struct CellLayoutInfo {
    /// Opaque layout byte string.
    pub layout: *const c_char,
}

impl CaptureCell {
    /// Snapshot of the flags word.
    #[inline]
    pub fn flags_value(&self) -> i32 {
        self.flags.load(Ordering::Relaxed)
    }

    /// The layout kind encoded in the flags word.
    #[inline]
    pub fn layout_kind(&self) -> Option<CellLayoutKind> {
        CellLayoutKind::from_flags(self.flags_value())
    }
}

/// The helper pair of a cell that has [`CELL_HAS_COPY_DISPOSE`] set.
#[inline]
unsafe fn cell_helpers(cell: *mut CaptureCell) -> *mut CellHelpers {
    unsafe { cell.add(1) as *mut CellHelpers }
}

/// The layout record of a cell that has helpers and an extended layout.
#[inline]
unsafe fn cell_layout_info(cell: *mut CaptureCell) -> *mut CellLayoutInfo {
    unsafe { cell_helpers(cell).add(1) as *mut CellLayoutInfo }
}

/// Promote-or-retain a capture cell and store the canonical pointer.
///
/// Called (through the dispatch entry point) by enclosing copy helpers
/// for each captured cell reference. On the first promotion the heap
/// twin starts at logical refcount 2: one reference for the caller being
/// fixed up, one for the stack twin whose `forwarding` now points at the
/// heap instance and whose frame unwind will release it.
///
/// On allocation failure `*dest` is left unchanged and no state moves.
pub(crate) unsafe fn assign_cell(dest: *mut c_void, arg: *const c_void, field_flags: i32) {
    let destp = dest as *mut *mut c_void;
    let src = arg as *mut CaptureCell;
    let forwarded = unsafe { (*src).forwarding };
    let forwarded_flags = unsafe { (*forwarded).flags_value() };

    if forwarded_flags & CELL_IS_GC != 0 {
        // Collector-owned: nothing to count, just store below.
    } else if forwarded_flags & CLOSURE_REFCOUNT_MASK == 0 {
        // Refcount zero: this is the unpromoted stack twin.
        let is_weak = field_flags & (FIELD_IS_CAPTURE_CELL | FIELD_IS_WEAK)
            == (FIELD_IS_CAPTURE_CELL | FIELD_IS_WEAK);
        let src_flags = unsafe { (*src).flags_value() };
        let size = unsafe { (*src).size } as usize;

        let copy = unsafe { (hooks().allocate)(size, false, is_weak) } as *mut CaptureCell;
        if copy.is_null() {
            return;
        }
        unsafe {
            (*copy).flags = AtomicI32::new(src_flags | hooks::cell_flag_initial());
            // Heap cells forward to themselves; the stack twin now
            // permanently redirects here.
            (*copy).forwarding = copy;
            (*src).forwarding = copy;
            (*copy).size = (*src).size;
            (*copy).class_ptr = if is_weak {
                WEAK_CAPTURE_CELL_CLASS.as_class_ptr()
            } else {
                std::ptr::null()
            };
        }
        trace!("promoted capture cell {:p} to heap cell {:p} ({} bytes)", src, copy, size);

        if src_flags & CELL_HAS_COPY_DISPOSE != 0 {
            // The keep helper owns copying the captured variable; the
            // runtime carries over the helper pair (and layout pointer)
            // it will need for the rest of the cell's life.
            unsafe {
                let src_helpers = cell_helpers(src);
                let copy_helpers = cell_helpers(copy);
                (*copy_helpers).keep = (*src_helpers).keep;
                (*copy_helpers).destroy = (*src_helpers).destroy;
                if (*src).layout_kind() == Some(CellLayoutKind::Extended) {
                    (*cell_layout_info(copy)).layout = (*cell_layout_info(src)).layout;
                }
                ((*copy_helpers).keep)(copy, src);
            }
        } else {
            // Just bits: move the whole tail, which carries the captured
            // variable and the layout pointer if present.
            let header = mem::size_of::<CaptureCell>();
            unsafe {
                (hooks().memmove)(
                    (copy as *mut u8).add(header) as *mut c_void,
                    (src as *mut u8).add(header) as *mut c_void,
                    size - header,
                );
            }
        }
    } else if forwarded_flags & CELL_NEEDS_FREE != 0 {
        // Already promoted: another reference to the heap twin.
        latching_incr(unsafe { &(*forwarded).flags });
    }

    // Store the canonical pointer; promotion above may have just
    // rewritten it.
    unsafe { (hooks().assign)((*src).forwarding as *mut c_void, destp) };
}

/// Drop a reference to a capture cell.
///
/// Follows `forwarding` first; unpromoted stack cells are the frame's
/// business and are left alone. The decrement that reaches zero runs the
/// destroy helper, then frees the heap cell.
pub(crate) unsafe fn release_cell(arg: *const c_void) {
    let cell = unsafe { (*(arg as *mut CaptureCell)).forwarding };
    let flags = unsafe { (*cell).flags_value() };
    if flags & CELL_NEEDS_FREE == 0 {
        return; // stack, collector-owned, or global
    }
    debug_assert!(flags & CLOSURE_REFCOUNT_MASK != 0);

    if latching_decr_should_deallocate(unsafe { &(*cell).flags }) {
        trace!("deallocating heap capture cell {:p}", cell);
        if flags & CELL_HAS_COPY_DISPOSE != 0 {
            unsafe { ((*cell_helpers(cell)).destroy)(cell) };
        }
        unsafe { (hooks().deallocate)(cell as *const c_void) };
    }
}
