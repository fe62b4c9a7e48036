//! Safe wrappers over capture cells.
//!
//! A [`SharedVar`] is the runtime's view of a variable captured by shared
//! mutable reference: a cell record in the stack storage class, promoted
//! to the heap the first time it is shared. [`share`](SharedVar::share)
//! performs exactly the fixup an enclosing closure's copy helper would
//! request, and the [`SharedRef`] it returns releases its reference on
//! drop the way a dispose helper would.
//!
//! Access always dereferences the forwarding pointer first, so the
//! variable reads the same through the original and through every
//! reference, before and after promotion. These types are deliberately
//! not `Send`: the runtime's counting is atomic, but the variable itself
//! is unsynchronized.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::mem::{self, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicI32;

use closure_rt::{
    CELL_HAS_COPY_DISPOSE, CaptureCell, CellHelpers, FIELD_IS_CAPTURE_CELL, object_assign,
    object_dispose,
};

#[repr(C)]
struct CellRecord<T> {
    header: CaptureCell,
    helpers: CellHelpers,
    value: UnsafeCell<ManuallyDrop<T>>,
}

// UnsafeCell is transparent over its payload, so the value field can be
// addressed as a bare ManuallyDrop<T> even before it is initialized.
unsafe fn value_ptr<T>(record: *mut CellRecord<T>) -> *mut ManuallyDrop<T> {
    unsafe { &raw mut (*record).value as *mut ManuallyDrop<T> }
}

unsafe extern "C" fn keep_value<T>(dst: *mut CaptureCell, src: *mut CaptureCell) {
    let dst = dst as *mut CellRecord<T>;
    let src = src as *mut CellRecord<T>;
    // Move the variable into the heap twin. The stack twin's storage is
    // dead from here on: every access goes through forwarding.
    unsafe { ptr::write(value_ptr(dst), ptr::read(value_ptr(src))) };
}

unsafe extern "C" fn destroy_value<T>(cell: *mut CaptureCell) {
    let record = cell as *mut CellRecord<T>;
    unsafe { ManuallyDrop::drop(&mut *value_ptr(record)) };
}

/// A shared mutable variable backed by a capture cell.
pub struct SharedVar<T: 'static> {
    record: Box<CellRecord<T>>,
}

impl<T: 'static> SharedVar<T> {
    /// Create the cell in the stack storage class, holding `value`.
    pub fn new(value: T) -> Self {
        let mut record = Box::new(CellRecord {
            header: CaptureCell {
                class_ptr: ptr::null(),
                forwarding: ptr::null_mut(),
                flags: AtomicI32::new(CELL_HAS_COPY_DISPOSE),
                size: mem::size_of::<CellRecord<T>>() as u32,
            },
            helpers: CellHelpers {
                keep: keep_value::<T>,
                destroy: destroy_value::<T>,
            },
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });
        record.header.forwarding = &mut record.header;
        Self { record }
    }

    /// The raw cell address, as an enclosing closure would capture it.
    #[inline]
    pub fn cell_ptr(&self) -> *const c_void {
        &self.record.header as *const CaptureCell as *const c_void
    }

    /// Whether the cell has been promoted to the heap.
    #[inline]
    pub fn is_promoted(&self) -> bool {
        !ptr::eq(
            self.record.header.forwarding,
            &self.record.header as *const CaptureCell,
        )
    }

    /// Take a counted reference, promoting the cell on first use.
    ///
    /// This is the fixup a copy helper performs for a captured cell.
    /// Returns `None` on allocation failure.
    pub fn share(&mut self) -> Option<SharedRef<T>> {
        let mut slot: *mut c_void = ptr::null_mut();
        unsafe {
            object_assign(
                &mut slot as *mut *mut c_void as *mut c_void,
                self.cell_ptr(),
                FIELD_IS_CAPTURE_CELL,
            );
        }
        NonNull::new(slot as *mut CellRecord<T>).map(|cell| SharedRef { cell })
    }

    fn canonical(&self) -> *mut CellRecord<T> {
        self.record.header.forwarding as *mut CellRecord<T>
    }

    /// Read the variable through the forwarding pointer.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        unsafe { *ptr::read(value_ptr(self.canonical())) }
    }

    /// Write the variable through the forwarding pointer.
    pub fn set(&mut self, value: T)
    where
        T: Copy,
    {
        unsafe { *value_ptr(self.canonical()) = ManuallyDrop::new(value) };
    }

    /// Run `f` with a view of the variable, wherever it currently lives.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(unsafe { &*value_ptr(self.canonical()) })
    }
}

impl<T: 'static> Drop for SharedVar<T> {
    fn drop(&mut self) {
        if self.is_promoted() {
            // The stack cleanup a compiler emits when the frame dies:
            // release the frame's reference to the heap twin. The value
            // here was moved out by the keep helper.
            unsafe { object_dispose(self.cell_ptr(), FIELD_IS_CAPTURE_CELL) };
        } else {
            // Never shared: the variable dies with the frame.
            unsafe { ManuallyDrop::drop(&mut *value_ptr(&mut *self.record)) };
        }
    }
}

/// A counted reference to a promoted capture cell, as held by a copied
/// closure.
pub struct SharedRef<T: 'static> {
    cell: NonNull<CellRecord<T>>,
}

impl<T: 'static> SharedRef<T> {
    /// Read the variable.
    pub fn get(&self) -> T
    where
        T: Copy,
    {
        unsafe { *ptr::read(value_ptr(self.cell.as_ptr())) }
    }

    /// Write the variable.
    pub fn set(&self, value: T)
    where
        T: Copy,
    {
        unsafe { *value_ptr(self.cell.as_ptr()) = ManuallyDrop::new(value) };
    }

    /// Run `f` with a view of the variable.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(unsafe { &*value_ptr(self.cell.as_ptr()) })
    }

    /// The heap cell's header, for inspecting flags in tests and
    /// diagnostics.
    #[inline]
    pub fn cell(&self) -> &CaptureCell {
        unsafe { &(*self.cell.as_ptr()).header }
    }
}

impl<T: 'static> Clone for SharedRef<T> {
    fn clone(&self) -> Self {
        // Another fixup against the (already promoted) cell: the runtime
        // finds the heap twin and takes a reference.
        let mut slot: *mut c_void = ptr::null_mut();
        unsafe {
            object_assign(
                &mut slot as *mut *mut c_void as *mut c_void,
                self.cell.as_ptr() as *const c_void,
                FIELD_IS_CAPTURE_CELL,
            );
        }
        debug_assert_eq!(slot, self.cell.as_ptr() as *mut c_void);
        Self { cell: self.cell }
    }
}

impl<T: 'static> Drop for SharedRef<T> {
    fn drop(&mut self) {
        unsafe { object_dispose(self.cell.as_ptr() as *const c_void, FIELD_IS_CAPTURE_CELL) };
    }
}
