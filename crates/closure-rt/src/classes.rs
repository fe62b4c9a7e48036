//! Class-identity storage for closure records and capture cells.
//!
//! Each slot is an opaque region whose *address* serves as a storage-class
//! marker in record headers. An object-system integrator may later fill a
//! slot in to turn it into a real class object; until then the contents
//! stay zeroed and the runtime only ever compares addresses.

use std::cell::UnsafeCell;
use std::ffi::c_void;

/// Raw backing storage for one class identity.
#[repr(C)]
pub struct ClassSlot(UnsafeCell<[usize; 32]>);

// SAFETY: the runtime never reads or writes through the cell; the address
// alone is the identity. Interior mutation belongs to the integrator,
// which installs class data before any record is created.
unsafe impl Sync for ClassSlot {}

impl ClassSlot {
    const fn new() -> Self {
        Self(UnsafeCell::new([0; 32]))
    }

    /// The address used as a class pointer in record headers.
    #[inline]
    pub fn as_class_ptr(&self) -> *const c_void {
        self.0.get() as *const c_void
    }

    /// Mutable access to the backing words, for the integrator to
    /// populate.
    ///
    /// # Safety
    ///
    /// Must happen before any record carrying this class is created, and
    /// from a single thread.
    pub unsafe fn storage(&self) -> *mut [usize; 32] {
        self.0.get()
    }
}

/// Initial class of a compiler-emitted stack closure.
pub static STACK_CLOSURE_CLASS: ClassSlot = ClassSlot::new();

/// Initial class of a compiler-emitted global closure.
pub static GLOBAL_CLOSURE_CLASS: ClassSlot = ClassSlot::new();

/// Class installed on promotion to the heap.
pub static HEAP_CLOSURE_CLASS: ClassSlot = ClassSlot::new();

/// Class installed on promotion when the collector owns the copy.
pub static GC_HEAP_CLOSURE_CLASS: ClassSlot = ClassSlot::new();

/// Collector-owned class whose finalizer runs the dispose helper, used
/// for records whose captures carry constructors.
pub static GC_FINALIZING_HEAP_CLOSURE_CLASS: ClassSlot = ClassSlot::new();

/// Class installed on heap capture cells whose variable was declared
/// weak, so the cell gets weak scanning.
pub static WEAK_CAPTURE_CELL_CLASS: ClassSlot = ClassSlot::new();
