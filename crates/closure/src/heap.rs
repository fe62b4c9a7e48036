//! Smart pointer over a promoted closure record.

use std::ffi::{CStr, c_void};
use std::fmt;
use std::ptr::NonNull;

use closure_rt::{
    ClosureLayout, closure_size, copy_closure, describe, is_deallocating, release_closure,
    signature, try_retain, uses_struct_return,
};

/// An owned reference to a heap closure record.
///
/// Cloning takes another reference through the runtime's copy entry
/// point; dropping releases it. When the last `HeapClosure` (and any raw
/// reference) goes away, the record's dispose helper runs and the memory
/// is freed.
///
/// The captured state behind the record is untyped here, so this type is
/// neither `Send` nor `Sync`; the typed wrappers in [`typed`](crate::typed)
/// restore those guarantees where the captures allow them.
pub struct HeapClosure {
    ptr: NonNull<c_void>,
}

impl HeapClosure {
    /// Copy a closure record, promoting it if it still lives on the
    /// stack.
    ///
    /// Returns `None` for null input or allocation failure.
    ///
    /// # Safety
    ///
    /// `closure` must be null or point to a valid closure record whose
    /// descriptor chain matches its flags.
    pub unsafe fn copy_from(closure: *const c_void) -> Option<Self> {
        let heap = unsafe { copy_closure(closure) };
        NonNull::new(heap).map(|ptr| Self { ptr })
    }

    /// Adopt a reference to an already-promoted record.
    ///
    /// # Safety
    ///
    /// The pointer must be null or a valid heap closure record, and the
    /// caller transfers one reference — the record will be released when
    /// this value drops.
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// The raw record pointer.
    #[inline]
    pub fn as_ptr(&self) -> *const c_void {
        self.ptr.as_ptr()
    }

    /// The embedded invoke function pointer. Calling it is the caller's
    /// business, with whatever signature the closure was lowered with.
    #[inline]
    pub fn invoke_ptr(&self) -> *const c_void {
        let record = self.ptr.as_ptr() as *const ClosureLayout;
        unsafe { (*record).invoke }
    }

    /// Total record size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        unsafe { closure_size(self.as_ptr()) }
    }

    /// The type-encoding string, if the record carries one.
    pub fn signature(&self) -> Option<&CStr> {
        let sig = unsafe { signature(self.as_ptr()) };
        if sig.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(sig) })
        }
    }

    /// Whether the invoke function returns through a hidden pointer
    /// argument.
    #[inline]
    pub fn uses_struct_return(&self) -> bool {
        unsafe { uses_struct_return(self.as_ptr()) }
    }

    /// Whether the record has begun its final teardown.
    #[inline]
    pub fn is_deallocating(&self) -> bool {
        unsafe { is_deallocating(self.as_ptr()) }
    }

    /// Take another reference only if the record is not already tearing
    /// down. The `None` case is what a weak-reference cache sees when it
    /// loses the race against the last release.
    pub fn try_clone(&self) -> Option<Self> {
        if unsafe { try_retain(self.as_ptr()) } {
            Some(Self { ptr: self.ptr })
        } else {
            None
        }
    }

    /// Hand the reference to a caller that will balance it manually with
    /// the runtime's release entry point.
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }
}

impl Clone for HeapClosure {
    fn clone(&self) -> Self {
        // On a heap record the copy entry point just takes a reference
        // and hands the same pointer back.
        let ptr = unsafe { copy_closure(self.as_ptr()) };
        debug_assert_eq!(ptr, self.ptr.as_ptr());
        Self { ptr: self.ptr }
    }
}

impl Drop for HeapClosure {
    fn drop(&mut self) {
        unsafe { release_closure(self.as_ptr()) };
    }
}

impl fmt::Debug for HeapClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&unsafe { describe(self.as_ptr()) })
    }
}

impl PartialEq for HeapClosure {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for HeapClosure {}
