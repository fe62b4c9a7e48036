//! Closure record and descriptor chain layout.
//!
//! This is the compiler ABI. A lowered closure is a [`ClosureLayout`]
//! header followed by the captured values, with the metadata hanging off
//! the `descriptor` pointer as up to three records concatenated in a fixed
//! order:
//!
//! ```text
//! ClosureDescriptor                  always
//! CopyDisposeDescriptor              iff CLOSURE_HAS_COPY_DISPOSE
//! SignatureDescriptor                iff CLOSURE_HAS_SIGNATURE
//! ```
//!
//! Field order, sizes, and the conditional concatenation must not change:
//! compiler-emitted code reads the `invoke` slot and writes capture slots
//! by fixed byte offsets, and the accessors below walk the chain by
//! `size_of` arithmetic exactly as the compiler laid it down.

use std::ffi::{c_char, c_void};
use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::flags::{CLOSURE_HAS_COPY_DISPOSE, CLOSURE_HAS_SIGNATURE};

/// Compiler-generated copy helper: `copy(dst, src)`.
///
/// Called with the fresh heap record and the stack original; the helper
/// fixes up each captured field, usually by calling back into
/// [`object_assign`](crate::object_assign).
pub type CopyHelper = unsafe extern "C" fn(dst: *mut c_void, src: *const c_void);

/// Compiler-generated dispose helper: `dispose(self)`.
pub type DisposeHelper = unsafe extern "C" fn(closure: *const c_void);

/// The closure record header.
///
/// Captured values follow immediately after this struct; the runtime
/// never interprets them, it only byte-copies the full footprint (of
/// `descriptor.size` bytes) during promotion.
#[repr(C)]
pub struct ClosureLayout {
    /// Storage-class identity. Compilers emit records pointing at the
    /// stack or global class slot; promotion rewrites this to the heap
    /// class installed in the runtime configuration.
    pub class_ptr: *const c_void,
    /// Packed refcount and status word. Only the latching primitives
    /// mutate it once a record is shared.
    pub flags: AtomicI32,
    /// Scratch word. Preserved bit-for-bit across promotion, never
    /// interpreted.
    pub reserved: i32,
    /// The function user code calls. Opaque to the runtime.
    pub invoke: *const c_void,
    /// Head of the descriptor chain.
    pub descriptor: *const ClosureDescriptor,
}

/// First descriptor record: reserved word plus the total record size.
#[repr(C)]
pub struct ClosureDescriptor {
    /// Reserved for future use (always 0).
    pub reserved: usize,
    /// Size in bytes of the whole closure record, header plus captures.
    pub size: usize,
}

/// Second descriptor record: the copy/dispose helper pair.
///
/// Present iff [`CLOSURE_HAS_COPY_DISPOSE`] is set.
#[repr(C)]
pub struct CopyDisposeDescriptor {
    /// Copy helper invoked after promotion byte-copies the record.
    pub copy: CopyHelper,
    /// Dispose helper invoked when the count reaches zero.
    pub dispose: DisposeHelper,
}

/// Third descriptor record: opaque signature and layout strings.
///
/// Present iff [`CLOSURE_HAS_SIGNATURE`] is set. The `layout` string is
/// the extended layout iff [`CLOSURE_HAS_EXTENDED_LAYOUT`] is set on the
/// record, otherwise the legacy collector layout. Either pointer may be
/// null.
///
/// [`CLOSURE_HAS_EXTENDED_LAYOUT`]: crate::flags::CLOSURE_HAS_EXTENDED_LAYOUT
#[repr(C)]
pub struct SignatureDescriptor {
    /// Parameter/return type encoding.
    pub signature: *const c_char,
    /// Captured-pointer layout encoding.
    pub layout: *const c_char,
}

impl ClosureLayout {
    /// Snapshot of the flags word.
    #[inline]
    pub fn flags_value(&self) -> i32 {
        self.flags.load(Ordering::Relaxed)
    }

    /// The copy/dispose record of the descriptor chain, if present.
    ///
    /// # Safety
    ///
    /// `descriptor` must point at a descriptor chain consistent with the
    /// record's flags.
    #[inline]
    pub unsafe fn copy_dispose_descriptor(&self) -> Option<&CopyDisposeDescriptor> {
        if self.flags_value() & CLOSURE_HAS_COPY_DISPOSE == 0 {
            return None;
        }
        let desc = self.descriptor as *const u8;
        let desc = unsafe { desc.add(mem::size_of::<ClosureDescriptor>()) };
        Some(unsafe { &*(desc as *const CopyDisposeDescriptor) })
    }

    /// The signature record of the descriptor chain, if present.
    ///
    /// # Safety
    ///
    /// `descriptor` must point at a descriptor chain consistent with the
    /// record's flags.
    #[inline]
    pub unsafe fn signature_descriptor(&self) -> Option<&SignatureDescriptor> {
        let flags = self.flags_value();
        if flags & CLOSURE_HAS_SIGNATURE == 0 {
            return None;
        }
        let desc = self.descriptor as *const u8;
        let mut desc = unsafe { desc.add(mem::size_of::<ClosureDescriptor>()) };
        if flags & CLOSURE_HAS_COPY_DISPOSE != 0 {
            desc = unsafe { desc.add(mem::size_of::<CopyDisposeDescriptor>()) };
        }
        Some(unsafe { &*(desc as *const SignatureDescriptor) })
    }

    /// Whether the record carries a non-null layout string.
    ///
    /// # Safety
    ///
    /// Same requirements as [`signature_descriptor`](Self::signature_descriptor).
    #[inline]
    pub unsafe fn has_layout(&self) -> bool {
        match unsafe { self.signature_descriptor() } {
            Some(desc) => !desc.layout.is_null(),
            None => false,
        }
    }

    /// Run the copy helper, if any, with `dst` as the fresh heap record.
    ///
    /// # Safety
    ///
    /// `dst` must be a byte-copy of this record with at least the full
    /// `descriptor.size` footprint.
    pub(crate) unsafe fn call_copy_helper(&self, dst: *mut c_void) {
        if let Some(desc) = unsafe { self.copy_dispose_descriptor() } {
            unsafe { (desc.copy)(dst, self as *const ClosureLayout as *const c_void) };
        }
    }

    /// Run the dispose helper, if any.
    ///
    /// # Safety
    ///
    /// Must only be called once, by the owner of the final teardown.
    pub(crate) unsafe fn call_dispose_helper(&self) {
        if let Some(desc) = unsafe { self.copy_dispose_descriptor() } {
            unsafe { (desc.dispose)(self as *const ClosureLayout as *const c_void) };
        }
    }
}
