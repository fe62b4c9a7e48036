//! Typed closure records wrapping Rust closures.
//!
//! Each type here is a complete compiler-style lowering of one invoke
//! shape: a record embedding a shared Rust closure, a descriptor whose
//! copy/dispose helpers manage the capture's reference count, and an
//! `extern "C"` invoke shim. The records start life in the stack storage
//! class; `copy` promotes them through the runtime exactly as a compiler
//! emitted closure would be promoted.

use std::ffi::c_void;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::AtomicI32;

use closure_rt::{
    CLOSURE_HAS_COPY_DISPOSE, ClosureDescriptor, ClosureLayout, CopyDisposeDescriptor,
    STACK_CLOSURE_CLASS,
};

use crate::heap::HeapClosure;

#[repr(C)]
struct HelperedDescriptor {
    base: ClosureDescriptor,
    helpers: CopyDisposeDescriptor,
}

/// Take one additional reference on a shared capture, for a record that
/// now also points at it.
///
/// # Safety
///
/// `ptr` must have come from `Arc::into_raw` and still be live.
unsafe fn bump_capture<T: ?Sized>(ptr: *const T) {
    let arc = unsafe { Arc::from_raw(ptr) };
    mem::forget(arc.clone());
    mem::forget(arc);
}

macro_rules! typed_closure {
    (
        $(#[$doc:meta])*
        $stack:ident / $heap:ident, $fn_trait:ty, $desc:ident,
        invoke $invoke:ident ( $($arg:ident : $arg_ty:ty),* ),
        copy $copy:ident, dispose $dispose:ident
    ) => {
        $(#[$doc])*
        #[repr(C)]
        pub struct $stack {
            header: ClosureLayout,
            captured: *const $fn_trait,
        }

        unsafe extern "C" fn $invoke(closure: *mut c_void $(, $arg: $arg_ty)*) {
            let this = unsafe { &*(closure as *const $stack) };
            (unsafe { &*this.captured })($($arg),*)
        }

        unsafe extern "C" fn $copy(_dst: *mut c_void, src: *const c_void) {
            let src = unsafe { &*(src as *const $stack) };
            // The byte-copy already duplicated the capture pointer into
            // the heap record; give that record its own reference.
            unsafe { bump_capture(src.captured) };
        }

        unsafe extern "C" fn $dispose(closure: *const c_void) {
            let this = unsafe { &*(closure as *const $stack) };
            drop(unsafe { Arc::from_raw(this.captured) });
        }

        static $desc: HelperedDescriptor = HelperedDescriptor {
            base: ClosureDescriptor {
                reserved: 0,
                size: mem::size_of::<$stack>(),
            },
            helpers: CopyDisposeDescriptor {
                copy: $copy,
                dispose: $dispose,
            },
        };

        impl $stack {
            /// Wrap a Rust closure in a stack closure record.
            pub fn new<F>(f: F) -> Self
            where
                F: Fn($($arg_ty),*) + Send + Sync + 'static,
            {
                let captured: Arc<$fn_trait> = Arc::new(f);
                Self {
                    header: ClosureLayout {
                        class_ptr: STACK_CLOSURE_CLASS.as_class_ptr(),
                        flags: AtomicI32::new(CLOSURE_HAS_COPY_DISPOSE),
                        reserved: 0,
                        invoke: $invoke as *const c_void,
                        descriptor: &$desc.base,
                    },
                    captured: Arc::into_raw(captured),
                }
            }

            /// The raw record pointer, for handing to code that expects a
            /// compiler-emitted closure.
            #[inline]
            pub fn as_ptr(&self) -> *const c_void {
                self as *const Self as *const c_void
            }

            /// Invoke through the embedded function pointer, the way user
            /// code calls a closure record.
            pub fn call(&self $(, $arg: $arg_ty)*) {
                let invoke: unsafe extern "C" fn(*mut c_void $(, $arg_ty)*) =
                    unsafe { mem::transmute(self.header.invoke) };
                unsafe { invoke(self.as_ptr() as *mut c_void $(, $arg)*) };
            }

            /// Promote this record to the heap.
            ///
            /// Each call on a stack record produces an independent heap
            /// record sharing the same capture. Returns `None` on
            /// allocation failure.
            pub fn copy(&self) -> Option<$heap> {
                unsafe { HeapClosure::copy_from(self.as_ptr()) }.map(|inner| $heap { inner })
            }
        }

        impl Drop for $stack {
            fn drop(&mut self) {
                // The frame owns its capture reference whether or not the
                // record was ever promoted; heap copies took their own.
                drop(unsafe { Arc::from_raw(self.captured) });
            }
        }

        /// The heap-promoted counterpart of the stack record.
        #[derive(Clone, Debug)]
        pub struct $heap {
            inner: HeapClosure,
        }

        impl $heap {
            /// Invoke through the embedded function pointer.
            pub fn call(&self $(, $arg: $arg_ty)*) {
                let invoke: unsafe extern "C" fn(*mut c_void $(, $arg_ty)*) =
                    unsafe { mem::transmute(self.inner.invoke_ptr()) };
                unsafe { invoke(self.inner.as_ptr() as *mut c_void $(, $arg)*) };
            }

            /// The untyped reference underneath.
            #[inline]
            pub fn as_heap(&self) -> &HeapClosure {
                &self.inner
            }

            /// Give up the typing and keep the reference.
            pub fn into_heap(self) -> HeapClosure {
                self.inner
            }
        }

        // SAFETY: the capture is `Send + Sync` by construction, the
        // record's refcount traffic is atomic, and invocation only
        // touches the capture through a shared reference.
        unsafe impl Send for $heap {}
        unsafe impl Sync for $heap {}
    };
}

typed_closure! {
    /// A closure record for `fn()`-shaped invokes.
    VoidClosure / HeapVoidClosure, dyn Fn() + Send + Sync, VOID_DESC,
    invoke invoke_void (),
    copy copy_void, dispose dispose_void
}

typed_closure! {
    /// A closure record for invokes taking one opaque pointer argument,
    /// the shape completion handlers are lowered to.
    PtrClosure / HeapPtrClosure, dyn Fn(*mut c_void) + Send + Sync, PTR_DESC,
    invoke invoke_with_ptr (arg: *mut c_void),
    copy copy_with_ptr, dispose dispose_with_ptr
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_record_layout_matches_the_abi_header() {
        // header (32) + fat capture pointer (16)
        assert_eq!(mem::size_of::<VoidClosure>(), 48);
        assert_eq!(VOID_DESC.base.size, mem::size_of::<VoidClosure>());
    }

    #[test]
    fn test_stack_call_runs_the_capture() {
        let hits = Arc::new(AtomicUsize::new(0));
        let witness = Arc::clone(&hits);
        let closure = VoidClosure::new(move || {
            witness.fetch_add(1, Ordering::SeqCst);
        });
        closure.call();
        closure.call();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_drop_without_promotion_releases_the_capture() {
        let capture = Arc::new(());
        let held = Arc::clone(&capture);
        let closure = VoidClosure::new(move || {
            let _ = &held;
        });
        assert_eq!(Arc::strong_count(&capture), 2);
        drop(closure);
        assert_eq!(Arc::strong_count(&capture), 1);
    }

    #[test]
    fn test_ptr_closure_receives_its_argument() {
        let seen = Arc::new(AtomicUsize::new(0));
        let witness = Arc::clone(&seen);
        let closure = PtrClosure::new(move |arg: *mut c_void| {
            witness.store(arg as usize, Ordering::SeqCst);
        });
        closure.call(0x5a5a as *mut c_void);
        assert_eq!(seen.load(Ordering::SeqCst), 0x5a5a);
    }
}
