//! Runtime support for compiler-emitted closure objects.
//!
//! Compilers lower source-level closures into a record pairing an invoke
//! function pointer with the captured values, plus — for variables
//! captured by shared mutable reference — a separately allocated capture
//! cell. This crate owns everything that happens to those structures
//! after lowering:
//!
//! - storage-class transitions (stack records promoted to the heap on
//!   the first copy; global records exempt from the lifecycle),
//! - atomic reference counting packed into the record's flags word,
//! - the capture-cell forwarding protocol that keeps every user of a
//!   shared variable looking at the same storage,
//! - dispatch into the compiler-generated copy/dispose helpers that give
//!   captures their deep semantics.
//!
//! Invoking a closure is not the runtime's business: user code calls the
//! embedded function pointer directly.
//!
//! # ABI
//!
//! The record layouts in [`layout`] and [`cell`], the flag-bit positions
//! in [`flags`], and the ×2 refcount encoding are a compiler contract.
//! Compiler-emitted code reads the invoke slot and writes capture slots
//! by fixed byte offsets, so none of it may be rearranged.
//!
//! # Safety
//!
//! This crate is intentionally unsafe. The compiler-facing entry points
//! take raw pointers to records whose shape cannot be checked; callers
//! uphold the ABI. Safe wrappers live in the `closure` crate.

mod cell;
mod classes;
mod closure;
mod dispatch;
mod flags;
mod hooks;
mod introspect;
mod layout;
mod refcount;

// Record and descriptor layouts
pub use layout::{
    ClosureDescriptor, ClosureLayout, CopyDisposeDescriptor, CopyHelper, DisposeHelper,
    SignatureDescriptor,
};

// Capture cells
pub use cell::{CaptureCell, CellHelpers, CellLayoutInfo, DestroyHelper, KeepHelper};

// Flag words
pub use flags::{
    ALL_COPY_DISPOSE_FLAGS, BYREF_CALLER, CELL_HAS_COPY_DISPOSE, CELL_IS_GC,
    CELL_LAYOUT_EXTENDED, CELL_LAYOUT_MASK, CELL_LAYOUT_NON_OBJECT, CELL_LAYOUT_STRONG,
    CELL_LAYOUT_UNRETAINED, CELL_LAYOUT_WEAK, CELL_NEEDS_FREE, CLOSURE_DEALLOCATING,
    CLOSURE_HAS_COPY_DISPOSE, CLOSURE_HAS_CTOR, CLOSURE_HAS_EXTENDED_LAYOUT,
    CLOSURE_HAS_SIGNATURE, CLOSURE_IS_GC, CLOSURE_IS_GLOBAL, CLOSURE_NEEDS_FREE,
    CLOSURE_REFCOUNT_MASK, CLOSURE_USE_STRET, CellLayoutKind, FIELD_IS_CAPTURE_CELL,
    FIELD_IS_CLOSURE, FIELD_IS_OBJECT, FIELD_IS_WEAK, LAYOUT_BYREF, LAYOUT_ESCAPE,
    LAYOUT_NON_OBJECT_BYTES, LAYOUT_NON_OBJECT_WORDS, LAYOUT_STRONG, LAYOUT_UNRETAINED,
    LAYOUT_WEAK,
};

// Class identity
pub use classes::{
    ClassSlot, GC_FINALIZING_HEAP_CLOSURE_CLASS, GC_HEAP_CLOSURE_CLASS, GLOBAL_CLOSURE_CLASS,
    HEAP_CLOSURE_CLASS, STACK_CLOSURE_CLASS, WEAK_CAPTURE_CELL_CLASS,
};

// Lifecycle entry points
pub use closure::{
    copy_closure, copy_closure_collectable, destroy_closure, is_deallocating, release_closure,
    try_retain,
};

// Helper dispatch entry points
pub use dispatch::{object_assign, object_dispose};

// Integration vtable
pub use hooks::{
    AllocFn, AssignFn, AssignWeakFn, DeallocFn, HookTable, MemmoveFn, ObjectCallbacks, ObjectFn,
    SetHasRefcountFn, hooks, use_gc, use_rr, use_rr2,
};

// Introspection
pub use introspect::{
    closure_size, describe, extended_layout, gc_layout, has_signature, signature,
    uses_struct_return,
};
