//! The integration vtable and runtime mode configuration.
//!
//! Allocation, pointer assignment, and object retain/release flow through
//! a process-wide table of function pointers. The defaults make the
//! runtime self-contained (system malloc/free, plain stores, no-op object
//! hooks); an integrator — an object runtime, a foundation layer, or the
//! obsolete tracing collector — may replace entries once, early, before
//! any closure is copied.
//!
//! The table is published through a single atomic pointer: readers load it
//! on every call, writers install a fresh table. Replacement is
//! write-once-early; superseded tables stay live so in-flight readers
//! never observe a torn entry.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, Ordering};

use log::debug;

use crate::classes::{
    GC_FINALIZING_HEAP_CLOSURE_CLASS, GC_HEAP_CLOSURE_CLASS, HEAP_CLOSURE_CLASS,
};
use crate::flags::{CELL_IS_GC, CELL_NEEDS_FREE};

/// Allocator hook: `(size, initial_count_is_one, is_object)`.
///
/// The extra booleans only matter to a collector; the default ignores
/// them.
pub type AllocFn = unsafe extern "C" fn(size: usize, initial_count_is_one: bool, is_object: bool) -> *mut c_void;

/// Deallocator hook. Receives only the record pointer, so the default can
/// be a plain `free`.
pub type DeallocFn = unsafe extern "C" fn(ptr: *const c_void);

/// Strong-assignment hook: store `value` through `dest`.
pub type AssignFn = unsafe extern "C" fn(value: *mut c_void, dest: *mut *mut c_void);

/// Weak-assignment hook.
pub type AssignWeakFn = unsafe extern "C" fn(value: *const c_void, dest: *mut c_void);

/// Barrier-aware memmove hook.
pub type MemmoveFn = unsafe extern "C" fn(dst: *mut c_void, src: *mut c_void, size: usize);

/// Collector notification that a record gained or lost its own refcount.
pub type SetHasRefcountFn = unsafe extern "C" fn(ptr: *const c_void, has_refcount: bool);

/// Object retain/release/finalize hook.
pub type ObjectFn = unsafe extern "C" fn(object: *const c_void);

/// The process-wide set of integration hooks.
#[derive(Clone, Copy)]
pub struct HookTable {
    /// Allocates heap records during promotion.
    pub allocate: AllocFn,
    /// Frees heap records at the final decrement.
    pub deallocate: DeallocFn,
    /// Stores strong pointers into capture slots.
    pub assign: AssignFn,
    /// Stores weak pointers into capture slots.
    pub assign_weak: AssignWeakFn,
    /// Moves the cell tail when a cell has no keep helper.
    pub memmove: MemmoveFn,
    /// Tells the collector a record gained/lost its own refcount.
    pub set_has_refcount: SetHasRefcountFn,
    /// Retains a captured object.
    pub retain_object: ObjectFn,
    /// Releases a captured object.
    pub release_object: ObjectFn,
    /// Runs the object system's finalizer lookup on a dying closure.
    pub destruct_instance: ObjectFn,
}

/// Versioned callback pack for [`use_rr2`].
#[repr(C)]
pub struct ObjectCallbacks {
    /// `size_of::<ObjectCallbacks>()`, for future versioning.
    pub size: usize,
    /// Object retain.
    pub retain: ObjectFn,
    /// Object release.
    pub release: ObjectFn,
    /// Finalizer lookup invoked on a dying closure record.
    pub destruct_instance: ObjectFn,
}

// =============================================================================
// Defaults
// =============================================================================

unsafe extern "C" fn allocate_default(size: usize, _count_is_one: bool, _is_object: bool) -> *mut c_void {
    unsafe { libc::malloc(size) }
}

unsafe extern "C" fn deallocate_default(ptr: *const c_void) {
    unsafe { libc::free(ptr as *mut c_void) };
}

unsafe extern "C" fn assign_default(value: *mut c_void, dest: *mut *mut c_void) {
    unsafe { *dest = value };
}

unsafe extern "C" fn assign_weak_default(value: *const c_void, dest: *mut c_void) {
    unsafe { *(dest as *mut *const c_void) = value };
}

unsafe extern "C" fn memmove_default(dst: *mut c_void, src: *mut c_void, size: usize) {
    unsafe { ptr::copy(src as *const u8, dst as *mut u8, size) };
}

unsafe extern "C" fn set_has_refcount_default(_ptr: *const c_void, _has_refcount: bool) {}

unsafe extern "C" fn deallocate_noop(_ptr: *const c_void) {}

unsafe extern "C" fn object_noop(_object: *const c_void) {}

static DEFAULT_HOOKS: HookTable = HookTable {
    allocate: allocate_default,
    deallocate: deallocate_default,
    assign: assign_default,
    assign_weak: assign_weak_default,
    memmove: memmove_default,
    set_has_refcount: set_has_refcount_default,
    retain_object: object_noop,
    release_object: object_noop,
    destruct_instance: object_noop,
};

// =============================================================================
// Published state
// =============================================================================

static HOOKS: AtomicPtr<HookTable> =
    AtomicPtr::new(&DEFAULT_HOOKS as *const HookTable as *mut HookTable);

static IS_GC: AtomicBool = AtomicBool::new(false);

// Null means "the non-GC heap class"; resolved lazily because slot
// addresses are not const-evaluable.
static COPY_CLASS: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static FINALIZING_COPY_CLASS: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

// NEEDS_FREE with logical refcount 2: one reference for the caller, one
// for the stack twin that forwards through the heap cell.
static CELL_FLAG_INITIAL: AtomicI32 = AtomicI32::new(CELL_NEEDS_FREE | 4);

/// The current hook table.
#[inline]
pub fn hooks() -> &'static HookTable {
    // SAFETY: the pointer always refers to a table with static lifetime;
    // installed tables are intentionally never reclaimed.
    unsafe { &*HOOKS.load(Ordering::Acquire) }
}

/// Whether the collector owns heap records.
#[inline]
pub(crate) fn is_gc() -> bool {
    IS_GC.load(Ordering::Acquire)
}

/// Class installed on closures promoted to the heap.
#[inline]
pub(crate) fn copy_class() -> *const c_void {
    let class = COPY_CLASS.load(Ordering::Acquire);
    if class.is_null() {
        HEAP_CLOSURE_CLASS.as_class_ptr()
    } else {
        class
    }
}

/// Class installed on collector-owned closures whose captures carry
/// constructors.
#[inline]
pub(crate) fn finalizing_copy_class() -> *const c_void {
    let class = FINALIZING_COPY_CLASS.load(Ordering::Acquire);
    if class.is_null() {
        HEAP_CLOSURE_CLASS.as_class_ptr()
    } else {
        class
    }
}

/// Initial flags word for a freshly promoted capture cell.
#[inline]
pub(crate) fn cell_flag_initial() -> i32 {
    CELL_FLAG_INITIAL.load(Ordering::Acquire)
}

fn install(table: HookTable) {
    let table = Box::into_raw(Box::new(table));
    HOOKS.store(table, Ordering::Release);
}

// =============================================================================
// Integrator entry points
// =============================================================================

/// Turn on collector mode, replacing the allocation and store hooks.
///
/// Must be called before any closure is copied; afterwards promotions tag
/// records with the collector classes and cells start uncounted.
///
/// # Safety
///
/// All supplied hooks must be safe to call with the argument contracts of
/// the defaults they replace, for the remaining lifetime of the process.
pub unsafe fn use_gc(
    alloc: AllocFn,
    set_has_refcount: SetHasRefcountFn,
    assign: AssignFn,
    assign_weak: AssignWeakFn,
    memmove: MemmoveFn,
) {
    debug!("installing collector hooks");
    IS_GC.store(true, Ordering::Release);
    COPY_CLASS.store(GC_HEAP_CLOSURE_CLASS.as_class_ptr() as *mut c_void, Ordering::Release);
    FINALIZING_COPY_CLASS.store(
        GC_FINALIZING_HEAP_CLOSURE_CLASS.as_class_ptr() as *mut c_void,
        Ordering::Release,
    );
    // Collector-owned cells carry no refcount of their own.
    CELL_FLAG_INITIAL.store(CELL_IS_GC, Ordering::Release);
    install(HookTable {
        allocate: alloc,
        deallocate: deallocate_noop,
        assign,
        assign_weak,
        memmove,
        set_has_refcount,
        retain_object: object_noop,
        release_object: object_noop,
        destruct_instance: hooks().destruct_instance,
    });
}

/// Install object retain/release callbacks from the object runtime.
///
/// # Safety
///
/// `retain` and `release` must be safe to call with any pointer the
/// compiler passes as a captured object, for the remaining lifetime of
/// the process.
pub unsafe fn use_rr(retain: ObjectFn, release: ObjectFn) {
    debug!("installing object retain/release hooks");
    let mut table = *hooks();
    table.retain_object = retain;
    table.release_object = release;
    install(table);
}

/// Install object callbacks from a versioned pack, including the
/// finalizer lookup run on dying closures.
///
/// # Safety
///
/// Same contract as [`use_rr`], extended to `destruct_instance`.
pub unsafe fn use_rr2(callbacks: &ObjectCallbacks) {
    debug!("installing versioned object callbacks");
    let mut table = *hooks();
    table.retain_object = callbacks.retain;
    table.release_object = callbacks.release;
    table.destruct_instance = callbacks.destruct_instance;
    install(table);
}
