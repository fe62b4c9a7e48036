//! Safe wrappers over the closure runtime.
//!
//! The `closure-rt` crate speaks the raw compiler ABI: untyped records,
//! raw pointers, flag words. This crate layers ownership back on top:
//!
//! - [`HeapClosure`] — a smart pointer over a promoted record whose
//!   clone/drop are the runtime's copy/release,
//! - [`VoidClosure`] / [`PtrClosure`] — complete typed lowerings of Rust
//!   closures into closure records, with helpers that manage the
//!   capture's lifetime through the runtime's dispatch contract,
//! - [`SharedVar`] / [`SharedRef`] — a capture cell holding a shared
//!   mutable variable, promoted on first share and accessed through its
//!   forwarding pointer from every side.

mod heap;
mod shared_var;
mod typed;

pub use heap::HeapClosure;
pub use shared_var::{SharedRef, SharedVar};
pub use typed::{HeapPtrClosure, HeapVoidClosure, PtrClosure, VoidClosure};

// The raw surface stays reachable for callers that need to hand records
// to compiler-emitted code.
pub use closure_rt as rt;
