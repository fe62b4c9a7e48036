//! Flag words for closure records and capture cells.
//!
//! The bit positions here are compiler ABI: compiler-emitted records carry
//! these exact values in their `flags` word, and helper functions receive
//! bitwise combinations of the field flags. The reference count is packed
//! into the same word as the status bits, so a logical count of `n` is
//! stored as `2 * n` (bit 0 is reserved for [`CLOSURE_DEALLOCATING`]).

use num_enum::TryFromPrimitive;

// =============================================================================
// Closure record flags
// =============================================================================

/// The final teardown of a heap closure is in progress.
///
/// Set atomically by the decrement that takes the reference count to zero.
pub const CLOSURE_DEALLOCATING: i32 = 0x0001;

/// Mask of the packed reference count (bits 1..15, stored as twice the
/// logical count).
pub const CLOSURE_REFCOUNT_MASK: i32 = 0xfffe;

/// The record lives on the heap and must be freed when the count hits zero.
pub const CLOSURE_NEEDS_FREE: i32 = 1 << 24;

/// The descriptor chain carries copy/dispose helpers.
pub const CLOSURE_HAS_COPY_DISPOSE: i32 = 1 << 25;

/// Captured values include C++ objects with constructors, so the helpers
/// run constructor/destructor code.
pub const CLOSURE_HAS_CTOR: i32 = 1 << 26;

/// The record is owned by the (obsolete) tracing collector.
pub const CLOSURE_IS_GC: i32 = 1 << 27;

/// The record lives in static storage; it is never counted or freed.
pub const CLOSURE_IS_GLOBAL: i32 = 1 << 28;

/// The invoke function returns through a hidden pointer argument.
/// Undefined unless [`CLOSURE_HAS_SIGNATURE`] is also set.
pub const CLOSURE_USE_STRET: i32 = 1 << 29;

/// The descriptor chain carries a signature descriptor.
pub const CLOSURE_HAS_SIGNATURE: i32 = 1 << 30;

/// The signature descriptor's layout string uses the extended encoding
/// rather than the legacy collector encoding.
pub const CLOSURE_HAS_EXTENDED_LAYOUT: i32 = 1 << 31;

// =============================================================================
// Capture cell flags
// =============================================================================

// A cell's reference count shares the closure encoding: bit 0 is the
// deallocating bit and bits 1..15 hold twice the logical count, so
// `CLOSURE_DEALLOCATING` and `CLOSURE_REFCOUNT_MASK` apply to cells too.

/// Mask of the cell layout kind nibble (bits 28..31).
pub const CELL_LAYOUT_MASK: i32 = 0xf << 28;

/// The cell tail ends with an extended layout string pointer.
pub const CELL_LAYOUT_EXTENDED: i32 = 1 << 28;

/// The captured variable holds no object pointers.
pub const CELL_LAYOUT_NON_OBJECT: i32 = 2 << 28;

/// The captured variable is a strong object pointer.
pub const CELL_LAYOUT_STRONG: i32 = 3 << 28;

/// The captured variable is a weak object pointer.
pub const CELL_LAYOUT_WEAK: i32 = 4 << 28;

/// The captured variable is an unretained object pointer.
pub const CELL_LAYOUT_UNRETAINED: i32 = 5 << 28;

/// The cell is owned by the (obsolete) tracing collector.
pub const CELL_IS_GC: i32 = 1 << 27;

/// The cell tail carries keep/destroy helpers.
pub const CELL_HAS_COPY_DISPOSE: i32 = 1 << 25;

/// The cell lives on the heap and must be freed when the count hits zero.
pub const CELL_NEEDS_FREE: i32 = 1 << 24;

/// The layout kind encoded in a capture cell's flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(i32)]
pub enum CellLayoutKind {
    /// An extended layout string follows the cell helpers.
    Extended = 1,
    /// No object pointers among the captured bytes.
    NonObject = 2,
    /// A single strong pointer.
    Strong = 3,
    /// A single weak pointer.
    Weak = 4,
    /// A single unretained pointer.
    Unretained = 5,
}

impl CellLayoutKind {
    /// Decode the layout nibble of a cell flags word.
    ///
    /// Returns `None` when the nibble is zero or a reserved value.
    #[inline]
    pub fn from_flags(flags: i32) -> Option<Self> {
        let nibble = ((flags & CELL_LAYOUT_MASK) as u32 >> 28) as i32;
        Self::try_from(nibble).ok()
    }
}

// =============================================================================
// Field flags passed to the assign/dispose entry points
// =============================================================================

// Compiler-emitted copy helpers call `object_assign` once per captured
// field, passing one of these values (possibly combined with
// `FIELD_IS_WEAK` and `BYREF_CALLER`). The plain values are enumerations,
// not independent bits: `FIELD_IS_CLOSURE` overlaps `FIELD_IS_OBJECT`.

/// The captured field is an object pointer.
pub const FIELD_IS_OBJECT: i32 = 3;

/// The captured field is another closure.
pub const FIELD_IS_CLOSURE: i32 = 7;

/// The captured field is a capture cell (a shared mutable variable).
pub const FIELD_IS_CAPTURE_CELL: i32 = 8;

/// The captured variable was declared weak. Only meaningful combined with
/// one of the other field kinds.
pub const FIELD_IS_WEAK: i32 = 16;

/// The caller is a capture cell's own keep/destroy helper operating on the
/// cell's payload slot, not a closure helper operating on a capture slot.
pub const BYREF_CALLER: i32 = 128;

/// Every bit the dispatch entry points interpret; other bits are ignored.
pub const ALL_COPY_DISPOSE_FLAGS: i32 =
    FIELD_IS_OBJECT | FIELD_IS_CLOSURE | FIELD_IS_CAPTURE_CELL | FIELD_IS_WEAK | BYREF_CALLER;

// =============================================================================
// Extended layout opcodes
// =============================================================================

// Byte operators for layout strings (each byte is 0xPN: operator P,
// parameter N). The runtime stores and hands out these strings without
// parsing them; the constants are exported for integrators that do.

/// N=0 halts the layout; the rest of the record is non-pointer bytes.
pub const LAYOUT_ESCAPE: u8 = 0x0;
/// N bytes of non-object data.
pub const LAYOUT_NON_OBJECT_BYTES: u8 = 0x1;
/// N words of non-object data.
pub const LAYOUT_NON_OBJECT_WORDS: u8 = 0x2;
/// N words of strong pointers.
pub const LAYOUT_STRONG: u8 = 0x3;
/// N words of capture-cell pointers.
pub const LAYOUT_BYREF: u8 = 0x4;
/// N words of weak pointers.
pub const LAYOUT_WEAK: u8 = 0x5;
/// N words of unretained pointers.
pub const LAYOUT_UNRETAINED: u8 = 0x6;
