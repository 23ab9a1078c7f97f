//! # Predefined Datatypes
//!
//! Fixed descriptor table for the predefined MPI datatypes. A datatype is
//! just `{ id, byte size }`; derived datatypes are out of scope, so validity
//! means "one of the predefined entries". `BYTE` is the wildcard of the
//! matching rule: it is compatible with every other type.

use crate::error::MpiError;
use crate::UNDEFINED;

/// Compact datatype descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datatype {
    id: i16,
    size: usize,
}

impl Datatype {
    const fn predefined(id: i16, size: usize) -> Self {
        Datatype { id, size }
    }

    /// Dense id of this datatype, `-1` for [`DATATYPE_NULL`].
    pub fn id(&self) -> i16 {
        self.id
    }

    /// Extent of one element in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

pub const CHAR: Datatype = Datatype::predefined(0, 1);
pub const SHORT: Datatype = Datatype::predefined(1, 2);
pub const INT: Datatype = Datatype::predefined(2, 4);
pub const LONG: Datatype = Datatype::predefined(3, 8);
pub const LONG_LONG: Datatype = Datatype::predefined(4, 8);
pub const SIGNED_CHAR: Datatype = Datatype::predefined(5, 1);
pub const UNSIGNED_CHAR: Datatype = Datatype::predefined(6, 1);
pub const UNSIGNED_SHORT: Datatype = Datatype::predefined(7, 2);
pub const UNSIGNED: Datatype = Datatype::predefined(8, 4);
pub const UNSIGNED_LONG: Datatype = Datatype::predefined(9, 8);
pub const UNSIGNED_LONG_LONG: Datatype = Datatype::predefined(10, 8);
pub const FLOAT: Datatype = Datatype::predefined(11, 4);
pub const DOUBLE: Datatype = Datatype::predefined(12, 8);
pub const LONG_DOUBLE: Datatype = Datatype::predefined(13, 16);
pub const WCHAR: Datatype = Datatype::predefined(14, 4);
pub const C_BOOL: Datatype = Datatype::predefined(15, 1);
pub const INT8: Datatype = Datatype::predefined(16, 1);
pub const INT16: Datatype = Datatype::predefined(17, 2);
pub const INT32: Datatype = Datatype::predefined(18, 4);
pub const INT64: Datatype = Datatype::predefined(19, 8);
pub const UINT8: Datatype = Datatype::predefined(20, 1);
pub const UINT16: Datatype = Datatype::predefined(21, 2);
pub const UINT32: Datatype = Datatype::predefined(22, 4);
pub const UINT64: Datatype = Datatype::predefined(23, 8);
pub const BYTE: Datatype = Datatype::predefined(24, 1);
pub const PACKED: Datatype = Datatype::predefined(25, 1);
pub const AINT: Datatype = Datatype::predefined(26, 8);
pub const OFFSET: Datatype = Datatype::predefined(27, 8);
pub const COUNT: Datatype = Datatype::predefined(28, 8);

/// Null datatype sentinel: size 0, id -1.
pub const DATATYPE_NULL: Datatype = Datatype::predefined(-1, 0);

/// Predefined descriptor table, indexed by datatype id.
const PREDEFINED: [Datatype; 29] = [
    CHAR,
    SHORT,
    INT,
    LONG,
    LONG_LONG,
    SIGNED_CHAR,
    UNSIGNED_CHAR,
    UNSIGNED_SHORT,
    UNSIGNED,
    UNSIGNED_LONG,
    UNSIGNED_LONG_LONG,
    FLOAT,
    DOUBLE,
    LONG_DOUBLE,
    WCHAR,
    C_BOOL,
    INT8,
    INT16,
    INT32,
    INT64,
    UINT8,
    UINT16,
    UINT32,
    UINT64,
    BYTE,
    PACKED,
    AINT,
    OFFSET,
    COUNT,
];

/// Number of predefined datatypes.
pub const MAX_PREDEFINED: usize = PREDEFINED.len();

/// Looks up a predefined datatype by its wire id.
pub fn by_id(id: i16) -> Option<Datatype> {
    if (0..MAX_PREDEFINED as i16).contains(&id) {
        Some(PREDEFINED[id as usize])
    } else {
        None
    }
}

/// A datatype is valid when it denotes a predefined entry.
pub fn is_valid(datatype: Datatype) -> bool {
    by_id(datatype.id) == Some(datatype)
}

/// The matching rule: identical types match, and `BYTE` matches anything.
///
/// This is a post-match correctness check, not part of request matching; a
/// mismatch surfaces as [`MpiError::Type`] on both ends of the transfer.
pub fn types_match(a: i16, b: i16) -> bool {
    a == b || a == BYTE.id || b == BYTE.id
}

/// Number of whole elements of `datatype` in `received` bytes, or
/// [`UNDEFINED`] when the byte count is not a multiple of the extent.
pub fn element_count(datatype: Datatype, received: usize) -> i32 {
    if datatype.size == 0 {
        return if received == 0 { 0 } else { UNDEFINED };
    }
    if received % datatype.size == 0 {
        (received / datatype.size) as i32
    } else {
        UNDEFINED
    }
}

/// Initializes the datatype submodule.
///
/// The table is static; this only exists so the runtime init sequence can
/// bring submodules up in a uniform order.
pub(crate) fn init() -> Result<(), MpiError> {
    Ok(())
}

/// Finalizes the datatype submodule.
pub(crate) fn finalize() -> Result<(), MpiError> {
    Ok(())
}
