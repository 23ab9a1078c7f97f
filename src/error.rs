//! # MPI Error Classes
//!
//! This module defines the stable MPI error classes used across the runtime.
//! Every fallible public operation returns `Result<_, MpiError>`; the integer
//! codes are part of the external contract (they travel inside ACK frames and
//! are what `ERRORS_RETURN` hands back to the caller), so each variant is
//! pinned to its class number.

use thiserror::Error;

/// Stable MPI error classes.
///
/// The discriminants follow the MPI standard numbering and must not be
/// reordered: ACK frames carry them on the wire and peers decode them with
/// [`MpiError::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum MpiError {
    /// Invalid buffer pointer.
    #[error("invalid buffer")]
    Buffer = 1,
    /// Invalid count argument.
    #[error("invalid count argument")]
    Count = 2,
    /// Invalid datatype argument.
    #[error("invalid datatype argument")]
    Type = 3,
    /// Invalid tag argument.
    #[error("invalid tag argument")]
    Tag = 4,
    /// Invalid communicator.
    #[error("invalid communicator")]
    Comm = 5,
    /// Invalid rank.
    #[error("invalid rank")]
    Rank = 6,
    /// Invalid root.
    #[error("invalid root")]
    Root = 8,
    /// Invalid group.
    #[error("invalid group")]
    Group = 9,
    /// Invalid argument of some other kind.
    #[error("invalid argument")]
    Arg = 13,
    /// Unknown error.
    #[error("unknown error")]
    Unknown = 14,
    /// Message truncated on receive.
    #[error("message truncated on receive")]
    Truncate = 15,
    /// Known error not in this list.
    #[error("known error not in list")]
    Other = 16,
    /// Internal runtime error.
    #[error("internal runtime error")]
    Intern = 17,
    /// Pending request.
    #[error("pending request")]
    Pending = 18,
    /// Memory is exhausted.
    #[error("out of memory")]
    NoMem = 39,
    /// Operation not supported by this runtime.
    #[error("unsupported operation")]
    UnsupportedOperation = 56,
    /// Last error code (fence value, never raised).
    #[error("last error code")]
    Lastcode = 92,
}

/// Success code as it appears on the wire and in [`crate::Status::error`].
pub const MPI_SUCCESS: i32 = 0;

impl MpiError {
    /// Returns the stable integer class of this error.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decodes an integer class received from a peer.
    ///
    /// Unknown (but non-success) codes collapse to [`MpiError::Unknown`] so a
    /// mismatched peer cannot crash the receiver.
    pub fn from_code(code: i32) -> Option<MpiError> {
        let err = match code {
            0 => return None,
            1 => MpiError::Buffer,
            2 => MpiError::Count,
            3 => MpiError::Type,
            4 => MpiError::Tag,
            5 => MpiError::Comm,
            6 => MpiError::Rank,
            8 => MpiError::Root,
            9 => MpiError::Group,
            13 => MpiError::Arg,
            14 => MpiError::Unknown,
            15 => MpiError::Truncate,
            16 => MpiError::Other,
            17 => MpiError::Intern,
            18 => MpiError::Pending,
            39 => MpiError::NoMem,
            56 => MpiError::UnsupportedOperation,
            92 => MpiError::Lastcode,
            _ => MpiError::Unknown,
        };
        Some(err)
    }
}

/// Converts an operation result into the integer code carried by ACK frames
/// and status fields.
pub fn result_code(result: Result<(), MpiError>) -> i32 {
    match result {
        Ok(()) => MPI_SUCCESS,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(MpiError::Buffer.code(), 1);
        assert_eq!(MpiError::Type.code(), 3);
        assert_eq!(MpiError::Truncate.code(), 15);
        assert_eq!(MpiError::Other.code(), 16);
        assert_eq!(MpiError::Intern.code(), 17);
        assert_eq!(MpiError::NoMem.code(), 39);
        assert_eq!(MpiError::UnsupportedOperation.code(), 56);
        assert_eq!(MpiError::Lastcode.code(), 92);
    }

    #[test]
    fn test_round_trip_through_wire_code() {
        for err in [
            MpiError::Buffer,
            MpiError::Count,
            MpiError::Type,
            MpiError::Tag,
            MpiError::Comm,
            MpiError::Rank,
            MpiError::Group,
            MpiError::Arg,
            MpiError::Truncate,
            MpiError::Other,
            MpiError::Intern,
            MpiError::Pending,
            MpiError::NoMem,
            MpiError::UnsupportedOperation,
        ] {
            assert_eq!(MpiError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn test_success_decodes_to_none() {
        assert_eq!(MpiError::from_code(MPI_SUCCESS), None);
        assert_eq!(result_code(Ok(())), MPI_SUCCESS);
        assert_eq!(result_code(Err(MpiError::Other)), 16);
    }

    #[test]
    fn test_unknown_code_collapses() {
        assert_eq!(MpiError::from_code(77), Some(MpiError::Unknown));
    }
}
