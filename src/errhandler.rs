//! # Error Handlers
//!
//! Every communicator carries an error handler that the public façade
//! invokes when validation or a transfer fails. A handler bundles one
//! function per object kind {comm, win, file}; only the communicator kind is
//! exercised, the other two exist for interface completeness and log that
//! they are unsupported.
//!
//! Three predefined behaviors are installed at init:
//!
//! - `ERRORS_ARE_FATAL` (the default): print a diagnostic and abort every
//!   connected process, or only the local one outside the init/finalize
//!   window.
//! - `ERRORS_ABORT`: print a diagnostic and abort the offending
//!   communicator's scope (`COMM_SELF` when no communicator is at hand).
//! - `ERRORS_RETURN`: no side effect; the caller gets the code back.

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::communicator::{self, Communicator};
use crate::error::MpiError;
use crate::object::Handle;
use crate::runtime::{self, MpiState};

/// Object kinds an error handler can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrObjKind {
    Comm,
    Win,
    File,
}

/// Handler signature for communicator-kind errors.
pub type CommHandlerFn = fn(Option<&Handle<Communicator>>, i32, &str);

/// Handler signature for window- and file-kind errors (unsupported kinds).
pub type OtherHandlerFn = fn(i32, &str);

/// Polymorphic error handler.
pub struct Errhandler {
    comm_fn: CommHandlerFn,
    win_fn: OtherHandlerFn,
    file_fn: OtherHandlerFn,
}

static ERRORS_ARE_FATAL: Mutex<Option<Handle<Errhandler>>> = Mutex::new(None);
static ERRORS_ABORT: Mutex<Option<Handle<Errhandler>>> = Mutex::new(None);
static ERRORS_RETURN: Mutex<Option<Handle<Errhandler>>> = Mutex::new(None);
static ERRHANDLER_NULL: Mutex<Option<Handle<Errhandler>>> = Mutex::new(None);

fn fetch(slot: &Mutex<Option<Handle<Errhandler>>>) -> Result<Handle<Errhandler>, MpiError> {
    slot.lock().as_ref().map(Handle::retain).ok_or(MpiError::Intern)
}

/// The default fatal handler.
pub fn errors_are_fatal() -> Result<Handle<Errhandler>, MpiError> {
    fetch(&ERRORS_ARE_FATAL)
}

/// The scoped-abort handler.
pub fn errors_abort() -> Result<Handle<Errhandler>, MpiError> {
    fetch(&ERRORS_ABORT)
}

/// The silent handler: codes propagate to the caller.
pub fn errors_return() -> Result<Handle<Errhandler>, MpiError> {
    fetch(&ERRORS_RETURN)
}

/// The null-errhandler sentinel.
pub fn errhandler_null() -> Result<Handle<Errhandler>, MpiError> {
    fetch(&ERRHANDLER_NULL)
}

/// Invokes `handler` for an error on `object`, returning `errcode` so call
/// sites can forward it upward.
///
/// A missing handler means the error predates the runtime (or outlived it);
/// the fatal behavior applies directly in that case.
pub fn invoke(
    handler: Option<&Handle<Errhandler>>,
    object: Option<&Handle<Communicator>>,
    kind: ErrObjKind,
    errcode: i32,
    message: &str,
) -> i32 {
    match handler {
        None => errors_are_fatal_comm_handler(None, errcode, message),
        Some(handler) => match kind {
            ErrObjKind::Comm => (handler.comm_fn)(object, errcode, message),
            ErrObjKind::Win => (handler.win_fn)(errcode, message),
            ErrObjKind::File => (handler.file_fn)(errcode, message),
        },
    }
    errcode
}

/// Releases an error-handler handle, resetting it to the sentinel.
pub fn errhandler_free(handler: &mut Handle<Errhandler>) -> Result<(), MpiError> {
    let null = errhandler_null()?;
    if Handle::ptr_eq(handler, &null) {
        return Err(MpiError::Arg);
    }
    *handler = null;
    Ok(())
}

fn print_diagnostic(errcode: i32, message: &str) {
    let state = runtime::current_state();
    if state < MpiState::InitStarted {
        error!(
            "ERROR!!! {}() called before the runtime was initialized, which \
             the MPI standard does not allow.",
            message
        );
    } else if state >= MpiState::FinalizeStarted {
        error!(
            "ERROR!!! {}() called after the runtime was finalized, which the \
             MPI standard does not allow.",
            message
        );
    } else {
        error!("ERROR!!! {}", message);
        error!("Error code: {}", errcode);
    }
}

/// `ERRORS_ARE_FATAL`, communicator kind.
pub fn errors_are_fatal_comm_handler(
    _comm: Option<&Handle<Communicator>>,
    errcode: i32,
    message: &str,
) {
    print_diagnostic(errcode, message);

    let state = runtime::current_state();
    if state >= MpiState::Initialized && state < MpiState::FinalizeStarted {
        // Inside the init/finalize window the whole world goes down.
        let world = communicator::comm_world().ok();
        runtime::abort(world.as_ref(), errcode);
    } else {
        runtime::abort(None, errcode);
    }
}

/// `ERRORS_ABORT`, communicator kind.
pub fn errors_abort_comm_handler(
    comm: Option<&Handle<Communicator>>,
    errcode: i32,
    message: &str,
) {
    print_diagnostic(errcode, message);

    match comm {
        Some(comm) => runtime::abort(Some(comm), errcode),
        // Without a communicator the error propagates through COMM_SELF.
        None => runtime::abort(communicator::comm_self().ok().as_ref(), errcode),
    }
}

/// `ERRORS_RETURN`, communicator kind.
pub fn errors_return_comm_handler(
    _comm: Option<&Handle<Communicator>>,
    _errcode: i32,
    _message: &str,
) {
    // The code is already on its way back to the caller.
}

fn unsupported_win_handler(_errcode: i32, _message: &str) {
    warn!("Window error handlers are not supported yet.");
}

fn unsupported_file_handler(_errcode: i32, _message: &str) {
    warn!("File error handlers are not supported yet.");
}

/// Brings up the predefined handler instances.
pub(crate) fn init() -> Result<(), MpiError> {
    *ERRORS_ARE_FATAL.lock() = Some(Handle::new(Errhandler {
        comm_fn: errors_are_fatal_comm_handler,
        win_fn: unsupported_win_handler,
        file_fn: unsupported_file_handler,
    }));
    *ERRORS_ABORT.lock() = Some(Handle::new(Errhandler {
        comm_fn: errors_abort_comm_handler,
        win_fn: unsupported_win_handler,
        file_fn: unsupported_file_handler,
    }));
    *ERRORS_RETURN.lock() = Some(Handle::new(Errhandler {
        comm_fn: errors_return_comm_handler,
        win_fn: unsupported_win_handler,
        file_fn: unsupported_file_handler,
    }));
    *ERRHANDLER_NULL.lock() = Some(Handle::new(Errhandler {
        comm_fn: errors_return_comm_handler,
        win_fn: unsupported_win_handler,
        file_fn: unsupported_file_handler,
    }));
    Ok(())
}

/// Drops the predefined handler instances.
pub(crate) fn finalize() -> Result<(), MpiError> {
    *ERRORS_ARE_FATAL.lock() = None;
    *ERRORS_ABORT.lock() = None;
    *ERRORS_RETURN.lock() = None;
    *ERRHANDLER_NULL.lock() = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    fn ensure_handlers() {
        static ONCE: Once = Once::new();
        ONCE.call_once(|| init().unwrap());
    }

    #[test]
    fn test_predefined_handlers_are_distinct() {
        ensure_handlers();
        let fatal = errors_are_fatal().unwrap();
        let ret = errors_return().unwrap();
        let abort = errors_abort().unwrap();
        assert!(!Handle::ptr_eq(&fatal, &ret));
        assert!(!Handle::ptr_eq(&fatal, &abort));
        assert!(!Handle::ptr_eq(&ret, &abort));
    }

    #[test]
    fn test_errors_return_propagates_the_code() {
        ensure_handlers();
        let ret = errors_return().unwrap();
        let code = invoke(
            Some(&ret),
            None,
            ErrObjKind::Comm,
            MpiError::Rank.code(),
            "MPI_Send",
        );
        assert_eq!(code, MpiError::Rank.code());
    }

    #[test]
    fn test_unsupported_kinds_only_log() {
        ensure_handlers();
        let ret = errors_return().unwrap();
        // Win/file dispatch must not touch communicator state.
        assert_eq!(invoke(Some(&ret), None, ErrObjKind::Win, 5, "x"), 5);
        assert_eq!(invoke(Some(&ret), None, ErrObjKind::File, 5, "x"), 5);
    }

    #[test]
    fn test_free_resets_to_sentinel() {
        ensure_handlers();
        let mut handler = errors_return().unwrap();
        errhandler_free(&mut handler).unwrap();
        assert!(Handle::ptr_eq(&handler, &errhandler_null().unwrap()));
        assert_eq!(errhandler_free(&mut handler), Err(MpiError::Arg));
    }
}
