//! # Public API Façade
//!
//! The MPI-shaped surface of the runtime. Every function here follows the
//! same discipline: verify the lifecycle window, validate arguments, route
//! failures through the target object's error handler, and only then call
//! into the core. With the default `ERRORS_ARE_FATAL` handler a validation
//! failure never returns; with `ERRORS_RETURN` the caller gets the error
//! class back as `Err`.
//!
//! Buffers are byte slices paired with a datatype descriptor; `count` is the
//! number of datatype elements, exactly as in the C binding. A `None` status
//! is the `STATUS_IGNORE` of this API.

use crate::communicator::{self, Communicator};
use crate::datatype::{self, Datatype};
use crate::errhandler::{self, ErrObjKind, Errhandler};
use crate::error::{MpiError, MPI_SUCCESS};
use crate::group::{self, Group};
use crate::object::Handle;
use crate::process;
use crate::request::RequestKey;
use crate::runtime::{self, MpiState};
use crate::transport::{self, CommMode};
use crate::{ANY_SOURCE, ANY_TAG, PROC_NULL, TAG_UB, UNDEFINED};

/// Shared handle to a communicator, the way user code holds one.
pub type Comm = Handle<Communicator>;

/// Receive status: who sent, under which tag, and how it went.
#[derive(Debug, Clone, Copy)]
pub struct Status {
    /// Actual source rank of the matched message.
    pub source: i32,
    /// Actual tag of the matched message.
    pub tag: i32,
    /// Outcome code of the transfer.
    pub error: i32,
    received_size: usize,
}

impl Status {
    /// Bytes delivered into the receive buffer.
    pub fn received_size(&self) -> usize {
        self.received_size
    }
}

impl Default for Status {
    fn default() -> Self {
        Status {
            source: UNDEFINED,
            tag: UNDEFINED,
            error: MPI_SUCCESS,
            received_size: 0,
        }
    }
}

/// Rejects calls outside the `[Initialized, FinalizeStarted)` window.
///
/// Out-of-window calls take the fatal path directly with no communicator,
/// since `COMM_WORLD` may not exist yet (or anymore).
fn check_init_finalize(func: &str) -> Result<(), MpiError> {
    let state = runtime::current_state();
    if state < MpiState::Initialized || state >= MpiState::FinalizeStarted {
        errhandler::errors_are_fatal_comm_handler(None, MpiError::Other.code(), func);
        return Err(MpiError::Other);
    }
    Ok(())
}

/// Routes `err` through `comm`'s handler and hands it back for returning.
fn errhandler_check(comm: &Comm, err: MpiError, func: &str) -> MpiError {
    let handler = comm.errhandler();
    errhandler::invoke(
        Some(&handler),
        Some(comm),
        comm.errhandler_kind(),
        err.code(),
        func,
    );
    err
}

/// Validates `comm` or routes `ERR_COMM` through the world handler.
fn validate_comm(comm: &Comm, func: &str) -> Result<(), MpiError> {
    if communicator::is_valid(comm) {
        return Ok(());
    }
    match communicator::comm_world() {
        Ok(world) => Err(errhandler_check(&world, MpiError::Comm, func)),
        Err(_) => Err(MpiError::Comm),
    }
}

/// Initializes the MPI environment.
///
/// Must be called exactly once per rank, before any other call here. On
/// failure the default fatal handler aborts the environment.
pub fn init() -> Result<(), MpiError> {
    match runtime::init() {
        Ok(()) => Ok(()),
        Err(err) => {
            errhandler::invoke(None, None, ErrObjKind::Comm, err.code(), "MPI_Init");
            Err(err)
        }
    }
}

/// Finalizes the MPI environment.
pub fn finalize() -> Result<(), MpiError> {
    match runtime::finalize() {
        Ok(()) => Ok(()),
        Err(err) => {
            errhandler::invoke(None, None, ErrObjKind::Comm, err.code(), "MPI_Finalize");
            Err(err)
        }
    }
}

/// Whether `init` has completed. Callable at any time.
pub fn initialized() -> bool {
    runtime::initialized()
}

/// Whether finalization has passed the point of no return. Callable at any
/// time.
pub fn finalized() -> bool {
    runtime::finalized()
}

/// Aborts the processes connected through `comm` with `errcode`.
pub fn abort(comm: &Comm, errcode: i32) -> ! {
    runtime::abort(Some(comm), errcode)
}

/// The all-ranks communicator.
pub fn comm_world() -> Result<Comm, MpiError> {
    communicator::comm_world()
}

/// The single-rank communicator.
pub fn comm_self() -> Result<Comm, MpiError> {
    communicator::comm_self()
}

/// The invalid-communicator sentinel.
pub fn comm_null() -> Result<Comm, MpiError> {
    communicator::comm_null()
}

/// Rank of the calling process in `comm`, or [`UNDEFINED`] for non-members.
pub fn comm_rank(comm: &Comm) -> Result<i32, MpiError> {
    const FUNC: &str = "MPI_Comm_rank";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;
    comm.rank().map_err(|err| errhandler_check(comm, err, FUNC))
}

/// Number of ranks in `comm`.
pub fn comm_size(comm: &Comm) -> Result<i32, MpiError> {
    const FUNC: &str = "MPI_Comm_size";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;
    Ok(comm.size() as i32)
}

/// Retains and yields the group behind `comm`.
pub fn comm_group(comm: &Comm) -> Result<Handle<Group>, MpiError> {
    const FUNC: &str = "MPI_Comm_group";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;
    Ok(comm.group())
}

/// Retains and yields `comm`'s error handler.
pub fn comm_get_errhandler(comm: &Comm) -> Result<Handle<Errhandler>, MpiError> {
    const FUNC: &str = "MPI_Comm_get_errhandler";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;
    Ok(comm.errhandler())
}

/// Replaces `comm`'s error handler.
pub fn comm_set_errhandler(comm: &Comm, handler: &Handle<Errhandler>) -> Result<(), MpiError> {
    const FUNC: &str = "MPI_Comm_set_errhandler";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;
    comm.set_errhandler(handler);
    Ok(())
}

/// Releases an error-handler handle, resetting it to the sentinel.
pub fn errhandler_free(handler: &mut Handle<Errhandler>) -> Result<(), MpiError> {
    check_init_finalize("MPI_Errhandler_free")?;
    errhandler::errhandler_free(handler)
}

/// Rank of the calling process in `group`, or [`UNDEFINED`].
pub fn group_rank(group: &Handle<Group>) -> Result<i32, MpiError> {
    check_init_finalize("MPI_Group_rank")?;
    group.rank_of_current()
}

/// Number of processes in `group`.
pub fn group_size(group: &Handle<Group>) -> Result<i32, MpiError> {
    check_init_finalize("MPI_Group_size")?;
    Ok(group.size() as i32)
}

/// Releases a group handle, resetting it to `GROUP_NULL`.
pub fn group_free(group: &mut Handle<Group>) -> Result<(), MpiError> {
    check_init_finalize("MPI_Group_free")?;
    group::group_free(group)
}

/// Number of whole `datatype` elements delivered per `status`, or
/// [`UNDEFINED`] when the byte count does not divide evenly.
pub fn get_count(status: &Status, datatype: Datatype) -> Result<i32, MpiError> {
    const FUNC: &str = "MPI_Get_count";
    check_init_finalize(FUNC)?;
    if !datatype::is_valid(datatype) {
        let world = communicator::comm_world()?;
        return Err(errhandler_check(&world, MpiError::Type, FUNC));
    }
    Ok(datatype::element_count(datatype, status.received_size))
}

/// Sends `count` elements of `datatype` from `buf` to rank `dest`.
///
/// Synchronous mode: returns once the receiver has matched and consumed the
/// message. A `dest` of [`PROC_NULL`] succeeds immediately with no traffic.
pub fn send(
    buf: &[u8],
    count: i32,
    datatype: Datatype,
    dest: i32,
    tag: i32,
    comm: &Comm,
) -> Result<(), MpiError> {
    const FUNC: &str = "MPI_Send";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;

    // Validation ladder; the last failing check names the error.
    let mut bad = None;
    if count < 0 {
        bad = Some(MpiError::Count);
    }
    if !(0..TAG_UB).contains(&tag) {
        bad = Some(MpiError::Tag);
    }
    let payload = count.max(0) as usize * datatype.size();
    if count > 0 && buf.len() < payload {
        bad = Some(MpiError::Buffer);
    }
    if !datatype::is_valid(datatype) {
        bad = Some(MpiError::Type);
    }
    if dest != PROC_NULL && !comm.peer_rank_is_valid(dest) {
        bad = Some(MpiError::Rank);
    }
    if let Some(err) = bad {
        return Err(errhandler_check(comm, err, FUNC));
    }

    if dest == PROC_NULL {
        return Ok(());
    }

    let dest_proc = comm.get_proc(dest)?;
    let src = comm.rank()?;

    transport::comm_send(
        CommMode::Sync,
        comm.pt2pt_cid(),
        &buf[..payload],
        src,
        dest,
        dest_proc.name(),
        datatype.id(),
        tag,
    )
    .map_err(|err| errhandler_check(comm, err, FUNC))
}

/// Receives up to `count` elements of `datatype` into `buf`.
///
/// `source` may be [`ANY_SOURCE`] and `tag` may be [`ANY_TAG`]; the status
/// reports the actual peer of the matched message. A `source` of
/// [`PROC_NULL`] succeeds immediately, delivering nothing.
pub fn recv(
    buf: &mut [u8],
    count: i32,
    datatype: Datatype,
    source: i32,
    tag: i32,
    comm: &Comm,
    mut status: Option<&mut Status>,
) -> Result<(), MpiError> {
    const FUNC: &str = "MPI_Recv";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;

    let mut bad = None;
    if count < 0 {
        bad = Some(MpiError::Count);
    }
    if !(0..TAG_UB).contains(&tag) && tag != ANY_TAG {
        bad = Some(MpiError::Tag);
    }
    let capacity = count.max(0) as usize * datatype.size();
    if count > 0 && buf.len() < capacity {
        bad = Some(MpiError::Buffer);
    }
    if !datatype::is_valid(datatype) {
        bad = Some(MpiError::Type);
    }
    if source != PROC_NULL && source != ANY_SOURCE && !comm.peer_rank_is_valid(source) {
        bad = Some(MpiError::Rank);
    }
    if let Some(err) = bad {
        return Err(errhandler_check(comm, err, FUNC));
    }

    if let Some(st) = status.as_deref_mut() {
        st.source = source;
        st.tag = tag;
    }

    if source == PROC_NULL {
        if let Some(st) = status.as_deref_mut() {
            st.error = MPI_SUCCESS;
            st.received_size = 0;
        }
        return Ok(());
    }

    let rank = comm.rank()?;
    let cid = comm.pt2pt_cid();
    let expected = RequestKey::new(cid as u16, source, rank, tag);

    match transport::comm_recv(cid, &mut buf[..capacity], expected, datatype.id()) {
        Ok(outcome) => {
            if let Some(st) = status.as_deref_mut() {
                st.source = outcome.source;
                st.tag = outcome.tag;
                st.error = outcome.code;
                st.received_size = outcome.received;
            }
            match MpiError::from_code(outcome.code) {
                None => Ok(()),
                Some(err) => Err(errhandler_check(comm, err, FUNC)),
            }
        }
        Err(err) => {
            if let Some(st) = status.as_deref_mut() {
                st.error = err.code();
                st.received_size = 0;
            }
            Err(errhandler_check(comm, err, FUNC))
        }
    }
}

/// Blocks until every rank of `comm` has arrived.
///
/// Two-level: a node-local fence across the co-located ranks, then the
/// masters' inter-node rendezvous, then the fence again.
pub fn barrier(comm: &Comm) -> Result<(), MpiError> {
    const FUNC: &str = "MPI_Barrier";
    check_init_finalize(FUNC)?;
    validate_comm(comm, FUNC)?;
    process::std_barrier().map_err(|err| errhandler_check(comm, err, FUNC))
}
