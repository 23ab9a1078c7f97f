//! # Communicators
//!
//! A communicator scopes a set of messages: it bundles an ordered group of
//! processes, a pair of context ids (one for point-to-point traffic, one
//! reserved for collectives), and an error handler. Three predefined
//! instances exist for the lifetime of the runtime:
//!
//! - `COMM_WORLD`: every rank, context ids 0 and 1
//! - `COMM_SELF`: just the constructing rank, context id 2
//! - `COMM_NULL`: the invalid-communicator sentinel
//!
//! Dynamic communicator construction is out of scope; the context-id
//! allocator in the transport nevertheless vends ids from 3 so the predefined
//! ids stay unique.

use parking_lot::Mutex;

use crate::errhandler::{self, ErrObjKind, Errhandler};
use crate::error::MpiError;
use crate::group::{self, Group};
use crate::object::{Handle, WeakHandle};
use crate::process::{self, Process};
use crate::runtime::{self, MpiState};
use crate::UNDEFINED;

/// A bundle of {group, context ids, errhandler} scoping messages.
pub struct Communicator {
    group: Handle<Group>,
    pt2pt_cid: i32,
    coll_cid: i32,
    error_handler: Mutex<Handle<Errhandler>>,
    errhandler_kind: ErrObjKind,
    /// Back-reference for derived communicators; never set for the
    /// predefined ones.
    parent: Option<WeakHandle<Communicator>>,
}

static COMM_WORLD: Mutex<Option<Handle<Communicator>>> = Mutex::new(None);
static COMM_SELF: Mutex<Option<Handle<Communicator>>> = Mutex::new(None);
static COMM_NULL: Mutex<Option<Handle<Communicator>>> = Mutex::new(None);

fn fetch(slot: &Mutex<Option<Handle<Communicator>>>) -> Result<Handle<Communicator>, MpiError> {
    slot.lock().as_ref().map(Handle::retain).ok_or(MpiError::Comm)
}

/// The all-ranks communicator.
pub fn comm_world() -> Result<Handle<Communicator>, MpiError> {
    fetch(&COMM_WORLD)
}

/// The single-rank communicator of the constructing rank.
pub fn comm_self() -> Result<Handle<Communicator>, MpiError> {
    fetch(&COMM_SELF)
}

/// The invalid-communicator sentinel.
pub fn comm_null() -> Result<Handle<Communicator>, MpiError> {
    fetch(&COMM_NULL)
}

/// A communicator is valid when it is live and not the null sentinel.
pub fn is_valid(comm: &Handle<Communicator>) -> bool {
    match comm_null() {
        Ok(null) => !Handle::ptr_eq(comm, &null),
        Err(_) => false,
    }
}

impl Communicator {
    /// Retains and yields the embedded group.
    pub fn group(&self) -> Handle<Group> {
        self.group.retain()
    }

    /// Number of ranks scoped by this communicator.
    pub fn size(&self) -> usize {
        self.group.size()
    }

    /// Rank of the calling process, or [`UNDEFINED`] for non-members.
    pub fn rank(&self) -> Result<i32, MpiError> {
        self.group.rank_of_current()
    }

    /// Whether `rank` addresses a member of this communicator.
    pub fn peer_rank_is_valid(&self, rank: i32) -> bool {
        rank >= 0 && (rank as usize) < self.group.size()
    }

    /// Process reference behind `rank`.
    pub fn get_proc(&self, rank: i32) -> Result<Handle<Process>, MpiError> {
        Ok(self.group.get_proc(rank)?.retain())
    }

    /// Point-to-point context id.
    pub fn pt2pt_cid(&self) -> i32 {
        self.pt2pt_cid
    }

    /// Collective context id.
    pub fn coll_cid(&self) -> i32 {
        self.coll_cid
    }

    /// Retains and yields the bound error handler.
    pub fn errhandler(&self) -> Handle<Errhandler> {
        self.error_handler.lock().retain()
    }

    /// Atomically replaces the bound error handler.
    pub fn set_errhandler(&self, handler: &Handle<Errhandler>) {
        *self.error_handler.lock() = handler.retain();
    }

    /// Object kind used for errhandler dispatch.
    pub fn errhandler_kind(&self) -> ErrObjKind {
        self.errhandler_kind
    }

    /// Parent communicator this one was derived from, if still alive.
    pub fn parent(&self) -> Option<Handle<Communicator>> {
        self.parent.as_ref().and_then(WeakHandle::upgrade)
    }
}

/// Brings up the three predefined communicators.
///
/// `COMM_SELF` captures the constructing thread's process, so this runs on
/// the node master during init.
pub(crate) fn init() -> Result<(), MpiError> {
    let fatal = errhandler::errors_are_fatal()?;

    let world_group = Group::from_procs(process::world_list()?)?;
    *COMM_WORLD.lock() = Some(Handle::new(Communicator {
        group: world_group,
        pt2pt_cid: 0,
        coll_cid: 1,
        error_handler: Mutex::new(fatal.retain()),
        errhandler_kind: ErrObjKind::Comm,
        parent: None,
    }));

    let self_group = Group::from_procs(process::self_list()?)?;
    *COMM_SELF.lock() = Some(Handle::new(Communicator {
        group: self_group,
        pt2pt_cid: 2,
        coll_cid: UNDEFINED,
        error_handler: Mutex::new(fatal.retain()),
        errhandler_kind: ErrObjKind::Comm,
        parent: None,
    }));

    *COMM_NULL.lock() = Some(Handle::new(Communicator {
        group: group::group_null()?,
        pt2pt_cid: UNDEFINED,
        coll_cid: UNDEFINED,
        error_handler: Mutex::new(fatal),
        errhandler_kind: ErrObjKind::Comm,
        parent: None,
    }));

    Ok(())
}

/// Destroys `COMM_SELF`; the finalize sequence requires it to go first.
pub(crate) fn destruct_comm_self() -> Result<(), MpiError> {
    COMM_SELF
        .lock()
        .take()
        .map(|_| ())
        .ok_or(MpiError::Intern)
}

/// Destroys the remaining predefined communicators.
pub(crate) fn finalize() -> Result<(), MpiError> {
    // COMM_SELF must already be gone at this point in the state machine.
    if runtime::current_state() != MpiState::FinalizeDestructCommSelf {
        return Err(MpiError::Intern);
    }
    *COMM_WORLD.lock() = None;
    *COMM_NULL.lock() = None;
    Ok(())
}
