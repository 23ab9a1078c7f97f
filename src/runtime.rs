//! # Runtime Lifecycle
//!
//! The init/finalize state machine every public call is validated against.
//! States only move forward:
//!
//! ```text
//! NotInitialized → InitStarted → Initialized
//!     → FinalizeStarted → FinalizeDestructCommSelf → Finalized
//! ```
//!
//! The node master drives the transitions and the submodule bring-up; the
//! co-located worker ranks only set up their local endpoints and meet the
//! master at the fences and barriers. Finalize tears submodules down in
//! reverse init order, with `COMM_SELF` destroyed first as the state machine
//! requires.

use parking_lot::Mutex;
use tracing::{error, info};

use crate::buffer_slot;
use crate::communicator::{self, Communicator};
use crate::datatype;
use crate::errhandler;
use crate::error::MpiError;
use crate::group;
use crate::object::Handle;
use crate::process;
use crate::request;
use crate::transport;

/// Lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MpiState {
    NotInitialized,
    InitStarted,
    Initialized,
    FinalizeStarted,
    FinalizeDestructCommSelf,
    Finalized,
}

static STATE: Mutex<MpiState> = Mutex::new(MpiState::NotInitialized);

/// Current lifecycle state.
pub(crate) fn current_state() -> MpiState {
    *STATE.lock()
}

fn set_state(state: MpiState) {
    *STATE.lock() = state;
}

/// True once init completed (and forever after).
pub fn initialized() -> bool {
    current_state() >= MpiState::Initialized
}

/// True once `COMM_SELF` was destroyed during finalize.
pub fn finalized() -> bool {
    current_state() >= MpiState::FinalizeDestructCommSelf
}

/// Brings the runtime up on the calling rank.
pub(crate) fn init() -> Result<(), MpiError> {
    if !process::is_master()? {
        return init_worker();
    }

    {
        let mut state = STATE.lock();
        if *state != MpiState::NotInitialized {
            error!("ERROR!!! MPI_Init() called twice");
            return Err(MpiError::Other);
        }
        *state = MpiState::InitStarted;
    }

    // Wait for every co-located rank thread to exist before anyone builds
    // endpoints.
    process::fence()?;
    process::local_init()?;

    // Submodules come up leaves first; finalize mirrors this in reverse.
    datatype::init()?;
    request::node_queue().init()?;
    buffer_slot::node_slots().init()?;
    errhandler::init()?;
    group::init()?;
    transport::context_init()?;
    communicator::init()?;

    set_state(MpiState::Initialized);

    process::std_barrier()?;

    info!("MPI runtime initialized ({} ranks)", process::world_size()?);
    Ok(())
}

fn init_worker() -> Result<(), MpiError> {
    process::fence()?;
    process::local_init()?;
    process::std_barrier()
}

/// Takes the runtime down on the calling rank.
pub(crate) fn finalize() -> Result<(), MpiError> {
    // Every co-located rank must have entered finalize before teardown.
    process::fence()?;

    if !process::is_master()? {
        process::std_barrier()?;
        process::local_finalize()?;
        return process::fence();
    }

    {
        let mut state = STATE.lock();
        if *state != MpiState::Initialized {
            if *state < MpiState::Initialized {
                error!("ERROR!!! MPI not initialized while calling MPI_Finalize()");
            } else {
                error!("ERROR!!! MPI_Finalize() called twice");
            }
            return Err(MpiError::Other);
        }
        *state = MpiState::FinalizeStarted;
    }

    // COMM_SELF goes first; Finalized() starts answering true here.
    communicator::destruct_comm_self()?;
    set_state(MpiState::FinalizeDestructCommSelf);

    process::std_barrier()?;
    process::local_finalize()?;

    communicator::finalize()?;
    transport::context_finalize()?;
    group::finalize()?;
    errhandler::finalize()?;
    request::node_queue().finalize()?;
    buffer_slot::node_slots().finalize()?;
    datatype::finalize()?;

    process::fence()?;
    set_state(MpiState::Finalized);

    info!("MPI runtime finalized");
    Ok(())
}

/// Terminates execution with `errcode`.
///
/// Tearing down the communicator's remote scope is the substrate process
/// manager's job; this runtime exits the local OS process, which takes every
/// co-located rank with it.
pub fn abort(comm: Option<&Handle<Communicator>>, errcode: i32) -> ! {
    match comm {
        Some(comm) => error!(
            "aborting {} connected processes (error {})",
            comm.size(),
            errcode
        ),
        None => error!("aborting local process (error {})", errcode),
    }
    std::process::exit(errcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_ordering_backs_the_flag_queries() {
        assert!(MpiState::NotInitialized < MpiState::InitStarted);
        assert!(MpiState::InitStarted < MpiState::Initialized);
        assert!(MpiState::Initialized < MpiState::FinalizeStarted);
        assert!(MpiState::FinalizeStarted < MpiState::FinalizeDestructCommSelf);
        assert!(MpiState::FinalizeDestructCommSelf < MpiState::Finalized);
    }
}
