//! # Same-Node Buffer Slots
//!
//! When sender and receiver cohabit a node, the rendezvous degenerates to a
//! single memcpy: the sender parks its buffer in a slot, advertises the slot
//! id in the request-to-send, and blocks on the slot's condvar; the receiver
//! copies straight out of the sender's buffer and wakes it. No portal or
//! confirmation traffic is involved.
//!
//! The receiver publishes a completion code into the slot before signalling,
//! so the local path reports truncation and datatype mismatches exactly like
//! the remote ACK does.

use parking_lot::{Condvar, Mutex};

use crate::error::{MpiError, MPI_SUCCESS};

/// Number of slots in a node's pool.
pub const BUFFER_SLOTS_NR: usize = 16;

struct SlotState {
    /// Borrowed view of the sender's buffer; valid only between `reserve`
    /// and the wake-up following `complete`, while the sender is parked.
    buf: *const u8,
    len: usize,
    in_use: bool,
    consumed: bool,
    result: i32,
}

struct Slot {
    state: Mutex<SlotState>,
    consumed_cond: Condvar,
}

/// Pool of same-node exchange slots.
pub struct SlotPool {
    slots: [Slot; BUFFER_SLOTS_NR],
}

// The raw buffer pointer is only dereferenced by the receiver while the
// sender is blocked in `wait`, which keeps the borrow alive; the handshake
// protocol is what makes the alias sound.
unsafe impl Send for SlotPool {}
unsafe impl Sync for SlotPool {}

/// The node-wide slot pool used by the runtime's ranks.
static NODE_SLOTS: SlotPool = SlotPool::new();

/// Returns the node-wide slot pool.
pub(crate) fn node_slots() -> &'static SlotPool {
    &NODE_SLOTS
}

impl SlotPool {
    pub const fn new() -> Self {
        const EMPTY: Slot = Slot {
            state: Mutex::new(SlotState {
                buf: std::ptr::null(),
                len: 0,
                in_use: false,
                consumed: false,
                result: MPI_SUCCESS,
            }),
            consumed_cond: Condvar::new(),
        };
        SlotPool {
            slots: [EMPTY; BUFFER_SLOTS_NR],
        }
    }

    fn slot(&self, id: i32) -> Result<&Slot, MpiError> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.slots.get(index))
            .ok_or(MpiError::Intern)
    }

    /// Reserves a free slot exposing `buf`, returning its id.
    pub fn reserve(&self, buf: &[u8]) -> Result<i32, MpiError> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut state = slot.state.lock();
            if !state.in_use {
                state.buf = buf.as_ptr();
                state.len = buf.len();
                state.in_use = true;
                state.consumed = false;
                state.result = MPI_SUCCESS;
                return Ok(index as i32);
            }
        }
        Err(MpiError::NoMem)
    }

    /// Blocks the sender until the receiver completed the slot, returning
    /// the completion code the receiver published.
    pub fn wait(&self, id: i32) -> Result<i32, MpiError> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        while !state.consumed {
            slot.consumed_cond.wait(&mut state);
        }
        Ok(state.result)
    }

    /// Copies up to `dest.len()` bytes out of the slot's buffer, returning
    /// the count copied.
    pub fn read(&self, id: i32, dest: &mut [u8]) -> Result<usize, MpiError> {
        let slot = self.slot(id)?;
        let state = slot.state.lock();
        if !state.in_use || state.buf.is_null() {
            return Err(MpiError::Intern);
        }
        let len = state.len.min(dest.len());
        unsafe {
            std::ptr::copy_nonoverlapping(state.buf, dest.as_mut_ptr(), len);
        }
        Ok(len)
    }

    /// Bytes the sender advertised into the slot.
    pub fn advertised(&self, id: i32) -> Result<usize, MpiError> {
        let slot = self.slot(id)?;
        let state = slot.state.lock();
        if !state.in_use {
            return Err(MpiError::Intern);
        }
        Ok(state.len)
    }

    /// Publishes the completion code and wakes the parked sender.
    pub fn complete(&self, id: i32, result: i32) -> Result<(), MpiError> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        if !state.in_use {
            return Err(MpiError::Intern);
        }
        state.result = result;
        state.consumed = true;
        slot.consumed_cond.notify_one();
        Ok(())
    }

    /// Returns the slot to the pool; only the reserving sender calls this.
    pub fn release(&self, id: i32) -> Result<(), MpiError> {
        let slot = self.slot(id)?;
        let mut state = slot.state.lock();
        state.buf = std::ptr::null();
        state.len = 0;
        state.in_use = false;
        Ok(())
    }

    /// Prepares the pool for a fresh run.
    pub(crate) fn init(&self) -> Result<(), MpiError> {
        for slot in &self.slots {
            let mut state = slot.state.lock();
            state.buf = std::ptr::null();
            state.len = 0;
            state.in_use = false;
            state.consumed = false;
            state.result = MPI_SUCCESS;
        }
        Ok(())
    }

    /// Drops any dangling buffer references at shutdown.
    pub(crate) fn finalize(&self) -> Result<(), MpiError> {
        for slot in &self.slots {
            let mut state = slot.state.lock();
            state.buf = std::ptr::null();
        }
        Ok(())
    }
}
