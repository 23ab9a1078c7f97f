//! # Process Groups
//!
//! A group is an ordered set of process references; the rank of a process in
//! a group is its position. Groups retain every process they contain for
//! their whole lifetime (dropping the group releases them), and may point at
//! a parent group they were derived from.
//!
//! Two distinguished groups exist for identity comparisons: `GROUP_EMPTY`
//! (a real group of size zero) and `GROUP_NULL` (the sentinel handles are
//! reset to after freeing).

use parking_lot::Mutex;

use crate::error::MpiError;
use crate::object::Handle;
use crate::process::{self, Process};
use crate::UNDEFINED;

/// Ordered set of processes.
pub struct Group {
    procs: Vec<Handle<Process>>,
    parent: Option<Handle<Group>>,
}

static GROUP_EMPTY: Mutex<Option<Handle<Group>>> = Mutex::new(None);
static GROUP_NULL: Mutex<Option<Handle<Group>>> = Mutex::new(None);

impl Group {
    /// Builds a group over already-retained process references.
    ///
    /// An empty list yields the shared `GROUP_EMPTY` instance.
    pub fn from_procs(procs: Vec<Handle<Process>>) -> Result<Handle<Group>, MpiError> {
        if procs.is_empty() {
            return group_empty();
        }
        Ok(Handle::new(Group {
            procs,
            parent: None,
        }))
    }

    /// Allocates a group of `size` processes.
    ///
    /// Only the empty group can be allocated without contents; non-empty
    /// groups are built with [`Group::from_procs`].
    pub fn allocate(size: usize) -> Result<Handle<Group>, MpiError> {
        if size == 0 {
            group_empty()
        } else {
            Err(MpiError::Group)
        }
    }

    /// Number of processes in the group.
    pub fn size(&self) -> usize {
        self.procs.len()
    }

    /// Parent group this one was derived from, if any.
    pub fn parent(&self) -> Option<Handle<Group>> {
        self.parent.as_ref().map(Handle::retain)
    }

    /// Rank of the calling process in this group, or [`UNDEFINED`] when the
    /// caller is not a member.
    pub fn rank_of_current(&self) -> Result<i32, MpiError> {
        let me = process::current_process()?;
        Ok(self
            .procs
            .iter()
            .position(|proc| Handle::ptr_eq(proc, &me))
            .map(|rank| rank as i32)
            .unwrap_or(UNDEFINED))
    }

    /// Borrowed (not retained) process reference at `rank`.
    pub fn get_proc(&self, rank: i32) -> Result<&Handle<Process>, MpiError> {
        usize::try_from(rank)
            .ok()
            .and_then(|index| self.procs.get(index))
            .ok_or(MpiError::Rank)
    }
}

/// Releases a group handle, resetting it to the `GROUP_NULL` sentinel.
///
/// Freeing the sentinel itself is an error.
pub fn group_free(group: &mut Handle<Group>) -> Result<(), MpiError> {
    let null = group_null()?;
    if Handle::ptr_eq(group, &null) {
        return Err(MpiError::Group);
    }
    *group = null;
    Ok(())
}

/// The shared empty group.
pub fn group_empty() -> Result<Handle<Group>, MpiError> {
    GROUP_EMPTY
        .lock()
        .as_ref()
        .map(Handle::retain)
        .ok_or(MpiError::Intern)
}

/// The null-group sentinel.
pub fn group_null() -> Result<Handle<Group>, MpiError> {
    GROUP_NULL
        .lock()
        .as_ref()
        .map(Handle::retain)
        .ok_or(MpiError::Intern)
}

/// Brings up the distinguished group instances.
pub(crate) fn init() -> Result<(), MpiError> {
    *GROUP_EMPTY.lock() = Some(Handle::new(Group {
        procs: Vec::new(),
        parent: None,
    }));
    *GROUP_NULL.lock() = Some(Handle::new(Group {
        procs: Vec::new(),
        parent: None,
    }));
    Ok(())
}

/// Drops the distinguished group instances.
pub(crate) fn finalize() -> Result<(), MpiError> {
    *GROUP_EMPTY.lock() = None;
    *GROUP_NULL.lock() = None;
    Ok(())
}
