//! # Indexed Handle Table
//!
//! A dense table mapping small integer indices to object handles, used by the
//! process registry to hand out stable PIDs. Insertion reuses the lowest free
//! slot (tracked with a `lowest_free` hint so the common case is O(1)), and
//! the backing vector grows by a fixed block size rather than per element.
//!
//! The table is internally synchronized; callers never observe a lock.

use parking_lot::Mutex;

use crate::object::Handle;

/// Growth quantum for the backing vector.
const GROWTH_BLOCK: usize = 4;

/// Dense indexed table of handles with first-free bookkeeping.
pub struct PointerTable<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    slots: Vec<Option<Handle<T>>>,
    /// Lowest index that might be free; slots below it are known occupied.
    lowest_free: usize,
    len: usize,
}

impl<T> PointerTable<T> {
    /// Creates a table with capacity for at least `initial` entries.
    pub fn with_capacity(initial: usize) -> Self {
        let cap = initial.max(GROWTH_BLOCK);
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, || None);
        PointerTable {
            inner: Mutex::new(Inner {
                slots,
                lowest_free: 0,
                len: 0,
            }),
        }
    }

    /// Inserts a handle and returns its index.
    ///
    /// Indices are stable until removed: unrelated inserts and removes never
    /// move an entry.
    pub fn insert(&self, handle: Handle<T>) -> usize {
        let mut inner = self.inner.lock();

        let start = inner.lowest_free;
        let index = match (start..inner.slots.len()).find(|&i| inner.slots[i].is_none()) {
            Some(i) => i,
            None => {
                let i = inner.slots.len();
                let new_len = i + GROWTH_BLOCK;
                inner.slots.resize_with(new_len, || None);
                i
            }
        };

        inner.slots[index] = Some(handle);
        inner.lowest_free = index + 1;
        inner.len += 1;
        index
    }

    /// Removes the entry at `index`, returning the handle that occupied it.
    pub fn remove(&self, index: usize) -> Option<Handle<T>> {
        let mut inner = self.inner.lock();

        let taken = inner.slots.get_mut(index).and_then(Option::take);
        if taken.is_some() {
            inner.len -= 1;
            if index < inner.lowest_free {
                inner.lowest_free = index;
            }
        }
        taken
    }

    /// Returns a retained handle to the entry at `index`, if occupied.
    pub fn get(&self, index: usize) -> Option<Handle<T>> {
        let inner = self.inner.lock();
        inner.slots.get(index).and_then(|s| s.as_ref().map(Handle::retain))
    }

    /// Number of occupied entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// True when no entry is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upper bound on valid indices (snapshot; grows over time).
    ///
    /// Iteration over `0..capacity()` with [`PointerTable::get`] visits every
    /// live entry without holding the internal lock across user code.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }
}
