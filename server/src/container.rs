use std::sync::{Condvar, Mutex};

/// A stable handle into a [`BoundedList`]. Opaque outside this module; does
/// not carry a generation counter, so a handle from one list must never be
/// used against another, and a handle outlived by a `remove_*` call becomes
/// meaningless (using it again is a logic error in the caller, not undefined
/// behavior — the slot it names may since have been recycled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(usize);

struct Slot<T> {
    data: Option<T>,
    prev: Option<usize>,
    next: Option<usize>,
}

struct Inner<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    capacity: usize,
}

/// A bounded, thread-safe doubly-linked sequence backed by a fixed-size node
/// pool with a free list, matching the concurrency contract of the original
/// C `list_t`: insertion is always at the head (most recent), the tail holds
/// the oldest entry, `add` blocks while full, `pop_front` blocks while empty,
/// and removal returns a node to the free list in constant time.
///
/// Unlike the source, nodes are addressed by a stable array index
/// ([`Handle`]) rather than a raw pointer, so registries built on top of this
/// container can hand out ids that stay valid in the face of the container
/// reshuffling its internal storage.
pub struct BoundedList<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedList<T> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                data: None,
                prev: None,
                next: None,
            });
            free.push(capacity - 1 - i);
        }
        BoundedList {
            inner: Mutex::new(Inner {
                slots,
                free,
                head: None,
                tail: None,
                len: 0,
                capacity,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Inserts `value` at the head, blocking while the list is full.
    /// Returns the handle of the newly inserted node.
    pub fn add(&self, value: T) -> Handle {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        while inner.len >= inner.capacity {
            inner = self.not_full.wait(inner).unwrap_or_else(|e| e.into_inner());
        }

        let idx = inner.free.pop().expect("free list empty despite len < capacity");
        inner.slots[idx].data = Some(value);
        inner.slots[idx].prev = None;
        inner.slots[idx].next = inner.head;
        if let Some(head) = inner.head {
            inner.slots[head].prev = Some(idx);
        } else {
            inner.tail = Some(idx);
        }
        inner.head = Some(idx);
        inner.len += 1;

        self.not_empty.notify_one();
        Handle(idx)
    }

    /// Removes and returns the node at `handle`, or `None` if it is vacant
    /// (already removed). Constant time.
    pub fn remove_by_handle(&self, handle: Handle) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::unlink(&mut inner, handle.0)
    }

    /// Scans from head to tail and removes the first node whose value
    /// matches `pred`. The Rust-idiomatic equivalent of the source's
    /// `removedata`, which does a byte-equality scan; here callers supply the
    /// match predicate directly instead of relying on `memcmp`.
    pub fn remove_where<F: Fn(&T) -> bool>(&self, pred: F) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            cursor = inner.slots[idx].next;
            let matches = inner.slots[idx]
                .data
                .as_ref()
                .map(|v| pred(v))
                .unwrap_or(false);
            if matches {
                return Self::unlink(&mut inner, idx);
            }
        }
        None
    }

    /// Removes and returns the value at the tail (oldest entry), blocking
    /// while the list is empty.
    pub fn pop_back(&self) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(tail) = inner.tail {
                return Self::unlink(&mut inner, tail).expect("tail handle must be occupied");
            }
            inner = self.not_empty.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn unlink(inner: &mut Inner<T>, idx: usize) -> Option<T> {
        let value = inner.slots[idx].data.take()?;

        let prev = inner.slots[idx].prev;
        let next = inner.slots[idx].next;
        match prev {
            Some(p) => inner.slots[p].next = next,
            None => inner.head = next,
        }
        match next {
            Some(n) => inner.slots[n].prev = prev,
            None => inner.tail = prev,
        }
        inner.slots[idx].prev = None;
        inner.slots[idx].next = None;

        inner.len -= 1;
        inner.free.push(idx);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).capacity
    }

    /// Calls `f` with a reference to every value, in head-to-tail (newest
    /// first) order, under a single acquisition of the container's lock —
    /// the Rust analogue of the source's convention that callers hold
    /// `list->lock` while walking `head->next`.
    pub fn for_each_from_head<F: FnMut(&T)>(&self, mut f: F) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            if let Some(value) = &inner.slots[idx].data {
                f(value);
            }
            cursor = inner.slots[idx].next;
        }
    }

    /// As [`Self::for_each_from_head`] but walks tail-to-head (oldest
    /// first), matching the dispatcher's oldest-waiting-survivor-first scan.
    pub fn for_each_from_tail<F: FnMut(&T)>(&self, mut f: F) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut cursor = inner.tail;
        while let Some(idx) = cursor {
            if let Some(value) = &inner.slots[idx].data {
                f(value);
            }
            cursor = inner.slots[idx].prev;
        }
    }

    /// Walks tail-to-head under a single lock acquisition, calling `mutate`
    /// on each value in turn and stopping at (and returning) the handle and
    /// value of the first one for which `mutate` returns `true`. Used by the
    /// dispatcher to find-and-flip the oldest WAITING survivor atomically
    /// under the registry lock (§4.4).
    pub fn find_and_mark_from_tail<F: FnMut(&mut T) -> bool>(
        &self,
        mut mutate: F,
    ) -> Option<(Handle, T)>
    where
        T: Clone,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut cursor = inner.tail;
        while let Some(idx) = cursor {
            cursor = inner.slots[idx].prev;
            if let Some(value) = &mut inner.slots[idx].data {
                if mutate(value) {
                    return Some((Handle(idx), value.clone()));
                }
            }
        }
        None
    }
}

impl<T: Clone> BoundedList<T> {
    /// Returns a snapshot copy of every value, head to tail.
    pub fn to_vec(&self) -> Vec<T> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(inner.len);
        let mut cursor = inner.head;
        while let Some(idx) = cursor {
            if let Some(value) = &inner.slots[idx].data {
                out.push(value.clone());
            }
            cursor = inner.slots[idx].next;
        }
        out
    }
}
