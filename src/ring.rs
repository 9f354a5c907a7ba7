//! Fixed-capacity page ring shared between the acquisition and consumer
//! contexts.
//!
//! Exactly one producer (the timer-driven sampler) and one consumer (the
//! cooperative main loop) touch a given ring. Each operation copies one page
//! inside a single bounded critical section; under saturation a push
//! overwrites the oldest unread page rather than failing, keeping the
//! producer free of blocking and error paths.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::page::Page;

/// Circular store of page slots. `head` points at the oldest page;
/// insertions land `count` slots past it. Invariant: `0 <= count <= N`.
pub struct PageRing<const N: usize> {
    slots: [Option<Page>; N],
    head: usize,
    count: usize,
}

impl<const N: usize> PageRing<N> {
    pub const fn new() -> Self {
        Self {
            slots: [None; N],
            head: 0,
            count: 0,
        }
    }

    /// Stores a page, dropping the oldest one when full. Never fails.
    pub fn push(&mut self, page: Page) {
        if self.count == N {
            // Saturated: overwrite the oldest slot and advance past it.
            self.slots[self.head] = Some(page);
            self.head = (self.head + 1) % N;
        } else {
            self.slots[(self.head + self.count) % N] = Some(page);
            self.count += 1;
        }
    }

    /// Removes and returns the oldest page, or `None` when empty.
    pub fn pop(&mut self) -> Option<Page> {
        if self.count == 0 {
            return None;
        }
        let page = self.slots[self.head].take();
        self.head = (self.head + 1) % N;
        self.count -= 1;
        page
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&mut self) {
        self.slots = [None; N];
        self.head = 0;
        self.count = 0;
    }
}

impl<const N: usize> Default for PageRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`PageRing`] behind a critical-section mutex, so the producer's push may
/// run from a timer/interrupt context while the consumer pops from task
/// context. Suitable for a `static`.
pub struct SharedPageRing<const N: usize> {
    inner: Mutex<CriticalSectionRawMutex, RefCell<PageRing<N>>>,
}

impl<const N: usize> SharedPageRing<N> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(PageRing::new())),
        }
    }

    pub fn push(&self, page: Page) {
        self.inner.lock(|ring| ring.borrow_mut().push(page));
    }

    pub fn pop(&self) -> Option<Page> {
        self.inner.lock(|ring| ring.borrow_mut().pop())
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|ring| ring.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn clear(&self) {
        self.inner.lock(|ring| ring.borrow_mut().clear());
    }
}

impl<const N: usize> Default for SharedPageRing<N> {
    fn default() -> Self {
        Self::new()
    }
}
