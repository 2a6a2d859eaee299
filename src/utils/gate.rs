//! Ticket based admission control.
//!
//! A [`Gate`] hands out at most `capacity` tickets at a time. Tickets are
//! positions of a ring, a position is reused only after its previous holder
//! left. With a drain callback installed, the gate stops admitting new
//! holders every time the ring wraps, waits for the outstanding ones to leave,
//! runs the callback alone and then reopens.
use std::sync::{Condvar, Mutex};

type Callback = Box<dyn Fn() + Send + Sync>;

struct State {
    busy: Vec<bool>,
    pos: usize,
    running: usize,
    stop: bool,
}

pub struct Gate {
    state: Mutex<State>,
    cv: Condvar,
    f: Option<Callback>,
}

/// Slot held in a [`Gate`], released on drop.
#[must_use = "the slot is released as soon as the ticket is dropped"]
pub struct Ticket<'a> {
    gate: &'a Gate,
    idx: usize,
}

impl Ticket<'_> {
    #[inline]
    pub fn idx(&self) -> usize {
        self.idx
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.gate.release(self.idx);
    }
}

impl Gate {
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Gate running `f` with no outstanding tickets each time the ring wraps.
    pub fn with_callback<F>(capacity: usize, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(capacity, Some(Box::new(f)))
    }

    fn build(capacity: usize, f: Option<Callback>) -> Self {
        assert!(capacity > 0, "gate capacity must be positive");
        Self {
            state: Mutex::new(State {
                busy: vec![false; capacity],
                pos: 0,
                running: 0,
                stop: false,
            }),
            cv: Condvar::new(),
            f,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().busy.len()
    }

    /// Number of tickets currently held.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().running
    }

    /// Block until a slot is free.
    pub fn enter(&self) -> Ticket<'_> {
        let mut s = self.state.lock().unwrap();
        while s.busy[s.pos] || s.stop {
            s = self.cv.wait(s).unwrap();
        }
        let idx = s.pos;
        s.busy[idx] = true;
        s.running += 1;
        s.pos += 1;
        if s.pos == s.busy.len() {
            s.pos = 0;
            if let Some(f) = self.f.as_ref() {
                s.stop = true;
                while s.running != 1 {
                    s = self.cv.wait(s).unwrap();
                }
                drop(s);

                f();

                s = self.state.lock().unwrap();
                s.stop = false;
                self.cv.notify_all();
            }
        }
        Ticket { gate: self, idx }
    }

    #[inline]
    pub fn leave(&self, ticket: Ticket<'_>) {
        debug_assert!(std::ptr::eq(ticket.gate, self));
        drop(ticket)
    }

    fn release(&self, idx: usize) {
        let mut s = self.state.lock().unwrap();
        debug_assert!(s.busy[idx]);
        s.busy[idx] = false;
        s.running -= 1;
        self.cv.notify_all();
    }
}
