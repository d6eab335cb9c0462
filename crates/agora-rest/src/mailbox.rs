//! A session's bounded inbox: envelopes delivered while the caller
//! isn't polling accumulate here, oldest-dropped-first once full,
//! mirroring the rate limiter's bounded-memory discipline.

use std::collections::VecDeque;

use agora_envelope::Envelope;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct Mailbox {
    capacity: usize,
    queue: VecDeque<Envelope>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity.min(256)),
        }
    }

    /// Pushes `envelope`, dropping the oldest entry if the mailbox is
    /// already at capacity.
    pub fn push(&mut self, envelope: Envelope) {
        if self.queue.len() >= self.capacity {
            self.queue.pop_front();
        }
        self.queue.push_back(envelope);
    }

    /// Drains every currently-queued envelope, oldest first.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
