//! Buffering between the CAN interface and the TCP stream
//!
//! In FIFO mode every accepted frame is sent, in order. In unordered mode
//! only the newest unsent frame per identifier is kept, so a slow or
//! rate-limited link always carries the latest value of each signal.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tcpcan_core::CanMessage;

/// Identifier key; 11-bit and 29-bit IDs with the same value are distinct
type FrameKey = (u32, bool);

fn key(msg: &CanMessage) -> FrameKey {
    (msg.arbitration_id, msg.is_extended_id)
}

#[derive(Debug)]
enum Pending {
    Fifo(Vec<CanMessage>),
    Latest {
        frames: Vec<CanMessage>,
        index: HashMap<FrameKey, usize>,
    },
}

/// Pending frames plus the flush rate limiter
#[derive(Debug)]
pub struct Outbox {
    pending: Pending,
    min_interval: Option<Duration>,
    last_flush: Option<Instant>,
    overwritten: u64,
}

impl Outbox {
    pub fn new(unordered: bool, min_interval: Option<Duration>) -> Self {
        let pending = if unordered {
            Pending::Latest {
                frames: Vec::new(),
                index: HashMap::new(),
            }
        } else {
            Pending::Fifo(Vec::new())
        };
        Self {
            pending,
            min_interval,
            last_flush: None,
            overwritten: 0,
        }
    }

    pub fn push(&mut self, msg: CanMessage) {
        match &mut self.pending {
            Pending::Fifo(frames) => frames.push(msg),
            Pending::Latest { frames, index } => match index.get(&key(&msg)) {
                Some(&slot) => {
                    frames[slot] = msg;
                    self.overwritten += 1;
                }
                None => {
                    index.insert(key(&msg), frames.len());
                    frames.push(msg);
                }
            },
        }
    }

    pub fn len(&self) -> usize {
        match &self.pending {
            Pending::Fifo(frames) => frames.len(),
            Pending::Latest { frames, .. } => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames replaced by a newer one before they were sent
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// True when there is something to send and the rate limit allows it
    pub fn is_due(&self, now: Instant) -> bool {
        if self.is_empty() {
            return false;
        }
        match (self.min_interval, self.last_flush) {
            (Some(interval), Some(last)) => now.duration_since(last) >= interval,
            _ => true,
        }
    }

    /// Take every pending frame, in first-queued order
    pub fn take(&mut self, now: Instant) -> Vec<CanMessage> {
        self.last_flush = Some(now);
        match &mut self.pending {
            Pending::Fifo(frames) => std::mem::take(frames),
            Pending::Latest { frames, index } => {
                index.clear();
                std::mem::take(frames)
            }
        }
    }
}
