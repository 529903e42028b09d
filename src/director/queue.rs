//! Flow queue
//!
//! Datagrams wait for dispatch grouped into flows: one queue entry per
//! contiguous burst from a participant. Early-routed datagrams join the
//! entry at the head of the queue so they are served before any flow
//! submitted after them.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::participant::Participant;
use crate::protocol::datagram::Datagram;

/// One datagram plus its submitting participant
///
/// `sender` is `None` for upstream-originated datagrams, which must not be
/// mirrored back upstream.
pub(crate) struct QueueElement {
    pub dg: Datagram,
    pub sender: Option<Arc<dyn Participant>>,
}

/// An ordered burst of datagrams from the same flow
pub(crate) struct QueueEntry {
    pub elements: VecDeque<QueueElement>,
}

impl QueueEntry {
    fn new(element: QueueElement) -> Self {
        Self {
            elements: VecDeque::from([element]),
        }
    }
}

/// FIFO of flows with head-append support
#[derive(Default)]
pub(crate) struct FlowQueue {
    entries: VecDeque<QueueEntry>,
}

impl FlowQueue {
    /// Append a datagram as a new flow at the tail
    pub fn push_flow(&mut self, element: QueueElement) {
        self.entries.push_back(QueueEntry::new(element));
    }

    /// Append a datagram to the head flow, or start one if the queue is empty
    pub fn push_early(&mut self, element: QueueElement) {
        match self.entries.front_mut() {
            Some(head) => head.elements.push_back(element),
            None => self.push_flow(element),
        }
    }

    /// Take the next element in dispatch order
    ///
    /// An entry whose last element was taken stays at the head until the
    /// next call finds it empty, so early-routed datagrams can still join
    /// its flow in the window between two dispatches.
    pub fn pop_element(&mut self) -> Option<QueueElement> {
        loop {
            let head = self.entries.front_mut()?;
            match head.elements.pop_front() {
                Some(element) => return Some(element),
                None => {
                    self.entries.pop_front();
                }
            }
        }
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
