//! Subscription handles
//!
//! Each participant owns exactly one `Subscriber` for its lifetime. The
//! subscriber records what the participant listens to and carries the
//! non-owning back-reference the index uses to reach the participant at
//! delivery time.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::participant::Participant;
use crate::protocol::constants::Channel;

/// Inclusive interval of channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRange {
    /// Lowest channel in the range
    pub lo: Channel,
    /// Highest channel in the range
    pub hi: Channel,
}

impl ChannelRange {
    /// Create a range, normalizing a reversed pair
    pub fn new(lo: Channel, hi: Channel) -> Self {
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self { lo: hi, hi: lo }
        }
    }

    /// Check whether a channel falls inside the range
    pub fn contains(&self, channel: Channel) -> bool {
        self.lo <= channel && channel <= self.hi
    }

    /// Check whether two ranges share any channel
    pub fn overlaps(&self, other: &ChannelRange) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }
}

impl fmt::Display for ChannelRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// A participant's handle in the subscription index
///
/// `active` is flipped once, during participant cleanup; an inactive
/// subscriber receives no further deliveries and accepts no new
/// subscriptions while its teardown is in flight.
#[derive(Debug)]
pub struct Subscriber {
    active: AtomicBool,
    participant: Mutex<Option<Weak<dyn Participant>>>,
    pub(crate) channels: Mutex<HashSet<Channel>>,
    pub(crate) ranges: Mutex<Vec<ChannelRange>>,
}

impl Subscriber {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            participant: Mutex::new(None),
            channels: Mutex::new(HashSet::new()),
            ranges: Mutex::new(Vec::new()),
        })
    }

    /// Attach the owning participant
    pub(crate) fn bind(&self, participant: Weak<dyn Participant>) {
        *self.participant.lock() = Some(participant);
    }

    /// Whether the subscriber still receives deliveries
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// The owning participant, if it is still alive
    pub fn participant(&self) -> Option<Arc<dyn Participant>> {
        self.participant.lock().as_ref().and_then(Weak::upgrade)
    }

    /// Snapshot of the subscribed channels
    pub fn channels(&self) -> HashSet<Channel> {
        self.channels.lock().clone()
    }

    /// Snapshot of the subscribed ranges
    ///
    /// Ranges are a multiset: a range subscribed twice appears twice.
    pub fn ranges(&self) -> Vec<ChannelRange> {
        self.ranges.lock().clone()
    }
}
