//! Message director
//!
//! The director owns the subscription index, the participant registry, and
//! the flow queue. Producers append datagrams from any task; a single
//! dispatch task drains the queue, which is what gives consecutive datagrams
//! from one participant a total delivery order.

mod queue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::channelmap::ChannelMap;
use crate::error::{DatagramError, Error};
use crate::participant::Participant;
use crate::protocol::datagram::Datagram;
use crate::protocol::iterator::DatagramIterator;
use crate::stats::{DirectorStats, StatsSnapshot};
use crate::upstream::UpstreamHandle;

use queue::{FlowQueue, QueueElement};

/// Routing core shared by every participant
///
/// Constructed once per process (or per test) and threaded through
/// participants as an `Arc`; there is no global instance.
pub struct MessageDirector {
    channel_map: ChannelMap,
    queue: Mutex<FlowQueue>,
    wake: Notify,
    stopped: AtomicBool,
    participants: Mutex<Vec<Arc<dyn Participant>>>,
    upstream: Arc<UpstreamHandle>,
    stats: DirectorStats,
}

impl MessageDirector {
    /// Create a director with an empty index and queue
    pub fn new() -> Arc<Self> {
        let upstream = Arc::new(UpstreamHandle::new());
        Arc::new(Self {
            channel_map: ChannelMap::new(Arc::clone(&upstream)),
            queue: Mutex::new(FlowQueue::default()),
            wake: Notify::new(),
            stopped: AtomicBool::new(false),
            participants: Mutex::new(Vec::new()),
            upstream,
            stats: DirectorStats::default(),
        })
    }

    /// The subscription index
    pub fn channel_map(&self) -> &ChannelMap {
        &self.channel_map
    }

    pub(crate) fn upstream_handle(&self) -> &Arc<UpstreamHandle> {
        &self.upstream
    }

    pub(crate) fn stats_handle(&self) -> &DirectorStats {
        &self.stats
    }

    /// Snapshot of the routing counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn add_participant(&self, participant: Arc<dyn Participant>) {
        self.participants.lock().push(participant);
    }

    pub(crate) fn remove_participant(&self, participant: &Arc<dyn Participant>) {
        self.participants
            .lock()
            .retain(|p| !Arc::ptr_eq(p, participant));
    }

    /// Number of attached participants
    pub fn participant_count(&self) -> usize {
        self.participants.lock().len()
    }

    /// Queue a datagram as a new flow
    ///
    /// `sender = None` marks an upstream-originated or synthetic datagram,
    /// which is dispatched locally but never mirrored upstream.
    pub fn route_datagram(&self, dg: Datagram, sender: Option<Arc<dyn Participant>>) {
        self.queue.lock().push_flow(QueueElement { dg, sender });
        self.wake.notify_one();
    }

    /// Queue a datagram onto the head flow
    ///
    /// Keeps a burst from one participant together so it is served before
    /// flows submitted after it.
    pub fn route_datagram_early(&self, dg: Datagram, sender: Option<Arc<dyn Participant>>) {
        self.queue.lock().push_early(QueueElement { dg, sender });
        self.wake.notify_one();
    }

    /// Stop the dispatch loop; queued datagrams are discarded
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn next_element(&self) -> Option<QueueElement> {
        self.queue.lock().pop_element()
    }

    /// Spawn the dispatch loop on the current runtime
    pub fn spawn_dispatch(self: &Arc<Self>) -> JoinHandle<()> {
        let md = Arc::clone(self);
        tokio::spawn(md.run_dispatch())
    }

    /// Drain the queue until `shutdown` is called
    ///
    /// Exactly one dispatch task may run per director.
    pub async fn run_dispatch(self: Arc<Self>) {
        tracing::debug!("dispatch loop started");
        loop {
            while let Some(element) = self.next_element() {
                if self.is_stopped() {
                    tracing::debug!("dispatch loop stopped; discarding queued datagrams");
                    return;
                }
                self.dispatch_element(element);
            }
            if self.is_stopped() {
                break;
            }
            self.wake.notified().await;
        }
        tracing::debug!("dispatch loop stopped");
    }

    /// Dispatch one element behind a fault barrier
    ///
    /// A malformed datagram terminates its sender and nothing else.
    fn dispatch_element(&self, element: QueueElement) {
        if let Err(err) = self.dispatch(&element) {
            tracing::error!(error = %err, "reached end of datagram while routing");
            if let Some(sender) = element.sender {
                sender.terminate(Error::Datagram(err));
            }
        }
    }

    fn dispatch(&self, element: &QueueElement) -> Result<(), DatagramError> {
        let mut dgi = DatagramIterator::new(&element.dg);
        let recipient_count = dgi.read_u8()?;
        let mut recipients = Vec::with_capacity(recipient_count as usize);
        for _ in 0..recipient_count {
            recipients.push(dgi.read_channel()?);
        }

        self.stats.record_routed();
        let mut delivered = 0;
        for channel in recipients {
            delivered += self.channel_map.send(channel, &element.dg);
        }
        if delivered == 0 {
            self.stats.record_dropped();
            tracing::trace!("datagram had no local recipients");
        } else {
            self.stats.record_delivered(delivered as u64);
        }

        if element.sender.is_some() && self.upstream.forward(element.dg.clone()) {
            self.stats.record_forwarded();
        }
        Ok(())
    }
}
