//! Participants
//!
//! A participant is a routing endpoint attached to the director: a framed
//! network peer, or an in-process component such as a client agent shard.
//! `ParticipantCore` carries the behavior every variant shares; the
//! `Participant` trait is the seam the director delivers through.

mod local;
mod network;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channelmap::{ChannelRange, Subscriber};
use crate::director::MessageDirector;
use crate::error::Error;
use crate::protocol::constants::Channel;
use crate::protocol::datagram::Datagram;

pub use local::LocalParticipant;
pub use network::NetworkParticipant;

/// A routing endpoint attached to the director
pub trait Participant: Send + Sync {
    /// Shared participant state
    fn core(&self) -> &ParticipantCore;

    /// Deliver a routed datagram to this participant
    ///
    /// Called by the dispatch task; implementations must not block.
    fn handle_datagram(&self, dg: &Datagram);

    /// Tear the participant down; idempotent
    fn terminate(&self, err: Error);

    /// Diagnostic name
    fn name(&self) -> String {
        self.core().name()
    }
}

/// State and operations shared by every participant variant
pub struct ParticipantCore {
    md: Arc<MessageDirector>,
    subscriber: Arc<Subscriber>,
    post_removes: Mutex<Vec<Datagram>>,
    name: Mutex<String>,
    url: Mutex<String>,
    terminated: AtomicBool,
}

impl ParticipantCore {
    /// Create a core attached to a director
    pub fn new(md: Arc<MessageDirector>) -> Self {
        Self {
            md,
            subscriber: Subscriber::new(),
            post_removes: Mutex::new(Vec::new()),
            name: Mutex::new(String::new()),
            url: Mutex::new(String::new()),
            terminated: AtomicBool::new(false),
        }
    }

    /// Bind the subscriber back-reference and enter the participant registry
    ///
    /// Must be called once, right after the owning `Arc` is constructed.
    pub fn register(&self, participant: &Arc<dyn Participant>) {
        self.subscriber.bind(Arc::downgrade(participant));
        self.md.add_participant(Arc::clone(participant));
    }

    /// The director this participant is attached to
    pub fn director(&self) -> &Arc<MessageDirector> {
        &self.md
    }

    /// This participant's handle in the subscription index
    pub fn subscriber(&self) -> &Arc<Subscriber> {
        &self.subscriber
    }

    /// Subscribe to a channel
    pub fn subscribe_channel(&self, channel: Channel) {
        self.md
            .channel_map()
            .subscribe_channel(&self.subscriber, channel);
    }

    /// Unsubscribe from a channel
    pub fn unsubscribe_channel(&self, channel: Channel) {
        self.md
            .channel_map()
            .unsubscribe_channel(&self.subscriber, channel);
    }

    /// Subscribe to a channel range
    pub fn subscribe_range(&self, range: ChannelRange) {
        self.md.channel_map().subscribe_range(&self.subscriber, range);
    }

    /// Unsubscribe one instance of a channel range
    pub fn unsubscribe_range(&self, range: ChannelRange) {
        self.md
            .channel_map()
            .unsubscribe_range(&self.subscriber, range);
    }

    /// Queue a datagram as a new flow
    pub fn route_datagram(&self, dg: Datagram) {
        self.md.route_datagram(dg, self.subscriber.participant());
    }

    /// Queue a datagram onto the current head flow
    pub fn route_datagram_early(&self, dg: Datagram) {
        self.md
            .route_datagram_early(dg, self.subscriber.participant());
    }

    /// Store a datagram to route when this participant goes away
    ///
    /// The datagram is also handed to the upstream director immediately so
    /// it can replay it if the connection to this whole director dies.
    pub fn add_post_remove(&self, dg: Datagram) {
        self.md.upstream_handle().preroute_post_remove(&dg);
        self.post_removes.lock().push(dg);
    }

    /// Discard the stored post-remove datagrams, here and upstream
    pub fn clear_post_removes(&self) {
        self.post_removes.lock().clear();
        self.md.upstream_handle().recall_post_removes();
    }

    /// Route every stored post-remove, then retract the upstream copies
    ///
    /// Post-removes enter through the early path so they serialize into the
    /// flow being dispatched when the participant disappears.
    pub fn post_remove(&self) {
        let pending: Vec<Datagram> = std::mem::take(&mut *self.post_removes.lock());
        for dg in pending {
            self.route_datagram_early(dg);
        }
        self.md.upstream_handle().recall_post_removes();
    }

    /// Set the diagnostic name
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock() = name.into();
    }

    /// Diagnostic name
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    /// Set the diagnostic url
    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    /// Diagnostic url
    pub fn url(&self) -> String {
        self.url.lock().clone()
    }

    /// Whether the participant has been torn down
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Tear down: route post-removes, leave the index, leave the registry
    ///
    /// Idempotent; the second and later calls return immediately.
    pub fn cleanup(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        self.post_remove();
        self.subscriber.deactivate();
        self.md.channel_map().unsubscribe_all(&self.subscriber);
        if let Some(participant) = self.subscriber.participant() {
            self.md.remove_participant(&participant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{
        CONTROL_ADD_POST_REMOVE, CONTROL_CLEAR_POST_REMOVES, CONTROL_MESSAGE,
    };
    use crate::protocol::iterator::DatagramIterator;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn payload(byte: u8, channel: Channel) -> Datagram {
        let mut dg = Datagram::new();
        dg.add_server_header(&[channel], 0, 0);
        dg.add_u8(byte);
        dg
    }

    #[tokio::test]
    async fn test_post_removes_replay_once_in_order_on_cleanup() {
        let md = MessageDirector::new();
        md.spawn_dispatch();

        let (watcher, mut rx) = LocalParticipant::create(Arc::clone(&md), "watcher");
        watcher.subscribe_channel(999);

        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        let first = payload(0x01, 999);
        let second = payload(0x02, 999);
        b.add_post_remove(first.clone());
        b.add_post_remove(second.clone());
        b.core().cleanup();

        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.unwrap(), first);
        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.unwrap(), second);
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        // the index no longer knows the terminated participant
        assert_eq!(md.participant_count(), 1);
        assert!(b.core().subscriber().channels().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let md = MessageDirector::new();
        md.spawn_dispatch();

        let (watcher, mut rx) = LocalParticipant::create(Arc::clone(&md), "watcher");
        watcher.subscribe_channel(999);

        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        b.subscribe_channel(55);
        b.add_post_remove(payload(0x01, 999));

        b.core().cleanup();
        b.core().cleanup();

        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(got.is_some());
        // the second cleanup routed nothing more
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        assert_eq!(md.participant_count(), 1);
        assert_eq!(md.channel_map().subscriber_count(55), 0);
    }

    #[tokio::test]
    async fn test_cleared_post_removes_are_not_replayed() {
        let md = MessageDirector::new();
        md.spawn_dispatch();

        let (watcher, mut rx) = LocalParticipant::create(Arc::clone(&md), "watcher");
        watcher.subscribe_channel(999);

        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        b.add_post_remove(payload(0x01, 999));
        b.clear_post_removes();
        b.core().cleanup();

        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_post_removes_are_prerouted_and_recalled_upstream() {
        let md = MessageDirector::new();
        let (tx, mut upstream) = mpsc::unbounded_channel();
        md.upstream_handle().install(tx);

        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        let pr = payload(0x01, 999);
        b.add_post_remove(pr.clone());

        // stored upstream immediately, wrapped as a blob
        let dg = upstream.try_recv().unwrap();
        let mut dgi = DatagramIterator::new(&dg);
        assert_eq!(dgi.read_u8().unwrap(), 1);
        assert_eq!(dgi.read_channel().unwrap(), CONTROL_MESSAGE);
        assert_eq!(dgi.read_u16().unwrap(), CONTROL_ADD_POST_REMOVE);
        assert_eq!(dgi.read_blob().unwrap(), pr);

        b.clear_post_removes();
        let dg = upstream.try_recv().unwrap();
        let mut dgi = DatagramIterator::new(&dg);
        dgi.skip_headers().unwrap();
        assert_eq!(dgi.read_u16().unwrap(), CONTROL_CLEAR_POST_REMOVES);
    }

    #[tokio::test]
    async fn test_name_and_url_round_trip() {
        let md = MessageDirector::new();
        let (a, _rx) = LocalParticipant::create(Arc::clone(&md), "client agent");

        assert_eq!(a.core().name(), "client agent");
        a.core().set_url("otp://ca.cluster:7199");
        assert_eq!(a.core().url(), "otp://ca.cluster:7199");
    }
}
