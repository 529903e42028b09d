//! In-process participants
//!
//! A `LocalParticipant` attaches an in-process component (client agent
//! shard, state server, test harness) to the director. Deliveries drain
//! into an unbounded channel handed to the owner at creation.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::channelmap::ChannelRange;
use crate::director::MessageDirector;
use crate::error::Error;
use crate::protocol::constants::Channel;
use crate::protocol::datagram::Datagram;

use super::{Participant, ParticipantCore};

/// A routing endpoint living inside this process
pub struct LocalParticipant {
    core: ParticipantCore,
    inbox: mpsc::UnboundedSender<Datagram>,
}

impl LocalParticipant {
    /// Attach a local participant to the director
    ///
    /// Returns the participant and the receiving end of its delivery queue.
    pub fn create(
        md: Arc<MessageDirector>,
        name: &str,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let participant = Arc::new(Self {
            core: ParticipantCore::new(md),
            inbox: tx,
        });
        participant.core.set_name(name);

        let handle: Arc<dyn Participant> = Arc::clone(&participant) as Arc<dyn Participant>;
        participant.core.register(&handle);
        (participant, rx)
    }

    /// Shared participant state
    pub fn core(&self) -> &ParticipantCore {
        &self.core
    }

    /// Subscribe to a channel
    pub fn subscribe_channel(&self, channel: Channel) {
        self.core.subscribe_channel(channel);
    }

    /// Unsubscribe from a channel
    pub fn unsubscribe_channel(&self, channel: Channel) {
        self.core.unsubscribe_channel(channel);
    }

    /// Subscribe to a channel range
    pub fn subscribe_range(&self, range: ChannelRange) {
        self.core.subscribe_range(range);
    }

    /// Unsubscribe one instance of a channel range
    pub fn unsubscribe_range(&self, range: ChannelRange) {
        self.core.unsubscribe_range(range);
    }

    /// Queue a datagram as a new flow
    pub fn route_datagram(&self, dg: Datagram) {
        self.core.route_datagram(dg);
    }

    /// Queue a datagram onto the current head flow
    pub fn route_datagram_early(&self, dg: Datagram) {
        self.core.route_datagram_early(dg);
    }

    /// Store a datagram to route when this participant goes away
    pub fn add_post_remove(&self, dg: Datagram) {
        self.core.add_post_remove(dg);
    }

    /// Discard the stored post-remove datagrams
    pub fn clear_post_removes(&self) {
        self.core.clear_post_removes();
    }
}

impl Participant for LocalParticipant {
    fn core(&self) -> &ParticipantCore {
        &self.core
    }

    fn handle_datagram(&self, dg: &Datagram) {
        // the owner may have dropped its receiver; deliveries just stop
        let _ = self.inbox.send(dg.clone());
    }

    fn terminate(&self, err: Error) {
        if self.core.is_terminated() {
            return;
        }
        tracing::info!(name = %self.core.name(), error = %err, "local participant terminated");
        self.core.cleanup();
    }
}
