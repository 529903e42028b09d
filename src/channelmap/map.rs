//! Subscription index
//!
//! The channel map answers "which subscribers want channel c?" in near
//! constant time for exact channels, with a linear scan over range entries
//! (the range population in a cluster is small). It is also the single
//! authority for what the director is subscribed to upstream: every mutation
//! computes the net subscription delta and replays it through the upstream
//! handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::participant::Participant;
use crate::protocol::constants::Channel;
use crate::protocol::datagram::Datagram;
use crate::upstream::UpstreamHandle;

use super::subscriber::{ChannelRange, Subscriber};

/// Subscribers for one exact channel
#[derive(Default)]
struct PointBucket {
    subscribers: Vec<Arc<Subscriber>>,
    /// Whether this channel is currently registered upstream as a point
    /// subscription. False while a range already covers the channel.
    announced: bool,
}

/// Subscribers for one exact `(lo, hi)` pair
///
/// Overlapping ranges are never coalesced; each distinct pair gets its own
/// entry, and one subscriber may appear several times if it subscribed the
/// same pair several times.
struct RangeEntry {
    range: ChannelRange,
    subscribers: Vec<Arc<Subscriber>>,
}

#[derive(Default)]
struct MapInner {
    points: BTreeMap<Channel, PointBucket>,
    ranges: Vec<RangeEntry>,
}

impl MapInner {
    fn range_covers(&self, channel: Channel) -> bool {
        self.ranges.iter().any(|e| e.range.contains(channel))
    }
}

/// Maps channels and ranges to subscriber sets
pub struct ChannelMap {
    inner: Mutex<MapInner>,
    upstream: Arc<UpstreamHandle>,
}

impl ChannelMap {
    pub(crate) fn new(upstream: Arc<UpstreamHandle>) -> Self {
        Self {
            inner: Mutex::new(MapInner::default()),
            upstream,
        }
    }

    /// Subscribe to an exact channel
    ///
    /// Idempotent per subscriber. The first subscriber on a channel not
    /// covered by any range registers the channel upstream.
    pub fn subscribe_channel(&self, subscriber: &Arc<Subscriber>, channel: Channel) {
        if !subscriber.is_active() {
            return;
        }

        let announce = {
            let mut inner = self.inner.lock();
            if !subscriber.channels.lock().insert(channel) {
                return;
            }

            let covered = inner.range_covers(channel);
            let bucket = inner.points.entry(channel).or_default();
            let first = bucket.subscribers.is_empty();
            if !bucket.subscribers.iter().any(|s| Arc::ptr_eq(s, subscriber)) {
                bucket.subscribers.push(Arc::clone(subscriber));
            }

            let announce = first && !covered;
            if announce {
                bucket.announced = true;
            }
            announce
        };

        tracing::debug!(channel, "channel subscribed");
        if announce {
            self.upstream.add_channel(channel);
        }
    }

    /// Unsubscribe from an exact channel
    ///
    /// When the last subscriber leaves a channel that was registered
    /// upstream, the registration is retracted.
    pub fn unsubscribe_channel(&self, subscriber: &Arc<Subscriber>, channel: Channel) {
        let retract = {
            let mut inner = self.inner.lock();
            if !subscriber.channels.lock().remove(&channel) {
                return;
            }

            let Some(bucket) = inner.points.get_mut(&channel) else {
                return;
            };
            bucket.subscribers.retain(|s| !Arc::ptr_eq(s, subscriber));

            if bucket.subscribers.is_empty() {
                let retract = bucket.announced;
                inner.points.remove(&channel);
                retract
            } else {
                false
            }
        };

        tracing::debug!(channel, "channel unsubscribed");
        if retract {
            self.upstream.remove_channel(channel);
        }
    }

    /// Subscribe to an inclusive channel range
    ///
    /// Duplicate and overlapping subscriptions are all retained; each must
    /// be unsubscribed individually. The first subscription for an exact
    /// `(lo, hi)` pair registers the range upstream.
    pub fn subscribe_range(&self, subscriber: &Arc<Subscriber>, range: ChannelRange) {
        if !subscriber.is_active() {
            return;
        }

        let announce = {
            let mut inner = self.inner.lock();
            subscriber.ranges.lock().push(range);

            if let Some(entry) = inner.ranges.iter_mut().find(|e| e.range == range) {
                entry.subscribers.push(Arc::clone(subscriber));
                false
            } else {
                inner.ranges.push(RangeEntry {
                    range,
                    subscribers: vec![Arc::clone(subscriber)],
                });
                true
            }
        };

        tracing::debug!(range = %range, "range subscribed");
        if announce {
            self.upstream.add_range(range);
        }
    }

    /// Unsubscribe one instance of a channel range
    ///
    /// When the last subscription for the exact pair goes away the upstream
    /// registration is retracted, and point channels the range was covering
    /// are registered upstream in its place so their coverage never lapses.
    pub fn unsubscribe_range(&self, subscriber: &Arc<Subscriber>, range: ChannelRange) {
        let mut reannounce = Vec::new();
        let retract = {
            let mut inner = self.inner.lock();
            {
                let mut ranges = subscriber.ranges.lock();
                let Some(position) = ranges.iter().position(|r| *r == range) else {
                    return;
                };
                ranges.remove(position);
            }

            let Some(index) = inner.ranges.iter().position(|e| e.range == range) else {
                return;
            };

            let entry = &mut inner.ranges[index];
            if let Some(position) = entry
                .subscribers
                .iter()
                .position(|s| Arc::ptr_eq(s, subscriber))
            {
                entry.subscribers.remove(position);
            }

            if inner.ranges[index].subscribers.is_empty() {
                inner.ranges.remove(index);

                let MapInner { points, ranges } = &mut *inner;
                for (&channel, bucket) in points.range_mut(range.lo..=range.hi) {
                    if !bucket.announced && !ranges.iter().any(|e| e.range.contains(channel)) {
                        bucket.announced = true;
                        reannounce.push(channel);
                    }
                }
                true
            } else {
                false
            }
        };

        tracing::debug!(range = %range, "range unsubscribed");
        if retract {
            self.upstream.remove_range(range);
            for channel in reannounce {
                self.upstream.add_channel(channel);
            }
        }
    }

    /// Remove a subscriber from every bucket it appears in
    ///
    /// Fires the same upstream retractions a one-by-one teardown would.
    pub fn unsubscribe_all(&self, subscriber: &Arc<Subscriber>) {
        let channels: Vec<Channel> = subscriber.channels.lock().iter().copied().collect();
        for channel in channels {
            self.unsubscribe_channel(subscriber, channel);
        }

        let ranges: Vec<ChannelRange> = subscriber.ranges.lock().clone();
        for range in ranges {
            self.unsubscribe_range(subscriber, range);
        }
    }

    /// Deliver a datagram to every active subscriber of a channel
    ///
    /// A subscriber reached through both a point and a range subscription
    /// receives one copy per call. Participant callbacks run after the index
    /// lock is released. Returns the number of deliveries.
    pub fn send(&self, channel: Channel, datagram: &Datagram) -> usize {
        let recipients: Vec<Arc<dyn Participant>> = {
            let inner = self.inner.lock();
            let mut subscribers: Vec<&Arc<Subscriber>> = Vec::new();

            if let Some(bucket) = inner.points.get(&channel) {
                subscribers.extend(bucket.subscribers.iter());
            }
            for entry in inner.ranges.iter().filter(|e| e.range.contains(channel)) {
                for subscriber in &entry.subscribers {
                    if !subscribers.iter().any(|s| Arc::ptr_eq(s, subscriber)) {
                        subscribers.push(subscriber);
                    }
                }
            }

            subscribers
                .into_iter()
                .filter(|s| s.is_active())
                .filter_map(|s| s.participant())
                .collect()
        };

        let delivered = recipients.len();
        for participant in recipients {
            participant.handle_datagram(datagram);
        }
        delivered
    }

    /// Number of active subscriptions covering a channel
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        let inner = self.inner.lock();
        let mut subscribers: Vec<&Arc<Subscriber>> = Vec::new();

        if let Some(bucket) = inner.points.get(&channel) {
            subscribers.extend(bucket.subscribers.iter());
        }
        for entry in inner.ranges.iter().filter(|e| e.range.contains(channel)) {
            for subscriber in &entry.subscribers {
                if !subscribers.iter().any(|s| Arc::ptr_eq(s, subscriber)) {
                    subscribers.push(subscriber);
                }
            }
        }

        subscribers.into_iter().filter(|s| s.is_active()).count()
    }

    /// Number of exact channels with at least one subscriber
    pub fn point_channel_count(&self) -> usize {
        self.inner.lock().points.len()
    }

    /// Number of distinct subscribed range pairs
    pub fn range_count(&self) -> usize {
        self.inner.lock().ranges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::director::MessageDirector;
    use crate::participant::LocalParticipant;
    use crate::protocol::constants::{
        CONTROL_ADD_RANGE, CONTROL_MESSAGE, CONTROL_REMOVE_CHANNEL, CONTROL_REMOVE_RANGE,
        CONTROL_SET_CHANNEL,
    };
    use crate::protocol::iterator::DatagramIterator;
    use tokio::sync::mpsc;

    /// Capture upstream control traffic as (code, args) pairs
    fn capture_upstream(
        md: &Arc<MessageDirector>,
    ) -> mpsc::UnboundedReceiver<Datagram> {
        let (tx, rx) = mpsc::unbounded_channel();
        md.upstream_handle().install(tx);
        rx
    }

    fn decode_control(dg: &Datagram) -> (u16, Vec<u64>) {
        let mut dgi = DatagramIterator::new(dg);
        assert_eq!(dgi.read_u8().unwrap(), 1);
        assert_eq!(dgi.read_channel().unwrap(), CONTROL_MESSAGE);
        let code = dgi.read_u16().unwrap();
        let mut args = Vec::new();
        while dgi.remaining() >= 8 {
            args.push(dgi.read_u64().unwrap());
        }
        (code, args)
    }

    fn payload(byte: u8, channel: Channel) -> Datagram {
        let mut dg = Datagram::new();
        dg.add_server_header(&[channel], 0, 0);
        dg.add_u8(byte);
        dg
    }

    #[tokio::test]
    async fn test_point_subscribe_is_idempotent_and_consistent() {
        let md = MessageDirector::new();
        let (a, _rx) = LocalParticipant::create(Arc::clone(&md), "a");
        let sub = Arc::clone(a.core().subscriber());

        md.channel_map().subscribe_channel(&sub, 100);
        md.channel_map().subscribe_channel(&sub, 100);

        assert_eq!(md.channel_map().subscriber_count(100), 1);
        assert!(sub.channels().contains(&100));

        md.channel_map().unsubscribe_channel(&sub, 100);
        assert_eq!(md.channel_map().subscriber_count(100), 0);
        assert!(!sub.channels().contains(&100));
        assert_eq!(md.channel_map().point_channel_count(), 0);
    }

    #[tokio::test]
    async fn test_range_stab_lookup() {
        let md = MessageDirector::new();
        let (a, mut rx) = LocalParticipant::create(Arc::clone(&md), "a");
        let sub = Arc::clone(a.core().subscriber());

        md.channel_map()
            .subscribe_range(&sub, ChannelRange::new(200, 300));

        assert_eq!(md.channel_map().subscriber_count(250), 1);
        assert_eq!(md.channel_map().subscriber_count(199), 0);
        assert_eq!(md.channel_map().subscriber_count(301), 0);

        let dg = payload(0xBB, 250);
        assert_eq!(md.channel_map().send(250, &dg), 1);
        assert_eq!(rx.recv().await.unwrap(), dg);
    }

    #[tokio::test]
    async fn test_point_and_range_deliver_once_per_channel() {
        let md = MessageDirector::new();
        let (a, mut rx) = LocalParticipant::create(Arc::clone(&md), "a");
        let sub = Arc::clone(a.core().subscriber());

        md.channel_map().subscribe_channel(&sub, 250);
        md.channel_map()
            .subscribe_range(&sub, ChannelRange::new(200, 300));

        let dg = payload(0xCC, 250);
        assert_eq!(md.channel_map().send(250, &dg), 1);
        assert_eq!(rx.recv().await.unwrap(), dg);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_ranges_are_retained() {
        let md = MessageDirector::new();
        let (a, _rx) = LocalParticipant::create(Arc::clone(&md), "a");
        let sub = Arc::clone(a.core().subscriber());
        let range = ChannelRange::new(10, 20);

        md.channel_map().subscribe_range(&sub, range);
        md.channel_map().subscribe_range(&sub, range);
        assert_eq!(sub.ranges().len(), 2);

        md.channel_map().unsubscribe_range(&sub, range);
        assert_eq!(sub.ranges().len(), 1);
        assert_eq!(md.channel_map().subscriber_count(15), 1);

        md.channel_map().unsubscribe_range(&sub, range);
        assert_eq!(sub.ranges().len(), 0);
        assert_eq!(md.channel_map().subscriber_count(15), 0);
    }

    #[tokio::test]
    async fn test_inactive_subscriber_is_not_delivered_or_subscribed() {
        let md = MessageDirector::new();
        let (a, mut rx) = LocalParticipant::create(Arc::clone(&md), "a");
        let sub = Arc::clone(a.core().subscriber());

        md.channel_map().subscribe_channel(&sub, 7);
        sub.deactivate();

        assert_eq!(md.channel_map().send(7, &payload(0x01, 7)), 0);
        assert!(rx.try_recv().is_err());

        md.channel_map().subscribe_channel(&sub, 8);
        assert!(!sub.channels().contains(&8));
    }

    #[tokio::test]
    async fn test_unsubscribe_all_clears_everything() {
        let md = MessageDirector::new();
        let (a, _rx) = LocalParticipant::create(Arc::clone(&md), "a");
        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        let sub = Arc::clone(a.core().subscriber());
        let other = Arc::clone(b.core().subscriber());

        md.channel_map().subscribe_channel(&sub, 1);
        md.channel_map().subscribe_channel(&sub, 2);
        md.channel_map().subscribe_range(&sub, ChannelRange::new(10, 20));
        md.channel_map().subscribe_channel(&other, 2);

        md.channel_map().unsubscribe_all(&sub);

        assert!(sub.channels().is_empty());
        assert!(sub.ranges().is_empty());
        assert_eq!(md.channel_map().subscriber_count(1), 0);
        assert_eq!(md.channel_map().subscriber_count(2), 1);
        assert_eq!(md.channel_map().subscriber_count(15), 0);
        assert_eq!(md.channel_map().range_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_net_delta_for_channels() {
        let md = MessageDirector::new();
        let mut upstream = capture_upstream(&md);
        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        let (c, _rx_c) = LocalParticipant::create(Arc::clone(&md), "c");
        let sub_b = Arc::clone(b.core().subscriber());
        let sub_c = Arc::clone(c.core().subscriber());

        // two subscribers, one SET on the first
        md.channel_map().subscribe_channel(&sub_b, 42);
        md.channel_map().subscribe_channel(&sub_c, 42);
        // one REMOVE when the last leaves
        md.channel_map().unsubscribe_channel(&sub_b, 42);
        md.channel_map().unsubscribe_channel(&sub_c, 42);

        let (code, args) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!((code, args), (CONTROL_SET_CHANNEL, vec![42]));
        let (code, args) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!((code, args), (CONTROL_REMOVE_CHANNEL, vec![42]));
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_upstream_net_delta_for_ranges() {
        let md = MessageDirector::new();
        let mut upstream = capture_upstream(&md);
        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        let (c, _rx_c) = LocalParticipant::create(Arc::clone(&md), "c");
        let sub_b = Arc::clone(b.core().subscriber());
        let sub_c = Arc::clone(c.core().subscriber());
        let range = ChannelRange::new(1000, 2000);

        md.channel_map().subscribe_range(&sub_b, range);
        md.channel_map().subscribe_range(&sub_c, range);
        md.channel_map().unsubscribe_range(&sub_b, range);
        md.channel_map().unsubscribe_range(&sub_c, range);

        let (code, args) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!((code, args), (CONTROL_ADD_RANGE, vec![1000, 2000]));
        let (code, args) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!((code, args), (CONTROL_REMOVE_RANGE, vec![1000, 2000]));
        assert!(upstream.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_point_under_range_cover_is_announced_when_range_leaves() {
        let md = MessageDirector::new();
        let mut upstream = capture_upstream(&md);
        let (b, _rx_b) = LocalParticipant::create(Arc::clone(&md), "b");
        let (c, _rx_c) = LocalParticipant::create(Arc::clone(&md), "c");
        let sub_b = Arc::clone(b.core().subscriber());
        let sub_c = Arc::clone(c.core().subscriber());
        let range = ChannelRange::new(200, 300);

        md.channel_map().subscribe_range(&sub_b, range);
        let (code, _) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!(code, CONTROL_ADD_RANGE);

        // covered by the range: no SET is sent
        md.channel_map().subscribe_channel(&sub_c, 250);
        assert!(upstream.try_recv().is_err());

        // range goes away: the covered point channel is announced in its place
        md.channel_map().unsubscribe_range(&sub_b, range);
        let (code, _) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!(code, CONTROL_REMOVE_RANGE);
        let (code, args) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!((code, args), (CONTROL_SET_CHANNEL, vec![250]));

        // and retracted normally when it empties
        md.channel_map().unsubscribe_channel(&sub_c, 250);
        let (code, args) = decode_control(&upstream.try_recv().unwrap());
        assert_eq!((code, args), (CONTROL_REMOVE_CHANNEL, vec![250]));
    }
}
