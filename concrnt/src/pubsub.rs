//! Event hub - channel-per-timeline broadcast bus
//!
//! The hub is the only coordination point between the commit pipeline and
//! realtime consumers. Channels are named by the fully-qualified timeline
//! id. Publishing never blocks: a slow subscriber lags on its own broadcast
//! receiver and loses frames, nobody else is affected. The peering agent
//! enumerates `channels()` every tick to decide which remote domains need a
//! WebSocket.

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 64;

pub struct EventHub {
    channels: DashMap<String, broadcast::Sender<Event>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Publish an event to its timeline channel. Events on channels nobody
    /// subscribes to are dropped.
    pub fn publish(&self, event: Event) {
        if let Some(sender) = self.channels.get(&event.timeline) {
            // send fails only when every receiver is gone; reap then
            if sender.send(event.clone()).is_err() {
                drop(sender);
                self.reap(&event.timeline);
            }
        }
    }

    /// Subscribe to a set of channels. Returns one receiver per channel;
    /// the caller multiplexes them.
    pub fn subscribe(&self, channels: &[String]) -> Vec<broadcast::Receiver<Event>> {
        channels
            .iter()
            .map(|name| {
                self.channels
                    .entry(name.clone())
                    .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                    .subscribe()
            })
            .collect()
    }

    /// Names of all channels with at least one live subscriber.
    pub fn channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|e| e.value().receiver_count() > 0)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Subscriber count per channel.
    pub fn subscriber_counts(&self) -> std::collections::HashMap<String, usize> {
        self.channels
            .iter()
            .filter(|e| e.value().receiver_count() > 0)
            .map(|e| (e.key().clone(), e.value().receiver_count()))
            .collect()
    }

    /// Drop channels whose receivers are all gone.
    pub fn reap_idle(&self) -> usize {
        let idle: Vec<String> = self
            .channels
            .iter()
            .filter(|e| e.value().receiver_count() == 0)
            .map(|e| e.key().clone())
            .collect();
        for name in &idle {
            self.reap(name);
        }
        idle.len()
    }

    fn reap(&self, name: &str) {
        self.channels
            .remove_if(name, |_, sender| sender.receiver_count() == 0);
        debug!(channel = name, "reaped idle channel");
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timeline: &str) -> Event {
        Event {
            timeline: timeline.to_string(),
            document: "{}".into(),
            signature: "sig".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn routes_to_matching_channel_only() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe(&["ta@x.example".into()]).pop().unwrap();
        hub.publish(event("tb@x.example")); // no subscriber, dropped
        hub.publish(event("ta@x.example"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.timeline, "ta@x.example");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn channel_listing_tracks_live_subscribers() {
        let hub = EventHub::new();
        let rx = hub.subscribe(&["ta@x.example".into(), "tb@y.example".into()]);
        let mut names = hub.channels();
        names.sort();
        assert_eq!(names, vec!["ta@x.example", "tb@y.example"]);
        drop(rx);
        assert!(hub.channels().is_empty());
        assert_eq!(hub.reap_idle(), 2);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publisher() {
        let hub = EventHub::new();
        let _rx = hub.subscribe(&["ta@x.example".into()]);
        // publish far beyond channel capacity; must not block or panic
        for _ in 0..CHANNEL_CAPACITY * 4 {
            hub.publish(event("ta@x.example"));
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let hub = EventHub::new();
        let mut a = hub.subscribe(&["ta@x.example".into()]).pop().unwrap();
        let mut b = hub.subscribe(&["ta@x.example".into()]).pop().unwrap();
        hub.publish(event("ta@x.example"));
        assert_eq!(a.recv().await.unwrap().timeline, "ta@x.example");
        assert_eq!(b.recv().await.unwrap().timeline, "ta@x.example");
    }
}
