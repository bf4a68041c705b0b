//! The duplex transport contract the correlation layer runs on.
//!
//! A channel only has to deliver packets; it knows nothing about requests or replies.
//! [`MemoryChannel`] is an in-process implementation used for loopback setups and tests.

use super::error::{RpcError, RpcResult};
use super::packet::Packet;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Callback invoked once per inbound packet.
pub type PacketHandler = Arc<dyn Fn(Packet) + Send + Sync>;

/// A duplex message channel.
pub trait Channel: Send + Sync {
    /// Deliver a packet to the other side, best effort.
    fn send(&self, packet: Packet) -> RpcResult<()>;

    /// Register a handler for inbound packets. The handler stays registered until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    fn subscribe(&self, handler: PacketHandler) -> Subscription;
}

/// Registration of a [`PacketHandler`]; deregisters on drop.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap the function that removes the handler.
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the handler now.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Subscribers {
    next_key: u64,
    handlers: Vec<(u64, PacketHandler)>,
}

#[derive(Default)]
struct Endpoint {
    subscribers: Mutex<Subscribers>,
}

impl Endpoint {
    fn deliver(&self, packet: Packet) {
        // Snapshot so handlers may send or unsubscribe without deadlocking.
        let handlers: Vec<PacketHandler> = self
            .subscribers
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        match handlers.len() {
            0 => tracing::trace!(id = %packet.id, "no subscriber for packet"),
            1 => (handlers[0])(packet),
            _ => {
                for handler in &handlers {
                    handler(packet.clone());
                }
            }
        }
    }
}

/// One end of an in-process duplex channel.
///
/// Packets sent on one end are delivered synchronously, in send order, to every subscriber
/// of the other end.
pub struct MemoryChannel {
    local: Arc<Endpoint>,
    remote: Weak<Endpoint>,
}

impl MemoryChannel {
    /// Create two connected ends.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());

        (
            Self {
                local: Arc::clone(&a),
                remote: Arc::downgrade(&b),
            },
            Self {
                local: b,
                remote: Arc::downgrade(&a),
            },
        )
    }

    /// Number of handlers currently subscribed to this end.
    pub fn subscriber_count(&self) -> usize {
        self.local.subscribers.lock().handlers.len()
    }
}

impl Channel for MemoryChannel {
    fn send(&self, packet: Packet) -> RpcResult<()> {
        let remote = self
            .remote
            .upgrade()
            .ok_or_else(|| RpcError::channel("remote end dropped"))?;
        remote.deliver(packet);
        Ok(())
    }

    fn subscribe(&self, handler: PacketHandler) -> Subscription {
        let key = {
            let mut subscribers = self.local.subscribers.lock();
            let key = subscribers.next_key;
            subscribers.next_key += 1;
            subscribers.handlers.push((key, handler));
            key
        };

        let endpoint = Arc::downgrade(&self.local);
        Subscription::new(move || {
            if let Some(endpoint) = endpoint.upgrade() {
                endpoint
                    .subscribers
                    .lock()
                    .handlers
                    .retain(|(existing, _)| *existing != key);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collector() -> (PacketHandler, Arc<Mutex<Vec<Packet>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (Arc::new(move |p| sink.lock().push(p)), seen)
    }

    #[test]
    fn test_pair_delivers_to_other_end_in_order() {
        let (a, b) = MemoryChannel::pair();
        let (handler, seen) = collector();
        let _sub = b.subscribe(handler);

        for i in 0..3 {
            a.send(Packet::request(format!("0--{i}"), "meta", json!({}), Vec::new()))
                .unwrap();
        }

        let ids: Vec<String> = seen.lock().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["0--0", "0--1", "0--2"]);
    }

    #[test]
    fn test_sender_does_not_see_own_packets() {
        let (a, _b) = MemoryChannel::pair();
        let (handler, seen) = collector();
        let _sub = a.subscribe(handler);

        a.send(Packet::failure("x", "nope")).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_multiple_subscribers_and_unsubscribe() {
        let (a, b) = MemoryChannel::pair();
        let (first, first_seen) = collector();
        let (second, second_seen) = collector();
        let first_sub = b.subscribe(first);
        let _second_sub = b.subscribe(second);
        assert_eq!(b.subscriber_count(), 2);

        a.send(Packet::failure("1", "a")).unwrap();
        first_sub.unsubscribe();
        a.send(Packet::failure("2", "b")).unwrap();

        assert_eq!(first_seen.lock().len(), 1);
        assert_eq!(second_seen.lock().len(), 2);
        assert_eq!(b.subscriber_count(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let (_a, b) = MemoryChannel::pair();
        let (handler, _) = collector();
        {
            let _sub = b.subscribe(handler);
            assert_eq!(b.subscriber_count(), 1);
        }
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn test_send_after_remote_dropped_fails() {
        let (a, b) = MemoryChannel::pair();
        drop(b);
        assert!(matches!(
            a.send(Packet::failure("1", "x")),
            Err(RpcError::Channel(_))
        ));
    }
}
