//! Client half of the correlation layer.
//!
//! Every request gets an id of the form `"{instance}--{counter}"`; the instance number comes
//! from an [`InstanceCounter`] so clients sharing one channel never collide, and the counter
//! is per client. Replies are matched back to their caller by id, in any order.

use super::channel::{Channel, PacketHandler, Subscription};
use super::error::{RpcError, RpcResult};
use super::packet::{Packet, RawBuffer, Response};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

static GLOBAL_INSTANCES: InstanceCounter = InstanceCounter::new();

/// Process-wide source of client instance numbers.
#[derive(Debug, Default)]
pub struct InstanceCounter(AtomicU64);

impl InstanceCounter {
    /// Create a counter starting at zero.
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// The counter used by [`RpcClient::new`].
    pub fn global() -> &'static InstanceCounter {
        &GLOBAL_INSTANCES
    }

    /// Hand out the next instance number.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// When to give up on a pending request.
///
/// Firing a policy removes the pending entry, so a reply arriving afterwards is dropped
/// like any packet with an unknown id.
#[derive(Debug, Clone)]
pub enum CancelPolicy {
    /// Give up after a fixed delay.
    Timeout(Duration),
    /// Give up once the token is cancelled, e.g. when a competing operation settles.
    Token(CancellationToken),
}

impl CancelPolicy {
    /// Give up after `duration`.
    pub const fn timeout(duration: Duration) -> Self {
        Self::Timeout(duration)
    }

    /// Give up when `token` is cancelled.
    pub fn race(token: CancellationToken) -> Self {
        Self::Token(token)
    }

    async fn fired(&self) {
        match self {
            Self::Timeout(duration) => tokio::time::sleep(*duration).await,
            Self::Token(token) => token.cancelled().await,
        }
    }
}

type Resolver = oneshot::Sender<RpcResult<Packet>>;

struct ClientShared {
    instance: u64,
    counter: AtomicU64,
    pending: Mutex<HashMap<String, Resolver>>,
}

impl ClientShared {
    fn receive(&self, packet: Packet) {
        let resolver = self.pending.lock().remove(&packet.id);
        match resolver {
            Some(resolver) => {
                // The caller may have given up between removal and here.
                let _ = resolver.send(Ok(packet));
            }
            None => trace!(id = %packet.id, kind = %packet.kind, "dropping packet for unknown id"),
        }
    }

    fn reject_all(&self) {
        let resolvers: Vec<Resolver> = self.pending.lock().drain().map(|(_, r)| r).collect();
        if !resolvers.is_empty() {
            debug!(
                instance = self.instance,
                count = resolvers.len(),
                "rejecting pending requests"
            );
        }
        for resolver in resolvers {
            let _ = resolver.send(Err(RpcError::Closed));
        }
    }
}

/// Removes a request's pending entry however its caller stops waiting.
struct PendingEntry<'a> {
    shared: &'a ClientShared,
    id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.shared.pending.lock().remove(self.id).is_some() {
            trace!(id = self.id, "request abandoned");
        }
    }
}

/// Sends requests over a [`Channel`] and correlates the replies.
///
/// Clones share the same instance id, pending table and subscription.
#[derive(Clone)]
pub struct RpcClient {
    channel: Arc<dyn Channel>,
    shared: Arc<ClientShared>,
    subscription: Arc<Mutex<Option<Subscription>>>,
}

impl RpcClient {
    /// Create a client numbered from the global [`InstanceCounter`].
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self::with_counter(channel, InstanceCounter::global())
    }

    /// Create a client numbered from an explicit counter.
    pub fn with_counter(channel: Arc<dyn Channel>, counter: &InstanceCounter) -> Self {
        Self {
            channel,
            shared: Arc::new(ClientShared {
                instance: counter.next(),
                counter: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
            }),
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Instance number embedded in every id this client generates.
    pub fn instance_id(&self) -> u64 {
        self.shared.instance
    }

    /// Whether the client is subscribed to its channel.
    pub fn is_open(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Subscribe to the channel, replacing any previous subscription.
    pub fn open(&self) {
        drop(self.subscription.lock().take());

        let shared = Arc::downgrade(&self.shared);
        let handler: PacketHandler = Arc::new(move |packet| {
            if let Some(shared) = shared.upgrade() {
                shared.receive(packet);
            }
        });
        *self.subscription.lock() = Some(self.channel.subscribe(handler));
    }

    /// Unsubscribe and fail every pending request with [`RpcError::Closed`].
    pub fn close(&self) {
        drop(self.subscription.lock().take());
        self.shared.reject_all();
    }

    fn next_id(&self) -> String {
        let counter = self.shared.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}--{}", self.shared.instance, counter)
    }

    /// Call `method` on the remote side and wait for its reply.
    ///
    /// A `failure` reply becomes [`RpcError::Remote`]; a fired `cancel` policy becomes
    /// [`RpcError::TimedOut`]; closing the client becomes [`RpcError::Closed`].
    pub async fn request(
        &self,
        method: &str,
        payload: Value,
        buffers: Vec<RawBuffer>,
        cancel: Option<&CancelPolicy>,
    ) -> RpcResult<Response> {
        let id = self.next_id();
        let (resolver, mut reply) = oneshot::channel();
        self.shared.pending.lock().insert(id.clone(), resolver);
        let _entry = PendingEntry {
            shared: &self.shared,
            id: &id,
        };

        debug!(%id, method, "sending request");
        self.channel
            .send(Packet::request(id.clone(), method, payload, buffers))?;

        let outcome = match cancel {
            Some(policy) => tokio::select! {
                biased;
                outcome = &mut reply => outcome,
                _ = policy.fired() => {
                    if self.shared.pending.lock().remove(&id).is_some() {
                        debug!(%id, method, "request cancelled");
                        return Err(RpcError::timed_out(method));
                    }
                    // The reply won the race; it is already on its way.
                    reply.await
                }
            },
            None => reply.await,
        };

        let packet = outcome.map_err(|_| RpcError::Closed)??;
        if packet.is_failure() {
            Err(RpcError::Remote(packet.failure_message()))
        } else {
            Ok(Response::from(packet))
        }
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("instance", &self.shared.instance)
            .field("pending", &self.pending_count())
            .field("open", &self.is_open())
            .finish()
    }
}
