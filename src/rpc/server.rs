//! Server half of the correlation layer: dispatches inbound requests to registered handlers.

use super::channel::{Channel, PacketHandler, Subscription};
use super::error::{RpcError, RpcResult};
use super::packet::{Packet, RawBuffer, Response};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

/// Failure text for a packet without an id.
pub const UNKNOWN_ID: &str = "Unknown ID";
/// Failure text for a packet without a method name.
pub const NO_METHOD: &str = "No method called.";
/// Failure text for a method nobody registered.
pub const UNKNOWN_METHOD: &str = "Unknown method.";

/// Future returned by a registered handler. Errors are already stringified.
pub type HandlerFuture = BoxFuture<'static, Result<Response, String>>;

type HandlerFn = Arc<dyn Fn(Value, Vec<RawBuffer>) -> HandlerFuture + Send + Sync>;

/// Builder collecting the handlers of an [`RpcServer`].
#[derive(Default)]
pub struct RpcServerBuilder {
    functions: HashMap<String, HandlerFn>,
}

impl RpcServerBuilder {
    /// Register a synchronous handler.
    pub fn method<F, E>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Vec<RawBuffer>) -> Result<Response, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        let handler = Arc::new(handler);
        let wrapped: HandlerFn = Arc::new(move |payload, buffers| {
            let handler = Arc::clone(&handler);
            async move { handler(payload, buffers).map_err(|e| e.to_string()) }.boxed()
        });
        self.functions.insert(name.into(), wrapped);
        self
    }

    /// Register an asynchronous handler.
    pub fn async_method<F, Fut, E>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value, Vec<RawBuffer>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let handler = Arc::new(handler);
        let wrapped: HandlerFn = Arc::new(move |payload, buffers| {
            let handler = Arc::clone(&handler);
            async move { handler(payload, buffers).await.map_err(|e| e.to_string()) }.boxed()
        });
        self.functions.insert(name.into(), wrapped);
        self
    }

    /// Finish the server on top of `channel`. It starts closed.
    pub fn build(self, channel: Arc<dyn Channel>) -> RpcServer {
        RpcServer {
            shared: Arc::new(ServerShared {
                channel,
                functions: self.functions,
                open: AtomicBool::new(false),
            }),
            subscription: Mutex::new(None),
        }
    }
}

struct ServerShared {
    channel: Arc<dyn Channel>,
    functions: HashMap<String, HandlerFn>,
    open: AtomicBool,
}

impl ServerShared {
    fn send(&self, packet: Packet) {
        if !self.open.load(Ordering::Acquire) {
            trace!(id = %packet.id, "server closed, dropping reply");
            return;
        }
        if let Err(err) = self.channel.send(packet) {
            warn!(error = %err, "failed to send reply");
        }
    }

    async fn dispatch(&self, packet: Packet) {
        let Packet {
            id,
            kind,
            payload,
            buffers,
        } = packet;

        if id.is_empty() {
            self.send(Packet::failure("", UNKNOWN_ID));
            return;
        }
        if kind.is_empty() {
            self.send(Packet::failure(id, NO_METHOD));
            return;
        }
        let Some(handler) = self.functions.get(&kind).cloned() else {
            debug!(%id, method = %kind, "unknown method");
            self.send(Packet::failure(id, UNKNOWN_METHOD));
            return;
        };

        debug!(%id, method = %kind, "dispatching request");
        let outcome = AssertUnwindSafe(async move { handler(payload, buffers).await })
            .catch_unwind()
            .await;

        let reply = match outcome {
            Ok(Ok(Response { payload, buffers })) => Packet::response(id, payload, buffers),
            Ok(Err(message)) => {
                warn!(%id, method = %kind, error = %message, "handler failed");
                Packet::failure(id, message)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(%id, method = %kind, error = %message, "handler panicked");
                Packet::failure(id, message)
            }
        };
        self.send(reply);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Answers requests arriving on a [`Channel`].
///
/// Every request is dispatched on its own tokio task, so a slow or failing handler never
/// holds up the others.
pub struct RpcServer {
    shared: Arc<ServerShared>,
    subscription: Mutex<Option<Subscription>>,
}

impl RpcServer {
    /// Start registering handlers.
    pub fn builder() -> RpcServerBuilder {
        RpcServerBuilder::default()
    }

    /// Names of the registered methods, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.shared.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether the server is subscribed and answering.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Subscribe to the channel. Must be called from within a tokio runtime.
    pub fn open(&self) -> RpcResult<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RpcError::channel(format!("server needs a tokio runtime: {e}")))?;
        drop(self.subscription.lock().take());

        let shared = Arc::downgrade(&self.shared);
        let handler: PacketHandler = Arc::new(move |packet| {
            if let Some(shared) = shared.upgrade() {
                runtime.spawn(async move { shared.dispatch(packet).await });
            }
        });
        *self.subscription.lock() = Some(self.shared.channel.subscribe(handler));
        self.shared.open.store(true, Ordering::Release);
        Ok(())
    }

    /// Unsubscribe. Replies of requests still in flight are dropped.
    pub fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
        drop(self.subscription.lock().take());
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.close();
    }
}
