//! Request/response correlation over a single duplex message channel.
//!
//! This module turns a raw [`Channel`] into a call protocol:
//! - [`RpcClient`] sends requests with unique ids and matches replies back to their callers
//! - [`RpcServer`] dispatches inbound requests to registered handlers
//! - [`remote_methods!`](crate::remote_methods) and [`MethodTable`] bind remote method names
//!   to callers without runtime reflection
//!
//! # Example
//!
//! ```rust
//! use audio_link::rpc::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RpcError> {
//! let (client_end, server_end) = MemoryChannel::pair();
//!
//! let server = RpcServer::builder()
//!     .method("echo", |payload, _buffers| Ok::<_, RpcError>(Response::new(payload)))
//!     .build(Arc::new(server_end));
//! server.open()?;
//!
//! let client = RpcClient::new(Arc::new(client_end));
//! client.open();
//!
//! let reply = client.request("echo", json!({ "hello": 1 }), Vec::new(), None).await?;
//! assert_eq!(reply.payload, json!({ "hello": 1 }));
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod error;
pub mod methods;
pub mod packet;
pub mod server;

#[cfg(test)]
mod tests;

pub use channel::{Channel, MemoryChannel, PacketHandler, Subscription};
pub use client::{CancelPolicy, InstanceCounter, RpcClient};
pub use error::{RpcError, RpcResult};
pub use methods::{BoundMethod, MethodTable, MethodTableBuilder};
pub use packet::{FAILURE, Packet, RESPONSE, RawBuffer, Response};
pub use server::{HandlerFuture, RpcServer, RpcServerBuilder};
pub use serde_json::Value;
