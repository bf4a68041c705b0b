//! Named callers for remote methods.
//!
//! Two flavours of the same idea: [`remote_methods!`](crate::remote_methods) declares a struct
//! with one async method per remote name at compile time, and [`MethodTable`] binds a static
//! list of names at runtime.

use super::client::{CancelPolicy, RpcClient};
use super::error::{RpcError, RpcResult};
use super::packet::{RawBuffer, Response};
use serde_json::Value;
use std::collections::HashMap;

/// Declare a struct exposing one bound caller per remote method.
///
/// ```rust
/// use audio_link::remote_methods;
///
/// remote_methods! {
///     /// Remote surface of a clock service.
///     pub struct ClockRemote {
///         /// Current time on the remote side.
///         now,
///         /// Reset the remote clock.
///         reset,
///     }
/// }
///
/// assert_eq!(ClockRemote::METHODS, &["now", "reset"]);
/// ```
#[macro_export]
macro_rules! remote_methods {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$method_meta:meta])* $method:ident ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        $vis struct $name {
            client: $crate::rpc::RpcClient,
            cancel: ::core::option::Option<$crate::rpc::CancelPolicy>,
        }

        impl $name {
            /// Remote method names bound by this struct, in declaration order.
            pub const METHODS: &'static [&'static str] = &[$(stringify!($method)),*];

            /// Bind the methods to `client`, arming `cancel` on every call.
            pub fn new(
                client: $crate::rpc::RpcClient,
                cancel: ::core::option::Option<$crate::rpc::CancelPolicy>,
            ) -> Self {
                Self { client, cancel }
            }

            /// The underlying client.
            pub fn client(&self) -> &$crate::rpc::RpcClient {
                &self.client
            }

            /// Subscribe the underlying client to its channel.
            pub fn open(&self) {
                self.client.open();
            }

            /// Close the underlying client, failing pending calls.
            pub fn close(&self) {
                self.client.close();
            }

            $(
                $(#[$method_meta])*
                pub async fn $method(
                    &self,
                    payload: $crate::rpc::Value,
                    buffers: ::std::vec::Vec<$crate::rpc::RawBuffer>,
                ) -> $crate::rpc::RpcResult<$crate::rpc::Response> {
                    self.client
                        .request(stringify!($method), payload, buffers, self.cancel.as_ref())
                        .await
                }
            )*
        }
    };
}

/// A caller bound to one remote method name.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    name: &'static str,
    client: RpcClient,
    cancel: Option<CancelPolicy>,
}

impl BoundMethod {
    /// Name this caller sends as the packet type.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Invoke the remote method.
    pub async fn call(&self, payload: Value, buffers: Vec<RawBuffer>) -> RpcResult<Response> {
        self.client
            .request(self.name, payload, buffers, self.cancel.as_ref())
            .await
    }
}

/// Runtime table of bound callers, built from a static list of names.
#[derive(Debug, Clone)]
pub struct MethodTable {
    methods: HashMap<&'static str, BoundMethod>,
}

impl MethodTable {
    /// Start building a table over `client`.
    pub fn builder(client: RpcClient) -> MethodTableBuilder {
        MethodTableBuilder {
            client,
            cancel: None,
            names: Vec::new(),
        }
    }

    /// Caller bound under `name`.
    pub fn get(&self, name: &str) -> Option<&BoundMethod> {
        self.methods.get(name)
    }

    /// Invoke the caller bound under `name`.
    pub async fn call(
        &self,
        name: &str,
        payload: Value,
        buffers: Vec<RawBuffer>,
    ) -> RpcResult<Response> {
        match self.get(name) {
            Some(method) => method.call(payload, buffers).await,
            None => Err(RpcError::UnknownMethod(name.to_string())),
        }
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Builder for [`MethodTable`].
#[derive(Debug)]
pub struct MethodTableBuilder {
    client: RpcClient,
    cancel: Option<CancelPolicy>,
    names: Vec<&'static str>,
}

impl MethodTableBuilder {
    /// Arm `policy` on every call made through the table.
    pub fn cancel(mut self, policy: CancelPolicy) -> Self {
        self.cancel = Some(policy);
        self
    }

    /// Bind one method name.
    pub fn method(mut self, name: &'static str) -> Self {
        self.names.push(name);
        self
    }

    /// Bind several method names.
    pub fn methods(mut self, names: &[&'static str]) -> Self {
        self.names.extend_from_slice(names);
        self
    }

    /// Build the table.
    pub fn build(self) -> MethodTable {
        let methods = self
            .names
            .into_iter()
            .map(|name| {
                (
                    name,
                    BoundMethod {
                        name,
                        client: self.client.clone(),
                        cancel: self.cancel.clone(),
                    },
                )
            })
            .collect();
        MethodTable { methods }
    }
}
