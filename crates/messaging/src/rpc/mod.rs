//! Request/reply over the broker.
//!
//! A call publishes a JSON request to `<endpoint>.rpc.request` with a
//! correlation id and a reply address, then waits for the reply carrying
//! the same id. Servers consume the request queue one message at a time.

mod client;
mod server;

pub use client::{BrokerRpcClient, ReplyMode, RpcClient, RpcClientExt, correlation_id};
pub use server::{RpcHandler, RpcServer};

use crate::{MessagingError, Result};

/// Length of a generated correlation id.
pub const CORRELATION_ID_LEN: usize = 32;

/// Queue that carries requests for `endpoint`.
pub fn request_queue(endpoint: &str) -> String {
    format!("{endpoint}.rpc.request")
}

/// Shared queue that carries replies for `endpoint`.
pub fn response_queue(endpoint: &str) -> String {
    format!("{endpoint}.rpc.response")
}

/// Fails with `InvalidPayload` unless `body` is a JSON document.
pub(crate) fn ensure_json(target: &str, body: &[u8]) -> Result<()> {
    serde_json::from_slice::<serde::de::IgnoredAny>(body)
        .map(|_| ())
        .map_err(|e| MessagingError::InvalidPayload {
            target: target.to_string(),
            reason: e.to_string(),
        })
}
