use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use super::{ensure_json, request_queue, response_queue};
use crate::supervisor::panic_message;
use crate::transport::{ConsumeOptions, Delivery, OutboundMessage, QueueOptions, Transport};
use crate::{MessagingError, Result};

/// Server side of request/reply.
///
/// Receives the raw request body and returns the reply body, which must be
/// a JSON document. Handlers encode their own failures in the reply.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: String) -> String;
}

/// Serves RPC endpoints over a [`Transport`].
pub struct RpcServer<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for RpcServer<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
        }
    }
}

impl<T: Transport> RpcServer<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Consumes `<endpoint>.rpc.request` one message at a time and replies
    /// with the handler's result.
    ///
    /// Returns an error as soon as setup fails. Once consuming, the loop only
    /// ends when the consumer stream does; a handler panic or a malformed
    /// reply rejects that one request and the loop carries on.
    #[tracing::instrument(skip(self, handler))]
    pub async fn serve<H>(&self, endpoint: &str, handler: &H) -> Result<()>
    where
        H: RpcHandler + ?Sized,
    {
        let response_queue = response_queue(endpoint);
        self.transport
            .declare_queue(&response_queue, QueueOptions::transient())
            .await?;

        let mut subscription = self
            .transport
            .subscribe(
                &request_queue(endpoint),
                QueueOptions::transient(),
                ConsumeOptions::with_prefetch(1),
            )
            .await?;
        info!(queue = %subscription.queue, "Serving RPC endpoint");

        while let Some(delivery) = subscription.deliveries.next().await {
            self.handle_delivery(endpoint, &response_queue, handler, delivery?)
                .await;
        }

        Err(MessagingError::ConsumerClosed {
            queue: subscription.queue,
        })
    }

    async fn handle_delivery<H>(
        &self,
        endpoint: &str,
        response_queue: &str,
        handler: &H,
        delivery: Delivery,
    ) where
        H: RpcHandler + ?Sized,
    {
        let request = delivery.body_text();
        let reply = match AssertUnwindSafe(handler.handle(request))
            .catch_unwind()
            .await
        {
            Ok(reply) => reply,
            Err(panic) => {
                error!(
                    endpoint,
                    panic = %panic_message(panic.as_ref()),
                    "RPC handler panicked, rejecting request"
                );
                record(endpoint, "panicked");
                settle(delivery.nack(false).await);
                return;
            }
        };

        if let Err(e) = ensure_json(endpoint, reply.as_bytes()) {
            error!(endpoint, error = %e, "RPC handler returned a non-JSON reply, rejecting request");
            record(endpoint, "invalid_reply");
            settle(delivery.nack(false).await);
            return;
        }

        let reply_to = delivery
            .reply_to
            .clone()
            .unwrap_or_else(|| response_queue.to_string());
        let mut message = OutboundMessage::json(reply);
        if let Some(correlation_id) = &delivery.correlation_id {
            message = message.with_correlation_id(correlation_id.clone());
        }

        if let Err(e) = self.transport.publish("", &reply_to, message).await {
            warn!(endpoint, error = %e, "Failed to publish RPC reply, requeueing request");
            record(endpoint, "publish_failed");
            settle(delivery.nack(true).await);
            return;
        }

        debug!(endpoint, reply_to = %reply_to, "RPC reply published");
        record(endpoint, "ok");
        settle(delivery.ack().await);
    }
}

fn record(endpoint: &str, outcome: &'static str) {
    metrics::counter!(
        "rpc_requests_handled_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

fn settle(result: Result<()>) {
    if let Err(e) = result {
        warn!(error = %e, "Failed to settle RPC request");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rpc::{BrokerRpcClient, RpcClient};
    use crate::transport::InMemoryBroker;

    struct Upper;

    #[async_trait]
    impl RpcHandler for Upper {
        async fn handle(&self, request: String) -> String {
            request.to_uppercase()
        }
    }

    #[tokio::test]
    async fn serve_replies_to_shared_response_queue_without_reply_to() {
        let broker = Arc::new(InMemoryBroker::new());
        let server = RpcServer::new(broker.clone());
        tokio::spawn(async move { server.serve("upper", &Upper).await });

        // Raw request with a correlation id but no reply address.
        let mut replies = broker
            .subscribe(
                &response_queue("upper"),
                QueueOptions::transient(),
                ConsumeOptions::default(),
            )
            .await
            .unwrap();
        broker
            .declare_queue(&request_queue("upper"), QueueOptions::transient())
            .await
            .unwrap();
        broker
            .publish(
                "",
                &request_queue("upper"),
                OutboundMessage::json(r#""abc""#).with_correlation_id("CID"),
            )
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(1), replies.deliveries.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("CID"));
        assert_eq!(reply.body, br#""ABC""#);
    }

    #[tokio::test]
    async fn request_is_acked_after_reply() {
        let broker = Arc::new(InMemoryBroker::new());
        let server = RpcServer::new(broker.clone());
        tokio::spawn(async move { server.serve("upper", &Upper).await });

        let client = BrokerRpcClient::new(broker.clone());
        let reply = client.call("upper", r#"{"a":"b"}"#).await.unwrap();
        assert_eq!(reply, r#"{"A":"B"}"#);
        assert_eq!(broker.unacked_count(&request_queue("upper")), 0);
        assert_eq!(broker.message_count(&request_queue("upper")), 0);
    }
}
