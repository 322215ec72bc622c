use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CORRELATION_ID_LEN, ensure_json, request_queue, response_queue};
use crate::transport::{ConsumeOptions, OutboundMessage, QueueOptions, Subscription, Transport};
use crate::{BrokerConfig, MessagingError, Result};

/// Replies for calls that already gave up are remembered this long (in
/// count) so late arrivals can be dropped instead of bounced.
const EXPIRED_MEMORY: usize = 1024;

/// First delay before a reply nobody here is waiting for goes back on the
/// shared queue; doubles on every bounce up to [`STRAY_BACKOFF_MAX`].
const STRAY_BACKOFF_BASE: Duration = Duration::from_millis(10);
const STRAY_BACKOFF_MAX: Duration = Duration::from_millis(500);

/// How replies find their way back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// Every caller of an endpoint shares `<endpoint>.rpc.response`; replies
    /// are matched to calls by correlation id. Compatible with the existing
    /// services.
    #[default]
    Shared,
    /// Each call consumes its own exclusive, auto-deleted reply queue.
    Private,
}

impl ReplyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyMode::Shared => "shared",
            ReplyMode::Private => "private",
        }
    }
}

impl fmt::Display for ReplyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(ReplyMode::Shared),
            "private" => Ok(ReplyMode::Private),
            other => Err(format!("unknown reply mode: {other}")),
        }
    }
}

/// Generates a correlation id of 32 random uppercase ASCII letters.
pub fn correlation_id() -> String {
    let mut rng = rand::rng();
    (0..CORRELATION_ID_LEN)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}

/// Caller side of request/reply.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Sends a JSON `request` to `endpoint` and returns the raw reply body.
    async fn call(&self, endpoint: &str, request: &str) -> Result<String>;
}

/// Typed helpers over [`RpcClient`].
#[async_trait]
pub trait RpcClientExt: RpcClient {
    /// Serializes `request`, calls `endpoint` and decodes the reply.
    async fn call_json<Req, Res>(&self, endpoint: &str, request: &Req) -> Result<Res>
    where
        Req: Serialize + Sync,
        Res: DeserializeOwned + Send,
    {
        let body = serde_json::to_string(request)?;
        let reply = self.call(endpoint, &body).await?;
        Ok(serde_json::from_str(&reply)?)
    }
}

impl<C: RpcClient + ?Sized> RpcClientExt for C {}

/// RPC client over a [`Transport`].
pub struct BrokerRpcClient<T: Transport> {
    transport: Arc<T>,
    timeout: Duration,
    mode: ReplyMode,
    correlations: Arc<Correlations>,
    listeners: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<T: Transport> BrokerRpcClient<T> {
    /// Creates a client with a 5 second timeout in shared reply mode.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(5),
            mode: ReplyMode::Shared,
            correlations: Arc::new(Correlations::default()),
            listeners: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Creates a client using the timeout and reply mode from `config`.
    pub fn from_config(transport: Arc<T>, config: &BrokerConfig) -> Self {
        Self::new(transport)
            .with_timeout(config.rpc_timeout)
            .with_reply_mode(config.reply_mode)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reply_mode(mut self, mode: ReplyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reply_mode(&self) -> ReplyMode {
        self.mode
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.correlations.pending()
    }

    async fn exchange(&self, endpoint: &str, request: &str) -> Result<String> {
        let request_queue = request_queue(endpoint);
        self.transport
            .declare_queue(&request_queue, QueueOptions::transient())
            .await?;

        let correlation_id = correlation_id();
        let body = match self.mode {
            ReplyMode::Shared => {
                self.exchange_shared(endpoint, &request_queue, correlation_id, request)
                    .await?
            }
            ReplyMode::Private => {
                self.exchange_private(&request_queue, correlation_id, request)
                    .await?
            }
        };
        Ok(String::from_utf8(body)?)
    }

    async fn exchange_shared(
        &self,
        endpoint: &str,
        request_queue: &str,
        correlation_id: String,
        request: &str,
    ) -> Result<Vec<u8>> {
        let response_queue = response_queue(endpoint);
        self.ensure_listener(&response_queue).await?;

        let (pending, reply) = PendingCall::register(&self.correlations, correlation_id);
        let message = OutboundMessage::json(request)
            .with_correlation_id(pending.id.clone())
            .with_reply_to(response_queue.clone());
        self.transport.publish("", request_queue, message).await?;

        let body = reply
            .await
            .map_err(|_| MessagingError::ConsumerClosed {
                queue: response_queue,
            })?;
        drop(pending);
        Ok(body)
    }

    async fn exchange_private(
        &self,
        request_queue: &str,
        correlation_id: String,
        request: &str,
    ) -> Result<Vec<u8>> {
        let Subscription {
            queue,
            mut deliveries,
        } = self
            .transport
            .subscribe("", QueueOptions::private(), ConsumeOptions::with_prefetch(1))
            .await?;

        let message = OutboundMessage::json(request)
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(queue.clone());
        self.transport.publish("", request_queue, message).await?;

        while let Some(delivery) = deliveries.next().await {
            let mut delivery = delivery?;
            let matched = delivery.correlation_id.as_deref() == Some(correlation_id.as_str());
            let body = std::mem::take(&mut delivery.body);
            delivery.ack().await?;
            if matched {
                return Ok(body);
            }
            debug!(queue = %queue, "Discarding reply with foreign correlation id");
        }
        Err(MessagingError::ConsumerClosed { queue })
    }

    /// Starts the reply consumer for a shared response queue unless one is running.
    async fn ensure_listener(&self, response_queue: &str) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        if let Some(handle) = listeners.get(response_queue)
            && !handle.is_finished()
        {
            return Ok(());
        }

        let subscription = self
            .transport
            .subscribe(
                response_queue,
                QueueOptions::transient(),
                ConsumeOptions::default(),
            )
            .await?;
        debug!(queue = %response_queue, "Started shared reply listener");

        let handle = tokio::spawn(listen(
            subscription,
            self.correlations.clone(),
            self.timeout,
        ));
        listeners.insert(response_queue.to_string(), handle);
        Ok(())
    }
}

impl<T: Transport> Drop for BrokerRpcClient<T> {
    fn drop(&mut self) {
        for handle in self.listeners.get_mut().values() {
            handle.abort();
        }
    }
}

#[async_trait]
impl<T: Transport> RpcClient for BrokerRpcClient<T> {
    #[tracing::instrument(skip(self, request))]
    async fn call(&self, endpoint: &str, request: &str) -> Result<String> {
        ensure_json(endpoint, request.as_bytes())?;

        let started = Instant::now();
        metrics::counter!("rpc_calls_total", "endpoint" => endpoint.to_string()).increment(1);

        let outcome = match tokio::time::timeout(self.timeout, self.exchange(endpoint, request)).await
        {
            Ok(result) => result,
            Err(_) => Err(MessagingError::Timeout {
                endpoint: endpoint.to_string(),
                timeout: self.timeout,
            }),
        };

        metrics::histogram!("rpc_call_duration_seconds", "endpoint" => endpoint.to_string())
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            metrics::counter!("rpc_call_failures_total", "endpoint" => endpoint.to_string())
                .increment(1);
            warn!(endpoint, error = %e, "RPC call failed");
        }
        outcome
    }
}

/// Routes every reply on a shared response queue to its waiting call.
///
/// Replies for calls this client does not know are handed back to the queue
/// with a growing delay so other processes sharing it can claim them. Once
/// one has gone unclaimed for longer than `patience` it is dropped.
async fn listen(
    mut subscription: Subscription,
    correlations: Arc<Correlations>,
    patience: Duration,
) {
    while let Some(delivery) = subscription.deliveries.next().await {
        let mut delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(queue = %subscription.queue, error = %e, "Reply listener failed");
                break;
            }
        };

        let Some(id) = delivery.correlation_id.clone() else {
            warn!(queue = %subscription.queue, "Reply without correlation id discarded");
            if let Err(e) = delivery.ack().await {
                warn!(error = %e, "Failed to ack reply");
            }
            continue;
        };

        let settled = match correlations.claim(&id) {
            Claim::Waiting(sender) => {
                let body = std::mem::take(&mut delivery.body);
                let ack = delivery.ack().await;
                // The caller may have timed out between claim and send.
                let _ = sender.send(body);
                ack
            }
            Claim::Expired => {
                debug!(correlation_id = %id, "Late reply for an abandoned call dropped");
                delivery.ack().await
            }
            Claim::Unknown => match correlations.bounce(&id, patience) {
                Some(delay) => {
                    let queue = subscription.queue.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(e) = delivery.nack(true).await {
                            warn!(queue = %queue, error = %e, "Failed to requeue reply");
                        }
                    });
                    Ok(())
                }
                None => {
                    debug!(correlation_id = %id, "Unclaimed reply dropped");
                    delivery.ack().await
                }
            },
        };
        if let Err(e) = settled {
            warn!(queue = %subscription.queue, error = %e, "Failed to settle reply");
        }
    }
    debug!(queue = %subscription.queue, "Reply listener stopped");
}

enum Claim {
    Waiting(oneshot::Sender<Vec<u8>>),
    Expired,
    Unknown,
}

/// Correlation id to waiting-call registry for shared reply queues.
#[derive(Default)]
struct Correlations {
    state: Mutex<CorrelationState>,
}

#[derive(Default)]
struct CorrelationState {
    pending: HashMap<String, oneshot::Sender<Vec<u8>>>,
    expired: VecDeque<String>,
    strays: HashMap<String, Stray>,
}

/// A reply seen on the shared queue that no call here was waiting for.
struct Stray {
    first_seen: Instant,
    bounces: u32,
}

impl CorrelationState {
    fn remember_expired(&mut self, id: &str) {
        if self.expired.len() == EXPIRED_MEMORY {
            self.expired.pop_front();
        }
        self.expired.push_back(id.to_string());
    }
}

impl Correlations {
    fn lock(&self) -> std::sync::MutexGuard<'_, CorrelationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn claim(&self, id: &str) -> Claim {
        let mut state = self.lock();
        if let Some(sender) = state.pending.remove(id) {
            state.strays.remove(id);
            return Claim::Waiting(sender);
        }
        if state.expired.iter().any(|expired| expired == id) {
            return Claim::Expired;
        }
        Claim::Unknown
    }

    fn abandon(&self, id: &str) {
        let mut state = self.lock();
        if state.pending.remove(id).is_some() {
            state.remember_expired(id);
        }
    }

    /// Returns how long to hold an unknown reply before requeueing it, or
    /// `None` when it has been unclaimed for longer than `patience`.
    fn bounce(&self, id: &str, patience: Duration) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        let (first_seen, bounces) = {
            let stray = state.strays.entry(id.to_string()).or_insert(Stray {
                first_seen: now,
                bounces: 0,
            });
            stray.bounces += 1;
            (stray.first_seen, stray.bounces - 1)
        };

        if now.duration_since(first_seen) > patience {
            state.strays.remove(id);
            state.remember_expired(id);
            return None;
        }
        if state.strays.len() > EXPIRED_MEMORY {
            state
                .strays
                .retain(|_, stray| now.duration_since(stray.first_seen) <= patience);
        }
        Some(
            STRAY_BACKOFF_BASE
                .saturating_mul(1 << bounces.min(6))
                .min(STRAY_BACKOFF_MAX),
        )
    }
}

/// Registration of an in-flight call; abandoned when dropped unanswered.
struct PendingCall {
    id: String,
    correlations: Arc<Correlations>,
}

impl PendingCall {
    fn register(
        correlations: &Arc<Correlations>,
        id: String,
    ) -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (sender, receiver) = oneshot::channel();
        correlations.lock().pending.insert(id.clone(), sender);
        (
            Self {
                id,
                correlations: correlations.clone(),
            },
            receiver,
        )
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.correlations.abandon(&self.id);
    }
}
