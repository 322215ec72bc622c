//! In-process broker for tests and local development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    Acknowledger, ConsumeOptions, Delivery, OutboundMessage, QueueOptions, Subscription,
    Transport,
};
use crate::{MessagingError, Result, topic};

/// Broker that keeps exchanges, queues and bindings in memory.
///
/// It follows the AMQP semantics the messaging patterns depend on:
///
/// - the empty exchange routes directly to the queue named by the routing key;
/// - topic exchanges route by pattern to every bound queue, once per queue;
/// - consumers on one queue compete for its messages;
/// - deliveries stay unacknowledged until settled, and a requeueing nack
///   puts the message back with `redelivered` set;
/// - auto-delete queues disappear when their last consumer goes away.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    topology: Mutex<Topology>,
}

#[derive(Default)]
struct Topology {
    exchanges: HashSet<String>,
    queues: HashMap<String, Arc<Queue>>,
    bindings: Vec<Binding>,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

#[derive(Clone)]
struct Message {
    routing_key: String,
    body: Vec<u8>,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    redelivered: bool,
}

struct Queue {
    options: QueueOptions,
    sender: mpsc::UnboundedSender<Message>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    ready: AtomicUsize,
    unacked: AtomicUsize,
    delivered: AtomicUsize,
    consumers: AtomicUsize,
}

impl Queue {
    fn new(options: QueueOptions) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            options,
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            ready: AtomicUsize::new(0),
            unacked: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            consumers: AtomicUsize::new(0),
        }
    }

    fn enqueue(&self, message: Message) {
        self.ready.fetch_add(1, Ordering::SeqCst);
        // The queue owns its receiver, so the channel cannot be closed here.
        let _ = self.sender.send(message);
    }

    async fn dequeue(&self) -> Option<Message> {
        let message = self.receiver.lock().await.recv().await?;
        self.ready.fetch_sub(1, Ordering::SeqCst);
        self.unacked.fetch_add(1, Ordering::SeqCst);
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Some(message)
    }
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the queue is currently declared.
    pub fn queue_exists(&self, queue: &str) -> bool {
        self.topology().queues.contains_key(queue)
    }

    /// Names of all declared queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topology().queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of messages waiting in `queue` to be delivered.
    pub fn message_count(&self, queue: &str) -> usize {
        self.queue(queue)
            .map(|q| q.ready.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of delivered but not yet settled messages on `queue`.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.queue(queue)
            .map(|q| q.unacked.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Deliveries handed out from `queue` so far, redeliveries included.
    pub fn delivery_count(&self, queue: &str) -> usize {
        self.queue(queue)
            .map(|q| q.delivered.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of active consumers on `queue`.
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.queue(queue)
            .map(|q| q.consumers.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn topology(&self) -> MutexGuard<'_, Topology> {
        self.inner
            .topology
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn queue(&self, queue: &str) -> Option<Arc<Queue>> {
        self.topology().queues.get(queue).cloned()
    }

    fn declare(&self, queue: &str, options: QueueOptions) -> (String, Arc<Queue>) {
        let name = if queue.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4().simple())
        } else {
            queue.to_string()
        };
        let mut topology = self.topology();
        let queue = topology
            .queues
            .entry(name.clone())
            .or_insert_with(|| Arc::new(Queue::new(options)))
            .clone();
        (name, queue)
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &str, _durable: bool) -> Result<()> {
        self.topology().exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<String> {
        Ok(self.declare(queue, options).0)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, pattern: &str) -> Result<()> {
        let mut topology = self.topology();
        if !topology.exchanges.contains(exchange) {
            return Err(MessagingError::NotFound {
                kind: "exchange",
                name: exchange.to_string(),
            });
        }
        if !topology.queues.contains_key(queue) {
            return Err(MessagingError::NotFound {
                kind: "queue",
                name: queue.to_string(),
            });
        }
        let exists = topology
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.pattern == pattern && b.queue == queue);
        if !exists {
            topology.bindings.push(Binding {
                exchange: exchange.to_string(),
                pattern: pattern.to_string(),
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<()> {
        let targets: Vec<Arc<Queue>> = {
            let topology = self.topology();
            if exchange.is_empty() {
                topology.queues.get(routing_key).cloned().into_iter().collect()
            } else {
                if !topology.exchanges.contains(exchange) {
                    return Err(MessagingError::NotFound {
                        kind: "exchange",
                        name: exchange.to_string(),
                    });
                }
                let mut names: Vec<&str> = topology
                    .bindings
                    .iter()
                    .filter(|b| b.exchange == exchange && topic::matches(&b.pattern, routing_key))
                    .map(|b| b.queue.as_str())
                    .collect();
                names.sort_unstable();
                names.dedup();
                names
                    .into_iter()
                    .filter_map(|name| topology.queues.get(name).cloned())
                    .collect()
            }
        };

        if targets.is_empty() {
            debug!(exchange, routing_key, "Message unroutable, dropped");
        }

        let message = Message {
            routing_key: routing_key.to_string(),
            body: message.body,
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            redelivered: false,
        };
        for queue in targets {
            queue.enqueue(message.clone());
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        queue_options: QueueOptions,
        _consume_options: ConsumeOptions,
    ) -> Result<Subscription> {
        let (name, state) = self.declare(queue, queue_options);
        state.consumers.fetch_add(1, Ordering::SeqCst);

        let guard = ConsumerGuard {
            broker: Arc::downgrade(&self.inner),
            queue: name.clone(),
            state: state.clone(),
        };
        let deliveries = futures_util::stream::unfold(guard, |guard| async move {
            let Some(message) = guard.state.dequeue().await else {
                return None;
            };
            let acker = MemoryAcker {
                queue: guard.state.clone(),
                message: Mutex::new(Some(message.clone())),
            };
            let delivery = Delivery::new(
                message.routing_key,
                message.body,
                message.correlation_id,
                message.reply_to,
                message.redelivered,
                Box::new(acker),
            );
            Some((Ok(delivery), guard))
        });

        Ok(Subscription {
            queue: name,
            deliveries: Box::pin(deliveries),
        })
    }
}

/// Tracks a live consumer; removes auto-delete queues when the last one goes.
struct ConsumerGuard {
    broker: Weak<Inner>,
    queue: String,
    state: Arc<Queue>,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        let remaining = self.state.consumers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 || !self.state.options.auto_delete {
            return;
        }
        if let Some(inner) = self.broker.upgrade() {
            let mut topology = inner.topology.lock().unwrap_or_else(PoisonError::into_inner);
            topology.queues.remove(&self.queue);
            topology.bindings.retain(|b| b.queue != self.queue);
        }
    }
}

struct MemoryAcker {
    queue: Arc<Queue>,
    message: Mutex<Option<Message>>,
}

impl MemoryAcker {
    fn settle(&self) -> Option<Message> {
        let message = self
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if message.is_some() {
            self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
        }
        message
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        self.settle();
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        if let Some(mut message) = self.settle()
            && requeue
        {
            message.redelivered = true;
            self.queue.enqueue(message);
        }
        Ok(())
    }
}
