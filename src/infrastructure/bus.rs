// Message bus port (direct exchanges, durable manual-ack queues) and an
// in-process broker used by tests and single-node development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

pub type DeliveryStream = mpsc::UnboundedReceiver<Delivery>;

/// Published messages and dead letters kept per record for inspection
pub const DEFAULT_BUS_HISTORY: usize = 1_024;

/// Settles a delivery with the broker that produced it
#[async_trait]
pub trait Acknowledger: Send + Sync + fmt::Debug {
    async fn ack(&self, delivery: &Delivery) -> AppResult<()>;
    async fn nack(&self, delivery: Delivery, requeue: bool) -> AppResult<()>;
}

/// One message handed to a consumer. Must be settled exactly once with
/// [`Delivery::ack`] or [`Delivery::nack`].
pub struct Delivery {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("queue", &self.queue)
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Delivery {
    pub async fn ack(self) -> AppResult<()> {
        let acker = self.acker.clone();
        acker.ack(&self).await
    }

    pub async fn nack(self, requeue: bool) -> AppResult<()> {
        let acker = self.acker.clone();
        acker.nack(self, requeue).await
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync + fmt::Debug {
    /// Declare a durable direct exchange. Re-declaring is a no-op.
    async fn declare_exchange(&self, exchange: &str) -> AppResult<()>;

    /// Declare a durable queue and bind it to `exchange` under `routing_key`
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> AppResult<()>;

    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> AppResult<()>;

    /// Start a manual-ack consumer. The stream ends when the bus is closed.
    async fn consume(&self, queue: &str) -> AppResult<DeliveryStream>;

    /// Cancel every consumer. In-flight deliveries can still be settled.
    async fn close(&self) -> AppResult<()>;
}

/// Queue name for a routing key consumed by `service`:
/// `user.created` + `socialgraph` becomes `user-created-socialgraph`
pub fn queue_name(routing_key: &str, service: &str) -> String {
    format!("{}-{}", routing_key.replace('.', "-"), service)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn json(&self) -> AppResult<serde_json::Value> {
        serde_json::from_slice(&self.body).map_err(|e| AppError::Poison(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// Keeps the newest `limit` entries
#[derive(Debug)]
struct History<T> {
    entries: VecDeque<T>,
    limit: usize,
}

impl<T: Clone> History<T> {
    fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    fn record(&mut self, entry: T) {
        if self.limit == 0 {
            return;
        }
        if self.entries.len() == self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug)]
struct PendingMessage {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct QueueState {
    consumer: Option<mpsc::UnboundedSender<Delivery>>,
    backlog: VecDeque<PendingMessage>,
    unacked: HashSet<u64>,
    acked: u64,
    dead_letters: History<DeadLetter>,
}

impl QueueState {
    fn new(history: usize) -> Self {
        Self {
            consumer: None,
            backlog: VecDeque::new(),
            unacked: HashSet::new(),
            acked: 0,
            dead_letters: History::new(history),
        }
    }
}

#[derive(Debug)]
struct BrokerState {
    exchanges: HashSet<String>,
    bindings: HashMap<(String, String), Vec<String>>,
    queues: HashMap<String, QueueState>,
    published: History<PublishedMessage>,
}

#[derive(Debug)]
struct Broker {
    state: Mutex<BrokerState>,
    next_tag: AtomicU64,
    fail_publishes: AtomicBool,
    history: usize,
}

impl Broker {
    fn delivery(self: &Arc<Self>, queue: &str, message: PendingMessage) -> Delivery {
        Delivery {
            queue: queue.to_string(),
            exchange: message.exchange,
            routing_key: message.routing_key,
            delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed) + 1,
            redelivered: message.redelivered,
            body: message.body,
            acker: self.clone(),
        }
    }

    /// Hand `message` to the queue's consumer, or park it until one attaches
    fn enqueue(self: &Arc<Self>, state: &mut BrokerState, queue: &str, message: PendingMessage) {
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return;
        };
        match &queue_state.consumer {
            Some(consumer) => {
                let delivery = self.delivery(queue, message);
                let tag = delivery.delivery_tag;
                match consumer.send(delivery) {
                    Ok(()) => {
                        queue_state.unacked.insert(tag);
                    }
                    Err(mpsc::error::SendError(returned)) => {
                        queue_state.consumer = None;
                        queue_state.backlog.push_back(PendingMessage {
                            exchange: returned.exchange,
                            routing_key: returned.routing_key,
                            body: returned.body,
                            redelivered: returned.redelivered,
                        });
                    }
                }
            }
            None => queue_state.backlog.push_back(message),
        }
    }
}

#[async_trait]
impl Acknowledger for Broker {
    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| AppError::Bus(format!("unknown queue {}", delivery.queue)))?;
        if !queue.unacked.remove(&delivery.delivery_tag) {
            return Err(AppError::Bus(format!(
                "delivery {} already settled",
                delivery.delivery_tag
            )));
        }
        queue.acked += 1;
        Ok(())
    }

    async fn nack(&self, delivery: Delivery, requeue: bool) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let queue = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| AppError::Bus(format!("unknown queue {}", delivery.queue)))?;
        if !queue.unacked.remove(&delivery.delivery_tag) {
            return Err(AppError::Bus(format!(
                "delivery {} already settled",
                delivery.delivery_tag
            )));
        }

        if requeue {
            let redelivery = Delivery {
                delivery_tag: self.next_tag.fetch_add(1, Ordering::Relaxed) + 1,
                redelivered: true,
                ..delivery
            };
            let tag = redelivery.delivery_tag;
            let undelivered = match &queue.consumer {
                Some(consumer) => consumer.send(redelivery).err().map(|e| e.0),
                None => Some(redelivery),
            };
            match undelivered {
                None => {
                    queue.unacked.insert(tag);
                }
                Some(parked) => queue.backlog.push_back(PendingMessage {
                    exchange: parked.exchange,
                    routing_key: parked.routing_key,
                    body: parked.body,
                    redelivered: true,
                }),
            }
        } else {
            debug!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                "Delivery dead-lettered"
            );
            queue.dead_letters.record(DeadLetter {
                routing_key: delivery.routing_key,
                body: delivery.body,
            });
        }
        Ok(())
    }
}

/// In-process broker with direct-exchange routing. The most recent
/// published messages and dead letters are kept for inspection.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    broker: Arc<Broker>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::with_history(DEFAULT_BUS_HISTORY)
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `history` published messages, and as many dead letters
    /// per queue
    pub fn with_history(history: usize) -> Self {
        Self {
            broker: Arc::new(Broker {
                state: Mutex::new(BrokerState {
                    exchanges: HashSet::new(),
                    bindings: HashMap::new(),
                    queues: HashMap::new(),
                    published: History::new(history),
                }),
                next_tag: AtomicU64::new(0),
                fail_publishes: AtomicBool::new(false),
                history,
            }),
        }
    }

    /// Make every subsequent publish fail with a bus error
    pub fn set_publish_failure(&self, fail: bool) {
        self.broker.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.broker.state.lock().await.published.to_vec()
    }

    pub async fn dead_letters(&self, queue: &str) -> Vec<DeadLetter> {
        self.broker
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.dead_letters.to_vec())
            .unwrap_or_default()
    }

    pub async fn acked(&self, queue: &str) -> u64 {
        self.broker
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.acked)
    }

    /// Deliveries handed out but not yet settled
    pub async fn in_flight(&self, queue: &str) -> usize {
        self.broker
            .state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn declare_exchange(&self, exchange: &str) -> AppResult<()> {
        let mut state = self.broker.state.lock().await;
        if state.exchanges.insert(exchange.to_string()) {
            debug!(exchange, "Exchange declared");
        }
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> AppResult<()> {
        let mut state = self.broker.state.lock().await;
        if !state.exchanges.contains(exchange) {
            return Err(AppError::Bus(format!("exchange {} not declared", exchange)));
        }
        let history = self.broker.history;
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(history));
        let bound = state
            .bindings
            .entry((exchange.to_string(), routing_key.to_string()))
            .or_default();
        if !bound.iter().any(|q| q == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>) -> AppResult<()> {
        if self.broker.fail_publishes.load(Ordering::SeqCst) {
            return Err(AppError::Bus("broker unavailable".to_string()));
        }

        let mut state = self.broker.state.lock().await;
        if !state.exchanges.contains(exchange) {
            return Err(AppError::Bus(format!("exchange {} not declared", exchange)));
        }
        state.published.record(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: body.clone(),
        });

        let queues = state
            .bindings
            .get(&(exchange.to_string(), routing_key.to_string()))
            .cloned()
            .unwrap_or_default();
        for queue in queues {
            let message = PendingMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                body: body.clone(),
                redelivered: false,
            };
            self.broker.enqueue(&mut state, &queue, message);
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> AppResult<DeliveryStream> {
        let mut state = self.broker.state.lock().await;
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| AppError::Bus(format!("queue {} not declared", queue)))?;
        if queue_state.consumer.as_ref().map_or(false, |c| !c.is_closed()) {
            return Err(AppError::Bus(format!("queue {} already has a consumer", queue)));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        queue_state.consumer = Some(sender);
        let parked: Vec<PendingMessage> = queue_state.backlog.drain(..).collect();
        for message in parked {
            self.broker.enqueue(&mut state, queue, message);
        }
        info!(queue, "Consumer attached");
        Ok(receiver)
    }

    async fn close(&self) -> AppResult<()> {
        let mut state = self.broker.state.lock().await;
        for queue in state.queues.values_mut() {
            queue.consumer = None;
        }
        info!("Message bus closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bus_with_queue() -> InMemoryBus {
        let bus = InMemoryBus::new();
        bus.declare_exchange("user-exchange").await.unwrap();
        bus.bind_queue("user-created-test", "user-exchange", "user.created")
            .await
            .unwrap();
        bus
    }

    #[test]
    fn test_queue_name() {
        assert_eq!(
            queue_name("user.created", "social-graph"),
            "user-created-social-graph"
        );
        assert_eq!(queue_name("user.add.friend", "feed"), "user-add-friend-feed");
    }

    #[tokio::test]
    async fn test_routes_by_key_and_parks_until_consumer() {
        let bus = bus_with_queue().await;
        bus.publish("user-exchange", "user.created", b"1".to_vec()).await.unwrap();
        bus.publish("user-exchange", "user.deleted", b"2".to_vec()).await.unwrap();

        let mut stream = bus.consume("user-created-test").await.unwrap();
        let delivery = stream.recv().await.unwrap();
        assert_eq!(delivery.body, b"1");
        assert_eq!(delivery.routing_key, "user.created");
        assert!(stream.try_recv().is_err());

        delivery.ack().await.unwrap();
        assert_eq!(bus.acked("user-created-test").await, 1);
        assert_eq!(bus.published().await.len(), 2);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let bus = bus_with_queue().await;
        let mut stream = bus.consume("user-created-test").await.unwrap();
        bus.publish("user-exchange", "user.created", b"junk".to_vec()).await.unwrap();

        let delivery = stream.recv().await.unwrap();
        delivery.nack(false).await.unwrap();
        let dead = bus.dead_letters("user-created-test").await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, b"junk");
        assert_eq!(bus.in_flight("user-created-test").await, 0);
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let bus = bus_with_queue().await;
        let mut stream = bus.consume("user-created-test").await.unwrap();
        bus.publish("user-exchange", "user.created", b"again".to_vec()).await.unwrap();

        let first = stream.recv().await.unwrap();
        assert!(!first.redelivered);
        first.nack(true).await.unwrap();

        let second = stream.recv().await.unwrap();
        assert!(second.redelivered);
        assert_eq!(second.body, b"again");
        second.ack().await.unwrap();
        assert!(bus.dead_letters("user-created-test").await.is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_only_newest_records() {
        let bus = InMemoryBus::with_history(2);
        bus.declare_exchange("user-exchange").await.unwrap();
        bus.bind_queue("user-created-test", "user-exchange", "user.created")
            .await
            .unwrap();
        let mut stream = bus.consume("user-created-test").await.unwrap();
        for body in [b"1", b"2", b"3"] {
            bus.publish("user-exchange", "user.created", body.to_vec()).await.unwrap();
        }

        let published = bus.published().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].body, b"2");
        assert_eq!(published[1].body, b"3");

        for _ in 0..3 {
            stream.recv().await.unwrap().nack(false).await.unwrap();
        }
        let dead = bus.dead_letters("user-created-test").await;
        assert_eq!(dead.len(), 2);
        assert_eq!(dead[1].body, b"3");
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let bus = bus_with_queue().await;
        let mut stream = bus.consume("user-created-test").await.unwrap();
        bus.close().await.unwrap();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_exchange_fails() {
        let bus = InMemoryBus::new();
        let err = bus.publish("nope", "user.created", vec![]).await.unwrap_err();
        assert!(err.is_transient());

        let bus = bus_with_queue().await;
        bus.set_publish_failure(true);
        assert!(bus.publish("user-exchange", "user.created", vec![]).await.is_err());
    }
}
