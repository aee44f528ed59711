//! In-process broker.
//!
//! Behaves like a single RabbitMQ node for the subset rabbitcast uses: fanout
//! exchanges, exclusive server-named queues owned by the declaring connection,
//! auto-acknowledged consumers. Tests drive failures with [`MemoryBroker::sever`]
//! and [`MemoryBroker::set_reachable`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{BrokerChannel, BrokerConnection, Connector, Deliveries};
use crate::connection::ConnectionConfig;
use crate::error::{RabbitCastError, Result};

/// Shared handle to one in-process broker
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    reachable: Arc<AtomicBool>,
    connect_attempts: Arc<AtomicUsize>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    connections: HashMap<u64, Arc<AtomicBool>>,
    /// exchange -> bound queue names
    exchanges: HashMap<String, Vec<String>>,
    queues: HashMap<String, Queue>,
}

struct Queue {
    connection: u64,
    channel: u64,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    receiver: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn drop_queues(&mut self, doomed: impl Fn(&Queue) -> bool) {
        self.queues.retain(|_, queue| !doomed(queue));
        let queues = &self.queues;
        for bound in self.exchanges.values_mut() {
            bound.retain(|name| queues.contains_key(name));
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            reachable: Arc::new(AtomicBool::new(true)),
            connect_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While unreachable, every connection attempt fails
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop every open connection, as if the broker restarted.
    ///
    /// Exclusive queues die with their connection, so their consumers end.
    pub fn sever(&self) {
        let mut state = self.state();
        for open in state.connections.values() {
            open.store(false, Ordering::SeqCst);
        }
        state.connections.clear();
        state.drop_queues(|_| true);
    }

    /// Connection attempts so far, failed ones included
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.state().connections.len()
    }

    /// Number of queues currently bound to `exchange`
    pub fn bound_queues(&self, exchange: &str) -> usize {
        self.state().exchanges.get(exchange).map_or(0, Vec::len)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Arc<dyn BrokerConnection>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RabbitCastError::broker_error("connection refused"));
        }

        let open = Arc::new(AtomicBool::new(true));
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state.connections.insert(id, open.clone());
            id
        };

        Ok(Arc::new(MemoryConnection {
            id,
            open,
            broker: self.clone(),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    open: Arc<AtomicBool>,
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        if !self.is_open() {
            return Err(RabbitCastError::broker_error("connection is closed"));
        }
        let id = self.broker.state().next_id();
        Ok(Box::new(MemoryChannel {
            id,
            connection: self.id,
            connection_open: self.open.clone(),
            open: AtomicBool::new(true),
            broker: self.broker.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        let mut state = self.broker.state();
        state.connections.remove(&self.id);
        let id = self.id;
        state.drop_queues(|queue| queue.connection == id);
        Ok(())
    }
}

struct MemoryChannel {
    id: u64,
    connection: u64,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
    broker: MemoryBroker,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RabbitCastError::broker_error("channel is closed"))
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_fanout(&self, exchange: &str) -> Result<()> {
        self.check_open()?;
        self.broker
            .state()
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<String> {
        self.check_open()?;
        let mut state = self.broker.state();
        let name = format!("amq.gen-{}", state.next_id());
        let (sender, receiver) = mpsc::unbounded_channel();
        state.queues.insert(
            name.clone(),
            Queue {
                connection: self.connection,
                channel: self.id,
                sender,
                receiver: Some(receiver),
            },
        );
        Ok(name)
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.check_open()?;
        let mut state = self.broker.state();
        if !state.queues.contains_key(queue) {
            return Err(RabbitCastError::broker_error(format!("NOT_FOUND - no queue '{queue}'")));
        }
        let bound = state.exchanges.get_mut(exchange).ok_or_else(|| {
            RabbitCastError::broker_error(format!("NOT_FOUND - no exchange '{exchange}'"))
        })?;
        if !bound.iter().any(|name| name == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<Deliveries> {
        self.check_open()?;
        let receiver = self
            .broker
            .state()
            .queues
            .get_mut(queue)
            .and_then(|queue| queue.receiver.take())
            .ok_or_else(|| {
                RabbitCastError::broker_error(format!("queue '{queue}' is missing or already consumed"))
            })?;

        Ok(futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|body| (Ok(body), receiver))
        })
        .boxed())
    }

    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()> {
        self.check_open()?;
        let state = self.broker.state();
        let bound = state.exchanges.get(exchange).ok_or_else(|| {
            RabbitCastError::broker_error(format!("NOT_FOUND - no exchange '{exchange}'"))
        })?;
        for name in bound {
            if let Some(queue) = state.queues.get(name) {
                let _ = queue.sender.send(payload.to_vec());
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        let id = self.id;
        self.broker.state().drop_queues(|queue| queue.channel == id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn consumer(connection: &Arc<dyn BrokerConnection>, exchange: &str) -> Deliveries {
        let channel = connection.create_channel().await.unwrap();
        channel.declare_fanout(exchange).await.unwrap();
        let queue = channel.declare_exclusive_queue().await.unwrap();
        channel.bind_queue(&queue, exchange).await.unwrap();
        channel.consume(&queue, "test").await.unwrap()
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_queue() {
        let broker = MemoryBroker::new();
        let connection = broker.connect(&ConnectionConfig::default()).await.unwrap();
        let mut first = consumer(&connection, "news").await;
        let mut second = consumer(&connection, "news").await;
        assert_eq!(broker.bound_queues("news"), 2);

        let publisher = connection.create_channel().await.unwrap();
        publisher.publish("news", b"hello").await.unwrap();

        assert_eq!(first.next().await.unwrap().unwrap(), b"hello");
        assert_eq!(second.next().await.unwrap().unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let broker = MemoryBroker::new();
        let connection = broker.connect(&ConnectionConfig::default()).await.unwrap();
        let channel = connection.create_channel().await.unwrap();
        assert!(channel.publish("nowhere", b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_sever_closes_connections_and_ends_consumers() {
        let broker = MemoryBroker::new();
        let connection = broker.connect(&ConnectionConfig::default()).await.unwrap();
        let mut deliveries = consumer(&connection, "news").await;

        broker.sever();

        assert!(!connection.is_open());
        assert!(connection.create_channel().await.is_err());
        assert!(deliveries.next().await.is_none());
        assert_eq!(broker.bound_queues("news"), 0);
    }

    #[tokio::test]
    async fn test_unreachable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        assert!(broker.connect(&ConnectionConfig::default()).await.is_err());
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.open_connections(), 0);
    }
}
