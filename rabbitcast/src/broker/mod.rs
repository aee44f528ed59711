//! Broker seam.
//!
//! Everything above this module talks to the broker through three small traits,
//! so the same connection management, registry and supervisor code drives both
//! RabbitMQ ([`amqp`]) and the in-process broker used in tests ([`memory`]).

pub mod amqp;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::connection::ConnectionConfig;
use crate::error::Result;

/// Stream of message bodies delivered to one consumer
pub type Deliveries = BoxStream<'static, Result<Vec<u8>>>;

/// Opens broker connections
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn BrokerConnection>>;
}

/// One live broker connection, shared by every channel
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// The connection's own liveness signal
    fn is_open(&self) -> bool;

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    async fn close(&self) -> Result<()>;
}

/// A broker channel. Never shared between concurrent publishes.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a non-durable fanout exchange
    async fn declare_fanout(&self, exchange: &str) -> Result<()>;

    /// Declare an exclusive, auto-deleted, server-named queue and return its name
    async fn declare_exclusive_queue(&self) -> Result<String>;

    /// Bind `queue` to `exchange` with the empty routing key
    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()>;

    /// Start an auto-acknowledged consumer on `queue`
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries>;

    /// Publish with the empty routing key and non-persistent delivery mode
    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
