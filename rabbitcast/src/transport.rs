use std::any::Any;
use std::sync::Arc;

use tracing::{info, warn};

use crate::broker::amqp::AmqpConnector;
use crate::broker::{BrokerConnection, Connector};
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionStats};
use crate::dispatch::OperationExchange;
use crate::engine::{Engine, RemoteHost, Scope, TransformReport};
use crate::error::{RabbitCastError, Result};
use crate::exchange::{Exchange, ExchangeRegistry, RebuildReport};
use crate::publisher;
use crate::supervisor;
use crate::value::Value;

/// Shared handle to the connection, the exchange registry and the dispatch table.
///
/// Construct one at startup and clone it into everything that sends or listens;
/// clones share the same state.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    connections: ConnectionManager,
    exchanges: ExchangeRegistry,
    engine: Engine,
}

impl Transport {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::with_engine(config, connector, Engine::new())
    }

    pub fn with_engine(config: ConnectionConfig, connector: Arc<dyn Connector>, engine: Engine) -> Self {
        let exchanges = ExchangeRegistry::new(config.clone());
        Self {
            inner: Arc::new(TransportInner {
                connections: ConnectionManager::new(config, connector),
                exchanges,
                engine,
            }),
        }
    }

    /// Transport over RabbitMQ
    pub fn amqp(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(AmqpConnector))
    }

    /// Transform every declaration in `scope`, then connect to RabbitMQ.
    ///
    /// Types that fail to transform are logged and left out; a connection failure
    /// fails the whole call.
    pub async fn initialize(config: ConnectionConfig, scope: &Scope) -> Result<Self> {
        let transport = Self::amqp(config);
        let report = transport.transform(scope).await;
        if !report.is_clean() {
            warn!("{} types could not be transformed", report.failures.len());
        }
        transport.open().await?;
        Ok(transport)
    }

    /// Open the broker connection
    pub async fn open(&self) -> Result<()> {
        self.inner.connections.connect().await?;
        Ok(())
    }

    pub async fn transform(&self, scope: &Scope) -> TransformReport {
        self.inner.engine.transform(scope).await
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Invoke the remote operation installed on `channel` on every listener.
    ///
    /// This is what generated stubs call.
    pub async fn send(&self, channel: &str, args: Vec<Value>) -> Result<()> {
        let pair = self
            .inner
            .engine
            .installed(channel)
            .await
            .ok_or_else(|| RabbitCastError::NotTransformed {
                operation: channel.to_string(),
            })?;
        let payload = pair.stub.pack(args)?.to_bytes()?;
        self.publish(channel, &payload).await
    }

    /// Publish raw bytes on the fanout exchange `exchange`
    pub async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()> {
        let connection = self
            .ensure_open()
            .await
            .map_err(|e| RabbitCastError::send_failure(exchange, e))?;
        publisher::publish(&connection, self.inner.connections.config(), exchange, payload).await
    }

    /// Forward every message published on `name` to `handler`
    pub async fn register(&self, name: &str, handler: Arc<dyn Exchange>) -> Result<()> {
        let connection = self.ensure_open().await?;
        self.inner.exchanges.register(&connection, name, handler).await
    }

    pub async fn deregister(&self, name: &str) -> bool {
        self.inner.exchanges.deregister(name).await
    }

    /// Every registered name, bound or waiting to be bound again
    pub async fn registered(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.exchanges.list_all().await.into_keys().collect();
        names.sort();
        names
    }

    pub async fn is_bound(&self, name: &str) -> bool {
        self.inner.exchanges.is_bound(name).await
    }

    /// Run `receiver`'s handlers for every remote operation of `T`.
    ///
    /// All or nothing: if one channel cannot be registered, the ones registered
    /// by this call are removed again. Returns the channels now listened on.
    pub async fn listen<T: RemoteHost>(&self, receiver: Arc<T>) -> Result<Vec<String>> {
        let receiver: Arc<dyn Any + Send + Sync> = receiver;
        self.listen_owner(T::OWNER, receiver, false).await
    }

    /// Like [`listen`](Self::listen) for a type whose remote operations take no receiver
    pub async fn listen_static<T: RemoteHost>(&self) -> Result<Vec<String>> {
        self.listen_owner(T::OWNER, Arc::new(()), true).await
    }

    /// Stop listening on every remote operation of `T`
    pub async fn unlisten<T: RemoteHost>(&self) -> usize {
        let mut removed = 0;
        for pair in self.inner.engine.owned_by(T::OWNER).await {
            if self.deregister(&pair.stub.channel).await {
                removed += 1;
            }
        }
        removed
    }

    async fn listen_owner(
        &self,
        owner: &str,
        receiver: Arc<dyn Any + Send + Sync>,
        static_only: bool,
    ) -> Result<Vec<String>> {
        let pairs: Vec<_> = self
            .inner
            .engine
            .owned_by(owner)
            .await
            .into_iter()
            .filter(|pair| !static_only || pair.handler.is_static)
            .collect();
        if pairs.is_empty() {
            return Err(RabbitCastError::NotTransformed {
                operation: owner.to_string(),
            });
        }

        let mut channels: Vec<String> = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let channel = pair.stub.channel.clone();
            let handler = Arc::new(OperationExchange::new(pair, receiver.clone()));
            if let Err(e) = self.register(&channel, handler).await {
                for registered in &channels {
                    self.deregister(registered).await;
                }
                return Err(e);
            }
            channels.push(channel);
        }

        info!("Listening for {} on {} channels", owner, channels.len());
        Ok(channels)
    }

    /// The live connection, reconnecting first if it died
    pub async fn ensure_open(&self) -> Result<Arc<dyn BrokerConnection>> {
        supervisor::ensure_open(&self.inner.connections, &self.inner.exchanges).await
    }

    /// Force a reconnect and re-bind every registration
    pub async fn reconnect(&self) -> Result<RebuildReport> {
        let (_, report) = supervisor::reconnect(&self.inner.connections, &self.inner.exchanges).await?;
        Ok(report)
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.connections.is_connected().await
    }

    pub async fn stats(&self) -> ConnectionStats {
        self.inner.connections.stats().await
    }

    /// Drop every registration and close the connection
    pub async fn close(&self) {
        self.inner.exchanges.close_all().await;
        self.inner.connections.close().await;
        info!("Transport closed");
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("connections", &self.inner.connections)
            .field("engine", &self.inner.engine)
            .finish_non_exhaustive()
    }
}
