use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerChannel, BrokerConnection, Deliveries};
use crate::connection::{open_channel, ConnectionConfig};
use crate::error::{RabbitCastError, Result};

/// Receives every message published on a logical channel
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Handle one delivered message body
    async fn deliver(&self, channel: &str, body: Vec<u8>) -> Result<()>;

    /// Get handler name for debugging
    fn name(&self) -> &str {
        "Exchange"
    }
}

/// Simple function-based exchange handler
pub struct FunctionExchange<F> {
    name: String,
    handler: F,
}

impl<F, Fut> FunctionExchange<F>
where
    F: Fn(String, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F, Fut> Exchange for FunctionExchange<F>
where
    F: Fn(String, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn deliver(&self, channel: &str, body: Vec<u8>) -> Result<()> {
        (self.handler)(channel.to_string(), body).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A live queue binding for one logical channel
struct Binding {
    channel: Box<dyn BrokerChannel>,
    queue: String,
    consumer: JoinHandle<()>,
}

impl Binding {
    async fn close(self) -> Result<()> {
        self.consumer.abort();
        self.channel.close().await
    }
}

#[derive(Default)]
struct ExchangeTable {
    /// Every registration we know about, bound or not
    handlers: HashMap<String, Arc<dyn Exchange>>,
    /// Registrations bound on the current connection
    bindings: HashMap<String, Binding>,
}

/// Outcome of re-binding every known registration on a new connection
#[derive(Debug, Default)]
pub struct RebuildReport {
    pub rebound: Vec<String>,
    pub failed: Vec<(String, RabbitCastError)>,
}

impl RebuildReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Maps logical channel names to fanout bindings and their handlers
pub struct ExchangeRegistry {
    config: ConnectionConfig,
    table: RwLock<ExchangeTable>,
}

impl ExchangeRegistry {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            table: RwLock::new(ExchangeTable::default()),
        }
    }

    /// Bind `name` on `connection` and forward its messages to `handler`.
    ///
    /// A bound name can only be registered once; deregister it first to replace the
    /// handler. A name whose binding was lost in a failed rebuild is bound again
    /// with the new handler.
    pub async fn register(
        &self,
        connection: &Arc<dyn BrokerConnection>,
        name: &str,
        handler: Arc<dyn Exchange>,
    ) -> Result<()> {
        let mut table = self.table.write().await;
        if table.bindings.contains_key(name) {
            return Err(RabbitCastError::AlreadyRegistered {
                channel: name.to_string(),
            });
        }

        let binding = self.bind(connection, name, handler.clone()).await?;
        table.bindings.insert(name.to_string(), binding);
        table.handlers.insert(name.to_string(), handler);
        info!("Registered exchange: {}", name);
        Ok(())
    }

    /// Close and forget the binding for `name`. Returns whether it was registered.
    pub async fn deregister(&self, name: &str) -> bool {
        let (handler, binding) = {
            let mut table = self.table.write().await;
            (table.handlers.remove(name), table.bindings.remove(name))
        };

        if let Some(binding) = binding {
            if let Err(e) = binding.close().await {
                warn!("Error closing channel for exchange {}: {}", name, e);
            }
        }

        if handler.is_some() {
            info!("Deregistered exchange: {}", name);
        }
        handler.is_some()
    }

    /// Every known registration, name to handler
    pub async fn list_all(&self) -> HashMap<String, Arc<dyn Exchange>> {
        self.table.read().await.handlers.clone()
    }

    /// Names currently bound on the live connection
    pub async fn bound_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.table.read().await.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn is_bound(&self, name: &str) -> bool {
        self.table.read().await.bindings.contains_key(name)
    }

    /// Whether some registration has no binding on the live connection
    pub async fn has_unbound(&self) -> bool {
        let table = self.table.read().await;
        table.handlers.len() > table.bindings.len()
    }

    /// Re-bind every known registration on `connection`.
    ///
    /// Old channels are closed best-effort; a name that fails to bind keeps its
    /// handler and is picked up by [`ExchangeRegistry::rebind_unbound`].
    pub async fn rebuild(&self, connection: &Arc<dyn BrokerConnection>) -> RebuildReport {
        let mut guard = self.lock_for_rebuild().await;
        guard.close_bindings().await;
        guard.rebind(connection).await
    }

    /// Bind the registrations that lost their binding, leaving bound ones alone
    pub async fn rebind_unbound(&self, connection: &Arc<dyn BrokerConnection>) -> RebuildReport {
        self.lock_for_rebuild().await.rebind(connection).await
    }

    /// Exclusive hold on the table across a connection swap. No reader sees a
    /// binding from the old connection next to one from the new until it drops.
    pub(crate) async fn lock_for_rebuild(&self) -> RebuildGuard<'_> {
        RebuildGuard {
            registry: self,
            table: self.table.write().await,
        }
    }

    /// Close every binding and forget every registration
    pub async fn close_all(&self) {
        let bindings: Vec<_> = {
            let mut table = self.table.write().await;
            table.handlers.clear();
            table.bindings.drain().collect()
        };
        for (name, binding) in bindings {
            if let Err(e) = binding.close().await {
                warn!("Error closing channel for exchange {}: {}", name, e);
            }
        }
    }

    async fn bind(
        &self,
        connection: &Arc<dyn BrokerConnection>,
        name: &str,
        handler: Arc<dyn Exchange>,
    ) -> Result<Binding> {
        let channel = open_channel(connection, &self.config).await?;

        let consumer = async {
            channel.declare_fanout(name).await?;
            let queue = channel.declare_exclusive_queue().await?;
            channel.bind_queue(&queue, name).await?;
            let consumer_tag = format!("rabbitcast-{}-{}", name, Uuid::new_v4());
            let deliveries = channel.consume(&queue, &consumer_tag).await?;
            Ok::<_, RabbitCastError>((queue, deliveries))
        }
        .await;

        match consumer {
            Ok((queue, deliveries)) => {
                debug!("Bound queue {} to exchange {}", queue, name);
                let consumer = spawn_consumer(name.to_string(), deliveries, handler);
                Ok(Binding {
                    channel,
                    queue,
                    consumer,
                })
            }
            Err(e) => {
                if let Err(close_error) = channel.close().await {
                    debug!("Ignoring close error for unbound exchange {}: {}", name, close_error);
                }
                Err(e)
            }
        }
    }
}

pub(crate) struct RebuildGuard<'a> {
    registry: &'a ExchangeRegistry,
    table: RwLockWriteGuard<'a, ExchangeTable>,
}

impl RebuildGuard<'_> {
    /// Close every binding, keeping the handlers
    pub(crate) async fn close_bindings(&mut self) {
        for (name, binding) in self.table.bindings.drain() {
            if let Err(e) = binding.close().await {
                debug!("Ignoring close error for stale exchange {}: {}", name, e);
            }
        }
    }

    /// Bind every handler without a binding on `connection`, in name order
    pub(crate) async fn rebind(&mut self, connection: &Arc<dyn BrokerConnection>) -> RebuildReport {
        let mut unbound: Vec<_> = self
            .table
            .handlers
            .iter()
            .filter(|(name, _)| !self.table.bindings.contains_key(*name))
            .map(|(name, handler)| (name.clone(), handler.clone()))
            .collect();
        unbound.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = RebuildReport::default();
        for (name, handler) in unbound {
            match self.registry.bind(connection, &name, handler).await {
                Ok(binding) => {
                    self.table.bindings.insert(name.clone(), binding);
                    report.rebound.push(name);
                }
                Err(e) => {
                    error!("Failed to re-register exchange {}: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }
        report
    }
}

/// Forward deliveries to `handler`, one task per message so a slow or failing
/// handler never stalls the consumer
fn spawn_consumer(name: String, mut deliveries: Deliveries, handler: Arc<dyn Exchange>) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("Consumer started for exchange: {} ({})", name, handler.name());

        while let Some(delivery) = deliveries.next().await {
            match delivery {
                Ok(body) => {
                    let handler = handler.clone();
                    let name = name.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler.deliver(&name, body).await {
                            error!("Error handling message on {}: {}", name, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error receiving message on {}: {}", name, e);
                }
            }
        }

        warn!("Consumer stopped for exchange: {}", name);
    })
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRegistry").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding").field("queue", &self.queue).finish()
    }
}
