use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerChannel, BrokerConnection, Connector};
use crate::error::{RabbitCastError, Result};

/// Broker credentials, handed over once at initialization
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub virtual_host: String,
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        virtual_host: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            virtual_host: virtual_host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Read credentials from `RABBITCAST_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let var = |name: &str, default: String| std::env::var(name).unwrap_or(default);

        let port = match std::env::var("RABBITCAST_PORT") {
            Ok(port) => port.parse().map_err(|_| {
                RabbitCastError::Other(anyhow::anyhow!("RABBITCAST_PORT is not a port number: {port}"))
            })?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            host: var("RABBITCAST_HOST", defaults.host),
            port,
            username: var("RABBITCAST_USERNAME", defaults.username),
            password: var("RABBITCAST_PASSWORD", defaults.password),
            virtual_host: var("RABBITCAST_VHOST", defaults.virtual_host),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("virtual_host", &self.virtual_host)
            .finish()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            username: "guest".to_string(),
            password: "guest".to_string(),
            virtual_host: "/".to_string(),
        }
    }
}

/// Configuration for the broker connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub credentials: Credentials,
    /// Connection open timeout in milliseconds
    pub connection_timeout_ms: u64,
    /// Channel creation timeout in milliseconds
    pub channel_timeout_ms: u64,
    /// Heartbeat interval in seconds
    pub heartbeat_seconds: u16,
}

impl ConnectionConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            ..Self::default()
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            connection_timeout_ms: 10_000,
            channel_timeout_ms: 5_000,
            heartbeat_seconds: 60,
        }
    }
}

/// Owns the single shared broker connection.
///
/// The connection is replaced wholesale when it dies, never repaired. Recovery of
/// the channels that hung off the old connection is the supervisor's job.
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    connection: RwLock<Option<Arc<dyn BrokerConnection>>>,
    /// Serializes reconnects so concurrent callers trigger a single attempt
    pub(crate) reconnect_lock: Mutex<()>,
    reconnects: AtomicU64,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            connection: RwLock::new(None),
            reconnect_lock: Mutex::new(()),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open a new connection without installing it
    pub async fn open(&self) -> Result<Arc<dyn BrokerConnection>> {
        let timeout = self.config.connection_timeout();
        match tokio::time::timeout(timeout, self.connector.connect(&self.config)).await {
            Ok(Ok(connection)) => {
                info!(
                    "Connected to RabbitMQ at {}:{}",
                    self.config.credentials.host, self.config.credentials.port
                );
                Ok(connection)
            }
            Ok(Err(e)) => {
                error!("Failed to connect to RabbitMQ: {}", e);
                Err(e)
            }
            Err(_) => {
                error!("Connecting to RabbitMQ timed out after {:?}", timeout);
                Err(RabbitCastError::Timeout {
                    operation: "connection open",
                    timeout_ms: self.config.connection_timeout_ms,
                })
            }
        }
    }

    /// Open and install the connection
    pub async fn connect(&self) -> Result<Arc<dyn BrokerConnection>> {
        let connection = self.open().await?;
        self.install(connection.clone()).await;
        Ok(connection)
    }

    /// Replace the current connection, returning the previous one
    pub async fn install(&self, connection: Arc<dyn BrokerConnection>) -> Option<Arc<dyn BrokerConnection>> {
        let previous = self.connection.write().await.replace(connection);
        if previous.is_some() {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
        previous
    }

    /// The current connection, if it reports itself open
    pub async fn live(&self) -> Option<Arc<dyn BrokerConnection>> {
        let connection_guard = self.connection.read().await;
        connection_guard
            .as_ref()
            .filter(|connection| connection.is_open())
            .cloned()
    }

    /// Create a channel on `connection` within the channel timeout
    pub async fn channel(&self, connection: &Arc<dyn BrokerConnection>) -> Result<Box<dyn BrokerChannel>> {
        open_channel(connection, &self.config).await
    }

    /// Check if connection is healthy
    pub async fn is_connected(&self) -> bool {
        self.live().await.is_some()
    }

    /// Close and discard the current connection
    pub async fn close(&self) {
        let connection = self.connection.write().await.take();
        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("Error closing RabbitMQ connection: {}", e);
            }
            debug!("RabbitMQ connection closed");
        }
    }

    /// Get connection statistics for monitoring
    pub async fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            is_connected: self.is_connected().await,
            reconnects: self.reconnects.load(Ordering::SeqCst),
            host: self.config.credentials.host.clone(),
        }
    }
}

pub(crate) async fn open_channel(
    connection: &Arc<dyn BrokerConnection>,
    config: &ConnectionConfig,
) -> Result<Box<dyn BrokerChannel>> {
    match tokio::time::timeout(config.channel_timeout(), connection.create_channel()).await {
        Ok(Ok(channel)) => {
            debug!("Created new channel");
            Ok(channel)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RabbitCastError::Timeout {
            operation: "channel creation",
            timeout_ms: config.channel_timeout_ms,
        }),
    }
}

/// Connection statistics for monitoring
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStats {
    pub is_connected: bool,
    /// Times the connection has been replaced
    pub reconnects: u64,
    pub host: String,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;

    fn manager(broker: &MemoryBroker) -> ConnectionManager {
        ConnectionManager::new(ConnectionConfig::default(), Arc::new(broker.clone()))
    }

    #[test]
    fn test_credentials_defaults() {
        let credentials = Credentials::new("rabbit", "app", "secret", "prod");
        assert_eq!(credentials.port, 5672);
        assert_eq!(credentials.with_port(5673).port, 5673);
    }

    #[tokio::test]
    async fn test_lazy_until_connect() {
        let broker = MemoryBroker::new();
        let connections = manager(&broker);
        assert!(!connections.is_connected().await);
        assert_eq!(broker.connect_attempts(), 0);

        let connection = connections.connect().await.unwrap();
        assert!(connections.is_connected().await);
        assert_eq!(connections.stats().await.reconnects, 0);
        connections.channel(&connection).await.unwrap();
    }

    #[tokio::test]
    async fn test_dead_connection_is_not_live() {
        let broker = MemoryBroker::new();
        let connections = manager(&broker);
        connections.connect().await.unwrap();

        broker.sever();
        assert!(connections.live().await.is_none());

        connections.connect().await.unwrap();
        assert!(connections.is_connected().await);
        assert_eq!(connections.stats().await.reconnects, 1);
    }

    #[tokio::test]
    async fn test_open_failure_is_surfaced() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let connections = manager(&broker);
        assert!(connections.connect().await.is_err());
        assert!(!connections.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_discards_connection() {
        let broker = MemoryBroker::new();
        let connections = manager(&broker);
        connections.connect().await.unwrap();
        connections.close().await;
        assert!(!connections.is_connected().await);
        assert_eq!(broker.open_connections(), 0);
    }
}
