use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::*,
    types::FieldTable,
    uri::AMQPUri,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::debug;

use super::{BrokerChannel, BrokerConnection, Connector, Deliveries};
use crate::connection::ConnectionConfig;
use crate::error::Result;

/// AMQP delivery mode 1: the broker keeps the message in memory only
const NON_PERSISTENT: u8 = 1;
const REPLY_SUCCESS: u16 = 200;

/// Connects to RabbitMQ with lapin
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }

    fn uri(config: &ConnectionConfig) -> AMQPUri {
        let credentials = &config.credentials;
        let mut uri = AMQPUri::default();
        uri.authority.host = credentials.host.clone();
        uri.authority.port = credentials.port;
        uri.authority.userinfo.username = credentials.username.clone();
        uri.authority.userinfo.password = credentials.password.clone();
        uri.vhost = credentials.virtual_host.clone();
        uri.query.heartbeat = Some(config.heartbeat_seconds);
        uri
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn BrokerConnection>> {
        debug!(
            "Attempting to connect to amqp://{}:{}/{}",
            config.credentials.host, config.credentials.port, config.credentials.virtual_host
        );

        let connection = Connection::connect_uri(
            Self::uri(config),
            ConnectionProperties::default()
                .with_connection_name(format!("rabbitcast-{}", uuid::Uuid::new_v4()).into()),
        )
        .await?;

        debug!("AMQP connection established");
        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        let channel = self.connection.create_channel().await?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<()> {
        if self.is_open() {
            self.connection.close(REPLY_SUCCESS, "OK").await?;
        }
        Ok(())
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_fanout(&self, exchange: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: false,
                    auto_delete: false,
                    internal: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn declare_exclusive_queue(&self) -> Result<String> {
        let queue = self
            .channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    durable: false,
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Deliveries> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: true,
                    exclusive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        Ok(consumer
            .map(|delivery| delivery.map(|delivery| delivery.data).map_err(Into::into))
            .boxed())
    }

    async fn publish(&self, exchange: &str, payload: &[u8]) -> Result<()> {
        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(NON_PERSISTENT),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.channel.status().connected() {
            self.channel.close(REPLY_SUCCESS, "OK").await?;
        }
        Ok(())
    }
}
