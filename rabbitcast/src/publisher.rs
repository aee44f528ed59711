use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::BrokerConnection;
use crate::connection::{open_channel, ConnectionConfig};
use crate::error::{RabbitCastError, Result};

/// Publish `payload` on the fanout exchange `exchange` through a transient channel.
///
/// The exchange is declared first, so publishing to a name nobody listens on is not
/// an error. Failures are returned as [`RabbitCastError::Send`] and never retried here.
pub async fn publish(
    connection: &Arc<dyn BrokerConnection>,
    config: &ConnectionConfig,
    exchange: &str,
    payload: &[u8],
) -> Result<()> {
    let channel = open_channel(connection, config)
        .await
        .map_err(|e| RabbitCastError::send_failure(exchange, e))?;

    let published = async {
        channel.declare_fanout(exchange).await?;
        channel.publish(exchange, payload).await
    }
    .await;

    if let Err(e) = channel.close().await {
        warn!("Error closing publish channel for {}: {}", exchange, e);
    }

    published.map_err(|e| RabbitCastError::send_failure(exchange, e))?;
    debug!("Published {} bytes to exchange: {}", payload.len(), exchange);
    Ok(())
}
