//! Reconnection supervisor.
//!
//! Recovery holds the registry lock while it closes the old bindings, installs the
//! new connection and re-binds every registration on it. The previous connection
//! is closed last. Concurrent callers that find the connection dead queue on one
//! lock; the first one reconnects, the others re-check and reuse its result.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::BrokerConnection;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::exchange::{ExchangeRegistry, RebuildReport};

/// Return the live connection, reconnecting first if there is none
pub async fn ensure_open(
    connections: &ConnectionManager,
    exchanges: &ExchangeRegistry,
) -> Result<Arc<dyn BrokerConnection>> {
    if let Some(connection) = connections.live().await {
        rebind_unbound(exchanges, &connection).await;
        return Ok(connection);
    }

    let _guard = connections.reconnect_lock.lock().await;
    if let Some(connection) = connections.live().await {
        debug!("Connection restored while waiting for reconnect lock");
        rebind_unbound(exchanges, &connection).await;
        return Ok(connection);
    }

    let (connection, _) = reconnect_locked(connections, exchanges).await?;
    Ok(connection)
}

/// Replace the connection unconditionally and re-bind every registration
pub async fn reconnect(
    connections: &ConnectionManager,
    exchanges: &ExchangeRegistry,
) -> Result<(Arc<dyn BrokerConnection>, RebuildReport)> {
    let _guard = connections.reconnect_lock.lock().await;
    reconnect_locked(connections, exchanges).await
}

async fn reconnect_locked(
    connections: &ConnectionManager,
    exchanges: &ExchangeRegistry,
) -> Result<(Arc<dyn BrokerConnection>, RebuildReport)> {
    info!("No live RabbitMQ connection, reconnecting...");

    // nothing is mutated until the new connection is up
    let connection = connections.open().await?;

    let mut registry = exchanges.lock_for_rebuild().await;
    registry.close_bindings().await;
    let previous = connections.install(connection.clone()).await;
    let report = registry.rebind(&connection).await;
    drop(registry);

    if let Some(previous) = previous {
        if let Err(e) = previous.close().await {
            debug!("Ignoring close error for replaced connection: {}", e);
        }
    }

    if report.is_complete() {
        info!(
            "Reconnected to RabbitMQ, re-registered {} exchanges",
            report.rebound.len()
        );
    } else {
        warn!(
            "Reconnected to RabbitMQ, {} of {} exchanges failed to re-register",
            report.failed.len(),
            report.failed.len() + report.rebound.len()
        );
    }
    Ok((connection, report))
}

/// Retry registrations a partial rebuild left unbound
async fn rebind_unbound(exchanges: &ExchangeRegistry, connection: &Arc<dyn BrokerConnection>) {
    if !exchanges.has_unbound().await {
        return;
    }
    let report = exchanges.rebind_unbound(connection).await;
    if !report.rebound.is_empty() {
        info!("Re-registered {} unbound exchanges", report.rebound.len());
    }
}
