// Publishes domain events after successful mutations. No buffering, no retry:
// a broker failure is returned to the caller as is.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{AppError, AppResult};
use crate::infrastructure::bus::MessageBus;
use crate::infrastructure::monitoring::{BusEvent, MetricsCollector};

#[derive(Debug, Clone)]
pub struct EventEmitter {
    bus: Arc<dyn MessageBus>,
    metrics: Arc<MetricsCollector>,
}

impl EventEmitter {
    pub fn new(bus: Arc<dyn MessageBus>, metrics: Arc<MetricsCollector>) -> Self {
        Self { bus, metrics }
    }

    pub async fn emit<T: Serialize + Sync>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> AppResult<()> {
        let body = serde_json::to_vec(value)
            .map_err(|e| AppError::Internal(format!("cannot encode {} event: {}", routing_key, e)))?;

        match self.bus.publish(exchange, routing_key, body).await {
            Ok(()) => {
                debug!(exchange, routing_key, "Event emitted");
                self.metrics.record_bus_event(BusEvent::Published).await;
                Ok(())
            }
            Err(e) => {
                error!(exchange, routing_key, error = %e, "Event emission failed");
                self.metrics.record_bus_event(BusEvent::PublishFailed).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Id;
    use crate::infrastructure::bus::InMemoryBus;
    use crate::models::messages::{routing_keys, UserFollowedMessage, USER_EXCHANGE};

    #[tokio::test]
    async fn test_emit_serializes_json() {
        let bus = InMemoryBus::new();
        bus.declare_exchange(USER_EXCHANGE).await.unwrap();
        let metrics = Arc::new(MetricsCollector::new());
        let emitter = EventEmitter::new(Arc::new(bus.clone()), metrics.clone());

        let message = UserFollowedMessage {
            id: Id::from_u128(1),
            followed_id: Id::from_u128(2),
        };
        emitter
            .emit(USER_EXCHANGE, routing_keys::USER_FOLLOWED, &message)
            .await
            .unwrap();

        let published = bus.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, "user.followed");
        let json = published[0].json().unwrap();
        assert_eq!(json["followedId"], Id::from_u128(2).to_string());
        assert_eq!(metrics.snapshot().await.bus.published, 1);
    }

    #[tokio::test]
    async fn test_emit_surfaces_broker_failure() {
        let bus = InMemoryBus::new();
        bus.declare_exchange(USER_EXCHANGE).await.unwrap();
        bus.set_publish_failure(true);
        let metrics = Arc::new(MetricsCollector::new());
        let emitter = EventEmitter::new(Arc::new(bus), metrics.clone());

        let err = emitter
            .emit(USER_EXCHANGE, routing_keys::USER_BLOCKED, &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(metrics.snapshot().await.bus.publish_failures, 1);
    }
}
