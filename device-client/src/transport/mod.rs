//! # Pub/Sub Transport
//!
//! The correlated exchange needs four things from a broker connection:
//! subscribe, publish, disconnect, and a callback path for what the broker
//! delivers. Deliveries arrive on the transport's own background task and
//! are handed to a [`DeliveryHandler`] owned by the caller, so no state is
//! shared between connections.

pub mod mqtt;

#[cfg(test)]
pub mod loopback;

pub use mqtt::MqttTransport;

use async_trait::async_trait;
use std::sync::Arc;

use shared::error::ProvisioningResult;

/// Receives broker events for one connection
///
/// Called from the transport's delivery context; implementations must not
/// block.
pub trait DeliveryHandler: Send + Sync {
    /// One subscription was acknowledged
    fn on_subscribed(&self);

    /// The broker refused a subscription, so replies on it can never arrive
    fn on_subscribe_refused(&self);

    /// A message arrived on a subscribed topic
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The connection failed after it was established
    fn on_connection_lost(&self, reason: &str);
}

/// Factory of authenticated broker connections
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Broker address, for error reporting
    fn endpoint(&self) -> &str;

    /// Open a connection and wait until the broker accepts it
    async fn connect(
        &self,
        client_id: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> ProvisioningResult<Box<dyn PubSubConnection>>;
}

/// One open broker connection
#[async_trait]
pub trait PubSubConnection: Send + Sync {
    /// Request a subscription; the acknowledgement arrives via the handler
    async fn subscribe(&self, topic: &str) -> ProvisioningResult<()>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ProvisioningResult<()>;

    async fn disconnect(&self) -> ProvisioningResult<()>;
}
