//! # Correlated Exchange
//!
//! Request/reply over topic-addressed pub/sub. One exchange:
//!
//! 1. opens a dedicated connection with a fresh client id
//! 2. subscribes to `<topic>/accepted` and `<topic>/rejected`
//! 3. waits (bounded, best-effort) for both subscription acknowledgements
//! 4. publishes the request
//! 5. waits for the first of: accepted reply, rejected reply, connection
//!    loss, deadline
//! 6. disconnects, whatever the outcome
//!
//! The reply slot and the acknowledgement counter live in an
//! [`ExchangeSlot`] owned by this exchange alone; the transport's delivery
//! context only ever sees that slot through [`DeliveryHandler`].

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared::config::ExchangeConfig;
use shared::constants::{accepted_topic, rejected_topic};
use shared::error::{ProvisioningError, ProvisioningResult};
use shared::types::RejectedReply;

use crate::transport::{DeliveryHandler, PubSubConnection, PubSubTransport};

/// Subscriptions per exchange (accepted + rejected)
const SUBSCRIPTIONS_PER_EXCHANGE: u32 = 2;

/// First event that completes an exchange
#[derive(Debug)]
enum Outcome {
    Accepted(Vec<u8>),
    Rejected(Vec<u8>),
    ConnectionLost(String),
    SubscribeRefused,
}

/// Per-exchange completion state, shared with the delivery context
struct ExchangeSlot {
    accepted_topic: String,
    rejected_topic: String,
    /// Single-fire: taken by the first completing event
    reply: Mutex<Option<oneshot::Sender<Outcome>>>,
    /// One permit per acknowledged subscription
    acks: Semaphore,
}

impl ExchangeSlot {
    fn new(request_topic: &str) -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Self {
            accepted_topic: accepted_topic(request_topic),
            rejected_topic: rejected_topic(request_topic),
            reply: Mutex::new(Some(tx)),
            acks: Semaphore::new(0),
        });
        (slot, rx)
    }

    fn complete(&self, outcome: Outcome) {
        if let Some(tx) = self.reply.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    fn is_complete(&self) -> bool {
        self.reply.lock().is_none()
    }
}

impl DeliveryHandler for ExchangeSlot {
    fn on_subscribed(&self) {
        self.acks.add_permits(1);
    }

    fn on_subscribe_refused(&self) {
        // Still an answer to the subscribe; the ack wait must not stall on it
        self.acks.add_permits(1);
        self.complete(Outcome::SubscribeRefused);
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        if topic == self.accepted_topic {
            self.complete(Outcome::Accepted(payload.to_vec()));
        } else if topic == self.rejected_topic {
            self.complete(Outcome::Rejected(payload.to_vec()));
        } else {
            debug!(topic = %topic, "Ignoring message on unrelated topic");
        }
    }

    fn on_connection_lost(&self, reason: &str) {
        self.complete(Outcome::ConnectionLost(reason.to_string()));
    }
}

/// Request/reply primitive over a pub/sub transport
pub struct CorrelatedExchange {
    transport: Arc<dyn PubSubTransport>,
    config: ExchangeConfig,
    client_id_prefix: String,
}

impl CorrelatedExchange {
    /// Client ids are `<client_id_prefix>-<uuid>`, unique per exchange
    pub fn new(
        transport: Arc<dyn PubSubTransport>,
        config: ExchangeConfig,
        client_id_prefix: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            config,
            client_id_prefix: client_id_prefix.into(),
        }
    }

    /// Publish `request` on `topic` and decode the accepted reply
    ///
    /// `operation` names the call in errors and logs.
    pub async fn request<Req, Resp>(
        &self,
        operation: &str,
        topic: &str,
        request: &Req,
    ) -> ProvisioningResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let (slot, reply) = ExchangeSlot::new(topic);
        let client_id = format!("{}-{}", self.client_id_prefix, Uuid::new_v4());

        debug!(operation = %operation, client_id = %client_id, "Opening exchange connection");
        let connection = self
            .transport
            .connect(&client_id, slot.clone() as Arc<dyn DeliveryHandler>)
            .await?;

        let result = self
            .converse(connection.as_ref(), &slot, reply, operation, topic, payload)
            .await;

        if let Err(e) = connection.disconnect().await {
            debug!(operation = %operation, error = %e, "Disconnect failed");
        }

        match result? {
            Outcome::Accepted(body) => {
                info!(operation = %operation, "Request accepted");
                serde_json::from_slice(&body).map_err(|e| {
                    ProvisioningError::Serialization(format!(
                        "{} accepted reply: {}",
                        operation, e
                    ))
                })
            }
            Outcome::Rejected(body) => {
                let reason = RejectedReply::reason_from_payload(&body);
                warn!(operation = %operation, reason = %reason, "Request rejected");
                Err(ProvisioningError::Rejected {
                    operation: operation.to_string(),
                    reason,
                })
            }
            Outcome::ConnectionLost(reason) => {
                warn!(operation = %operation, reason = %reason, "Connection lost mid-exchange");
                Err(ProvisioningError::Transport {
                    endpoint: self.transport.endpoint().to_string(),
                    reason,
                })
            }
            Outcome::SubscribeRefused => {
                warn!(operation = %operation, "Broker refused a reply topic subscription");
                Err(ProvisioningError::Transport {
                    endpoint: self.transport.endpoint().to_string(),
                    reason: format!("subscription to {} replies refused", operation),
                })
            }
        }
    }

    async fn converse(
        &self,
        connection: &dyn PubSubConnection,
        slot: &ExchangeSlot,
        reply: oneshot::Receiver<Outcome>,
        operation: &str,
        topic: &str,
        payload: Vec<u8>,
    ) -> ProvisioningResult<Outcome> {
        connection.subscribe(&slot.accepted_topic).await?;
        connection.subscribe(&slot.rejected_topic).await?;

        match tokio::time::timeout(
            self.config.subscribe_ack_timeout(),
            slot.acks.acquire_many(SUBSCRIPTIONS_PER_EXCHANGE),
        )
        .await
        {
            Ok(Ok(permits)) => permits.forget(),
            _ => debug!(
                operation = %operation,
                "Subscription acknowledgements incomplete, publishing anyway"
            ),
        }

        // A refused subscription or lost connection already decided the outcome
        if slot.is_complete() {
            debug!(operation = %operation, "Exchange finished before publishing");
        } else {
            connection.publish(topic, payload).await?;
            debug!(operation = %operation, topic = %topic, "Request published");
        }

        match tokio::time::timeout(self.config.reply_timeout(), reply).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(ProvisioningError::Transport {
                endpoint: self.transport.endpoint().to_string(),
                reason: "exchange closed without a reply".into(),
            }),
            Err(_) => {
                warn!(
                    operation = %operation,
                    timeout_secs = self.config.reply_timeout_secs,
                    "No reply before deadline"
                );
                Err(ProvisioningError::Timeout {
                    operation: operation.to_string(),
                    timeout_secs: self.config.reply_timeout_secs,
                })
            }
        }
    }
}
