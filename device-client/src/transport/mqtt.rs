//! MQTT transport over mutual TLS
//!
//! Each connection owns a spawned task that polls the rumqttc event loop
//! and forwards acknowledgements, messages and errors to the connection's
//! handler. `disconnect` lets the task flush the DISCONNECT packet and end
//! on its own; a connection dropped without disconnecting aborts the task.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::config::ExchangeConfig;
use shared::constants::{MQTT_CHANNEL_CAPACITY, MQTT_DISCONNECT_TIMEOUT_MS};
use shared::error::{ProvisioningError, ProvisioningResult};

use super::{DeliveryHandler, PubSubConnection, PubSubTransport};

/// Broker reached with one certificate/key pair
#[derive(Debug, Clone)]
pub struct MqttTransport {
    endpoint: String,
    config: ExchangeConfig,
    ca_path: PathBuf,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl MqttTransport {
    /// Credentials are read from disk on every connect
    pub fn new(
        endpoint: impl Into<String>,
        config: ExchangeConfig,
        ca_path: PathBuf,
        cert_path: PathBuf,
        key_path: PathBuf,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            ca_path,
            cert_path,
            key_path,
        }
    }

    fn transport_error(&self, reason: impl Into<String>) -> ProvisioningError {
        ProvisioningError::Transport {
            endpoint: self.endpoint.clone(),
            reason: reason.into(),
        }
    }

    async fn tls_configuration(&self) -> ProvisioningResult<TlsConfiguration> {
        let read = |path: PathBuf| async move {
            tokio::fs::read(&path).await.map_err(|e| {
                ProvisioningError::StorageIO(format!("{}: {}", path.display(), e))
            })
        };

        Ok(TlsConfiguration::Simple {
            ca: read(self.ca_path.clone()).await?,
            alpn: None,
            client_auth: Some((
                read(self.cert_path.clone()).await?,
                read(self.key_path.clone()).await?,
            )),
        })
    }
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(
        &self,
        client_id: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> ProvisioningResult<Box<dyn PubSubConnection>> {
        let mut options = MqttOptions::new(client_id, self.endpoint.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(true);
        options.set_transport(Transport::Tls(self.tls_configuration().await?));

        let (client, mut eventloop) = AsyncClient::new(options, MQTT_CHANNEL_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel::<Result<(), String>>();

        let task = tokio::spawn(async move {
            let mut connack_tx = Some(connack_tx);
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        let result = if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(format!("connection refused: {:?}", ack.code))
                        };
                        if let Some(tx) = connack_tx.take() {
                            let _ = tx.send(result);
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if is_refused(&ack) {
                            warn!(pkid = ack.pkid, "Broker refused subscription");
                            handler.on_subscribe_refused();
                        } else {
                            handler.on_subscribed();
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handler.on_message(&publish.topic, &publish.payload)
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        match connack_tx.take() {
                            Some(tx) => {
                                let _ = tx.send(Err(e.to_string()));
                            }
                            None => handler.on_connection_lost(&e.to_string()),
                        }
                        break;
                    }
                }
            }
        });

        let accepted = tokio::time::timeout(self.config.connect_timeout(), connack_rx).await;
        let failure = match accepted {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(_)) => Some("event loop ended before the connection was acknowledged".to_string()),
            Err(_) => Some(format!(
                "no connection acknowledgement within {} seconds",
                self.config.connect_timeout_secs
            )),
        };
        if let Some(reason) = failure {
            task.abort();
            warn!(endpoint = %self.endpoint, reason = %reason, "MQTT connect failed");
            return Err(self.transport_error(reason));
        }

        info!(endpoint = %self.endpoint, client_id = %client_id, "MQTT connected");

        Ok(Box::new(MqttConnection {
            client,
            endpoint: self.endpoint.clone(),
            task: Mutex::new(Some(task)),
        }))
    }
}

/// A SUBACK carrying any failure code means at least one topic is unusable
fn is_refused(ack: &SubAck) -> bool {
    ack.return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
}

struct MqttConnection {
    client: AsyncClient,
    endpoint: String,
    /// Event-loop task; taken by `disconnect`
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttConnection {
    fn transport_error(&self, reason: impl ToString) -> ProvisioningError {
        ProvisioningError::Transport {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl PubSubConnection for MqttConnection {
    async fn subscribe(&self, topic: &str) -> ProvisioningResult<()> {
        debug!(topic = %topic, "Subscribing");
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ProvisioningResult<()> {
        debug!(topic = %topic, bytes = payload.len(), "Publishing");
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn disconnect(&self) -> ProvisioningResult<()> {
        let requested = self
            .client
            .disconnect()
            .await
            .map_err(|e| self.transport_error(e));

        // The event loop ends once the DISCONNECT packet is out
        let task = self.task.lock().take();
        if let Some(mut task) = task {
            let grace = Duration::from_millis(MQTT_DISCONNECT_TIMEOUT_MS);
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(endpoint = %self.endpoint, "Event loop did not finish disconnecting, aborting");
                task.abort();
            } else {
                debug!(endpoint = %self.endpoint, "MQTT disconnected");
            }
        }

        requested
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
