//! In-process broker emulating the fleet provisioning service
//!
//! Replies are computed against a [`MemoryRegistry`]. By default they are
//! delivered synchronously from inside `publish`, i.e. before the publisher
//! starts waiting; [`Behavior::Delayed`] delivers from a spawned task while
//! the publisher is blocked. Registration runs the pre-provisioning guard
//! first, as the managed service does.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use registry_service::{MemoryRegistry, PreProvisioningGuard};
use shared::constants::*;
use shared::error::{ProvisioningError, ProvisioningResult};
use shared::types::*;

use super::{DeliveryHandler, PubSubConnection, PubSubTransport};

pub const LOOPBACK_ENDPOINT: &str = "loopback.iot.local";

/// How the broker answers a request topic
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Emulate the provisioning service
    Serve,
    /// Never answer
    Silent,
    /// Answer on the rejected topic with this error message
    Reject(String),
    /// Answer on the accepted topic with this body
    Reply(String),
    /// Answer on the accepted topic with a body that is not JSON
    Garbage,
    /// Report the connection as lost
    DropConnection(String),
    /// Compute the inner answer now, deliver it from another task later
    Delayed(Duration, Box<Behavior>),
}

/// What a connection receives in answer to one publish
enum Delivery {
    Message(String, Vec<u8>),
    ConnectionLost(String),
    Nothing,
}

#[derive(Default)]
struct BrokerState {
    registry: Arc<MemoryRegistry>,
    template_name: String,
    behaviors: Mutex<HashMap<String, Behavior>>,
    canonical_name: Mutex<Option<String>>,
    ack_subscriptions: Mutex<bool>,
    refuse_subscriptions: Mutex<bool>,
    refuse_connections: Mutex<Option<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    undelivered: AtomicUsize,
}

/// Shared handle to the emulated broker
#[derive(Clone)]
pub struct LoopbackBroker {
    state: Arc<BrokerState>,
}

impl LoopbackBroker {
    pub fn new(registry: Arc<MemoryRegistry>, template_name: &str) -> Self {
        Self {
            state: Arc::new(BrokerState {
                registry,
                template_name: template_name.to_string(),
                ack_subscriptions: Mutex::new(true),
                ..Default::default()
            }),
        }
    }

    /// Override the answer for one request topic
    pub fn set_behavior(&self, request_topic: &str, behavior: Behavior) {
        self.state
            .behaviors
            .lock()
            .insert(request_topic.to_string(), behavior);
    }

    /// Register things under this name instead of the requested one
    pub fn set_canonical_name(&self, name: &str) {
        *self.state.canonical_name.lock() = Some(name.to_string());
    }

    pub fn set_ack_subscriptions(&self, ack: bool) {
        *self.state.ack_subscriptions.lock() = ack;
    }

    /// Answer every SUBSCRIBE with a failure code
    pub fn refuse_subscriptions(&self) {
        *self.state.refuse_subscriptions.lock() = true;
    }

    pub fn refuse_connections(&self, reason: &str) {
        *self.state.refuse_connections.lock() = Some(reason.to_string());
    }

    /// Every `(topic, payload)` published so far
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.published.lock().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.state.published.lock().len()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// Replies dropped because nobody was subscribed any more
    pub fn undelivered_count(&self) -> usize {
        self.state.undelivered.load(Ordering::SeqCst)
    }
}

fn rejected_body(status_code: u16, error_code: &str, message: &str) -> Vec<u8> {
    serde_json::to_vec(&RejectedReply {
        status_code: Some(status_code),
        error_code: Some(error_code.to_string()),
        error_message: Some(message.to_string()),
    })
    .unwrap_or_default()
}

impl BrokerState {
    /// Reply topic and body for a served request, `None` when unanswered
    async fn serve(&self, topic: &str, payload: &[u8]) -> Option<(String, Vec<u8>)> {
        if topic == CREATE_CERTIFICATE_TOPIC {
            let request: CreateCertificateRequest = match serde_json::from_slice(payload) {
                Ok(request) => request,
                Err(_) => {
                    return Some((rejected_topic(topic), rejected_body(400, "InvalidPayload", "Malformed request")))
                }
            };
            if !request
                .certificate_signing_request
                .starts_with("-----BEGIN CERTIFICATE REQUEST-----")
            {
                return Some((rejected_topic(topic), rejected_body(400, "InvalidCsr", "Invalid CSR")));
            }
            let (record, token) = self.registry.issue_certificate();
            let response = CreateCertificateResponse {
                certificate_id: record.id.clone(),
                certificate_pem: format!(
                    "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
                    record.id
                ),
                certificate_ownership_token: token,
            };
            return Some((accepted_topic(topic), serde_json::to_vec(&response).unwrap_or_default()));
        }

        if topic == provision_topic(&self.template_name) {
            let request: RegisterThingRequest = match serde_json::from_slice(payload) {
                Ok(request) => request,
                Err(_) => {
                    return Some((rejected_topic(topic), rejected_body(400, "InvalidPayload", "Malformed request")))
                }
            };
            let certificate = match self
                .registry
                .redeem_ownership_token(&request.certificate_ownership_token)
            {
                Ok(certificate) => certificate,
                Err(_) => {
                    return Some((
                        rejected_topic(topic),
                        rejected_body(400, "InvalidCertificateOwnershipToken", "Invalid ownership token"),
                    ))
                }
            };

            let thing_name = self
                .canonical_name
                .lock()
                .clone()
                .unwrap_or_else(|| request.parameters.thing_name.clone());

            let mut parameters = std::collections::BTreeMap::new();
            parameters.insert(PARAM_THING_NAME.to_string(), thing_name.clone());
            parameters.insert(PARAM_SERIAL_NUMBER.to_string(), request.parameters.serial_number.clone());
            parameters.insert(PARAM_MAC_ADDRESS.to_string(), request.parameters.mac_address.clone());
            let hook = PreProvisioningHookRequest {
                certificate_id: Some(certificate.id.clone()),
                parameters,
                ..Default::default()
            };
            let decision = PreProvisioningGuard::new(self.registry.clone())
                .handle(&hook)
                .await;
            if !decision.allow {
                return Some((
                    rejected_topic(topic),
                    rejected_body(403, "PreProvisioningHookDenied", "Pre-provisioning hook denied the request"),
                ));
            }

            let registered = self
                .registry
                .create_thing(&thing_name, Some(THING_TYPE))
                .and_then(|_| self.registry.attach_thing_principal(&thing_name, &certificate.arn))
                .and_then(|_| self.registry.attach_policy(POLICY_NAME, &certificate.arn));
            if let Err(e) = registered {
                return Some((rejected_topic(topic), rejected_body(409, "ConflictException", &e.to_string())));
            }

            let response = RegisterThingResponse {
                thing_name,
                device_configuration: Default::default(),
            };
            return Some((accepted_topic(topic), serde_json::to_vec(&response).unwrap_or_default()));
        }

        None
    }
}

impl BrokerState {
    /// Answer for one publish under `behavior`; nested delays are not supported
    async fn resolve(&self, topic: &str, payload: &[u8], behavior: Behavior) -> Delivery {
        match behavior {
            Behavior::Serve => match self.serve(topic, payload).await {
                Some((reply_topic, body)) => Delivery::Message(reply_topic, body),
                None => Delivery::Nothing,
            },
            Behavior::Silent | Behavior::Delayed(..) => Delivery::Nothing,
            Behavior::Reject(message) => Delivery::Message(
                rejected_topic(topic),
                rejected_body(400, "Rejected", &message),
            ),
            Behavior::Reply(body) => Delivery::Message(accepted_topic(topic), body.into_bytes()),
            Behavior::Garbage => {
                Delivery::Message(accepted_topic(topic), b"<html>502</html>".to_vec())
            }
            Behavior::DropConnection(reason) => Delivery::ConnectionLost(reason),
        }
    }
}

#[async_trait]
impl PubSubTransport for LoopbackBroker {
    fn endpoint(&self) -> &str {
        LOOPBACK_ENDPOINT
    }

    async fn connect(
        &self,
        _client_id: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> ProvisioningResult<Box<dyn PubSubConnection>> {
        if let Some(reason) = self.state.refuse_connections.lock().clone() {
            return Err(ProvisioningError::Transport {
                endpoint: LOOPBACK_ENDPOINT.into(),
                reason,
            });
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LoopbackConnection {
            state: self.state.clone(),
            session: Session {
                state: self.state.clone(),
                handler,
                subscriptions: Arc::new(Mutex::new(HashSet::new())),
            },
        }))
    }
}

/// Delivery side of one connection, shareable with delayed-reply tasks
#[derive(Clone)]
struct Session {
    state: Arc<BrokerState>,
    handler: Arc<dyn DeliveryHandler>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

impl Session {
    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Message(topic, body) => {
                let subscribed = self.subscriptions.lock().contains(&topic);
                if subscribed {
                    self.handler.on_message(&topic, &body);
                } else {
                    self.state.undelivered.fetch_add(1, Ordering::SeqCst);
                }
            }
            Delivery::ConnectionLost(reason) => self.handler.on_connection_lost(&reason),
            Delivery::Nothing => {}
        }
    }
}

struct LoopbackConnection {
    state: Arc<BrokerState>,
    session: Session,
}

#[async_trait]
impl PubSubConnection for LoopbackConnection {
    async fn subscribe(&self, topic: &str) -> ProvisioningResult<()> {
        if *self.state.refuse_subscriptions.lock() {
            self.session.handler.on_subscribe_refused();
            return Ok(());
        }
        self.session.subscriptions.lock().insert(topic.to_string());
        if *self.state.ack_subscriptions.lock() {
            self.session.handler.on_subscribed();
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> ProvisioningResult<()> {
        self.state
            .published
            .lock()
            .push((topic.to_string(), payload.clone()));

        let behavior = self
            .state
            .behaviors
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or(Behavior::Serve);

        match behavior {
            Behavior::Delayed(delay, inner) => {
                let delivery = self.state.resolve(topic, &payload, *inner).await;
                let session = self.session.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    session.deliver(delivery);
                });
            }
            behavior => {
                let delivery = self.state.resolve(topic, &payload, behavior).await;
                self.session.deliver(delivery);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> ProvisioningResult<()> {
        self.session.subscriptions.lock().clear();
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
