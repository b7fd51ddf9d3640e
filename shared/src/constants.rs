//! # Constants for Edge Fleet Provisioning
//!
//! Topic names, on-device paths, naming rules and deadlines shared by the
//! device client and the registry service.

// =============================================================================
// IDENTITY NAMING
// =============================================================================

/// Prefix prepended to the hardware serial to form the thing name
pub const THING_NAME_PREFIX: &str = "edge-ai-";

/// Thing type managed by this fleet
pub const THING_TYPE: &str = "edge-ai-device";

/// Policy attached to every device certificate by the provisioning template
pub const POLICY_NAME: &str = "edge-ai-device-policy";

/// Placeholder used when no physical MAC address can be found
pub const UNKNOWN_MAC_ADDRESS: &str = "unknown";

// =============================================================================
// FLEET PROVISIONING TOPICS
// =============================================================================

/// Reserved topic for creating a certificate from a signing request
pub const CREATE_CERTIFICATE_TOPIC: &str = "$aws/certificates/create-from-csr/json";

/// Suffix of the reply topic carrying a successful response
pub const ACCEPTED_SUFFIX: &str = "/accepted";

/// Suffix of the reply topic carrying a rejection
pub const REJECTED_SUFFIX: &str = "/rejected";

/// Registration parameter: hardware serial
pub const PARAM_SERIAL_NUMBER: &str = "SerialNumber";

/// Registration parameter: MAC address
pub const PARAM_MAC_ADDRESS: &str = "MacAddress";

/// Registration parameter: requested thing name
pub const PARAM_THING_NAME: &str = "ThingName";

// =============================================================================
// MQTT / EXCHANGE DEADLINES
// =============================================================================

/// TLS MQTT port of the managed broker
pub const MQTT_PORT: u16 = 8883;

/// MQTT keep-alive interval (seconds)
pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;

/// Capacity of the MQTT request queue
pub const MQTT_CHANNEL_CAPACITY: usize = 10;

/// Time allowed for the DISCONNECT packet to go out before the event loop is dropped (milliseconds)
pub const MQTT_DISCONNECT_TIMEOUT_MS: u64 = 1_000;

/// Deadline for the broker to acknowledge the connection (seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Deadline for subscription acknowledgements before publishing (milliseconds)
pub const SUBSCRIBE_ACK_TIMEOUT_MS: u64 = 2_000;

/// Deadline for a reply on the accepted/rejected topics (seconds)
pub const REPLY_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// ON-DEVICE PATHS
// =============================================================================

/// Directory holding the device's own operating credential and config
pub const DEFAULT_IOT_DIR: &str = "/data/config/aws-iot";

/// Directory holding the pre-seeded claim credential
pub const DEFAULT_CLAIM_DIR: &str = "/etc/edge-ai/claim";

/// File name of the claim configuration (endpoint + template)
pub const CLAIM_CONFIG_FILE: &str = "config.json";

/// File name of the claim certificate
pub const CLAIM_CERT_FILE: &str = "claim.crt";

/// File name of the claim private key
pub const CLAIM_KEY_FILE: &str = "claim.key";

/// File name of the persisted provisioning config
pub const PROVISIONING_CONFIG_FILE: &str = "config.json";

/// File name of the device certificate
pub const DEVICE_CERT_FILE: &str = "device.crt";

/// File name of the device private key
pub const DEVICE_KEY_FILE: &str = "private.key";

/// File name of the root CA bundle
pub const ROOT_CA_FILE: &str = "AmazonRootCA1.pem";

/// Public location of the root CA used by the managed broker
pub const AMAZON_ROOT_CA_URL: &str = "https://www.amazontrust.com/repository/AmazonRootCA1.pem";

/// Owner read/write only
pub const SECRET_FILE_MODE: u32 = 0o600;

// =============================================================================
// HARDWARE PROBE PATHS
// =============================================================================

/// Device-tree serial number (Jetson and most ARM boards)
pub const SERIAL_NUMBER_PATH: &str = "/sys/firmware/devicetree/base/serial-number";

/// Fallback stable identifier when the device tree has no serial
pub const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Network interface class directory
pub const NET_CLASS_PATH: &str = "/sys/class/net";

/// Interface name prefixes that never identify the physical device
pub const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &["lo", "docker", "veth", "br-", "virbr"];

// =============================================================================
// REGISTRY SERVICE
// =============================================================================

/// Default port of the pre-provisioning hook endpoint
pub const REGISTRY_SERVICE_PORT: u16 = 8080;

/// Path of the pre-provisioning hook endpoint
pub const PRE_PROVISION_HOOK_PATH: &str = "/hooks/pre-provision";

/// Environment variable for the registry region
pub const ENV_REGISTRY_REGION: &str = "REGISTRY_REGION";

/// Environment variable for the hook bind host
pub const ENV_REGISTRY_BIND_HOST: &str = "REGISTRY_BIND_HOST";

/// Environment variable for the hook port
pub const ENV_REGISTRY_PORT: &str = "REGISTRY_PORT";

/// Environment variable for the managed thing type
pub const ENV_REGISTRY_THING_TYPE: &str = "REGISTRY_THING_TYPE";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Thing name derived from a hardware serial
pub fn thing_name_for_serial(serial: &str) -> String {
    format!("{}{}", THING_NAME_PREFIX, serial)
}

/// Publish topic of the registration call for a template
pub fn provision_topic(template_name: &str) -> String {
    format!("$aws/provisioning-templates/{}/provision/json", template_name)
}

/// Accepted reply topic for a request topic
pub fn accepted_topic(request_topic: &str) -> String {
    format!("{}{}", request_topic, ACCEPTED_SUFFIX)
}

/// Rejected reply topic for a request topic
pub fn rejected_topic(request_topic: &str) -> String {
    format!("{}{}", request_topic, REJECTED_SUFFIX)
}

/// Certificate id from a certificate ARN (`arn:aws:iot:...:cert/<id>`)
///
/// A bare id is returned unchanged.
pub fn certificate_id_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thing_name_for_serial() {
        assert_eq!(thing_name_for_serial("ABC123"), "edge-ai-ABC123");
    }

    #[test]
    fn test_provision_topics() {
        let topic = provision_topic("edge-fleet");
        assert_eq!(topic, "$aws/provisioning-templates/edge-fleet/provision/json");
        assert_eq!(
            accepted_topic(&topic),
            "$aws/provisioning-templates/edge-fleet/provision/json/accepted"
        );
        assert_eq!(
            rejected_topic(CREATE_CERTIFICATE_TOPIC),
            "$aws/certificates/create-from-csr/json/rejected"
        );
    }

    #[test]
    fn test_certificate_id_from_arn() {
        assert_eq!(
            certificate_id_from_arn("arn:aws:iot:eu-west-1:123456789012:cert/cert-1"),
            "cert-1"
        );
        assert_eq!(certificate_id_from_arn("cert-1"), "cert-1");
    }
}
