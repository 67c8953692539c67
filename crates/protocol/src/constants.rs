use std::time::Duration;

/// Timeout applied to every hub connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// MQTT keep-alive interval for hub sessions.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Time to wait for a PUBACK or SUBACK before giving up.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the discovery round trip.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Port the regional discovery service listens on.
pub const DISCOVERY_PORT: u16 = 8443;

/// ALPN protocol offered to hubs when the TLS transport can negotiate it.
pub const MQTT_ALPN_PROTOCOL: &str = "x-amzn-mqtt-ca";

/// Capacity of the outbound MQTT request queue per session.
pub const REQUEST_QUEUE_CAPACITY: usize = 64;

/// Returns the regional discovery URL for a device.
pub fn discovery_url(region: &str, device_id: &str) -> String {
    format!(
        "https://greengrass-ats.iot.{region}.amazonaws.com:{DISCOVERY_PORT}/greengrass/discover/thing/{device_id}"
    )
}

/// Default topic the health check publishes on.
pub fn default_request_topic(device_id: &str) -> String {
    format!("edgelink/{device_id}/hello")
}

/// Default topic the health check listens on.
pub fn default_response_topic(device_id: &str) -> String {
    format!("edgelink/{device_id}/hello/response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_url_format() {
        assert_eq!(
            discovery_url("eu-west-1", "sensor-7"),
            "https://greengrass-ats.iot.eu-west-1.amazonaws.com:8443/greengrass/discover/thing/sensor-7"
        );
    }

    #[test]
    fn health_topics_pair_up() {
        let req = default_request_topic("dev");
        let resp = default_response_topic("dev");
        assert!(resp.starts_with(&req));
        assert_ne!(req, resp);
    }

    #[test]
    fn connect_timeout_is_three_seconds() {
        assert_eq!(DEFAULT_CONNECT_TIMEOUT.as_millis(), 3000);
    }
}
