use edgelink_protocol::constants::discovery_url;

/// Where the discovery client sends its request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub region: String,
    /// Base URL replacing the regional endpoint, e.g. `https://registry.lan:8443`.
    pub endpoint: Option<String>,
}

impl ClientConfig {
    pub fn for_region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
        }
    }

    /// Full discovery URL for a device.
    pub fn url_for(&self, device_id: &str) -> String {
        match &self.endpoint {
            Some(base) => format!(
                "{}/greengrass/discover/thing/{device_id}",
                base.trim_end_matches('/')
            ),
            None => discovery_url(&self.region, device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regional_url() {
        let cfg = ClientConfig::for_region("us-east-1");
        assert_eq!(
            cfg.url_for("dev"),
            "https://greengrass-ats.iot.us-east-1.amazonaws.com:8443/greengrass/discover/thing/dev"
        );
    }

    #[test]
    fn endpoint_override_trims_slash() {
        let cfg = ClientConfig {
            region: "us-east-1".into(),
            endpoint: Some("http://127.0.0.1:9000/".into()),
        };
        assert_eq!(
            cfg.url_for("dev"),
            "http://127.0.0.1:9000/greengrass/discover/thing/dev"
        );
    }
}
