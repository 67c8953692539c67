fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use edgelink_discovery::DiscoveryError;
    use edgelink_discovery::client::parse_topology;
    use edgelink_protocol::{DiscoverResponse, DiscoveryTopology, HelloMessage};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  Rust:    {reserialized}"
        );
    }

    #[test]
    fn fixture_discover_response() {
        roundtrip_test::<DiscoverResponse>("discover_response.json");
    }

    #[test]
    fn fixture_hello_message() {
        roundtrip_test::<HelloMessage>("hello_message.json");
    }

    #[test]
    fn discover_response_converts_in_order() {
        let topology = parse_topology(read_fixture("discover_response.json").as_bytes()).unwrap();

        assert_eq!(topology.groups.len(), 1);
        assert_eq!(topology.core_count(), 2);
        assert_eq!(topology.endpoint_count(), 3);

        let core = &topology.groups[0].cores[0];
        assert_eq!(core.thing_name(), "factory-core-1");
        let addrs: Vec<String> = core.endpoints.iter().map(|e| e.address()).collect();
        assert_eq!(addrs, vec!["192.168.1.20:8883", "10.0.0.4:443"]);
        assert_eq!(core.endpoints[1].metadata, "lan-fallback");

        assert!(topology.contains_core("factory-core-2"));
        let anchor = topology.groups[0].trust_anchor().unwrap();
        assert!(anchor.starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn discover_response_rejects_zero_port() {
        let err = parse_topology(read_fixture("discover_response_bad_port.json").as_bytes())
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidResponse(_)));
    }

    #[test]
    fn topology_roundtrips_through_serde() {
        let topology = parse_topology(read_fixture("discover_response.json").as_bytes()).unwrap();
        let json = serde_json::to_string(&topology).unwrap();
        let back: DiscoveryTopology = serde_json::from_str(&json).unwrap();
        assert_eq!(back, topology);
    }
}
