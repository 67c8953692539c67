use std::fmt;

use serde::{Deserialize, Serialize};

/// Acknowledgement contract for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryGuarantee {
    /// Fire and forget; the message may be dropped.
    #[default]
    AtMostOnce,
    /// The broker must acknowledge the message.
    AtLeastOnce,
}

impl DeliveryGuarantee {
    /// Returns true if the caller waits for an acknowledgement.
    pub fn requires_ack(self) -> bool {
        matches!(self, DeliveryGuarantee::AtLeastOnce)
    }
}

impl fmt::Display for DeliveryGuarantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryGuarantee::AtMostOnce => write!(f, "at-most-once"),
            DeliveryGuarantee::AtLeastOnce => write!(f, "at-least-once"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_ack() {
        assert!(DeliveryGuarantee::AtLeastOnce.requires_ack());
        assert!(!DeliveryGuarantee::AtMostOnce.requires_ack());
    }

    #[test]
    fn serde_names() {
        let json = serde_json::to_string(&DeliveryGuarantee::AtLeastOnce).unwrap();
        assert_eq!(json, "\"atLeastOnce\"");
        let parsed: DeliveryGuarantee = serde_json::from_str("\"atMostOnce\"").unwrap();
        assert_eq!(parsed, DeliveryGuarantee::AtMostOnce);
    }

    #[test]
    fn display() {
        assert_eq!(DeliveryGuarantee::AtMostOnce.to_string(), "at-most-once");
        assert_eq!(DeliveryGuarantee::AtLeastOnce.to_string(), "at-least-once");
    }
}
