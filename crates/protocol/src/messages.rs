use serde::{Deserialize, Serialize};

/// Payload exchanged on the health-check topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub message: String,
}

impl HelloMessage {
    pub fn hello() -> Self {
        Self {
            message: "Hello".into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
