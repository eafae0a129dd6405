//! Bridge configuration: timeouts and transport endpoints.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the page ↔ signer bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long the signer has to acknowledge a two-phase request. Short on
    /// purpose: a missing ack means nobody is listening.
    #[serde(with = "duration_ms_serde")]
    pub ack_timeout: Duration,

    /// How long to wait for the final outcome of a request. Covers user
    /// interaction and on-chain confirmation.
    #[serde(with = "duration_ms_serde")]
    pub outcome_timeout: Duration,

    /// WebSocket URL of the signer host, used by page-side clients.
    pub signer_url: String,

    /// Address the signer host listens on.
    #[serde(with = "socket_addr_serde")]
    pub listen_addr: SocketAddr,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            outcome_timeout: Duration::from_secs(10 * 60),
            signer_url: "ws://127.0.0.1:9480".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9480)),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S: Serializer>(addr: &SocketAddr, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(dur.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
