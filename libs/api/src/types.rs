use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// What a bounded subscription channel does when it is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): drop the message and count it.
    Drop,
    /// .send().await: wait for room (back-pressure).
    #[default]
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ════════════════════════════════════════════════════════════════
//  Delivery guarantee
// ════════════════════════════════════════════════════════════════

/// Pub/sub delivery guarantee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    #[default]
    ExactlyOnce,
}

impl Qos {
    pub fn level(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl std::fmt::Display for Qos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Qos::AtMostOnce => f.write_str("at_most_once"),
            Qos::AtLeastOnce => f.write_str("at_least_once"),
            Qos::ExactlyOnce => f.write_str("exactly_once"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Connection state
// ════════════════════════════════════════════════════════════════

/// Observable link state of a pub/sub client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link dropped, the client is retrying with backoff.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting => f.write_str("reconnecting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_accepts_legacy_spelling() {
        let p: OverflowPolicy = serde_json::from_str("\"backpressure\"").unwrap();
        assert_eq!(p, OverflowPolicy::BackPressure);
        let p: OverflowPolicy = serde_json::from_str("\"drop\"").unwrap();
        assert_eq!(p, OverflowPolicy::Drop);
    }

    #[test]
    fn qos_levels() {
        assert_eq!(Qos::AtMostOnce.level(), 0);
        assert_eq!(Qos::default().level(), 2);
        let q: Qos = serde_json::from_str("\"at_least_once\"").unwrap();
        assert_eq!(q, Qos::AtLeastOnce);
    }
}
