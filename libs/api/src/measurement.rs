use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ConnectorError;

/// Normalized sensor reading flowing through the whole pipeline.
///
/// Immutable once built. `channel_id` is never empty, which is checked by
/// [`Measurement::new`] and on deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMeasurement")]
pub struct Measurement {
    channel_id: String,
    timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    value: Decimal,
}

impl Measurement {
    pub fn new(
        channel_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: Decimal,
    ) -> Result<Self, ConnectorError> {
        let channel_id = channel_id.into();
        if channel_id.is_empty() {
            return Err(ConnectorError::format_err("measurement channel id must not be empty"));
        }
        Ok(Self { channel_id, timestamp, value })
    }

    /// Uppercase, dash-joined channel path, e.g. `LIVINGROOM-TEMP`.
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Value after unit scaling.
    pub fn value(&self) -> Decimal {
        self.value
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}={}", self.channel_id, self.timestamp.to_rfc3339(), self.value)
    }
}

/// Unchecked wire shape; converted into [`Measurement`] through `try_from`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMeasurement {
    channel_id: String,
    timestamp: DateTime<Utc>,
    #[serde(with = "rust_decimal::serde::str")]
    value: Decimal,
}

impl TryFrom<RawMeasurement> for Measurement {
    type Error = ConnectorError;

    fn try_from(raw: RawMeasurement) -> Result<Self, Self::Error> {
        Measurement::new(raw.channel_id, raw.timestamp, raw.value)
    }
}
