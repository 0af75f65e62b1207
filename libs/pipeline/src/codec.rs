use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;

use sensorgate_api::Measurement;

use crate::PipelineError;

// ═══════════════════════════════════════════════════════════════
//  Channel kind → unit scaling
// ═══════════════════════════════════════════════════════════════

/// Metric kind named by the trailing topic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Hundredths of a degree.
    Temp,
    /// Thousandths of a unit.
    Hum,
    /// Ten-thousandths of a unit.
    Press,
    Other,
}

impl ChannelKind {
    pub fn from_level(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "temp" => ChannelKind::Temp,
            "hum" => ChannelKind::Hum,
            "press" => ChannelKind::Press,
            _ => ChannelKind::Other,
        }
    }

    /// Raw device value / divisor = value in natural units.
    pub fn divisor(self) -> Decimal {
        match self {
            ChannelKind::Temp => Decimal::from(100),
            ChannelKind::Hum => Decimal::from(1000),
            ChannelKind::Press => Decimal::from(10_000),
            ChannelKind::Other => Decimal::ONE,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Topic → channel
// ═══════════════════════════════════════════════════════════════

fn levels(topic: &str) -> Result<Vec<&str>, PipelineError> {
    let levels: Vec<&str> = topic.split('/').collect();
    if levels.len() < 3 {
        return Err(malformed(topic, "expected at least 3 levels"));
    }
    if levels.iter().any(|l| l.is_empty()) {
        return Err(malformed(topic, "empty level"));
    }
    Ok(levels)
}

fn malformed(topic: &str, reason: &str) -> PipelineError {
    PipelineError::MalformedTopic { topic: topic.to_string(), reason: reason.to_string() }
}

/// Levels after the prefix, upper-cased and dash-joined:
/// `home/livingroom/temp` → `LIVINGROOM-TEMP`.
pub fn channel_id(topic: &str) -> Result<String, PipelineError> {
    let levels = levels(topic)?;
    Ok(levels[1..]
        .iter()
        .map(|l| l.to_uppercase())
        .collect::<Vec<_>>()
        .join("-"))
}

/// Kind of the trailing level: `sensors/kitchen/hum` → `Hum`.
pub fn channel_kind(topic: &str) -> Result<ChannelKind, PipelineError> {
    let levels = levels(topic)?;
    Ok(levels
        .last()
        .map(|l| ChannelKind::from_level(l))
        .unwrap_or(ChannelKind::Other))
}

// ═══════════════════════════════════════════════════════════════
//  Payload decode
// ═══════════════════════════════════════════════════════════════

/// Parse a raw sensor payload into an exact decimal.
///
/// The text must be a finite number; plain and scientific notation are
/// accepted, surrounding whitespace is ignored. Values with more precision
/// than a decimal holds are rounded to 28 fractional digits.
pub fn parse_value(payload: &[u8]) -> Result<Decimal, PipelineError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| PipelineError::Decode(format!("payload is not UTF-8: {e}")))?
        .trim();

    let as_float: f64 = text
        .parse()
        .map_err(|_| PipelineError::Decode(format!("'{text}' is not a number")))?;
    if !as_float.is_finite() {
        return Err(PipelineError::Decode(format!("'{text}' is not finite")));
    }

    Decimal::from_str_exact(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
        .or_else(|| Decimal::from_f64(as_float).map(|d| d.round_dp(28)))
        .ok_or_else(|| PipelineError::Decode(format!("'{text}' is out of decimal range")))
}

/// Decode a raw payload received on `topic`, stamped with the current time.
pub fn decode(topic: &str, payload: &[u8]) -> Result<Measurement, PipelineError> {
    decode_at(topic, payload, Utc::now())
}

/// Same as [`decode`] with an explicit timestamp.
pub fn decode_at(
    topic: &str,
    payload: &[u8],
    timestamp: DateTime<Utc>,
) -> Result<Measurement, PipelineError> {
    let channel = channel_id(topic)?;
    let kind = channel_kind(topic)?;
    let raw = parse_value(payload)?;
    let value = raw
        .checked_div(kind.divisor())
        .ok_or_else(|| PipelineError::Decode(format!("cannot scale {raw}")))?;
    Measurement::new(channel, timestamp, value)
        .map_err(|e| PipelineError::Decode(e.to_string()))
}

// ═══════════════════════════════════════════════════════════════
//  Log record encode / decode
// ═══════════════════════════════════════════════════════════════

/// JSON bytes for the log: `{"channelId", "timestamp", "value"}`.
pub fn encode(m: &Measurement) -> Result<Vec<u8>, PipelineError> {
    serde_json::to_vec(m).map_err(|e| PipelineError::Encode(e.to_string()))
}

/// Inverse of [`encode`].
pub fn decode_record(bytes: &[u8]) -> Result<Measurement, PipelineError> {
    serde_json::from_slice(bytes).map_err(|e| PipelineError::Decode(e.to_string()))
}
