use std::collections::BTreeSet;

use sensorgate_api::util::is_plain_level;

use crate::PipelineError;
use crate::config::TopicsConfig;

/// Build the full topic set: `prefix/device/suffix` for every
/// (suffix, device) pair.
///
/// Every input must be present. Each prefix, suffix and device id must be a
/// single topic level (trimmed, non-empty, no `/`, `+` or `#`). Empty lists
/// give an empty set.
pub fn build_topic_names(
    prefix: Option<&str>,
    suffixes: Option<&[String]>,
    device_ids: Option<&[String]>,
) -> Result<BTreeSet<String>, PipelineError> {
    let prefix = prefix.ok_or_else(|| missing("prefix"))?;
    let suffixes = suffixes.ok_or_else(|| missing("suffixes"))?;
    let device_ids = device_ids.ok_or_else(|| missing("device_ids"))?;

    let prefix = level("prefix", prefix)?;
    let suffixes: Vec<&str> = suffixes
        .iter()
        .map(|s| level("suffix", s))
        .collect::<Result<_, _>>()?;
    let devices: Vec<&str> = device_ids
        .iter()
        .map(|d| level("device id", d))
        .collect::<Result<_, _>>()?;

    let mut names = BTreeSet::new();
    for suffix in &suffixes {
        for device in &devices {
            names.insert(format!("{prefix}/{device}/{suffix}"));
        }
    }

    for name in &names {
        tracing::info!(topic = %name, "topic name generated");
    }
    Ok(names)
}

/// [`build_topic_names`] over the `[topics]` config section.
pub fn topic_names_from_config(cfg: &TopicsConfig) -> Result<BTreeSet<String>, PipelineError> {
    build_topic_names(
        cfg.prefix.as_deref(),
        cfg.suffixes.as_deref(),
        cfg.device_ids.as_deref(),
    )
}

fn missing(what: &str) -> PipelineError {
    PipelineError::Configuration(format!("topic {what} is not configured"))
}

fn level<'a>(what: &str, raw: &'a str) -> Result<&'a str, PipelineError> {
    let trimmed = raw.trim();
    if is_plain_level(trimmed) {
        Ok(trimmed)
    } else {
        Err(PipelineError::Configuration(format!(
            "{what} '{raw}' must be a single non-empty topic level without '/', '+' or '#'"
        )))
    }
}
