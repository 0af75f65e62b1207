use clap::Args;
use serde::Deserialize;

use sensorgate_api::Qos;
use sensorgate_pipeline::config::TopicsConfig;
use sensorgate_transport_mqtt::MqttConfig;

use super::error::GenError;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

/// Same `[mqtt]` and `[topics]` tables the server reads, so one file can
/// drive both.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct GeneratorConfig {
    pub interval_ms: Option<u64>,
    pub iterations: Option<u64>,
    pub seed: Option<i64>,
    pub qos: Option<Qos>,
}

pub fn load_config(path: &str) -> Result<Config, GenError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| GenError::Config(format!("cannot read config {path}: {e}")))?;
    parse_config(&content).map_err(|e| GenError::Config(format!("bad config {path}: {e}")))
}

pub fn parse_config(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct GenArgs {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml", env = "SENSORS_GEN_CONFIG")]
    pub config: String,

    /// Milliseconds between publish rounds
    #[arg(long)]
    pub interval: Option<u64>,

    /// Rounds to publish before exiting (0 = until Ctrl+C)
    #[arg(long)]
    pub iterations: Option<u64>,

    /// PRNG seed (0 = current time)
    #[arg(long)]
    pub seed: Option<i64>,

    /// Broker host, overrides [mqtt].host
    #[arg(long)]
    pub host: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final settings after merging: config.toml < env/CLI.
pub struct Effective {
    pub mqtt: MqttConfig,
    pub topics: TopicsConfig,
    pub interval_ms: u64,
    pub iterations: u64,
    pub seed: i64,
    pub qos: Qos,
}

impl Effective {
    pub fn new(args: &GenArgs) -> Result<Self, GenError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                tracing::warn!(config = %args.config, "config file not found, using defaults");
                Config::default()
            }
        };
        Ok(Self::merge(args, cfg))
    }

    pub fn merge(args: &GenArgs, cfg: Config) -> Self {
        let mut mqtt = cfg.mqtt;
        if let Some(host) = &args.host {
            mqtt.host = host.clone();
        }
        Self {
            mqtt,
            topics: cfg.topics,
            interval_ms: args.interval.or(cfg.generator.interval_ms).unwrap_or(2000).max(1),
            iterations: args.iterations.or(cfg.generator.iterations).unwrap_or(0),
            seed: args.seed.or(cfg.generator.seed).unwrap_or(0),
            qos: cfg.generator.qos.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[mqtt]
host = "broker.local"

[topics]
prefix = "home"
suffixes = ["temp", "hum"]
device_ids = ["kitchen"]

[generator]
interval_ms = 500
seed = 7
qos = "at_least_once"
"#;

    #[test]
    fn cli_overrides_file() {
        let cfg = parse_config(SAMPLE).unwrap();
        let args = GenArgs { interval: Some(100), host: Some("other".into()), ..Default::default() };
        let eff = Effective::merge(&args, cfg);
        assert_eq!(eff.interval_ms, 100);
        assert_eq!(eff.mqtt.host, "other");
        assert_eq!(eff.seed, 7);
        assert_eq!(eff.qos, Qos::AtLeastOnce);
        assert_eq!(eff.topics.prefix.as_deref(), Some("home"));
    }

    #[test]
    fn defaults_without_file() {
        let eff = Effective::merge(&GenArgs::default(), Config::default());
        assert_eq!(eff.interval_ms, 2000);
        assert_eq!(eff.iterations, 0);
        assert_eq!(eff.qos, Qos::ExactlyOnce);
        assert_eq!(eff.mqtt.port, 1883);
    }

    #[test]
    fn unreadable_existing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gen.toml");
        std::fs::write(&path, "[generator\n").unwrap();
        let args = GenArgs { config: path.to_string_lossy().into_owned(), ..Default::default() };
        assert!(matches!(Effective::new(&args), Err(GenError::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let args = GenArgs { config: "/nonexistent/sensors-gen.toml".into(), ..Default::default() };
        assert!(Effective::new(&args).is_ok());
    }
}
