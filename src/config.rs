//! Layered configuration: a TOML file read at startup, overridable by a small
//! set of `clap`-derived CLI flags. See SPEC_FULL.md 10.1.

use crate::error::RemailerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub nickname: String,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingConfig {
    pub hostname: Option<String>,
    pub ip: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyringConfig {
    /// Seconds a short-term key remains valid once it goes live.
    #[serde(default = "default_public_key_lifetime")]
    pub public_key_lifetime_secs: u64,
    /// Seconds of grace after `Valid-Until` during which a retiring key still
    /// decrypts arrivals.
    #[serde(default = "default_overlap")]
    pub overlap_secs: u64,
    #[serde(default = "default_prepublication_interval")]
    pub prepublication_interval_secs: u64,
    #[serde(default = "default_publication_latency")]
    pub publication_latency_secs: u64,
    /// Directory server upload endpoint. `None` disables publication
    /// entirely (keys are still generated and rotated locally).
    #[serde(default)]
    pub directory_url: Option<String>,
}

fn default_public_key_lifetime() -> u64 { 7 * 24 * 3600 }
fn default_overlap() -> u64 { 24 * 3600 }
fn default_prepublication_interval() -> u64 { 14 * 24 * 3600 }
fn default_publication_latency() -> u64 { 3 * 24 * 3600 }

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            public_key_lifetime_secs: default_public_key_lifetime(),
            overlap_secs: default_overlap(),
            prepublication_interval_secs: default_prepublication_interval(),
            publication_latency_secs: default_publication_latency(),
            directory_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MixAlgorithm {
    Timed,
    Cottrell,
    BinomialCottrell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixConfig {
    #[serde(default = "default_mix_algorithm")]
    pub algorithm: MixAlgorithm,
    #[serde(default = "default_min_pool")]
    pub min_pool: usize,
    #[serde(default = "default_send_rate")]
    pub send_rate: f64,
    #[serde(default = "default_mix_interval")]
    pub mix_interval_secs: u64,
}

fn default_mix_algorithm() -> MixAlgorithm { MixAlgorithm::Cottrell }
fn default_min_pool() -> usize { 5 }
fn default_send_rate() -> f64 { 0.6 }
fn default_mix_interval() -> u64 { 30 * 60 }

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            algorithm: default_mix_algorithm(),
            min_pool: default_min_pool(),
            send_rate: default_send_rate(),
            mix_interval_secs: default_mix_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub home_dir: PathBuf,
    pub server: ServerConfig,
    pub incoming: Option<IncomingConfig>,
    #[serde(default)]
    pub keyring: KeyringConfig,
    #[serde(default)]
    pub mix: MixConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Retry schedule in seconds for the outgoing queue.
    #[serde(default = "default_retry_schedule")]
    pub retry_schedule_secs: Vec<u64>,
}

fn default_retry_schedule() -> Vec<u64> {
    vec![60, 300, 3600]
}

impl Config {
    pub fn load(path: &Path, home_dir_override: Option<PathBuf>) -> Result<Self, RemailerError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RemailerError::ConfigInvalid(format!("reading {}: {}", path.display(), e)))?;
        let mut cfg: Config = toml::from_str(&text)
            .map_err(|e| RemailerError::ConfigInvalid(format!("parsing {}: {}", path.display(), e)))?;
        if let Some(home) = home_dir_override {
            cfg.home_dir = home;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), RemailerError> {
        if self.server.nickname.is_empty() {
            return Err(RemailerError::ConfigInvalid("server.nickname must not be empty".into()));
        }
        if self.retry_schedule_secs.is_empty() {
            return Err(RemailerError::ConfigInvalid("retry_schedule_secs must not be empty".into()));
        }
        if self.mix.send_rate < 0.0 || self.mix.send_rate > 1.0 {
            return Err(RemailerError::ConfigInvalid("mix.send_rate must be in [0, 1]".into()));
        }
        Ok(())
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.home_dir.join("keys")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.home_dir.join("work")
    }

    pub fn queues_dir(&self) -> PathBuf {
        self.work_dir().join("queues")
    }

    pub fn hashlogs_dir(&self) -> PathBuf {
        self.work_dir().join("hashlogs")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.home_dir.join("lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.home_dir.join("pid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_nickname() {
        let cfg = Config {
            home_dir: PathBuf::from("/tmp/x"),
            server: ServerConfig { nickname: String::new(), contact: None, comments: None },
            incoming: None,
            keyring: KeyringConfig::default(),
            mix: MixConfig::default(),
            delivery: DeliveryConfig::default(),
            retry_schedule_secs: default_retry_schedule(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            home_dir = "/tmp/mixnode"
            [server]
            nickname = "testnode"
        "#;
        let cfg: Config = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.server.nickname, "testnode");
        assert_eq!(cfg.mix.min_pool, 5);
        assert_eq!(cfg.retry_schedule_secs, vec![60, 300, 3600]);
    }
}
