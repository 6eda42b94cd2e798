//! Options of a ring member, resolved once before any component is built.

use std::path::Path;
use std::time::Duration;

use chordring_transport::core::transport::TransportConfig;
use serde::Deserialize;
use serde::Serialize;

use crate::consts::*;
use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChordConfig {
    /// Id to register on the transport. Random when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    /// Ring identifier width. Only [ID_BITS] is supported.
    pub id_bits: usize,
    /// Length of the successor list.
    pub successor_list_size: usize,
    pub stabilize_interval_ms: u64,
    pub fix_fingers_interval_ms: u64,
    pub check_predecessor_interval_ms: u64,
    /// Deadline of every outbound request.
    pub request_timeout_ms: u64,
    pub connect_rate_limit_ms: u64,
    pub connection_open_timeout_ms: u64,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            id_bits: ID_BITS,
            successor_list_size: DEFAULT_SUCCESSOR_LIST_SIZE,
            stabilize_interval_ms: DEFAULT_STABILIZE_INTERVAL_MS,
            fix_fingers_interval_ms: DEFAULT_FIX_FINGERS_INTERVAL_MS,
            check_predecessor_interval_ms: DEFAULT_CHECK_PREDECESSOR_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            connect_rate_limit_ms: DEFAULT_CONNECT_RATE_LIMIT_MS,
            connection_open_timeout_ms: DEFAULT_CONNECTION_OPEN_TIMEOUT_MS,
        }
    }
}

impl ChordConfig {
    pub fn builder() -> ChordConfigBuilder {
        ChordConfigBuilder::default()
    }

    /// Parse YAML, missing fields take defaults. The result is validated.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: ChordConfig = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a YAML config file.
    pub fn load<P>(path: P) -> Result<Self>
    where P: AsRef<Path> {
        tracing::debug!("Read config from: {:?}", path.as_ref());
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id_bits != ID_BITS {
            return Err(Error::InvalidArgument(format!(
                "id_bits must be {ID_BITS}, got {}",
                self.id_bits
            )));
        }
        if self.successor_list_size == 0 {
            return Err(Error::InvalidArgument(
                "successor_list_size must be at least 1".to_string(),
            ));
        }
        if matches!(&self.peer_id, Some(p) if p.is_empty()) {
            return Err(Error::InvalidArgument("peer_id is empty".to_string()));
        }
        for (name, v) in [
            ("stabilize_interval_ms", self.stabilize_interval_ms),
            ("fix_fingers_interval_ms", self.fix_fingers_interval_ms),
            (
                "check_predecessor_interval_ms",
                self.check_predecessor_interval_ms,
            ),
            ("request_timeout_ms", self.request_timeout_ms),
            ("connection_open_timeout_ms", self.connection_open_timeout_ms),
        ] {
            if v == 0 {
                return Err(Error::InvalidArgument(format!("{name} must not be zero")));
            }
        }
        Ok(())
    }

    pub fn stabilize_interval(&self) -> Duration {
        Duration::from_millis(self.stabilize_interval_ms)
    }

    pub fn fix_fingers_interval(&self) -> Duration {
        Duration::from_millis(self.fix_fingers_interval_ms)
    }

    pub fn check_predecessor_interval(&self) -> Duration {
        Duration::from_millis(self.check_predecessor_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl From<&ChordConfig> for TransportConfig {
    fn from(cfg: &ChordConfig) -> Self {
        TransportConfig {
            peer_id: cfg.peer_id.clone(),
            connect_rate_limit: Duration::from_millis(cfg.connect_rate_limit_ms),
            connection_open_timeout: Duration::from_millis(cfg.connection_open_timeout_ms),
        }
    }
}

/// Builder of [ChordConfig]. Unset options take their defaults.
#[derive(Debug, Clone, Default)]
pub struct ChordConfigBuilder {
    config: ChordConfig,
}

impl ChordConfigBuilder {
    pub fn peer_id(mut self, peer_id: &str) -> Self {
        self.config.peer_id = Some(peer_id.to_string());
        self
    }

    pub fn id_bits(mut self, bits: usize) -> Self {
        self.config.id_bits = bits;
        self
    }

    pub fn successor_list_size(mut self, size: usize) -> Self {
        self.config.successor_list_size = size;
        self
    }

    pub fn stabilize_interval_ms(mut self, ms: u64) -> Self {
        self.config.stabilize_interval_ms = ms;
        self
    }

    pub fn fix_fingers_interval_ms(mut self, ms: u64) -> Self {
        self.config.fix_fingers_interval_ms = ms;
        self
    }

    pub fn check_predecessor_interval_ms(mut self, ms: u64) -> Self {
        self.config.check_predecessor_interval_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    pub fn connect_rate_limit_ms(mut self, ms: u64) -> Self {
        self.config.connect_rate_limit_ms = ms;
        self
    }

    pub fn connection_open_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connection_open_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Result<ChordConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
