//! JSON configuration file.
//!
//! ```json
//! {
//!   "client": { "ip": "10.0.0.1", "mac": "de:ad:be:ef:00:01" },
//!   "load_balancer": { "ip": "10.0.0.10", "mac": "de:ad:be:ef:00:10" },
//!   "capacity": 2,
//!   "backends": [ { "slot": 0, "ip": "10.0.0.2", "mac": "de:ad:be:ef:00:02" } ],
//!   "unknown_source": "return_to_client"
//! }
//! ```

use crate::DaemonError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::path::Path;
use swivel_core::{
    CoreError, DEFAULT_CAPACITY, Endpoint, Engine, EngineConfig, MacAddr, StaticIdentities,
    UnknownSourcePolicy,
};

/// Largest slot count a config may ask for, explicitly or through its
/// highest backend slot.
pub const MAX_CAPACITY: usize = 65536;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendEntry {
    pub slot: usize,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

impl BackendEntry {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.ip, self.mac)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_client")]
    pub client: Endpoint,
    #[serde(default = "default_load_balancer")]
    pub load_balancer: Endpoint,
    /// Number of backend slots. Defaults to the larger of 2 and the highest
    /// configured slot plus one.
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
    #[serde(default)]
    pub unknown_source: UnknownSourcePolicy,
}

fn default_client() -> Endpoint {
    StaticIdentities::default().client
}

fn default_load_balancer() -> Endpoint {
    StaticIdentities::default().load_balancer
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: default_client(),
            load_balancer: default_load_balancer(),
            capacity: None,
            backends: Vec::new(),
            unknown_source: UnknownSourcePolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, DaemonError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), backends = config.backends.len(), "Loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        let mut seen = BTreeSet::new();
        for b in &self.backends {
            if !seen.insert(b.slot) {
                return Err(DaemonError::DuplicateSlot(b.slot));
            }
        }
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return Err(CoreError::ZeroCapacity.into());
            }
            if capacity > MAX_CAPACITY {
                return Err(DaemonError::InvalidConfig(format!(
                    "capacity {} exceeds the limit of {}",
                    capacity, MAX_CAPACITY
                )));
            }
            if let Some(b) = self.backends.iter().find(|b| b.slot >= capacity) {
                return Err(CoreError::SlotOutOfRange {
                    slot: b.slot,
                    capacity,
                }
                .into());
            }
        }
        if let Some(b) = self.backends.iter().find(|b| b.slot >= MAX_CAPACITY) {
            return Err(DaemonError::InvalidConfig(format!(
                "backend slot {} exceeds the limit of {} slots",
                b.slot, MAX_CAPACITY
            )));
        }
        if self.client.ip == self.load_balancer.ip {
            return Err(DaemonError::InvalidConfig(format!(
                "client and load balancer share IP {}",
                self.client.ip
            )));
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity.unwrap_or_else(|| {
            self.backends
                .iter()
                .map(|b| b.slot.saturating_add(1))
                .max()
                .unwrap_or(0)
                .max(DEFAULT_CAPACITY)
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            identities: StaticIdentities {
                client: self.client,
                load_balancer: self.load_balancer,
            },
            capacity: self.capacity(),
            unknown_source: self.unknown_source,
        }
    }

    /// Builds an engine with every configured backend installed.
    pub fn build_engine(&self) -> Result<Engine, DaemonError> {
        self.validate()?;
        let engine = Engine::new(self.engine_config())?;
        self.apply(&engine)?;
        Ok(engine)
    }

    /// Pushes identities and backends into a running engine. Slots missing
    /// from the config are cleared. The slot count and source policy are
    /// fixed for the engine's lifetime.
    pub fn apply(&self, engine: &Engine) -> Result<(), DaemonError> {
        self.validate()?;
        let capacity = engine.directory().capacity().get();
        if self.capacity() != capacity {
            return Err(DaemonError::InvalidConfig(format!(
                "capacity cannot change at runtime ({} -> {})",
                capacity,
                self.capacity()
            )));
        }
        if self.unknown_source != engine.unknown_source_policy() {
            tracing::warn!("unknown_source policy change takes effect after restart");
        }

        let identities = StaticIdentities {
            client: self.client,
            load_balancer: self.load_balancer,
        };
        if engine.identities() != identities {
            engine.set_static_identities(self.client, self.load_balancer);
        }
        for slot in 0..capacity {
            match self.backends.iter().find(|b| b.slot == slot) {
                Some(b) => {
                    if engine.directory().lookup(slot) != Some(b.endpoint()) {
                        engine.set_backend(slot, b.endpoint())?;
                    }
                }
                None => {
                    if engine.directory().lookup(slot).is_some() {
                        engine.clear_backend(slot)?;
                    }
                }
            }
        }
        Ok(())
    }
}
