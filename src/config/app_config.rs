// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Application configuration (broker, worker and effect behavior).

use globalfx_effect::control_file::{DEFAULT_CONTROL_DIR, DEFAULT_DESCRIPTOR_PATH};
use globalfx_ipc::BusKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Privilege broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// polkit action checked before privileged work.
    pub polkit_action: String,
    /// Ask for permission as soon as the broker is found without it.
    pub auto_request_permission: bool,
    /// How long to wait for the user to answer a permission prompt.
    pub permission_timeout_secs: u64,
    /// Bound on each availability check (reachability and permission check).
    pub check_timeout_ms: u64,
    /// Install the effect descriptor and bus policy once privilege is ready.
    pub deploy_descriptor: bool,
    /// Grant the invoking user access to the control directory once privilege is ready.
    pub grant_runtime_rights: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            polkit_action: "org.globalfx.manage-global-effect".to_string(),
            auto_request_permission: true,
            permission_timeout_secs: 120,
            check_timeout_ms: 3000,
            deploy_descriptor: true,
            grant_runtime_rights: true,
        }
    }
}

impl BrokerConfig {
    pub fn permission_timeout(&self) -> Duration {
        Duration::from_secs(self.permission_timeout_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

/// Privileged worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bus the worker is served on.
    pub bus: BusKind,
    /// Explicit worker binary. Searched for when unset.
    pub binary: Option<PathBuf>,
    /// Directory holding the global effect slot.
    pub control_dir: PathBuf,
    /// Deployed effect descriptor.
    pub descriptor_path: PathBuf,
    /// Upper bound for one launch-and-connect attempt.
    pub bind_timeout_secs: u64,
    pub bind_attempts: u32,
    pub retry_delay_ms: u64,
    /// Upper bound for a single worker method call.
    pub call_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::System,
            binary: None,
            control_dir: PathBuf::from(DEFAULT_CONTROL_DIR),
            descriptor_path: PathBuf::from(DEFAULT_DESCRIPTOR_PATH),
            bind_timeout_secs: 10,
            bind_attempts: 3,
            retry_delay_ms: 1000,
            call_timeout_ms: 2000,
        }
    }
}

impl WorkerConfig {
    pub fn bind_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// What happens to the user's intent when the active path is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Loss turns the effect off; the user has to toggle it on again.
    #[default]
    Manual,
    /// Loss keeps the intent; the next privilege-ready event rebinds and reactivates.
    RestoreOnReady,
}

/// Effect behavior settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectConfig {
    pub reconnect: ReconnectPolicy,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub effect: EffectConfig,
}

impl AppConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
