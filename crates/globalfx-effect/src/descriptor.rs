// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Effect descriptor: the registration file the platform reads to learn which
//! effect implementations exist.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

use crate::PlatformError;

/// Descriptor shipped with the application, deployed by the privilege broker.
pub const BUNDLED_DESCRIPTOR: &str = include_str!("../assets/effects.toml");

/// D-Bus system bus policy allowing the privileged worker to own its name.
pub const BUNDLED_BUS_POLICY: &str = include_str!("../assets/org.globalfx.Worker.conf");

/// One registered effect implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    /// Display name.
    pub name: String,
    /// Implementation id.
    pub id: Uuid,
    /// Effect type id.
    pub type_id: Uuid,
    /// Shared library implementing the DSP.
    pub library: String,
    /// Parameter names, indexed by wire id.
    #[serde(default)]
    pub parameters: Vec<String>,
}

/// Parsed descriptor file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    /// Registered effects.
    #[serde(default)]
    pub effects: Vec<DescriptorEntry>,
}

impl EffectDescriptor {
    /// Parse a descriptor from TOML.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// The descriptor bundled with this build.
    pub fn bundled() -> Result<Self, toml::de::Error> {
        Self::from_toml(BUNDLED_DESCRIPTOR)
    }

    /// Load a deployed descriptor.
    pub fn load(path: &Path) -> Result<Self, PlatformError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlatformError::Unavailable(format!("no descriptor at {}", path.display()))
            } else {
                PlatformError::Io(e)
            }
        })?;
        Self::from_toml(&content).map_err(|e| PlatformError::Corrupt(e.to_string()))
    }

    /// Look up an effect by implementation id.
    pub fn find(&self, id: Uuid) -> Option<&DescriptorEntry> {
        self.effects.iter().find(|e| e.id == id)
    }
}
