// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Effect parameters and the published status view.

use globalfx_effect::{clamp_unit, ParamId};
use serde::{Deserialize, Serialize};

/// The three continuous effect parameters, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectParameters {
    pub intensity: f32,
    pub spatial_width: f32,
    pub distance: f32,
}

impl Default for EffectParameters {
    fn default() -> Self {
        Self {
            intensity: 0.5,
            spatial_width: 1.0,
            distance: 1.0,
        }
    }
}

impl EffectParameters {
    pub fn get(&self, param: ParamId) -> f32 {
        match param {
            ParamId::Intensity => self.intensity,
            ParamId::SpatialWidth => self.spatial_width,
            ParamId::Distance => self.distance,
        }
    }

    /// Clamp and store a value. Returns the stored value.
    pub fn set(&mut self, param: ParamId, value: f32) -> f32 {
        let value = clamp_unit(value);
        match param {
            ParamId::Intensity => self.intensity = value,
            ParamId::SpatialWidth => self.spatial_width = value,
            ParamId::Distance => self.distance = value,
        }
        value
    }

    /// Copy with every value forced into range (for values read from disk).
    pub fn clamped(self) -> Self {
        Self {
            intensity: clamp_unit(self.intensity),
            spatial_width: clamp_unit(self.spatial_width),
            distance: clamp_unit(self.distance),
        }
    }

    /// Parameters in replay order.
    pub fn ordered(&self) -> [(ParamId, f32); 3] {
        ParamId::ALL.map(|param| (param, self.get(param)))
    }
}

/// Which path currently holds the running effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Through the privileged worker process.
    Privileged,
    /// Created in-process without elevation.
    Direct,
}

/// Consolidated read-only view of the subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// True only while an active path holds an enabled effect.
    pub enabled: bool,
    pub privilege_ready: bool,
    pub privilege_message: String,
    pub intensity: f32,
    pub spatial_width: f32,
    pub distance: f32,
    pub active_path: Option<PathKind>,
    /// An activation is waiting for the privileged worker to connect.
    pub activation_pending: bool,
}

impl StatusSnapshot {
    /// One-line text for a persistent notification or tray tooltip.
    pub fn notification_text(&self) -> String {
        if !self.privilege_ready && self.active_path.is_none() {
            return format!("Global effect unavailable: {}", self.privilege_message);
        }
        match (self.enabled, self.active_path) {
            (true, Some(PathKind::Privileged)) => "Global effect is active (privileged)".to_string(),
            (true, Some(PathKind::Direct)) => "Global effect is active (direct)".to_string(),
            _ if self.activation_pending => "Global effect is starting...".to_string(),
            _ => "Global effect is inactive".to_string(),
        }
    }

    pub fn parameters(&self) -> EffectParameters {
        EffectParameters {
            intensity: self.intensity,
            spatial_width: self.spatial_width,
            distance: self.distance,
        }
    }
}
