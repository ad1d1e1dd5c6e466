// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Owner of the single global effect handle.

use globalfx_effect::{
    apply_parameter, AudioSession, EffectHandle, EffectPlatform, ParamId, ParameterOutcome,
    EFFECT_ID, EFFECT_TYPE_NULL, GLOBAL_PRIORITY, SUCCESS,
};
use tracing::{debug, error, info, warn};

/// Holds zero or one live effect handle and performs the effect lifecycle.
///
/// Every operation tolerates a missing handle, so a fresh worker can always
/// be driven from scratch.
pub struct EffectHost {
    platform: Box<dyn EffectPlatform>,
    handle: Option<Box<dyn EffectHandle>>,
}

impl EffectHost {
    pub fn new(platform: Box<dyn EffectPlatform>) -> Self {
        Self {
            platform,
            handle: None,
        }
    }

    /// Create the global effect, replacing any existing handle.
    ///
    /// Returns whether a handle exists afterwards.
    pub fn create(&mut self) -> bool {
        if self.handle.is_some() {
            warn!("Effect already exists, releasing first");
            self.release();
        }

        info!("Creating global effect (session {})", AudioSession::Global.id());
        match self.platform.create_global(
            EFFECT_TYPE_NULL,
            EFFECT_ID,
            GLOBAL_PRIORITY,
            AudioSession::Global,
        ) {
            Ok(handle) => {
                if !handle.has_control() {
                    warn!("Global effect created without control of the slot");
                }
                self.handle = Some(handle);
                info!("Global effect created");
                true
            }
            Err(e) => {
                error!("Failed to create global effect: {}", e);
                false
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        let Some(handle) = self.handle.as_mut() else {
            debug!("set_enabled({}) without an effect, ignoring", enabled);
            return;
        };
        let status = handle.set_enabled(enabled);
        if status == SUCCESS {
            info!("Effect enabled state set to {}", enabled);
        } else {
            warn!("Failed to set effect enabled state to {}: status {}", enabled, status);
        }
    }

    /// Forward a parameter write. Rejections are logged by the platform layer.
    pub fn set_parameter(&mut self, param_id: i32, value: f32) -> Option<ParameterOutcome> {
        let Some(param) = ParamId::from_raw(param_id) else {
            warn!("Ignoring unknown parameter id {}", param_id);
            return None;
        };
        let handle = self.handle.as_mut()?;
        Some(apply_parameter(handle.as_mut(), param, value))
    }

    /// Disable and destroy the effect. Safe without a handle.
    pub fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if handle.enabled() {
                handle.set_enabled(false);
            }
            handle.release();
            info!("Effect released");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.enabled())
    }

    pub fn has_effect(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for EffectHost {
    fn drop(&mut self) {
        self.release();
    }
}
