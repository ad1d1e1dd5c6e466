// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! globalfx effect platform adapter
//!
//! This crate is the only place that knows how the system-wide effect slot is
//! reached. Everything above it (the privileged worker and the in-process
//! direct path) goes through [`EffectPlatform::create_global`] and the
//! [`EffectHandle`] it returns.
//!
//! The effect itself is opaque: it is identified by [`EFFECT_ID`] and consumes
//! three float parameters addressed by [`ParamId`].

#![warn(missing_docs)]

pub mod control_file;
pub mod descriptor;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

pub use control_file::FileControlPlatform;
pub use descriptor::EffectDescriptor;
pub use uuid::Uuid;

/// Fixed identifier of the globalfx effect implementation.
pub const EFFECT_ID: Uuid = Uuid::from_u128(0x87654321_4321_8765_4321_fedcba098765);

/// Effect type used when the implementation is addressed by id only.
pub const EFFECT_TYPE_NULL: Uuid = Uuid::from_u128(0xec7178ec_e5e1_4432_a3f4_4657e6795210);

/// Priority the effect is created with.
pub const GLOBAL_PRIORITY: i32 = 0;

// ============================================================================
// Platform status codes
// ============================================================================

/// Operation succeeded.
pub const SUCCESS: i32 = 0;
/// Generic failure.
pub const ERROR: i32 = -1;
/// The handle does not hold control of the effect slot.
pub const ERROR_INVALID_OPERATION: i32 = -3;
/// Malformed parameter or value.
pub const ERROR_BAD_VALUE: i32 = -4;
/// The effect backing this handle no longer exists.
pub const ERROR_DEAD_OBJECT: i32 = -7;

// ============================================================================
// Sessions and parameters
// ============================================================================

/// Audio session an effect attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioSession {
    /// The whole-system output mix (session 0).
    Global,
    /// A single application stream session.
    Stream(u32),
}

impl AudioSession {
    /// Numeric session id as used by the platform.
    pub fn id(self) -> i32 {
        match self {
            AudioSession::Global => 0,
            AudioSession::Stream(id) => id as i32,
        }
    }
}

/// Parameters understood by the effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamId {
    /// Overall wet amount.
    Intensity,
    /// Stereo spread.
    SpatialWidth,
    /// Perceived distance from the source.
    Distance,
}

impl ParamId {
    /// All parameters, in replay order.
    pub const ALL: [ParamId; 3] = [ParamId::Intensity, ParamId::SpatialWidth, ParamId::Distance];

    /// Wire id of the parameter.
    pub fn raw(self) -> i32 {
        match self {
            ParamId::Intensity => 0,
            ParamId::SpatialWidth => 1,
            ParamId::Distance => 2,
        }
    }

    /// Parse a wire id.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ParamId::Intensity),
            1 => Some(ParamId::SpatialWidth),
            2 => Some(ParamId::Distance),
            _ => None,
        }
    }

    /// Short human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            ParamId::Intensity => "intensity",
            ParamId::SpatialWidth => "spatial_width",
            ParamId::Distance => "distance",
        }
    }
}

/// Clamp a parameter value into the unit range.
///
/// NaN maps to 0.0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Encode a parameter write in the platform wire format.
///
/// Both halves are 4 bytes in native byte order: the parameter id as `i32`,
/// the value as `f32`.
pub fn encode_parameter(param_id: i32, value: f32) -> ([u8; 4], [u8; 4]) {
    (param_id.to_ne_bytes(), value.to_ne_bytes())
}

/// Decode a parameter write from the platform wire format.
pub fn decode_parameter(param: &[u8], value: &[u8]) -> Option<(i32, f32)> {
    let param: [u8; 4] = param.try_into().ok()?;
    let value: [u8; 4] = value.try_into().ok()?;
    Some((i32::from_ne_bytes(param), f32::from_ne_bytes(value)))
}

// ============================================================================
// Adapter traits
// ============================================================================

/// Errors raised while creating the global effect.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The calling process lacks the right to bind the whole-system session.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// The effect id is not listed in the deployed descriptor.
    #[error("Effect {0} is not registered with the platform")]
    NotRegistered(Uuid),
    /// The control surface does not exist (nothing provisioned it).
    #[error("Effect control surface unavailable: {0}")]
    Unavailable(String),
    /// Any other I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The slot state could not be parsed.
    #[error("Corrupt control state: {0}")]
    Corrupt(String),
}

/// Factory for global effect handles.
///
/// Implementations are the only code allowed to depend on the platform's
/// unstable effect surface.
pub trait EffectPlatform: Send + Sync {
    /// Create an effect on the given session.
    fn create_global(
        &self,
        type_id: Uuid,
        effect_id: Uuid,
        priority: i32,
        session: AudioSession,
    ) -> Result<Box<dyn EffectHandle>, PlatformError>;
}

/// A live effect instance.
pub trait EffectHandle: Send {
    /// Enable or disable processing. Returns a platform status code.
    fn set_enabled(&mut self, enabled: bool) -> i32;

    /// Whether processing is enabled.
    fn enabled(&self) -> bool;

    /// Whether this handle currently controls the effect slot.
    ///
    /// Control can be taken away by a higher-priority claimant at any time.
    fn has_control(&self) -> bool;

    /// Write a parameter in wire format. Returns a platform status code.
    fn set_parameter(&mut self, param: &[u8], value: &[u8]) -> i32;

    /// Destroy the effect instance. Further calls are no-ops.
    fn release(&mut self);
}

/// Result of a parameter write through [`apply_parameter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterOutcome {
    /// The platform accepted the value.
    Applied,
    /// The handle has lost control of the slot; nothing was written.
    NoControl,
    /// The platform rejected the value with this status.
    Rejected(i32),
}

/// Write a float parameter to a handle, honouring slot control.
///
/// Rejections are logged here; callers only need the outcome when they care.
pub fn apply_parameter(
    handle: &mut dyn EffectHandle,
    param: ParamId,
    value: f32,
) -> ParameterOutcome {
    if !handle.has_control() {
        warn!("Effect has no control, cannot set {}", param.name());
        return ParameterOutcome::NoControl;
    }

    let (p, v) = encode_parameter(param.raw(), value);
    let status = handle.set_parameter(&p, &v);
    if status != SUCCESS {
        warn!(
            "set_parameter returned error code {} for param {} ({})",
            status,
            param.raw(),
            param.name()
        );
        return ParameterOutcome::Rejected(status);
    }

    trace!("Set {} = {:.3}", param.name(), value);
    ParameterOutcome::Applied
}
