// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! File-backed effect platform.
//!
//! The system audio host watches a protected control directory. Whoever owns
//! the slot file (`global.toml`) controls the system-wide effect instance: its
//! enabled flag and parameter values. Writing into the directory needs
//! elevated rights, which is exactly what separates the privileged worker from
//! the in-process direct path.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    decode_parameter, AudioSession, EffectDescriptor, EffectHandle, EffectPlatform, ParamId,
    PlatformError, ERROR, ERROR_BAD_VALUE, ERROR_DEAD_OBJECT, ERROR_INVALID_OPERATION, SUCCESS,
};

/// Name of the slot file inside the control directory.
pub const SLOT_FILE: &str = "global.toml";

/// Default control directory watched by the audio host.
pub const DEFAULT_CONTROL_DIR: &str = "/run/globalfx";

/// Default location of the deployed effect descriptor.
pub const DEFAULT_DESCRIPTOR_PATH: &str = "/etc/globalfx/effects.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SlotParameter {
    id: i32,
    value: f32,
}

/// On-disk state of the global effect slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SlotState {
    owner: Uuid,
    effect_id: Uuid,
    type_id: Uuid,
    priority: i32,
    session: i32,
    enabled: bool,
    #[serde(default)]
    parameters: Vec<SlotParameter>,
}

impl SlotState {
    fn set_parameter(&mut self, id: i32, value: f32) {
        match self.parameters.iter_mut().find(|p| p.id == id) {
            Some(p) => p.value = value,
            None => {
                self.parameters.push(SlotParameter { id, value });
                self.parameters.sort_by_key(|p| p.id);
            }
        }
    }
}

fn read_slot(path: &Path) -> Result<Option<SlotState>, PlatformError> {
    match fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content)
            .map(Some)
            .map_err(|e| PlatformError::Corrupt(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically replace the slot file.
fn write_slot(dir: &Path, path: &Path, state: &SlotState) -> Result<(), PlatformError> {
    let content = toml::to_string_pretty(state).map_err(|e| PlatformError::Corrupt(e.to_string()))?;
    let mut file = NamedTempFile::new_in(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => {
            PlatformError::PermissionDenied(format!("cannot write to {}", dir.display()))
        }
        _ => PlatformError::Io(e),
    })?;
    file.write_all(content.as_bytes())?;
    file.as_file().set_permissions(fs::Permissions::from_mode(0o644))?;
    file.persist(path).map_err(|e| PlatformError::Io(e.error))?;
    Ok(())
}

/// Effect platform backed by the control directory.
#[derive(Debug, Clone)]
pub struct FileControlPlatform {
    control_dir: PathBuf,
    descriptor_path: PathBuf,
}

impl FileControlPlatform {
    /// Create a platform over the given control directory and descriptor.
    pub fn new(control_dir: impl Into<PathBuf>, descriptor_path: impl Into<PathBuf>) -> Self {
        Self {
            control_dir: control_dir.into(),
            descriptor_path: descriptor_path.into(),
        }
    }

    /// Path of the slot file.
    pub fn slot_path(&self) -> PathBuf {
        self.control_dir.join(SLOT_FILE)
    }
}

impl Default for FileControlPlatform {
    fn default() -> Self {
        Self::new(DEFAULT_CONTROL_DIR, DEFAULT_DESCRIPTOR_PATH)
    }
}

impl EffectPlatform for FileControlPlatform {
    fn create_global(
        &self,
        type_id: Uuid,
        effect_id: Uuid,
        priority: i32,
        session: AudioSession,
    ) -> Result<Box<dyn EffectHandle>, PlatformError> {
        let descriptor = EffectDescriptor::load(&self.descriptor_path)?;
        if descriptor.find(effect_id).is_none() {
            return Err(PlatformError::NotRegistered(effect_id));
        }

        if !self.control_dir.is_dir() {
            return Err(PlatformError::Unavailable(format!(
                "control directory {} does not exist",
                self.control_dir.display()
            )));
        }

        let slot_path = self.slot_path();
        let existing = match read_slot(&slot_path) {
            Ok(existing) => existing,
            Err(PlatformError::Corrupt(e)) => {
                warn!("Discarding corrupt effect slot: {}", e);
                None
            }
            Err(e) => return Err(e),
        };

        let owner = Uuid::new_v4();
        let handle = FileEffectHandle {
            control_dir: self.control_dir.clone(),
            slot_path: slot_path.clone(),
            owner,
            enabled: false,
            released: false,
        };

        if let Some(existing) = existing {
            if existing.priority > priority {
                info!(
                    "Effect slot held by higher priority claimant ({} > {}), created without control",
                    existing.priority, priority
                );
                return Ok(Box::new(handle));
            }
        }

        let state = SlotState {
            owner,
            effect_id,
            type_id,
            priority,
            session: session.id(),
            enabled: false,
            parameters: Vec::new(),
        };
        write_slot(&self.control_dir, &slot_path, &state)?;
        debug!("Claimed effect slot {} as {}", slot_path.display(), owner);
        Ok(Box::new(handle))
    }
}

/// Handle onto the slot file.
#[derive(Debug)]
pub struct FileEffectHandle {
    control_dir: PathBuf,
    slot_path: PathBuf,
    owner: Uuid,
    enabled: bool,
    released: bool,
}

impl FileEffectHandle {
    /// Apply a change to the slot if this handle still owns it.
    fn update_slot(&self, change: impl FnOnce(&mut SlotState)) -> i32 {
        if self.released {
            return ERROR_DEAD_OBJECT;
        }
        let mut state = match read_slot(&self.slot_path) {
            Ok(Some(state)) if state.owner == self.owner => state,
            Ok(_) => return ERROR_INVALID_OPERATION,
            Err(e) => {
                warn!("Failed to read effect slot: {}", e);
                return ERROR;
            }
        };
        change(&mut state);
        match write_slot(&self.control_dir, &self.slot_path, &state) {
            Ok(()) => SUCCESS,
            Err(e) => {
                warn!("Failed to write effect slot: {}", e);
                ERROR
            }
        }
    }
}

impl EffectHandle for FileEffectHandle {
    fn set_enabled(&mut self, enabled: bool) -> i32 {
        let status = self.update_slot(|state| state.enabled = enabled);
        if status == SUCCESS {
            self.enabled = enabled;
        }
        status
    }

    fn enabled(&self) -> bool {
        self.enabled && !self.released
    }

    fn has_control(&self) -> bool {
        if self.released {
            return false;
        }
        matches!(read_slot(&self.slot_path), Ok(Some(state)) if state.owner == self.owner)
    }

    fn set_parameter(&mut self, param: &[u8], value: &[u8]) -> i32 {
        let Some((id, value)) = decode_parameter(param, value) else {
            return ERROR_BAD_VALUE;
        };
        if ParamId::from_raw(id).is_none() || !(0.0..=1.0).contains(&value) {
            return ERROR_BAD_VALUE;
        }
        self.update_slot(|state| state.set_parameter(id, value))
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        if self.has_control() {
            if let Err(e) = fs::remove_file(&self.slot_path) {
                warn!("Failed to remove effect slot: {}", e);
            } else {
                debug!("Released effect slot {}", self.slot_path.display());
            }
        }
        self.released = true;
        self.enabled = false;
    }
}

impl Drop for FileEffectHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::BUNDLED_DESCRIPTOR;
    use crate::{apply_parameter, encode_parameter, ParameterOutcome, EFFECT_ID, EFFECT_TYPE_NULL};

    fn setup() -> (tempfile::TempDir, FileControlPlatform) {
        let dir = tempfile::tempdir().unwrap();
        let control = dir.path().join("control");
        fs::create_dir(&control).unwrap();
        let descriptor = dir.path().join("effects.toml");
        fs::write(&descriptor, BUNDLED_DESCRIPTOR).unwrap();
        let platform = FileControlPlatform::new(control, descriptor);
        (dir, platform)
    }

    fn slot(platform: &FileControlPlatform) -> Option<SlotState> {
        read_slot(&platform.slot_path()).unwrap()
    }

    #[test]
    fn test_create_claims_slot() {
        let (_dir, platform) = setup();
        let handle = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();
        assert!(handle.has_control());
        assert!(!handle.enabled());

        let state = slot(&platform).unwrap();
        assert_eq!(state.effect_id, EFFECT_ID);
        assert_eq!(state.session, 0);
        assert!(!state.enabled);
    }

    #[test]
    fn test_enable_and_parameters_reach_slot() {
        let (_dir, platform) = setup();
        let mut handle = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();

        assert_eq!(handle.set_enabled(true), SUCCESS);
        assert!(handle.enabled());
        assert_eq!(
            apply_parameter(handle.as_mut(), ParamId::Distance, 1.0),
            ParameterOutcome::Applied
        );
        assert_eq!(
            apply_parameter(handle.as_mut(), ParamId::Intensity, 0.3),
            ParameterOutcome::Applied
        );

        let state = slot(&platform).unwrap();
        assert!(state.enabled);
        assert_eq!(
            state.parameters,
            vec![
                SlotParameter { id: 0, value: 0.3 },
                SlotParameter { id: 2, value: 1.0 },
            ]
        );
    }

    #[test]
    fn test_rejects_bad_parameter_writes() {
        let (_dir, platform) = setup();
        let mut handle = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();

        let (p, v) = encode_parameter(7, 0.5);
        assert_eq!(handle.set_parameter(&p, &v), ERROR_BAD_VALUE);
        let (p, v) = encode_parameter(0, 1.5);
        assert_eq!(handle.set_parameter(&p, &v), ERROR_BAD_VALUE);
        assert_eq!(handle.set_parameter(&p[..2], &v), ERROR_BAD_VALUE);
    }

    #[test]
    fn test_higher_priority_claimant_takes_control() {
        let (_dir, platform) = setup();
        let mut first = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();
        let second = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 5, AudioSession::Global)
            .unwrap();

        assert!(!first.has_control());
        assert!(second.has_control());
        assert_eq!(
            apply_parameter(first.as_mut(), ParamId::Intensity, 0.2),
            ParameterOutcome::NoControl
        );

        // A lower priority creation cannot steal it back.
        let third = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();
        assert!(!third.has_control());
        assert!(second.has_control());
    }

    #[test]
    fn test_release_frees_slot_and_is_idempotent() {
        let (_dir, platform) = setup();
        let mut handle = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();
        handle.set_enabled(true);
        handle.release();
        assert!(slot(&platform).is_none());
        assert!(!handle.enabled());
        assert_eq!(handle.set_enabled(true), ERROR_DEAD_OBJECT);
        handle.release();
    }

    #[test]
    fn test_drop_releases_slot() {
        let (_dir, platform) = setup();
        {
            let _handle = platform
                .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
                .unwrap();
            assert!(slot(&platform).is_some());
        }
        assert!(slot(&platform).is_none());
    }

    #[test]
    fn test_unregistered_effect_is_refused() {
        let (_dir, platform) = setup();
        let err = platform
            .create_global(EFFECT_TYPE_NULL, Uuid::new_v4(), 0, AudioSession::Global)
            .err()
            .unwrap();
        assert!(matches!(err, PlatformError::NotRegistered(_)));
    }

    #[test]
    fn test_missing_control_dir_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = dir.path().join("effects.toml");
        fs::write(&descriptor, BUNDLED_DESCRIPTOR).unwrap();
        let platform = FileControlPlatform::new(dir.path().join("missing"), descriptor);
        let err = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .err()
            .unwrap();
        assert!(matches!(err, PlatformError::Unavailable(_)));
    }

    #[test]
    fn test_corrupt_slot_is_overwritten() {
        let (_dir, platform) = setup();
        fs::write(platform.slot_path(), "not = [valid").unwrap();
        let handle = platform
            .create_global(EFFECT_TYPE_NULL, EFFECT_ID, 0, AudioSession::Global)
            .unwrap();
        assert!(handle.has_control());
    }
}
