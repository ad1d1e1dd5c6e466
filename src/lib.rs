// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! globalfx - system-wide audio effect controller.
//!
//! The controller negotiates elevated privilege through polkit, launches the
//! privileged `globalfx-worker` process that owns the global effect, and keeps
//! the effect's enabled state and parameters in sync across reconnects.
//!
//! Collaborators start an [`EffectOrchestrator`] and talk to it only through
//! the returned [`OrchestratorHandle`]; everything they can observe is a
//! [`StatusSnapshot`].

pub mod broker;
pub mod config;
pub mod orchestrator;
pub mod single_instance;
pub mod status;
pub mod worker_client;

#[cfg(test)]
mod testing;

pub use broker::{ConnectionState, PrivilegeBroker};
pub use orchestrator::{EffectOrchestrator, OrchestratorHandle};
pub use status::{EffectParameters, PathKind, StatusSnapshot};
