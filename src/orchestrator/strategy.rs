// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Path selection and the activation sequences for both paths.

use crate::broker::ConnectionState;
use crate::status::{EffectParameters, PathKind};
use crate::worker_client::WorkerLink;
use globalfx_effect::{
    apply_parameter, AudioSession, EffectHandle, EffectPlatform, EFFECT_ID, EFFECT_TYPE_NULL,
    GLOBAL_PRIORITY, SUCCESS,
};
use globalfx_ipc::WorkerError;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where the running effect lives.
pub enum ActivePath {
    Privileged(Arc<dyn WorkerLink>),
    Direct(Box<dyn EffectHandle>),
    None,
}

impl ActivePath {
    pub fn is_active(&self) -> bool {
        !matches!(self, ActivePath::None)
    }

    pub fn kind(&self) -> Option<PathKind> {
        match self {
            ActivePath::Privileged(_) => Some(PathKind::Privileged),
            ActivePath::Direct(_) => Some(PathKind::Direct),
            ActivePath::None => None,
        }
    }
}

/// Lifecycle of the privileged worker as seen from this process.
pub enum WorkerBinding {
    Unbound,
    Binding { generation: u64 },
    Bound {
        generation: u64,
        link: Arc<dyn WorkerLink>,
    },
    Dead,
}

impl WorkerBinding {
    pub fn is_binding(&self) -> bool {
        matches!(self, WorkerBinding::Binding { .. })
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, WorkerBinding::Bound { .. })
    }

    /// Whether `generation` is the bind currently in flight.
    pub fn awaits(&self, generation: u64) -> bool {
        matches!(self, WorkerBinding::Binding { generation: g } if *g == generation)
    }

    /// Whether `generation` is the currently bound worker.
    pub fn holds(&self, generation: u64) -> bool {
        matches!(self, WorkerBinding::Bound { generation: g, .. } if *g == generation)
    }
}

/// How a request to turn the effect on is served.
pub enum Strategy {
    /// Activate now on the bound worker.
    Privileged(Arc<dyn WorkerLink>),
    /// Privilege is ready but no worker is bound yet: bind and activate on connect.
    AwaitWorker,
    /// No privilege: create the effect in-process.
    Direct,
}

/// The single decision point between the privileged and the direct path.
pub fn select(privilege: ConnectionState, binding: &WorkerBinding) -> Strategy {
    if privilege != ConnectionState::Ready {
        return Strategy::Direct;
    }
    match binding {
        WorkerBinding::Bound { link, .. } => Strategy::Privileged(link.clone()),
        WorkerBinding::Unbound | WorkerBinding::Binding { .. } | WorkerBinding::Dead => {
            Strategy::AwaitWorker
        }
    }
}

/// Full activation on a worker: create, enable, then every parameter in order.
///
/// `Ok(false)` means the worker could not create the effect.
pub async fn activate_worker(
    link: &dyn WorkerLink,
    params: &EffectParameters,
) -> Result<bool, WorkerError> {
    if !link.create().await? {
        return Ok(false);
    }
    link.set_enabled(true).await?;
    for (param, value) in params.ordered() {
        link.set_parameter(param, value).await?;
    }
    Ok(true)
}

/// Create, enable and configure the effect in-process.
///
/// Succeeds only if the platform lets this unprivileged process bind the
/// global session.
pub fn activate_direct(
    platform: &dyn EffectPlatform,
    params: &EffectParameters,
) -> Option<Box<dyn EffectHandle>> {
    let mut handle = match platform.create_global(
        EFFECT_TYPE_NULL,
        EFFECT_ID,
        GLOBAL_PRIORITY,
        AudioSession::Global,
    ) {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Direct effect creation failed: {}", e);
            return None;
        }
    };

    let status = handle.set_enabled(true);
    if status != SUCCESS {
        warn!("Direct effect refused to enable: status {}", status);
        handle.release();
        return None;
    }
    for (param, value) in params.ordered() {
        apply_parameter(handle.as_mut(), param, value);
    }
    info!("Global effect created in-process");
    Some(handle)
}

/// Disable and destroy an in-process effect.
pub fn release_direct(mut handle: Box<dyn EffectHandle>) {
    if handle.enabled() {
        handle.set_enabled(false);
    }
    handle.release();
    info!("In-process effect released");
}
