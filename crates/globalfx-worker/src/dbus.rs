// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! D-Bus interface implementation for the worker.

use crate::host::EffectHost;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zbus::interface;
use zbus::message::Header;

/// Input validation helpers for D-Bus method arguments.
mod validate {
    /// Narrow a parameter value to `f32`, rejecting NaN and infinities.
    pub fn validate_parameter_value(value: f64) -> Result<f32, zbus::fdo::Error> {
        if !value.is_finite() {
            return Err(zbus::fdo::Error::InvalidArgs(
                "Parameter value must be a finite number".into(),
            ));
        }
        Ok(value as f32)
    }
}

/// Only the launching controller may drive the worker.
///
/// Without an owner (development on the session bus) every caller is accepted.
fn check_caller(owner: Option<&str>, sender: Option<&str>) -> zbus::fdo::Result<()> {
    match (owner, sender) {
        (None, _) => Ok(()),
        (Some(owner), Some(sender)) if owner == sender => Ok(()),
        (Some(_), sender) => {
            warn!("Rejecting call from {}", sender.unwrap_or("<unknown>"));
            Err(zbus::fdo::Error::AccessDenied(
                "Only the launching controller may use this worker".into(),
            ))
        }
    }
}

/// Why the worker's main loop should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The controller asked the worker to terminate.
    Requested,
    /// The controller's bus connection went away.
    OwnerVanished,
}

/// The D-Bus interface implementation.
pub struct WorkerDbusService {
    host: Arc<Mutex<EffectHost>>,
    owner: Option<String>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownReason>,
}

impl WorkerDbusService {
    pub fn new(
        host: Arc<Mutex<EffectHost>>,
        owner: Option<String>,
        shutdown_tx: mpsc::UnboundedSender<ShutdownReason>,
    ) -> Self {
        Self {
            host,
            owner,
            shutdown_tx,
        }
    }

    fn authorize(&self, header: &Header<'_>) -> zbus::fdo::Result<()> {
        check_caller(
            self.owner.as_deref(),
            header.sender().map(|sender| sender.as_str()),
        )
    }
}

#[interface(name = "org.globalfx.Worker")]
impl WorkerDbusService {
    /// Create the global effect, replacing any existing one.
    async fn create(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
        self.authorize(&header)?;
        debug!("D-Bus: create()");
        Ok(self.host.lock().create())
    }

    /// Disable and destroy the effect.
    async fn release(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<()> {
        self.authorize(&header)?;
        debug!("D-Bus: release()");
        self.host.lock().release();
        Ok(())
    }

    /// Set the effect's enabled flag.
    async fn set_enabled(
        &self,
        #[zbus(header)] header: Header<'_>,
        enabled: bool,
    ) -> zbus::fdo::Result<()> {
        self.authorize(&header)?;
        debug!("D-Bus: set_enabled({})", enabled);
        self.host.lock().set_enabled(enabled);
        Ok(())
    }

    /// Write one effect parameter.
    async fn set_parameter(
        &self,
        #[zbus(header)] header: Header<'_>,
        param_id: i32,
        value: f64,
    ) -> zbus::fdo::Result<()> {
        self.authorize(&header)?;
        let value = validate::validate_parameter_value(value)?;
        debug!("D-Bus: set_parameter({}, {:.3})", param_id, value);
        // Platform rejections are logged by the host; the caller retries on the next change.
        let _ = self.host.lock().set_parameter(param_id, value);
        Ok(())
    }

    /// Whether the effect is currently enabled.
    async fn is_enabled(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<bool> {
        self.authorize(&header)?;
        Ok(self.host.lock().is_enabled())
    }

    /// Release the effect and terminate the worker process.
    async fn destroy_process(&self, #[zbus(header)] header: Header<'_>) -> zbus::fdo::Result<()> {
        self.authorize(&header)?;
        info!("D-Bus: destroy_process()");
        self.host.lock().release();
        let _ = self.shutdown_tx.send(ShutdownReason::Requested);
        Ok(())
    }
}
