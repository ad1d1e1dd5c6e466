// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Single-instance guard using D-Bus name ownership.
//!
//! Two controllers in one session would race for the same worker, so the
//! controller holds [`CONTROLLER_NAME`] on the session bus for as long as it
//! runs. The name is requested with DO_NOT_QUEUE: if another instance owns
//! it, the request fails immediately instead of waiting in line.

use globalfx_ipc::CONTROLLER_NAME;
use thiserror::Error;
use tracing::{debug, info};
use zbus::fdo::{DBusProxy, RequestNameFlags, RequestNameReply};
use zbus::names::WellKnownName;
use zbus::Connection;

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Another globalfx controller is already running")]
    AlreadyRunning,
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
}

/// Holds the controller name until dropped.
pub struct InstanceGuard {
    _connection: Connection,
}

/// Claim the controller name for this process.
pub async fn acquire() -> Result<InstanceGuard, InstanceError> {
    let connection = Connection::session().await?;
    let dbus = DBusProxy::new(&connection).await?;
    let name = WellKnownName::try_from(CONTROLLER_NAME).map_err(zbus::Error::from)?;

    let reply = dbus
        .request_name(name, RequestNameFlags::DoNotQueue.into())
        .await
        .map_err(zbus::Error::from)?;

    match reply {
        RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => {
            info!("Holding {} on the session bus", CONTROLLER_NAME);
            Ok(InstanceGuard {
                _connection: connection,
            })
        }
        RequestNameReply::Exists | RequestNameReply::InQueue => {
            debug!("{} is owned by another process", CONTROLLER_NAME);
            Err(InstanceError::AlreadyRunning)
        }
    }
}
