// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shared IPC types and D-Bus interface definitions for globalfx.
//!
//! This crate defines the contract between the controller and the privileged
//! effect worker: bus names, the bus selection and the error type shared by
//! both ends.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// D-Bus service name of the privileged worker.
pub const DBUS_NAME: &str = "org.globalfx.Worker";

/// D-Bus object path of the worker interface.
pub const DBUS_PATH: &str = "/org/globalfx/Worker";

/// Well-known name held by the running controller.
pub const CONTROLLER_NAME: &str = "org.globalfx.Controller";

/// Which message bus the worker lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The system bus. Needed when the worker runs as root.
    #[default]
    System,
    /// The session bus. Useful for development without elevation.
    Session,
}

impl BusKind {
    /// Command line form, as accepted by the worker's `--bus` flag.
    pub fn as_arg(self) -> &'static str {
        match self {
            BusKind::System => "system",
            BusKind::Session => "session",
        }
    }

    /// Open a client connection to this bus.
    pub async fn connect(self) -> zbus::Result<zbus::Connection> {
        match self {
            BusKind::System => zbus::Connection::system().await,
            BusKind::Session => zbus::Connection::session().await,
        }
    }

    /// Start a connection builder for serving on this bus.
    pub fn builder(self) -> zbus::Result<zbus::connection::Builder<'static>> {
        match self {
            BusKind::System => zbus::connection::Builder::system(),
            BusKind::Session => zbus::connection::Builder::session(),
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(BusKind::System),
            "session" => Ok(BusKind::Session),
            other => Err(format!("unknown bus '{}', expected 'system' or 'session'", other)),
        }
    }
}

/// Errors talking to the privileged worker.
///
/// Transport failures (the worker is unreachable or gone) are kept apart from
/// operation failures (the worker answered with an error) because the
/// controller treats the former as a lost connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker transport failed: {0}")]
    Transport(String),
    #[error("Worker call timed out")]
    Timeout,
    #[error("Failed to launch worker: {0}")]
    Launch(String),
    #[error("Worker rejected the call: {0}")]
    Operation(String),
}

impl WorkerError {
    /// Whether this error means the worker can no longer be reached.
    pub fn is_transport(&self) -> bool {
        matches!(self, WorkerError::Transport(_) | WorkerError::Timeout)
    }
}

/// D-Bus error names that mean the peer is gone rather than that it refused.
const TRANSPORT_ERROR_NAMES: &[&str] = &[
    "org.freedesktop.DBus.Error.ServiceUnknown",
    "org.freedesktop.DBus.Error.NameHasNoOwner",
    "org.freedesktop.DBus.Error.NoReply",
    "org.freedesktop.DBus.Error.Disconnected",
    "org.freedesktop.DBus.Error.UnknownObject",
];

impl From<zbus::Error> for WorkerError {
    fn from(e: zbus::Error) -> Self {
        match &e {
            zbus::Error::MethodError(name, _, _) => {
                if TRANSPORT_ERROR_NAMES.contains(&name.as_str()) {
                    WorkerError::Transport(e.to_string())
                } else {
                    WorkerError::Operation(e.to_string())
                }
            }
            zbus::Error::FDO(fdo) => match fdo.as_ref() {
                zbus::fdo::Error::ServiceUnknown(_)
                | zbus::fdo::Error::NameHasNoOwner(_)
                | zbus::fdo::Error::NoReply(_)
                | zbus::fdo::Error::Disconnected(_)
                | zbus::fdo::Error::UnknownObject(_) => WorkerError::Transport(e.to_string()),
                _ => WorkerError::Operation(e.to_string()),
            },
            _ => WorkerError::Transport(e.to_string()),
        }
    }
}

impl From<WorkerError> for zbus::fdo::Error {
    fn from(e: WorkerError) -> Self {
        zbus::fdo::Error::Failed(e.to_string())
    }
}
