// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! polkit-backed privilege service.
//!
//! Reachability and authorization go through the polkit authority on the
//! system bus. Privileged work is done by `pkexec`, which asks the same
//! authority before running anything.

use super::{BrokerError, PrivilegeService};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info, warn};
use zbus::zvariant::Value;
use zbus::{proxy, Connection};

/// Well-known bus name of the polkit authority.
pub const POLKIT_NAME: &str = "org.freedesktop.PolicyKit1";

const PKEXEC: &str = "pkexec";

/// Let polkit show an authentication dialog.
const ALLOW_USER_INTERACTION: u32 = 0x1;

#[proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait Authority {
    fn check_authorization(
        &self,
        subject: &(&str, HashMap<&str, Value<'_>>),
        action_id: &str,
        details: &HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
}

/// Privilege service talking to polkit and running commands via `pkexec`.
pub struct PolkitService {
    connection: Connection,
    action_id: String,
}

impl PolkitService {
    /// Connect to the system bus.
    pub async fn connect(action_id: impl Into<String>) -> Result<Self, BrokerError> {
        let connection = Connection::system().await?;
        Ok(Self::with_connection(connection, action_id))
    }

    pub fn with_connection(connection: Connection, action_id: impl Into<String>) -> Self {
        Self {
            connection,
            action_id: action_id.into(),
        }
    }

    async fn authorize(&self, flags: u32) -> Result<bool, BrokerError> {
        let unique_name = self
            .connection
            .unique_name()
            .ok_or_else(|| BrokerError::Unavailable("no unique bus name".to_string()))?
            .to_string();

        // Subject is this bus connection, so polkit resolves our process itself.
        let mut subject_details = HashMap::new();
        subject_details.insert("name", Value::from(unique_name.as_str()));
        let subject = ("system-bus-name", subject_details);

        let authority = AuthorityProxy::new(&self.connection).await?;
        let (authorized, challenge, _details) = authority
            .check_authorization(&subject, &self.action_id, &HashMap::new(), flags, "")
            .await?;
        debug!(
            "polkit {}: authorized={}, challenge={}",
            self.action_id, authorized, challenge
        );
        Ok(authorized)
    }
}

#[async_trait]
impl PrivilegeService for PolkitService {
    async fn ping(&self) -> Result<(), BrokerError> {
        let dbus = zbus::fdo::DBusProxy::new(&self.connection).await?;
        let name = zbus::names::BusName::try_from(POLKIT_NAME).map_err(zbus::Error::from)?;
        if dbus.name_has_owner(name).await.map_err(zbus::Error::from)? {
            Ok(())
        } else {
            Err(BrokerError::Unavailable(format!("{} has no owner", POLKIT_NAME)))
        }
    }

    async fn check_permission(&self) -> Result<bool, BrokerError> {
        self.authorize(0).await
    }

    async fn request_permission(&self) -> Result<bool, BrokerError> {
        info!("Asking polkit for {}", self.action_id);
        self.authorize(ALLOW_USER_INTERACTION).await
    }

    async fn exec(&self, command: &str) -> Result<i32, BrokerError> {
        let output = tokio::process::Command::new(PKEXEC)
            .args(["/bin/sh", "-c", command])
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            debug!(
                "'{}' stderr: {}",
                command,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        // Killed by a signal: no exit code.
        Ok(output.status.code().unwrap_or(-1))
    }

    async fn spawn_privileged(&self, program: &Path, args: &[String]) -> Result<(), BrokerError> {
        info!("Starting {} via {}", program.display(), PKEXEC);
        let mut child = tokio::process::Command::new(PKEXEC)
            .arg(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let program = program.display().to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("{} exited: {}", program, status),
                Err(e) => warn!("Failed to wait for {}: {}", program, e),
            }
        });
        Ok(())
    }

    async fn wait_until_lost(&self) -> Result<(), BrokerError> {
        let dbus = zbus::fdo::DBusProxy::new(&self.connection).await?;
        let mut changes = dbus.receive_name_owner_changed().await?;
        while let Some(signal) = changes.next().await {
            let args = signal.args()?;
            if args.name().as_str() == POLKIT_NAME && args.new_owner().is_none() {
                return Ok(());
            }
        }
        // The stream only ends with our own bus connection.
        Ok(())
    }
}
