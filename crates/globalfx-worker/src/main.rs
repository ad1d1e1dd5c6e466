// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! globalfx worker - privileged owner of the system-wide effect.
//!
//! The controller launches this process with elevated rights. It creates the
//! global effect through the platform adapter and exposes the handle over
//! D-Bus. It exits on request, on SIGTERM/SIGINT, or when the controller that
//! launched it disappears from the bus.

mod config;
mod dbus;
mod host;

use clap::Parser;
use config::WorkerArgs;
use dbus::{ShutdownReason, WorkerDbusService};
use futures::StreamExt;
use globalfx_effect::FileControlPlatform;
use globalfx_ipc::{BusKind, DBUS_NAME, DBUS_PATH};
use host::EffectHost;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("globalfx_worker=debug".parse()?)
                .add_directive("zbus=warn".parse()?),
        )
        .init();

    let args = WorkerArgs::parse();
    if args.bus == BusKind::System && args.owner.is_none() {
        return Err("--owner is required when serving on the system bus".into());
    }
    info!("globalfx worker starting on the {} bus", args.bus);
    debug!(
        "Control dir {}, descriptor {}",
        args.control_dir.display(),
        args.descriptor.display()
    );

    let platform = FileControlPlatform::new(args.control_dir.clone(), args.descriptor.clone());
    let host = Arc::new(Mutex::new(EffectHost::new(Box::new(platform))));

    let (shutdown_tx, mut shutdown_rx) = mpsc::unbounded_channel::<ShutdownReason>();
    let dbus_service =
        WorkerDbusService::new(host.clone(), args.owner.clone(), shutdown_tx.clone());

    let connection = args
        .bus
        .builder()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, dbus_service)?
        .build()
        .await?;

    info!("D-Bus service registered at {}", DBUS_NAME);

    let owner_task = args.owner.clone().map(|owner| {
        let connection = connection.clone();
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_owner(&connection, &owner, shutdown_tx).await {
                warn!("Owner watch for {} failed: {}", owner, e);
            }
        })
    });

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down...");
        }
        Some(reason) = shutdown_rx.recv() => match reason {
            ShutdownReason::Requested => info!("Termination requested over D-Bus"),
            ShutdownReason::OwnerVanished => info!("Controller left the bus, shutting down..."),
        },
    }

    if let Some(task) = owner_task {
        task.abort();
    }

    host.lock().release();

    info!("globalfx worker stopped");
    Ok(())
}

/// Send [`ShutdownReason::OwnerVanished`] once `owner` has no connection on the bus.
async fn watch_owner(
    connection: &zbus::Connection,
    owner: &str,
    shutdown_tx: mpsc::UnboundedSender<ShutdownReason>,
) -> zbus::Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(connection).await?;
    let mut changes = dbus.receive_name_owner_changed().await?;

    // The controller may have died between launching us and the subscription.
    if !dbus.name_has_owner(owner.try_into()?).await? {
        let _ = shutdown_tx.send(ShutdownReason::OwnerVanished);
        return Ok(());
    }

    while let Some(signal) = changes.next().await {
        let args = signal.args()?;
        if args.name().as_str() == owner && args.new_owner().is_none() {
            let _ = shutdown_tx.send(ShutdownReason::OwnerVanished);
            break;
        }
    }
    Ok(())
}
