// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! D-Bus client for the privileged globalfx worker.

use crate::broker::PrivilegeService;
use crate::config::WorkerConfig;
use async_trait::async_trait;
use futures::StreamExt;
use globalfx_effect::ParamId;
use globalfx_ipc::{BusKind, WorkerError, DBUS_NAME};
use parking_lot::Mutex;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zbus::{proxy, Connection, Result as ZbusResult};

/// How often to look for the worker's bus name after launching it.
const LAUNCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// D-Bus proxy for the worker interface.
#[proxy(
    interface = "org.globalfx.Worker",
    default_service = "org.globalfx.Worker",
    default_path = "/org/globalfx/Worker"
)]
trait Worker {
    fn create(&self) -> ZbusResult<bool>;
    fn release(&self) -> ZbusResult<()>;
    fn set_enabled(&self, enabled: bool) -> ZbusResult<()>;
    fn set_parameter(&self, param_id: i32, value: f64) -> ZbusResult<()>;
    fn is_enabled(&self) -> ZbusResult<bool>;
    fn destroy_process(&self) -> ZbusResult<()>;
}

/// A bound worker, as seen by the orchestrator.
#[async_trait]
pub trait WorkerLink: Send + Sync {
    /// Create the global effect. `false` when the platform refused.
    async fn create(&self) -> Result<bool, WorkerError>;
    async fn release(&self) -> Result<(), WorkerError>;
    async fn set_enabled(&self, enabled: bool) -> Result<(), WorkerError>;
    async fn set_parameter(&self, param: ParamId, value: f32) -> Result<(), WorkerError>;
    /// Ask the worker to release everything and exit.
    async fn destroy_process(&self) -> Result<(), WorkerError>;
    /// Resolves when the worker has gone away.
    async fn closed(&self);
}

/// Produces a bound worker, launching it if necessary.
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn WorkerLink>, WorkerError>;
}

fn worker_bus_name() -> Result<zbus::names::BusName<'static>, WorkerError> {
    zbus::names::BusName::try_from(DBUS_NAME).map_err(|e| WorkerError::Transport(e.to_string()))
}

async fn worker_running(connection: &Connection) -> Result<bool, WorkerError> {
    let dbus = zbus::fdo::DBusProxy::new(connection).await?;
    let running = dbus
        .name_has_owner(worker_bus_name()?)
        .await
        .map_err(zbus::Error::from)?;
    Ok(running)
}

// ============================================================================
// Client
// ============================================================================

/// Client for one running worker. Every call is bounded by the call timeout.
pub struct WorkerClient {
    proxy: WorkerProxy<'static>,
    connection: Connection,
    call_timeout: Duration,
}

impl WorkerClient {
    /// Attach to the worker on `connection` and verify that it answers.
    pub async fn new(connection: Connection, call_timeout: Duration) -> Result<Self, WorkerError> {
        let proxy = WorkerProxy::new(&connection).await?;
        let client = Self {
            proxy,
            connection,
            call_timeout,
        };

        let enabled = client.call(client.proxy.is_enabled()).await?;
        info!("Connected to globalfx worker (effect enabled: {})", enabled);
        Ok(client)
    }

    async fn call<T>(&self, call: impl Future<Output = ZbusResult<T>>) -> Result<T, WorkerError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(WorkerError::Timeout),
        }
    }
}

#[async_trait]
impl WorkerLink for WorkerClient {
    async fn create(&self) -> Result<bool, WorkerError> {
        debug!("Worker: create()");
        self.call(self.proxy.create()).await
    }

    async fn release(&self) -> Result<(), WorkerError> {
        debug!("Worker: release()");
        self.call(self.proxy.release()).await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), WorkerError> {
        debug!("Worker: set_enabled({})", enabled);
        self.call(self.proxy.set_enabled(enabled)).await
    }

    async fn set_parameter(&self, param: ParamId, value: f32) -> Result<(), WorkerError> {
        debug!("Worker: set_parameter({}, {:.3})", param.name(), value);
        self.call(self.proxy.set_parameter(param.raw(), f64::from(value)))
            .await
    }

    async fn destroy_process(&self) -> Result<(), WorkerError> {
        info!("Worker: destroy_process()");
        self.call(self.proxy.destroy_process()).await
    }

    async fn closed(&self) {
        let dbus = match zbus::fdo::DBusProxy::new(&self.connection).await {
            Ok(dbus) => dbus,
            Err(e) => {
                warn!("Cannot watch worker name: {}", e);
                return;
            }
        };
        let mut changes = match dbus.receive_name_owner_changed().await {
            Ok(changes) => changes,
            Err(e) => {
                warn!("Cannot watch worker name: {}", e);
                return;
            }
        };

        // It may already have gone between connecting and subscribing.
        if !worker_running(&self.connection).await.unwrap_or(false) {
            return;
        }

        while let Some(signal) = changes.next().await {
            let Ok(args) = signal.args() else { continue };
            if args.name().as_str() == DBUS_NAME && args.new_owner().is_none() {
                info!("globalfx worker left the bus");
                return;
            }
        }
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Binds the worker: reuses a running one, otherwise launches it through the
/// privilege service and waits for it to appear on the bus.
pub struct PrivilegedWorkerConnector {
    service: Arc<dyn PrivilegeService>,
    config: WorkerConfig,
    connection: Mutex<Option<Connection>>,
}

impl PrivilegedWorkerConnector {
    pub fn new(service: Arc<dyn PrivilegeService>, config: WorkerConfig) -> Self {
        Self {
            service,
            config,
            connection: Mutex::new(None),
        }
    }

    async fn bus_connection(&self) -> Result<Connection, WorkerError> {
        let cached = self.connection.lock().clone();
        if let Some(connection) = cached {
            return Ok(connection);
        }
        let connection = self.config.bus.connect().await?;
        *self.connection.lock() = Some(connection.clone());
        Ok(connection)
    }

    /// Arguments for the worker command line.
    fn worker_args(&self, owner: Option<String>) -> Vec<String> {
        let mut args = vec![
            "--bus".to_string(),
            self.config.bus.as_arg().to_string(),
            "--control-dir".to_string(),
            self.config.control_dir.display().to_string(),
            "--descriptor".to_string(),
            self.config.descriptor_path.display().to_string(),
        ];
        if let Some(owner) = owner {
            args.push("--owner".to_string());
            args.push(owner);
        }
        args
    }

    async fn launch(&self, connection: &Connection) -> Result<(), WorkerError> {
        let binary = find_worker_binary(self.config.binary.as_ref())
            .ok_or_else(|| WorkerError::Launch("could not find globalfx-worker".to_string()))?;
        let owner = connection.unique_name().map(|name| name.to_string());
        let args = self.worker_args(owner);

        match self.config.bus {
            BusKind::System => self
                .service
                .spawn_privileged(&binary, &args)
                .await
                .map_err(|e| WorkerError::Launch(e.to_string())),
            // Development setup: no elevation, the session bus is ours anyway.
            BusKind::Session => {
                info!("Starting worker from: {}", binary.display());
                tokio::process::Command::new(&binary)
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .spawn()
                    .map(|_| ())
                    .map_err(|e| WorkerError::Launch(e.to_string()))
            }
        }
    }

    async fn connect_inner(&self, connection: Connection) -> Result<Arc<dyn WorkerLink>, WorkerError> {
        if worker_running(&connection).await? {
            debug!("Reusing running globalfx worker");
        } else {
            self.launch(&connection).await?;
            // Bounded by the caller's bind timeout.
            while !worker_running(&connection).await? {
                tokio::time::sleep(LAUNCH_POLL_INTERVAL).await;
            }
        }

        let client = WorkerClient::new(connection, self.config.call_timeout()).await?;
        Ok(Arc::new(client))
    }
}

#[async_trait]
impl WorkerConnector for PrivilegedWorkerConnector {
    async fn connect(&self) -> Result<Arc<dyn WorkerLink>, WorkerError> {
        let connection = self.bus_connection().await?;
        let result = self.connect_inner(connection).await;
        if matches!(&result, Err(e) if e.is_transport()) {
            // Start from a fresh bus connection next time.
            self.connection.lock().take();
        }
        result
    }
}

/// Locate the worker binary, the same way an installed or development build lays it out.
fn find_worker_binary(configured: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.clone());
    }

    let mut candidates: Vec<PathBuf> = vec![
        PathBuf::from("/usr/libexec/globalfx-worker"),
        PathBuf::from("/usr/bin/globalfx-worker"),
        PathBuf::from("/usr/local/bin/globalfx-worker"),
    ];

    // Development build (same directory as current exe)
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(parent) = exe_path.parent() {
            candidates.insert(0, parent.join("globalfx-worker"));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}
