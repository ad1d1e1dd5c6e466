// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Privilege broker.
//!
//! Tracks whether the external privilege service is reachable and whether this
//! process may use it, runs privileged commands, and performs the one-time
//! provisioning of the effect descriptor. Everything that waits on the user or
//! on the service runs on a spawned task and reports back through the
//! registered listener as a [`BrokerEvent`].

pub mod polkit;

use crate::config::{BrokerConfig, WorkerConfig};
use async_trait::async_trait;
use globalfx_effect::descriptor::{BUNDLED_BUS_POLICY, BUNDLED_DESCRIPTOR};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use polkit::PolkitService;

/// Where the bus policy for the worker name is installed.
pub const DEFAULT_BUS_POLICY_PATH: &str = "/etc/dbus-1/system.d/org.globalfx.Worker.conf";

/// Broker connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unchecked,
    Unavailable,
    AvailableNoPermission,
    PermissionRequested,
    Ready,
}

impl ConnectionState {
    /// The service answered and has not been lost since.
    pub fn is_available(self) -> bool {
        matches!(
            self,
            ConnectionState::AvailableNoPermission
                | ConnectionState::PermissionRequested
                | ConnectionState::Ready
        )
    }

    /// Privilege is not ready yet but still could be without a new check.
    pub fn may_become_ready(self) -> bool {
        matches!(
            self,
            ConnectionState::Unchecked
                | ConnectionState::AvailableNoPermission
                | ConnectionState::PermissionRequested
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Unchecked => "unchecked",
            ConnectionState::Unavailable => "unavailable",
            ConnectionState::AvailableNoPermission => "available without permission",
            ConnectionState::PermissionRequested => "permission requested",
            ConnectionState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Human-readable explanation of a broker state.
pub fn status_message(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Unchecked => "Checking privilege broker...",
        ConnectionState::Unavailable => "Privilege broker (polkit) not running.",
        ConnectionState::AvailableNoPermission => "Permission required.",
        ConnectionState::PermissionRequested => "Waiting for permission...",
        ConnectionState::Ready => "Privilege broker is ready.",
    }
}

/// Notifications produced by the broker's background tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The user answered (or the request failed or timed out).
    PermissionResult { granted: bool },
    /// The privilege service disappeared.
    ServiceLost,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Privilege service unavailable: {0}")]
    Unavailable(String),
    #[error("Privilege not ready ({0})")]
    NotReady(ConnectionState),
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),
    #[error("Failed to run privileged command: {0}")]
    Io(#[from] std::io::Error),
}

/// The external service that grants elevated rights.
#[async_trait]
pub trait PrivilegeService: Send + Sync {
    /// Succeeds when the service is reachable.
    async fn ping(&self) -> Result<(), BrokerError>;

    /// Whether this process is already authorized, without asking the user.
    async fn check_permission(&self) -> Result<bool, BrokerError>;

    /// Ask the user for authorization. May take as long as the user does.
    async fn request_permission(&self) -> Result<bool, BrokerError>;

    /// Run a shell command with elevated rights and return its exit status.
    async fn exec(&self, command: &str) -> Result<i32, BrokerError>;

    /// Start a long-running program with elevated rights without waiting for it.
    async fn spawn_privileged(&self, program: &Path, args: &[String]) -> Result<(), BrokerError>;

    /// Resolves once the service has gone away.
    async fn wait_until_lost(&self) -> Result<(), BrokerError>;
}

/// Callback receiving broker events.
pub type BrokerListener = Arc<dyn Fn(BrokerEvent) + Send + Sync>;

// ============================================================================
// Provisioning
// ============================================================================

/// Install locations for the provisioning sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployTargets {
    pub descriptor_path: PathBuf,
    pub bus_policy_path: PathBuf,
    pub control_dir: PathBuf,
}

impl DeployTargets {
    pub fn from_worker_config(config: &WorkerConfig) -> Self {
        Self {
            descriptor_path: config.descriptor_path.clone(),
            bus_policy_path: PathBuf::from(DEFAULT_BUS_POLICY_PATH),
            control_dir: config.control_dir.clone(),
        }
    }
}

/// Outcome of one provisioning command. `status` is `None` when it could not run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub status: Option<i32>,
}

/// Outcome of the provisioning sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub results: Vec<CommandResult>,
}

impl DeployReport {
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|r| r.status == Some(0))
    }
}

/// Quote a path for `/bin/sh`.
fn shell_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

/// The fixed provisioning sequence, with the bundled files staged at the given paths.
pub fn deploy_commands(
    targets: &DeployTargets,
    staged_descriptor: &Path,
    staged_policy: &Path,
) -> Vec<String> {
    let mut commands = vec!["mount -o remount,rw /".to_string()];

    for (staged, target) in [
        (staged_descriptor, &targets.descriptor_path),
        (staged_policy, &targets.bus_policy_path),
    ] {
        let quoted = shell_quote(target);
        if let Some(parent) = target.parent() {
            commands.push(format!("mkdir -p {}", shell_quote(parent)));
        }
        commands.push(format!("cp {} {}", shell_quote(staged), quoted));
        commands.push(format!("chmod 644 {}", quoted));
        commands.push(format!("chown root:root {}", quoted));
    }
    commands.push("mount -o remount,ro /".to_string());

    let control_dir = shell_quote(&targets.control_dir);
    commands.push(format!("mkdir -p {}", control_dir));
    commands.push(format!("chmod 755 {}", control_dir));
    commands.push("systemctl reload dbus".to_string());
    commands
}

/// ACL command giving `uid` access to the control directory.
pub fn runtime_rights_command(control_dir: &Path, uid: u32) -> String {
    format!("setfacl -m u:{}:rwx {}", uid, shell_quote(control_dir))
}

/// Uid of the current process.
fn current_uid() -> std::io::Result<u32> {
    use std::os::unix::fs::MetadataExt;
    Ok(std::fs::metadata("/proc/self")?.uid())
}

fn stage(contents: &str) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().prefix("globalfx-").tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Write the bundled descriptor and bus policy to temp files.
fn stage_bundled() -> std::io::Result<(NamedTempFile, NamedTempFile)> {
    Ok((stage(BUNDLED_DESCRIPTOR)?, stage(BUNDLED_BUS_POLICY)?))
}

async fn exec_logged(service: &dyn PrivilegeService, command: &str) -> Option<i32> {
    match service.exec(command).await {
        Ok(status) => {
            info!("Exec: '{}' -> exit code {}", command, status);
            Some(status)
        }
        Err(e) => {
            warn!("Failed to execute privileged command '{}': {}", command, e);
            None
        }
    }
}

/// Stand-in for a privilege service that could not be reached at startup.
///
/// Keeps the broker in [`ConnectionState::Unavailable`] so the direct path
/// stays usable.
pub struct UnreachableService {
    reason: String,
}

impl UnreachableService {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> BrokerError {
        BrokerError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl PrivilegeService for UnreachableService {
    async fn ping(&self) -> Result<(), BrokerError> {
        Err(self.error())
    }

    async fn check_permission(&self) -> Result<bool, BrokerError> {
        Err(self.error())
    }

    async fn request_permission(&self) -> Result<bool, BrokerError> {
        Err(self.error())
    }

    async fn exec(&self, _command: &str) -> Result<i32, BrokerError> {
        Err(self.error())
    }

    async fn spawn_privileged(&self, _program: &Path, _args: &[String]) -> Result<(), BrokerError> {
        Err(self.error())
    }

    async fn wait_until_lost(&self) -> Result<(), BrokerError> {
        // Never available, so never lost.
        std::future::pending().await
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Owns the broker connection state and every privileged side effect.
pub struct PrivilegeBroker {
    service: Arc<dyn PrivilegeService>,
    config: BrokerConfig,
    state: ConnectionState,
    listener: BrokerListener,
    death_watch: Option<JoinHandle<()>>,
    permission_task: Option<JoinHandle<()>>,
}

impl PrivilegeBroker {
    pub fn new(service: Arc<dyn PrivilegeService>, config: BrokerConfig) -> Self {
        Self {
            service,
            config,
            state: ConnectionState::Unchecked,
            listener: Arc::new(|_| {}),
            death_watch: None,
            permission_task: None,
        }
    }

    /// Register the callback for events from background tasks.
    pub fn set_listener(&mut self, listener: impl Fn(BrokerEvent) + Send + Sync + 'static) {
        self.listener = Arc::new(listener);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn status_message(&self) -> &'static str {
        status_message(self.state)
    }

    async fn query_state(&self) -> ConnectionState {
        match self.service.ping().await {
            Ok(()) => match self.service.check_permission().await {
                Ok(true) => {
                    debug!("Permission is already granted");
                    ConnectionState::Ready
                }
                Ok(false) => ConnectionState::AvailableNoPermission,
                Err(e) => {
                    warn!("Permission check failed: {}", e);
                    ConnectionState::AvailableNoPermission
                }
            },
            Err(e) => {
                warn!("Privilege broker is not available: {}", e);
                ConnectionState::Unavailable
            }
        }
    }

    /// Ping the service and refresh the state. Never fails; an unreachable
    /// service is reported as [`ConnectionState::Unavailable`].
    pub async fn check_availability(&mut self) -> ConnectionState {
        debug!("Checking privilege broker availability...");
        let bound = self.config.check_timeout();
        let next = match tokio::time::timeout(bound, self.query_state()).await {
            Ok(state) => state,
            Err(_) => {
                warn!("Privilege broker did not answer within {:?}", bound);
                ConnectionState::Unavailable
            }
        };

        // A recheck must not orphan an outstanding request.
        if next == ConnectionState::AvailableNoPermission
            && self.state == ConnectionState::PermissionRequested
        {
            return self.state;
        }

        self.set_state(next);
        if next == ConnectionState::AvailableNoPermission && self.config.auto_request_permission {
            self.request_permission();
        }
        self.state
    }

    /// Start a user-mediated permission request. Returns immediately; the
    /// answer arrives as [`BrokerEvent::PermissionResult`].
    pub fn request_permission(&mut self) {
        match self.state {
            ConnectionState::AvailableNoPermission => {}
            ConnectionState::PermissionRequested => {
                debug!("Permission request already outstanding");
                return;
            }
            other => {
                debug!("Not requesting permission while {}", other);
                return;
            }
        }

        info!("Requesting permission from the privilege broker");
        self.set_state(ConnectionState::PermissionRequested);

        let service = self.service.clone();
        let listener = self.listener.clone();
        let timeout = self.config.permission_timeout();
        self.permission_task = Some(tokio::spawn(async move {
            let granted = match tokio::time::timeout(timeout, service.request_permission()).await {
                Ok(Ok(granted)) => granted,
                Ok(Err(e)) => {
                    warn!("Permission request failed: {}", e);
                    false
                }
                Err(_) => {
                    warn!("Permission request timed out after {:?}", timeout);
                    false
                }
            };
            debug!(
                "Permission result: {}",
                if granted { "GRANTED" } else { "DENIED" }
            );
            listener(BrokerEvent::PermissionResult { granted });
        }));
    }

    /// Apply an event from a background task. Returns the new state.
    pub fn handle_event(&mut self, event: BrokerEvent) -> ConnectionState {
        match event {
            BrokerEvent::PermissionResult { granted } => {
                if self.state != ConnectionState::PermissionRequested {
                    debug!("Ignoring stale permission result while {}", self.state);
                    return self.state;
                }
                self.permission_task = None;
                if granted {
                    self.set_state(ConnectionState::Ready);
                } else {
                    self.set_state(ConnectionState::AvailableNoPermission);
                }
            }
            BrokerEvent::ServiceLost => {
                if self.state != ConnectionState::Unavailable {
                    warn!("Privilege broker lost");
                }
                self.set_state(ConnectionState::Unavailable);
            }
        }
        self.state
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }
        info!("Privilege broker: {} -> {}", self.state, next);
        let was_available = self.state.is_available();
        self.state = next;

        if next.is_available() && !was_available {
            self.arm_death_watch();
        }
        if next == ConnectionState::Unavailable {
            self.abort_tasks();
        }
    }

    fn arm_death_watch(&mut self) {
        if self.death_watch.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let service = self.service.clone();
        let listener = self.listener.clone();
        self.death_watch = Some(tokio::spawn(async move {
            match service.wait_until_lost().await {
                Ok(()) => info!("Privilege broker went away"),
                Err(e) => warn!("Lost track of the privilege broker: {}", e),
            }
            listener(BrokerEvent::ServiceLost);
        }));
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.death_watch.take() {
            task.abort();
        }
        if let Some(task) = self.permission_task.take() {
            task.abort();
        }
    }

    /// Run one privileged shell command and return its exit status.
    pub async fn run_command(&self, command: &str) -> Result<i32, BrokerError> {
        if !self.is_ready() {
            return Err(BrokerError::NotReady(self.state));
        }
        let status = self.service.exec(command).await?;
        info!("Exec: '{}' -> exit code {}", command, status);
        Ok(status)
    }

    /// Install the bundled effect descriptor and bus policy in the background.
    ///
    /// Returns `None` when privilege is not ready or the files could not be staged.
    pub fn deploy_effect_descriptor(
        &self,
        targets: &DeployTargets,
    ) -> Option<JoinHandle<DeployReport>> {
        if !self.is_ready() {
            warn!("Cannot deploy effect descriptor, privilege not ready");
            return None;
        }

        let (descriptor, policy) = match stage_bundled() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to stage effect descriptor: {}", e);
                return None;
            }
        };

        info!(
            "Deploying effect descriptor to {}",
            targets.descriptor_path.display()
        );
        let commands = deploy_commands(targets, descriptor.path(), policy.path());
        let service = self.service.clone();
        Some(tokio::spawn(async move {
            let mut report = DeployReport::default();
            for command in commands {
                let status = exec_logged(service.as_ref(), &command).await;
                report.results.push(CommandResult { command, status });
            }
            // Staged files must outlive the copy commands.
            drop((descriptor, policy));
            if report.succeeded() {
                info!("Effect descriptor deployed");
            } else {
                warn!("Effect descriptor deployment finished with errors");
            }
            report
        }))
    }

    /// Grant the invoking user access to the control directory in the background.
    pub fn grant_runtime_rights(&self, control_dir: &Path) -> Option<JoinHandle<Option<i32>>> {
        if !self.is_ready() {
            return None;
        }
        let uid = match current_uid() {
            Ok(uid) => uid,
            Err(e) => {
                warn!("Cannot determine current uid: {}", e);
                return None;
            }
        };
        let command = runtime_rights_command(control_dir, uid);
        let service = self.service.clone();
        Some(tokio::spawn(async move {
            exec_logged(service.as_ref(), &command).await
        }))
    }

    /// Stop background tasks.
    pub fn shutdown(&mut self) {
        self.abort_tasks();
    }
}

impl Drop for PrivilegeBroker {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeService;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn broker(
        service: Arc<FakeService>,
        config: BrokerConfig,
    ) -> (PrivilegeBroker, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut broker = PrivilegeBroker::new(service, config);
        broker.set_listener(move |event| {
            let _ = tx.send(event);
        });
        (broker, rx)
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let service = FakeService::new(false, false, None);
        let (mut broker, _rx) = broker(service, BrokerConfig::default());
        assert_eq!(broker.state(), ConnectionState::Unchecked);
        assert_eq!(broker.check_availability().await, ConnectionState::Unavailable);
        assert_eq!(broker.status_message(), "Privilege broker (polkit) not running.");
        assert!(!broker.state().may_become_ready());
    }

    #[tokio::test]
    async fn test_missing_system_bus_is_unavailable() {
        let mut broker = PrivilegeBroker::new(
            Arc::new(UnreachableService::new("no system bus")),
            BrokerConfig::default(),
        );
        assert_eq!(broker.check_availability().await, ConnectionState::Unavailable);
        assert!(matches!(
            broker.run_command("true").await,
            Err(BrokerError::NotReady(ConnectionState::Unavailable))
        ));
    }

    #[tokio::test]
    async fn test_existing_authorization_is_ready() {
        let service = FakeService::new(true, true, None);
        let (mut broker, _rx) = broker(service.clone(), BrokerConfig::default());
        assert_eq!(broker.check_availability().await, ConnectionState::Ready);
        assert_eq!(service.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_granted_request_becomes_ready() {
        let service = FakeService::new(true, false, Some(true));
        let (mut broker, mut rx) = broker(service, BrokerConfig::default());
        assert_eq!(
            broker.check_availability().await,
            ConnectionState::PermissionRequested
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event, BrokerEvent::PermissionResult { granted: true });
        assert_eq!(broker.handle_event(event), ConnectionState::Ready);
        assert_eq!(broker.status_message(), "Privilege broker is ready.");
    }

    #[tokio::test]
    async fn test_denied_request_can_be_retried() {
        let config = BrokerConfig {
            auto_request_permission: false,
            ..Default::default()
        };
        let service = FakeService::new(true, false, Some(false));
        let (mut broker, mut rx) = broker(service.clone(), config);
        assert_eq!(
            broker.check_availability().await,
            ConnectionState::AvailableNoPermission
        );

        broker.request_permission();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            broker.handle_event(event),
            ConnectionState::AvailableNoPermission
        );

        broker.request_permission();
        assert_eq!(broker.state(), ConnectionState::PermissionRequested);
        rx.recv().await.unwrap();
        assert_eq!(service.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_outstanding_request_is_not_duplicated() {
        let service = FakeService::new(true, false, None);
        let (mut broker, _rx) = broker(service.clone(), BrokerConfig::default());
        broker.check_availability().await;
        broker.request_permission();
        broker.request_permission();
        // A recheck keeps the outstanding request.
        assert_eq!(
            broker.check_availability().await,
            ConnectionState::PermissionRequested
        );
        tokio::task::yield_now().await;
        assert_eq!(service.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_timeout_counts_as_denial() {
        let config = BrokerConfig {
            permission_timeout_secs: 0,
            ..Default::default()
        };
        let (mut broker, mut rx) = broker(FakeService::new(true, false, None), config);
        broker.check_availability().await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event, BrokerEvent::PermissionResult { granted: false });
        assert_eq!(
            broker.handle_event(event),
            ConnectionState::AvailableNoPermission
        );
    }

    #[tokio::test]
    async fn test_hanging_broker_counts_as_unavailable() {
        let config = BrokerConfig {
            check_timeout_ms: 20,
            ..Default::default()
        };
        let (mut broker, _rx) = broker(FakeService::hanging(), config);
        assert_eq!(broker.check_availability().await, ConnectionState::Unavailable);
    }

    #[tokio::test]
    async fn test_stale_permission_result_is_ignored() {
        let (mut broker, _rx) = broker(FakeService::ready(), BrokerConfig::default());
        broker.check_availability().await;
        assert_eq!(
            broker.handle_event(BrokerEvent::PermissionResult { granted: false }),
            ConnectionState::Ready
        );
    }

    #[tokio::test]
    async fn test_service_death_makes_unavailable() {
        let service = FakeService::new(true, true, None);
        let (mut broker, mut rx) = broker(service.clone(), BrokerConfig::default());
        broker.check_availability().await;

        service.lost.notify_one();
        let event = rx.recv().await.unwrap();
        assert_eq!(event, BrokerEvent::ServiceLost);
        assert_eq!(broker.handle_event(event), ConnectionState::Unavailable);
    }

    #[tokio::test]
    async fn test_run_command_requires_ready() {
        let service = FakeService::new(true, false, None);
        let config = BrokerConfig {
            auto_request_permission: false,
            ..Default::default()
        };
        let (mut broker, _rx) = broker(service.clone(), config);
        broker.check_availability().await;
        assert!(matches!(
            broker.run_command("true").await,
            Err(BrokerError::NotReady(ConnectionState::AvailableNoPermission))
        ));
        let targets = DeployTargets::from_worker_config(&WorkerConfig::default());
        assert!(broker.deploy_effect_descriptor(&targets).is_none());
        assert!(service.commands.lock().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_runs_fixed_sequence() {
        let service = FakeService::new(true, true, None);
        let (mut broker, _rx) = broker(service.clone(), BrokerConfig::default());
        broker.check_availability().await;

        let targets = DeployTargets {
            descriptor_path: PathBuf::from("/etc/globalfx/effects.toml"),
            bus_policy_path: PathBuf::from("/etc/dbus-1/system.d/org.globalfx.Worker.conf"),
            control_dir: PathBuf::from("/run/globalfx"),
        };
        let report = broker
            .deploy_effect_descriptor(&targets)
            .unwrap()
            .await
            .unwrap();
        assert!(report.succeeded());

        let commands = service.commands.lock().clone();
        assert_eq!(commands.len(), report.results.len());
        assert_eq!(commands[0], "mount -o remount,rw /");
        assert_eq!(commands[1], "mkdir -p '/etc/globalfx'");
        assert!(commands[2].starts_with("cp '"));
        assert!(commands[2].ends_with(" '/etc/globalfx/effects.toml'"));
        assert_eq!(commands[3], "chmod 644 '/etc/globalfx/effects.toml'");
        assert_eq!(commands[4], "chown root:root '/etc/globalfx/effects.toml'");
        assert_eq!(commands[8], "chown root:root '/etc/dbus-1/system.d/org.globalfx.Worker.conf'");
        // Root goes back to read-only once the files are in place.
        assert_eq!(commands[9], "mount -o remount,ro /");
        assert_eq!(commands.iter().filter(|c| c.contains("remount")).count(), 2);
        assert!(commands.contains(&"mkdir -p '/run/globalfx'".to_string()));
        assert_eq!(commands.last().unwrap(), "systemctl reload dbus");
    }

    #[test]
    fn test_paths_are_shell_quoted() {
        assert_eq!(
            runtime_rights_command(Path::new("/run/it's here"), 1000),
            r"setfacl -m u:1000:rwx '/run/it'\''s here'"
        );
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status_message(ConnectionState::Unchecked), "Checking privilege broker...");
        assert_eq!(status_message(ConnectionState::AvailableNoPermission), "Permission required.");
        assert!(ConnectionState::Unchecked.may_become_ready());
        assert!(!ConnectionState::Ready.may_become_ready());
        assert!(ConnectionState::PermissionRequested.is_available());
    }
}
