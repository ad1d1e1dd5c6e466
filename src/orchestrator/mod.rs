// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Effect orchestrator.
//!
//! A single task owns the privilege broker, the effect parameters, the user's
//! intent and the worker binding. Commands from the [`OrchestratorHandle`],
//! broker notifications, bind results and worker deaths all arrive on one
//! queue and are applied strictly in order, so a parameter written during a
//! reconnect replay always lands after the replay.

mod strategy;


use crate::broker::{BrokerEvent, ConnectionState, DeployReport, DeployTargets, PrivilegeBroker};
use crate::config::{AppConfig, ReconnectPolicy};
use crate::status::{EffectParameters, StatusSnapshot};
use crate::worker_client::{WorkerConnector, WorkerLink};
use globalfx_effect::{apply_parameter, EffectHandle, EffectPlatform, ParamId};
use globalfx_ipc::WorkerError;
use std::sync::Arc;
use strategy::{ActivePath, Strategy, WorkerBinding};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// Capacity of the status broadcast. Slow subscribers skip to newer snapshots.
const STATUS_CHANNEL_CAPACITY: usize = 64;

enum Command {
    Toggle,
    SetParameter(ParamId, f32),
    ForceRecheck,
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    Command(Command),
    Broker(BrokerEvent),
    WorkerConnected {
        generation: u64,
        link: Arc<dyn WorkerLink>,
    },
    BindFailed {
        generation: u64,
    },
    WorkerDisconnected {
        generation: u64,
    },
}

/// Sends from background tasks. Holds no strong reference, so the loop ends
/// once the handle is gone.
#[derive(Clone)]
struct EventSender(mpsc::WeakUnboundedSender<Event>);

impl EventSender {
    fn send(&self, event: Event) {
        if let Some(tx) = self.0.upgrade() {
            let _ = tx.send(event);
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// The single owner of a running orchestrator.
///
/// Every method only enqueues work and returns immediately.
pub struct OrchestratorHandle {
    events: mpsc::UnboundedSender<Event>,
    status: watch::Receiver<StatusSnapshot>,
    updates: broadcast::Sender<StatusSnapshot>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    fn command(&self, command: Command) {
        if self.events.send(Event::Command(command)).is_err() {
            warn!("Effect orchestrator is not running");
        }
    }

    /// Turn the effect on if it is off, off if it is on.
    pub fn toggle(&self) {
        self.command(Command::Toggle);
    }

    pub fn set_intensity(&self, value: f32) {
        self.command(Command::SetParameter(ParamId::Intensity, value));
    }

    pub fn set_spatial_width(&self, value: f32) {
        self.command(Command::SetParameter(ParamId::SpatialWidth, value));
    }

    pub fn set_distance(&self, value: f32) {
        self.command(Command::SetParameter(ParamId::Distance, value));
    }

    /// Ask the privilege broker again whether it is reachable and authorized.
    pub fn force_recheck(&self) {
        self.command(Command::ForceRecheck);
    }

    /// Latest published snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver of the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Stream starting with the current snapshot, then every change.
    pub fn status_stream(&self) -> WatchStream<StatusSnapshot> {
        WatchStream::new(self.status.clone())
    }

    /// One item per published transition.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.updates.subscribe()
    }

    /// Wait until every command queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Flush(tx));
        let _ = rx.await;
    }

    /// Turn the effect off, stop the worker and end the orchestrator task.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Shutdown(tx));
        let _ = rx.await;
        let _ = self.task.await;
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// State owned by the orchestrator task.
pub struct EffectOrchestrator {
    broker: PrivilegeBroker,
    connector: Arc<dyn WorkerConnector>,
    platform: Arc<dyn EffectPlatform>,
    config: AppConfig,
    params: EffectParameters,
    /// What the user asked for.
    desired: bool,
    /// What is actually running.
    active: ActivePath,
    binding: WorkerBinding,
    generation: u64,
    bind_task: Option<JoinHandle<()>>,
    watch_task: Option<JoinHandle<()>>,
    deploy_task: Option<JoinHandle<DeployReport>>,
    provisioned: bool,
    events: EventSender,
    status_tx: watch::Sender<StatusSnapshot>,
    updates_tx: broadcast::Sender<StatusSnapshot>,
}

impl EffectOrchestrator {
    /// Start the orchestrator task.
    ///
    /// The broker starts out unchecked; call
    /// [`OrchestratorHandle::force_recheck`] to check it.
    pub fn spawn(
        mut broker: PrivilegeBroker,
        connector: Arc<dyn WorkerConnector>,
        platform: Arc<dyn EffectPlatform>,
        config: AppConfig,
        params: EffectParameters,
    ) -> OrchestratorHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let events = EventSender(events_tx.downgrade());

        let broker_events = events.clone();
        broker.set_listener(move |event| broker_events.send(Event::Broker(event)));

        let params = params.clamped();
        let (updates_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot {
            enabled: false,
            privilege_ready: broker.is_ready(),
            privilege_message: broker.status_message().to_string(),
            intensity: params.intensity,
            spatial_width: params.spatial_width,
            distance: params.distance,
            active_path: None,
            activation_pending: false,
        });

        let orchestrator = Self {
            broker,
            connector,
            platform,
            config,
            params,
            desired: false,
            active: ActivePath::None,
            binding: WorkerBinding::Unbound,
            generation: 0,
            bind_task: None,
            watch_task: None,
            deploy_task: None,
            provisioned: false,
            events,
            status_tx,
            updates_tx: updates_tx.clone(),
        };

        let task = tokio::spawn(orchestrator.run(events_rx));
        OrchestratorHandle {
            events: events_tx,
            status: status_rx,
            updates: updates_tx,
            task,
        }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        info!("Effect orchestrator started");
        while let Some(event) = events.recv().await {
            match event {
                Event::Command(Command::Shutdown(done)) => {
                    self.shutdown().await;
                    self.publish();
                    let _ = done.send(());
                    return;
                }
                Event::Command(Command::Flush(done)) => {
                    let _ = done.send(());
                }
                event => {
                    self.handle_event(event).await;
                    self.publish();
                }
            }
        }
        // Handle dropped without an explicit shutdown.
        self.shutdown().await;
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(Command::Toggle) => self.toggle().await,
            Event::Command(Command::SetParameter(param, value)) => {
                self.set_parameter(param, value).await
            }
            Event::Command(Command::ForceRecheck) => {
                let previous = self.broker.state();
                self.broker.check_availability().await;
                self.on_privilege_status_changed(previous).await;
            }
            Event::Command(Command::Flush(_)) | Event::Command(Command::Shutdown(_)) => {}
            Event::Broker(event) => {
                let previous = self.broker.state();
                self.broker.handle_event(event);
                self.on_privilege_status_changed(previous).await;
            }
            Event::WorkerConnected { generation, link } => {
                self.on_worker_connected(generation, link).await
            }
            Event::BindFailed { generation } => self.on_bind_failed(generation),
            Event::WorkerDisconnected { generation } => {
                if self.binding.holds(generation) {
                    self.on_worker_disconnected();
                } else {
                    debug!("Ignoring disconnect of stale worker generation {}", generation);
                }
            }
        }
    }

    // ==================== Status ====================

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            enabled: self.active.is_active(),
            privilege_ready: self.broker.is_ready(),
            privilege_message: self.broker.status_message().to_string(),
            intensity: self.params.intensity,
            spatial_width: self.params.spatial_width,
            distance: self.params.distance,
            active_path: self.active.kind(),
            activation_pending: self.desired && !self.active.is_active(),
        }
    }

    /// Publish the current snapshot if it differs from the last one.
    fn publish(&self) {
        let snapshot = self.snapshot();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        if changed {
            debug!("Status: {}", snapshot.notification_text());
            let _ = self.updates_tx.send(snapshot);
        }
    }

    // ==================== Commands ====================

    async fn toggle(&mut self) {
        if self.active.is_active() {
            info!("Toggle: turning global effect off");
            self.desired = false;
            self.stop_active().await;
            return;
        }

        if self.desired {
            if self.binding.is_binding() {
                debug!("Toggle ignored, activation already waiting for the worker");
            } else {
                info!("Toggle: cancelling pending activation");
                self.desired = false;
            }
            return;
        }

        info!("Toggle: turning global effect on");
        self.desired = true;
        match strategy::select(self.broker.state(), &self.binding) {
            Strategy::Privileged(link) => self.activate_privileged(link).await,
            Strategy::AwaitWorker => {
                info!("Activation deferred until the worker connects");
                self.ensure_bound();
            }
            Strategy::Direct => {
                if let Some(handle) = self.create_direct().await {
                    self.active = ActivePath::Direct(handle);
                } else if self.broker.state().may_become_ready() {
                    info!(
                        "Direct path unavailable, activation waits for privilege ({})",
                        self.broker.state()
                    );
                    if self.broker.state() == ConnectionState::AvailableNoPermission
                        && self.config.broker.auto_request_permission
                    {
                        self.broker.request_permission();
                    }
                } else {
                    warn!(
                        "Cannot enable global effect: {}",
                        self.broker.status_message()
                    );
                    self.desired = false;
                }
            }
        }
    }

    async fn set_parameter(&mut self, param: ParamId, value: f32) {
        let stored = self.params.set(param, value);
        match &self.active {
            ActivePath::Privileged(link) => {
                let link = link.clone();
                if let Err(e) = link.set_parameter(param, stored).await {
                    self.on_call_failed("set_parameter", e);
                }
            }
            ActivePath::Direct(_) => {
                if let ActivePath::Direct(mut handle) =
                    std::mem::replace(&mut self.active, ActivePath::None)
                {
                    let written = tokio::task::spawn_blocking(move || {
                        apply_parameter(handle.as_mut(), param, stored);
                        handle
                    })
                    .await;
                    match written {
                        Ok(handle) => self.active = ActivePath::Direct(handle),
                        Err(e) => {
                            warn!("In-process effect lost while setting {}: {}", param.name(), e)
                        }
                    }
                }
            }
            ActivePath::None => {
                debug!("Stored {} = {:.3} for the next activation", param.name(), stored);
            }
        }
    }

    // ==================== Paths ====================

    /// Run the activation sequence on a bound worker. The privileged path
    /// replaces any in-process effect.
    async fn activate_privileged(&mut self, link: Arc<dyn WorkerLink>) {
        self.release_direct().await;
        match strategy::activate_worker(link.as_ref(), &self.params).await {
            Ok(true) => {
                info!("Global effect active through the privileged worker");
                self.active = ActivePath::Privileged(link);
            }
            Ok(false) => {
                warn!("Worker could not create the global effect");
                self.desired = false;
            }
            Err(e) if e.is_transport() => {
                self.on_call_failed("activation", e);
                if self.config.effect.reconnect == ReconnectPolicy::Manual {
                    self.desired = false;
                }
            }
            Err(e) => {
                // The worker answered but refused part of the sequence.
                self.on_call_failed("activation", e);
                let _ = link.release().await;
                self.desired = false;
            }
        }
    }

    /// Create the in-process effect off the event loop; the platform does file I/O.
    fn create_direct(
        &self,
    ) -> impl std::future::Future<Output = Option<Box<dyn EffectHandle>>> + Send + 'static {
        let platform = self.platform.clone();
        let params = self.params;
        async move {
            match tokio::task::spawn_blocking(move || {
                strategy::activate_direct(platform.as_ref(), &params)
            })
            .await
            {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Direct effect creation aborted: {}", e);
                    None
                }
            }
        }
    }

    async fn destroy_direct(handle: Box<dyn EffectHandle>) {
        let released = tokio::task::spawn_blocking(move || strategy::release_direct(handle)).await;
        if let Err(e) = released {
            warn!("Releasing the in-process effect failed: {}", e);
        }
    }

    async fn release_direct(&mut self) {
        match std::mem::replace(&mut self.active, ActivePath::None) {
            ActivePath::Direct(handle) => {
                info!("Privileged path takes over from the in-process effect");
                Self::destroy_direct(handle).await;
            }
            other => self.active = other,
        }
    }

    async fn stop_active(&mut self) {
        match std::mem::replace(&mut self.active, ActivePath::None) {
            ActivePath::Privileged(link) => {
                if let Err(e) = link.release().await {
                    self.on_call_failed("release", e);
                }
            }
            ActivePath::Direct(handle) => Self::destroy_direct(handle).await,
            ActivePath::None => {}
        }
    }

    /// A worker call failed. Transport failures mean the worker is gone.
    fn on_call_failed(&mut self, call: &str, error: WorkerError) {
        if error.is_transport() {
            warn!("Worker {} failed: {}", call, error);
            if self.binding.is_bound() {
                self.on_worker_disconnected();
            }
        } else {
            warn!("Worker rejected {}: {}", call, error);
        }
    }

    // ==================== Privilege ====================

    async fn on_privilege_status_changed(&mut self, previous: ConnectionState) {
        let state = self.broker.state();

        // Also on a recheck that finds privilege still ready: a dead or
        // missing worker gets bound again.
        if state == ConnectionState::Ready {
            self.provision();
            self.ensure_bound();
            return;
        }

        if state == previous {
            return;
        }

        if previous == ConnectionState::Ready {
            self.unbind().await;
        }

        if !self.desired
            || self.active.is_active()
            || self.config.effect.reconnect != ReconnectPolicy::Manual
        {
            return;
        }
        if !state.may_become_ready() {
            info!("Dropping pending activation, privilege broker is {}", state);
            self.desired = false;
        } else if previous == ConnectionState::PermissionRequested
            && state == ConnectionState::AvailableNoPermission
        {
            info!("Dropping pending activation, permission was denied");
            self.desired = false;
        }
    }

    /// One-time descriptor deployment and rights grant after privilege is first ready.
    fn provision(&mut self) {
        if self.provisioned {
            return;
        }
        self.provisioned = true;

        let worker = &self.config.worker;
        if self.config.broker.deploy_descriptor {
            self.deploy_task = self
                .broker
                .deploy_effect_descriptor(&DeployTargets::from_worker_config(worker));
        }
        if self.config.broker.grant_runtime_rights {
            // Detached; the result is only logged.
            let _ = self.broker.grant_runtime_rights(&worker.control_dir);
        }
    }

    // ==================== Worker binding ====================

    fn ensure_bound(&mut self) {
        if !self.broker.is_ready() {
            return;
        }
        match self.binding {
            WorkerBinding::Unbound | WorkerBinding::Dead => self.start_bind(),
            WorkerBinding::Binding { .. } | WorkerBinding::Bound { .. } => {}
        }
    }

    fn start_bind(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        self.binding = WorkerBinding::Binding { generation };
        info!("Binding privileged worker (generation {})", generation);

        let connector = self.connector.clone();
        let events = self.events.clone();
        let deploy = self.deploy_task.take();
        let attempts = self.config.worker.bind_attempts.max(1);
        let bind_timeout = self.config.worker.bind_timeout();
        let retry_delay = self.config.worker.retry_delay();

        self.bind_task = Some(tokio::spawn(async move {
            // The worker needs the deployed descriptor to create the effect.
            if let Some(deploy) = deploy {
                let _ = deploy.await;
            }

            for attempt in 1..=attempts {
                match tokio::time::timeout(bind_timeout, connector.connect()).await {
                    Ok(Ok(link)) => {
                        events.send(Event::WorkerConnected { generation, link });
                        return;
                    }
                    Ok(Err(e)) => {
                        warn!("Worker bind attempt {}/{} failed: {}", attempt, attempts, e)
                    }
                    Err(_) => warn!(
                        "Worker bind attempt {}/{} timed out after {:?}",
                        attempt, attempts, bind_timeout
                    ),
                }
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
            events.send(Event::BindFailed { generation });
        }));
    }

    async fn on_worker_connected(&mut self, generation: u64, link: Arc<dyn WorkerLink>) {
        if !self.binding.awaits(generation) {
            debug!("Discarding worker from abandoned bind {}", generation);
            return;
        }
        info!("Privileged worker bound (generation {})", generation);
        self.bind_task = None;
        self.binding = WorkerBinding::Bound {
            generation,
            link: link.clone(),
        };

        let watched = link.clone();
        let events = self.events.clone();
        self.watch_task = Some(tokio::spawn(async move {
            watched.closed().await;
            events.send(Event::WorkerDisconnected { generation });
        }));

        if self.desired {
            info!("Replaying activation on the new worker");
            self.activate_privileged(link).await;
        }
    }

    fn on_bind_failed(&mut self, generation: u64) {
        if !self.binding.awaits(generation) {
            return;
        }
        warn!(
            "Giving up on the privileged worker after {} attempts",
            self.config.worker.bind_attempts.max(1)
        );
        self.bind_task = None;
        self.binding = WorkerBinding::Dead;
        if !self.active.is_active() {
            self.desired = false;
        }
    }

    fn on_worker_disconnected(&mut self) {
        warn!("Privileged worker connection lost");
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
        self.binding = WorkerBinding::Dead;
        if matches!(self.active, ActivePath::Privileged(_)) {
            self.active = ActivePath::None;
            if self.config.effect.reconnect == ReconnectPolicy::Manual {
                self.desired = false;
            }
        }
    }

    /// Drop the worker binding, asking a bound worker to exit.
    async fn unbind(&mut self) {
        if let Some(task) = self.bind_task.take() {
            task.abort();
        }
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
        if matches!(self.active, ActivePath::Privileged(_)) {
            warn!("Privilege lost while the effect was active, turning it off");
            self.active = ActivePath::None;
            if self.config.effect.reconnect == ReconnectPolicy::Manual {
                self.desired = false;
            }
        }
        if let WorkerBinding::Bound { link, .. } =
            std::mem::replace(&mut self.binding, WorkerBinding::Unbound)
        {
            if let Err(e) = link.destroy_process().await {
                debug!("Worker did not acknowledge destroy_process: {}", e);
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down effect orchestrator");
        self.desired = false;
        self.stop_active().await;
        self.unbind().await;
        if let Some(task) = self.deploy_task.take() {
            task.abort();
        }
        self.broker.shutdown();
    }
}
