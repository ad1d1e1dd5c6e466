// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hand-written fakes for the broker, worker and platform seams.

use crate::broker::{BrokerError, PrivilegeService};
use crate::worker_client::{WorkerConnector, WorkerLink};
use async_trait::async_trait;
use globalfx_effect::{
    decode_parameter, AudioSession, EffectHandle, EffectPlatform, ParamId, PlatformError, Uuid,
    SUCCESS,
};
use globalfx_ipc::WorkerError;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

// ============================================================================
// Privilege service
// ============================================================================

pub struct FakeService {
    pub reachable: AtomicBool,
    pub authorized: AtomicBool,
    /// Availability checks never answer.
    pub hang: AtomicBool,
    /// Answer to a permission request; `None` never answers.
    pub answer: Option<bool>,
    pub requests: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub lost: Notify,
}

impl FakeService {
    pub fn new(reachable: bool, authorized: bool, answer: Option<bool>) -> Arc<Self> {
        Arc::new(Self {
            reachable: AtomicBool::new(reachable),
            authorized: AtomicBool::new(authorized),
            hang: AtomicBool::new(false),
            answer,
            requests: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            lost: Notify::new(),
        })
    }

    /// Reachable and already authorized.
    pub fn ready() -> Arc<Self> {
        Self::new(true, true, None)
    }

    /// Connected to a broker that never answers.
    pub fn hanging() -> Arc<Self> {
        let service = Self::new(true, true, None);
        service.hang.store(true, Ordering::SeqCst);
        service
    }
}

#[async_trait]
impl PrivilegeService for FakeService {
    async fn ping(&self) -> Result<(), BrokerError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("not running".into()))
        }
    }

    async fn check_permission(&self) -> Result<bool, BrokerError> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn request_permission(&self) -> Result<bool, BrokerError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Some(granted) => Ok(granted),
            None => std::future::pending().await,
        }
    }

    async fn exec(&self, command: &str) -> Result<i32, BrokerError> {
        self.commands.lock().push(command.to_string());
        Ok(0)
    }

    async fn spawn_privileged(&self, _program: &Path, _args: &[String]) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn wait_until_lost(&self) -> Result<(), BrokerError> {
        self.lost.notified().await;
        Ok(())
    }
}

// ============================================================================
// Worker
// ============================================================================

/// A call received by a fake worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCall {
    Create,
    Release,
    SetEnabled(bool),
    SetParameter(i32, f32),
    DestroyProcess,
}

pub struct FakeLink {
    pub calls: Mutex<Vec<WorkerCall>>,
    pub create_succeeds: bool,
    /// Every call fails as if the bus connection dropped.
    pub broken: AtomicBool,
    pub gone: Notify,
}

impl FakeLink {
    fn new(create_succeeds: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            create_succeeds,
            broken: AtomicBool::new(false),
            gone: Notify::new(),
        })
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.calls.lock().clone()
    }

    pub fn creates(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| **c == WorkerCall::Create)
            .count()
    }

    fn record(&self, call: WorkerCall) -> Result<(), WorkerError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(WorkerError::Transport("connection closed".into()));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl WorkerLink for FakeLink {
    async fn create(&self) -> Result<bool, WorkerError> {
        self.record(WorkerCall::Create)?;
        Ok(self.create_succeeds)
    }

    async fn release(&self) -> Result<(), WorkerError> {
        self.record(WorkerCall::Release)
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), WorkerError> {
        self.record(WorkerCall::SetEnabled(enabled))
    }

    async fn set_parameter(&self, param: ParamId, value: f32) -> Result<(), WorkerError> {
        self.record(WorkerCall::SetParameter(param.raw(), value))
    }

    async fn destroy_process(&self) -> Result<(), WorkerError> {
        self.record(WorkerCall::DestroyProcess)
    }

    async fn closed(&self) {
        self.gone.notified().await;
    }
}

/// Hands out a fresh [`FakeLink`] per connect, optionally held back by a gate.
pub struct FakeConnector {
    pub links: Mutex<Vec<Arc<FakeLink>>>,
    pub attempts: AtomicUsize,
    pub fail: bool,
    pub create_succeeds: bool,
    gate: Option<Notify>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::plain())
    }

    /// Workers that cannot create the effect.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            create_succeeds: false,
            ..Self::plain()
        })
    }

    /// Every connect fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::plain()
        })
    }

    /// Connects block until [`FakeConnector::open_gate`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Notify::new()),
            ..Self::plain()
        })
    }

    fn plain() -> Self {
        Self {
            links: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail: false,
            create_succeeds: true,
            gate: None,
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Most recently connected link.
    pub fn last_link(&self) -> Option<Arc<FakeLink>> {
        self.links.lock().last().cloned()
    }
}

#[async_trait]
impl WorkerConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn WorkerLink>, WorkerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(WorkerError::Launch("no worker".into()));
        }
        let link = FakeLink::new(self.create_succeeds);
        self.links.lock().push(link.clone());
        Ok(link)
    }
}

// ============================================================================
// Platform
// ============================================================================

#[derive(Debug, Default)]
pub struct PlatformLog {
    pub created: usize,
    pub released: usize,
    pub enabled: bool,
    pub params: Vec<(i32, f32)>,
}

/// In-process platform that either allows global creation or refuses it.
pub struct FakePlatform {
    pub allow: bool,
    pub log: Arc<Mutex<PlatformLog>>,
}

impl FakePlatform {
    pub fn new(allow: bool) -> Arc<Self> {
        Arc::new(Self {
            allow,
            log: Arc::new(Mutex::new(PlatformLog::default())),
        })
    }
}

struct FakeHandle {
    log: Arc<Mutex<PlatformLog>>,
    enabled: bool,
    released: bool,
}

impl EffectPlatform for FakePlatform {
    fn create_global(
        &self,
        _type_id: Uuid,
        _effect_id: Uuid,
        _priority: i32,
        _session: AudioSession,
    ) -> Result<Box<dyn EffectHandle>, PlatformError> {
        if !self.allow {
            return Err(PlatformError::PermissionDenied("unprivileged".into()));
        }
        self.log.lock().created += 1;
        Ok(Box::new(FakeHandle {
            log: self.log.clone(),
            enabled: false,
            released: false,
        }))
    }
}

impl EffectHandle for FakeHandle {
    fn set_enabled(&mut self, enabled: bool) -> i32 {
        self.enabled = enabled;
        self.log.lock().enabled = enabled;
        SUCCESS
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn has_control(&self) -> bool {
        !self.released
    }

    fn set_parameter(&mut self, param: &[u8], value: &[u8]) -> i32 {
        if let Some(write) = decode_parameter(param, value) {
            self.log.lock().params.push(write);
        }
        SUCCESS
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.log.lock().released += 1;
        }
    }
}
