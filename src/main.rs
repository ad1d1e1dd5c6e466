// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! globalfx - system-wide audio effect controller.
//!
//! Reads line commands from stdin and logs every status change. Runs until
//! `quit`, SIGTERM or SIGINT.

use globalfx::broker::{PolkitService, PrivilegeService, UnreachableService};
use globalfx::config::{AppConfig, ConfigManager};
use globalfx::single_instance::{self, InstanceError};
use globalfx::worker_client::PrivilegedWorkerConnector;
use globalfx::{EffectOrchestrator, EffectParameters, OrchestratorHandle, PrivilegeBroker};
use globalfx_effect::FileControlPlatform;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// A parsed stdin command.
#[derive(Debug, Clone, Copy, PartialEq)]
enum LineCommand {
    Toggle,
    Intensity(f32),
    Width(f32),
    Distance(f32),
    Recheck,
    Status,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
fn parse_line(line: &str) -> Result<Option<LineCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(word) = words.next() else {
        return Ok(None);
    };

    let mut value = || -> Result<f32, String> {
        let raw = words
            .next()
            .ok_or_else(|| format!("'{}' needs a value", word))?;
        raw.parse::<f32>()
            .map_err(|_| format!("'{}' is not a number", raw))
    };

    let command = match word {
        "toggle" => LineCommand::Toggle,
        "intensity" => LineCommand::Intensity(value()?),
        "width" => LineCommand::Width(value()?),
        "distance" => LineCommand::Distance(value()?),
        "recheck" => LineCommand::Recheck,
        "status" => LineCommand::Status,
        "quit" | "exit" => LineCommand::Quit,
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(command))
}

/// Apply a command. Returns `false` when the controller should stop.
async fn run_command(handle: &OrchestratorHandle, command: LineCommand) -> bool {
    match command {
        LineCommand::Toggle => handle.toggle(),
        LineCommand::Intensity(v) => handle.set_intensity(v),
        LineCommand::Width(v) => handle.set_spatial_width(v),
        LineCommand::Distance(v) => handle.set_distance(v),
        LineCommand::Recheck => handle.force_recheck(),
        LineCommand::Status => {
            handle.flush().await;
            let status = handle.status();
            println!("{}", status.notification_text());
            println!("  privilege: {}", status.privilege_message);
            println!(
                "  intensity {:.2}, width {:.2}, distance {:.2}",
                status.intensity, status.spatial_width, status.distance
            );
        }
        LineCommand::Quit => return false,
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::from_default_env()
                .add_directive("globalfx=debug".parse()?)
                .add_directive("zbus=warn".parse()?),
        )
        .init();

    info!("Starting globalfx");

    let _instance = match single_instance::acquire().await {
        Ok(guard) => Some(guard),
        Err(InstanceError::AlreadyRunning) => {
            info!("Another globalfx controller is already running, exiting");
            return Ok(());
        }
        Err(e) => {
            warn!("Single-instance check unavailable: {}", e);
            None
        }
    };

    let config_manager = ConfigManager::new()?;
    let config = config_manager.load_config().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    let params = config_manager.load_parameters().unwrap_or_else(|e| {
        warn!("Failed to load effect parameters, using defaults: {}", e);
        EffectParameters::default()
    });

    // Without polkit the broker reports Unavailable and only the direct path is used.
    let service: Arc<dyn PrivilegeService> =
        match PolkitService::connect(config.broker.polkit_action.clone()).await {
            Ok(service) => Arc::new(service),
            Err(e) => {
                warn!("Cannot reach the privilege broker: {}", e);
                Arc::new(UnreachableService::new(e.to_string()))
            }
        };
    let broker = PrivilegeBroker::new(service.clone(), config.broker.clone());
    let connector = Arc::new(PrivilegedWorkerConnector::new(
        service,
        config.worker.clone(),
    ));
    let platform = Arc::new(FileControlPlatform::new(
        config.worker.control_dir.clone(),
        config.worker.descriptor_path.clone(),
    ));

    let handle = EffectOrchestrator::spawn(broker, connector, platform, config, params);
    handle.force_recheck();

    // Log transitions and persist parameter changes.
    let mut updates = handle.subscribe();
    let status_task = tokio::spawn(async move {
        let mut saved = params.clamped();
        loop {
            match updates.recv().await {
                Ok(snapshot) => {
                    info!("{}", snapshot.notification_text());
                    let current = snapshot.parameters();
                    if current != saved {
                        match config_manager.save_parameters(&current) {
                            Ok(()) => saved = current,
                            Err(e) => warn!("Failed to save effect parameters: {}", e),
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => debug!("Skipped {} status updates", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(command)) => {
                        if !run_command(&handle, command).await {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => {
                    debug!("stdin closed, waiting for a signal");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    handle.shutdown().await;
    let _ = status_task.await;
    info!("globalfx stopped");
    Ok(())
}
