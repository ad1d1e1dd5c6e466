// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command line configuration for the worker.

use clap::Parser;
use globalfx_effect::control_file::{DEFAULT_CONTROL_DIR, DEFAULT_DESCRIPTOR_PATH};
use globalfx_ipc::BusKind;
use std::path::PathBuf;

/// Privileged owner of the globalfx system-wide effect.
///
/// Launched by the controller; not meant to be started by hand.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "globalfx-worker")]
#[command(version, about, long_about = None)]
pub struct WorkerArgs {
    /// Message bus to serve on (system or session)
    #[arg(long, default_value = "system")]
    pub bus: BusKind,

    /// Directory holding the effect control slot
    #[arg(long, default_value = DEFAULT_CONTROL_DIR)]
    pub control_dir: PathBuf,

    /// Deployed effect descriptor
    #[arg(long, default_value = DEFAULT_DESCRIPTOR_PATH)]
    pub descriptor: PathBuf,

    /// Unique bus name of the launching controller. Only it may call the
    /// worker, and the worker exits when it vanishes.
    #[arg(long)]
    pub owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<WorkerArgs, clap::Error> {
        WorkerArgs::try_parse_from(std::iter::once("globalfx-worker").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.bus, BusKind::System);
        assert_eq!(args.control_dir, PathBuf::from(DEFAULT_CONTROL_DIR));
        assert_eq!(args.descriptor, PathBuf::from(DEFAULT_DESCRIPTOR_PATH));
        assert_eq!(args.owner, None);
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&[
            "--bus",
            "session",
            "--control-dir",
            "/tmp/fx",
            "--descriptor",
            "/tmp/fx/effects.toml",
            "--owner",
            ":1.42",
        ])
        .unwrap();
        assert_eq!(args.bus, BusKind::Session);
        assert_eq!(args.control_dir, PathBuf::from("/tmp/fx"));
        assert_eq!(args.descriptor, PathBuf::from("/tmp/fx/effects.toml"));
        assert_eq!(args.owner.as_deref(), Some(":1.42"));
    }

    #[test]
    fn test_errors() {
        assert!(parse(&["--owner"]).is_err());
        assert!(parse(&["--bus", "user"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
