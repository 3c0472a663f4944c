//! Host power control through the system shutdown command.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

use crate::hardware::capabilities::{HostAction, HostControl};

/// Runs `shutdown` (through `sudo` unless already root) for power actions.
#[derive(Debug, Clone)]
pub struct SystemHostControl {
    use_sudo: bool,
}

impl SystemHostControl {
    /// Host control that prefixes commands with `sudo -n`
    pub fn new() -> Self {
        Self { use_sudo: true }
    }

    /// Host control that invokes `shutdown` directly (daemon already privileged)
    pub fn without_sudo() -> Self {
        Self { use_sudo: false }
    }

    fn command_line(&self, action: HostAction) -> Vec<&'static str> {
        let flag = match action {
            HostAction::Reboot => "-r",
            HostAction::PowerOff => "-h",
        };
        let mut argv = Vec::with_capacity(4);
        if self.use_sudo {
            argv.extend(["sudo", "-n"]);
        }
        argv.extend(["shutdown", flag, "now"]);
        argv
    }
}

impl Default for SystemHostControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostControl for SystemHostControl {
    async fn execute(&self, action: HostAction) -> Result<()> {
        let argv = self.command_line(action);
        info!(?action, command = %argv.join(" "), "Executing host action");

        let status = Command::new(argv[0])
            .args(&argv[1..])
            .status()
            .await
            .with_context(|| format!("Failed to spawn '{}'", argv[0]))?;

        if !status.success() {
            warn!(?action, %status, "Host action exited unsuccessfully");
            anyhow::bail!("'{}' exited with {}", argv.join(" "), status);
        }
        Ok(())
    }
}
