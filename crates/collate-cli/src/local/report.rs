use std::process::Command;
use tracing::{debug, info};

use collate_core::capability::{CapabilityError, CapabilityResult, ReportTrigger};
use collate_core::inventory::GroupId;

/// Spawns the configured report command with the group id appended and
/// waits for it.
pub struct CommandReport {
    command: Vec<String>,
}

impl CommandReport {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl ReportTrigger for CommandReport {
    fn trigger(&self, group: &GroupId) -> CapabilityResult<()> {
        let Some((program, args)) = self.command.split_first() else {
            debug!("No report command configured, skipping report for '{}'", group);
            return Ok(());
        };

        info!("Generating report for '{}'", group);
        let status = Command::new(program)
            .args(args)
            .arg(group.as_str())
            .status()
            .map_err(|e| CapabilityError::Report(format!("{program}: {e}")))?;
        if status.success() {
            Ok(())
        } else {
            Err(CapabilityError::Report(format!("{program} exited with {status}")))
        }
    }
}
