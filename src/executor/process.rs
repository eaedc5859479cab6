//! Application launch and termination.

use std::process::Command;

use sysinfo::System;

use crate::errors::{AgentError, AgentResult};

/// Launches an application by name via an OS process spawn.
pub fn open_application(application_name: &str) -> AgentResult<()> {
    tracing::info!(application = %application_name, "opening application");
    let spawn = if cfg!(target_os = "macos") {
        Command::new("open").arg("-a").arg(application_name).spawn()
    } else {
        Command::new(application_name).spawn()
    };
    match spawn {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::error!(application = %application_name, error = %e, "spawn failed");
            Err(AgentError::ApplicationNotFound(application_name.to_string()))
        }
    }
}

/// Terminates the first running process whose name contains the given
/// application name, case-insensitively.
pub fn close_application(application_name: &str) -> AgentResult<()> {
    tracing::info!(application = %application_name, "closing application");
    let needle = application_name.to_lowercase();
    let sys = System::new_all();
    for (pid, process) in sys.processes() {
        if process.name().to_lowercase().contains(&needle) {
            let killed = process.kill();
            tracing::info!(
                application = %application_name,
                pid = pid.as_u32(),
                killed,
                "terminated matching process"
            );
            return Ok(());
        }
    }
    tracing::warn!(application = %application_name, "no matching running process");
    Err(AgentError::ApplicationNotFound(application_name.to_string()))
}
