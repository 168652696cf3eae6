//! Extensions for `std::process::Command` used by the external tool wrappers.

use std::process::{Command, Output};

use crate::error::ProvisionError;

/// Render a command for error messages: program followed by its arguments.
fn render_command(cmd: &Command) -> String {
    let mut rendered = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

/// Run a command, capture its output, and map failure to a typed error.
pub trait CommandRunExt {
    /// Run to completion, capturing stdout/stderr. Non-zero exit becomes
    /// [`ProvisionError::ExternalTool`] carrying the command and status.
    fn run_checked(&mut self) -> Result<Output, ProvisionError>;

    /// Like [`CommandRunExt::run_checked`], returning stdout as a string.
    fn run_capture_stdout(&mut self) -> Result<String, ProvisionError>;
}

impl CommandRunExt for Command {
    fn run_checked(&mut self) -> Result<Output, ProvisionError> {
        let command = render_command(self);
        let output = self.output().map_err(|source| ProvisionError::Spawn {
            command: command.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(ProvisionError::ExternalTool {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(output)
    }

    fn run_capture_stdout(&mut self) -> Result<String, ProvisionError> {
        let output = self.run_checked()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
