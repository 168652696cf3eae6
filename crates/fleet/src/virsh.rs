//! virsh-driven domain lifecycle operations.
//!
//! All hypervisor interaction goes through the `virsh` command line tool:
//! listing domains, dumping the golden image's descriptor, and the
//! define/start/destroy/undefine lifecycle. Creation is idempotent at the
//! name level, and the transient descriptor file handed to `virsh define` is
//! removed on every path.

use std::io::Write as _;
use std::process::Command;

use color_eyre::{eyre::Context as _, Result};
use tracing::{debug, info};

use crate::cmdext::CommandRunExt;
use crate::error::ProvisionError;

/// Handle for issuing virsh commands against one hypervisor connection.
#[derive(Debug, Clone, Default)]
pub struct Virsh {
    /// Optional libvirt connection URI (e.g. `qemu:///system`).
    pub connect: Option<String>,
}

impl Virsh {
    /// Create a handle, optionally bound to a connection URI.
    pub fn new(connect: Option<String>) -> Self {
        Self { connect }
    }

    /// Build a `virsh` command with the connection URI applied.
    fn command(&self) -> Command {
        let mut cmd = Command::new("virsh");
        if let Some(ref uri) = self.connect {
            cmd.arg("-c").arg(uri);
        }
        cmd
    }

    /// Names of all domains, including stopped ones.
    pub fn list_all_domains(&self) -> Result<Vec<String>, ProvisionError> {
        let stdout = self
            .command()
            .args(["list", "--all", "--name"])
            .run_capture_stdout()?;
        Ok(parse_domain_list(&stdout))
    }

    /// Whether a domain of this name is already registered.
    pub fn domain_exists(&self, name: &str) -> Result<bool, ProvisionError> {
        Ok(self.list_all_domains()?.iter().any(|domain| domain == name))
    }

    /// The domain's full XML descriptor.
    pub fn dump_domain_xml(&self, name: &str) -> Result<String, ProvisionError> {
        self.command().args(["dumpxml", name]).run_capture_stdout()
    }

    /// Register and start a domain from its descriptor.
    ///
    /// Returns false without touching the hypervisor when a domain of this
    /// name already exists. The descriptor goes through a transient file
    /// which is removed whether or not define/start succeed; a start failure
    /// leaves the domain defined-but-stopped and is reported as such.
    pub fn create_domain(&self, name: &str, descriptor_xml: &str) -> Result<bool> {
        if self.domain_exists(name)? {
            info!("domain '{}' already exists, skipping creation", name);
            return Ok(false);
        }

        let mut file = tempfile::Builder::new()
            .prefix("vmfleet-")
            .suffix(".xml")
            .tempfile()
            .context("Failed to create transient descriptor file")?;
        file.write_all(descriptor_xml.as_bytes())
            .context("Failed to write transient descriptor file")?;
        file.flush().context("Failed to flush transient descriptor file")?;
        let descriptor_path = file.path().to_string_lossy().into_owned();

        self.command()
            .args(["define", "--file", &descriptor_path])
            .run_checked()
            .with_context(|| {
                format!("Failed to define domain '{}' from {}", name, descriptor_path)
            })?;
        debug!("defined domain '{}' from {}", name, descriptor_path);

        if let Err(source) = self.command().args(["start", name]).run_checked() {
            return Err(ProvisionError::StartFailed {
                domain: name.to_owned(),
                descriptor: descriptor_path,
                source: Box::new(source),
            }
            .into());
        }

        info!("domain '{}' defined and started", name);
        Ok(true)
    }

    /// Force-stop (best effort) and unregister a domain.
    ///
    /// The destroy step is allowed to fail since the domain may already be
    /// stopped; a failed undefine is the deletion error. Backing disk images
    /// and seed directories are not reclaimed.
    pub fn delete_domain(&self, name: &str) -> Result<()> {
        if let Err(err) = self.command().args(["destroy", name]).run_checked() {
            debug!("ignoring destroy failure for '{}': {}", name, err);
        }
        self.command()
            .args(["undefine", name])
            .run_checked()
            .with_context(|| format!("Failed to undefine domain '{}'", name))?;
        Ok(())
    }
}

/// Parse `virsh list --all --name` output: one name per line, blanks
/// dropped.
fn parse_domain_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim().to_owned())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered_args(virsh: &Virsh) -> Vec<String> {
        let cmd = virsh.command();
        cmd.get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_parse_domain_list() {
        let stdout = "golden-image\n node-a \n\nnode-b\n\n";
        assert_eq!(
            parse_domain_list(stdout),
            vec!["golden-image", "node-a", "node-b"]
        );
        assert!(parse_domain_list("\n\n").is_empty());
        assert!(parse_domain_list("").is_empty());
    }

    #[test]
    fn test_command_without_connection() {
        let virsh = Virsh::default();
        assert_eq!(virsh.command().get_program(), "virsh");
        assert!(rendered_args(&virsh).is_empty());
    }

    #[test]
    fn test_command_with_connection_uri() {
        let virsh = Virsh::new(Some("qemu:///system".to_owned()));
        assert_eq!(rendered_args(&virsh), vec!["-c", "qemu:///system"]);
    }
}
