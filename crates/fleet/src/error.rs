//! Typed error kinds for the provisioning pipeline.
//!
//! Each "first matching element" lookup and each external tool invocation maps
//! its failure to a named variant here, so callers can report the offending
//! domain, bridge, or command instead of a generic message. Commands wrap
//! these into [`color_eyre::Report`] at the CLI boundary.

use std::process::ExitStatus;

/// Failures that abort provisioning of a single node.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Neither seed packaging tool is installed on the host.
    #[error(
        "neither 'cloud-localds' nor 'genisoimage' found in PATH; install one of them to build seed ISOs"
    )]
    MissingIsoTool,

    /// The base domain descriptor has no file-backed disk to clone from.
    #[error("base domain '{domain}' has no file-backed disk with device=\"disk\"")]
    MissingBaseDisk {
        /// Name of the base domain that was inspected.
        domain: String,
    },

    /// The base domain descriptor has no interface on the provisioning bridge.
    #[error("base domain '{domain}' has no interface on bridge '{bridge}'")]
    MissingBridgeInterface {
        /// Name of the base domain that was inspected.
        domain: String,
        /// Bridge name the node's static network configuration requires.
        bridge: String,
    },

    /// A node was configured without any SSH public keys.
    #[error("node '{node}' has no SSH public keys; at least one is required for first boot")]
    EmptySshKeys {
        /// Name of the offending node.
        node: String,
    },

    /// An external tool could not be launched at all.
    #[error("failed to launch {command}")]
    Spawn {
        /// The command line that failed to spawn.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// An external tool ran but exited non-zero.
    #[error("{command} exited with {status}: {stderr}")]
    ExternalTool {
        /// The command line that was run.
        command: String,
        /// The non-zero exit status.
        status: ExitStatus,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The domain was registered but could not be started; it is left
    /// defined-but-stopped and is not rolled back.
    #[error("domain '{domain}' was defined from {descriptor} but failed to start")]
    StartFailed {
        /// Name of the partially provisioned domain.
        domain: String,
        /// Path the transient descriptor was written to (removed afterwards).
        descriptor: String,
        /// The underlying `virsh start` failure.
        #[source]
        source: Box<ProvisionError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_iso_tool_names_both_tools() {
        let msg = ProvisionError::MissingIsoTool.to_string();
        assert!(msg.contains("cloud-localds"));
        assert!(msg.contains("genisoimage"));
    }

    #[test]
    fn test_lookup_errors_name_the_offender() {
        let err = ProvisionError::MissingBaseDisk {
            domain: "golden".into(),
        };
        assert!(err.to_string().contains("golden"));

        let err = ProvisionError::MissingBridgeInterface {
            domain: "golden".into(),
            bridge: "br0".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("golden"));
        assert!(msg.contains("br0"));
    }
}
