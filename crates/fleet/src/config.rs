//! Fleet configuration file parsing.
//!
//! The fleet file is a YAML document naming the golden image, the nodes to
//! provision from it, SSH trust material, and the global cloud-init defaults
//! shared by every node.

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::Context as _, Result};
use serde::Deserialize;
use std::fs;

use crate::error::ProvisionError;

/// Bridge the bridged interface of the base domain is expected to sit on.
pub const DEFAULT_BRIDGE: &str = "br0";
/// Gateway handed to guests when the fleet file does not set one; this is
/// the address libvirt assigns to its default NAT bridge.
pub const DEFAULT_GATEWAY: &str = "192.168.122.1";

/// Top-level fleet configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Name of the golden-image domain to clone.
    pub base_vm_name: String,

    /// Bridge name used to locate the interface that receives each node's
    /// MAC address.
    #[serde(default = "default_bridge")]
    pub bridge: String,

    /// Control-plane nodes, provisioned before the workers.
    #[serde(default)]
    pub control_plane_nodes: Vec<NodeSpec>,

    /// Worker nodes.
    #[serde(default)]
    pub worker_nodes: Vec<NodeSpec>,

    /// Login account created in every guest.
    pub ssh_user: String,

    /// Public keys installed for the login account.
    pub ssh_public_key_paths: Vec<Utf8PathBuf>,

    /// First-boot defaults shared by every node.
    #[serde(default)]
    pub cloud_init: CloudInitDefaults,
}

/// Identity and sizing for one VM.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSpec {
    /// Domain name and guest hostname; the unique key for the node.
    pub name: String,
    /// Static IPv4 address assigned on the bridge (always /24).
    pub ip_address: String,
    /// Virtual CPU count.
    pub vcpu: u32,
    /// Memory size in GiB.
    pub memory_gb: u32,
    /// Disk size in GiB for the cloned image.
    pub disk_gb: u32,
    /// MAC address for the bridged interface.
    pub mac_address: String,
    /// Clone the disk as a qcow2 overlay backed by the base image. Set to
    /// false for a full, independent copy.
    #[serde(default = "default_true")]
    pub cow_clone: bool,
}

/// Global cloud-init defaults from the fleet file.
#[derive(Debug, Clone, Deserialize)]
pub struct CloudInitDefaults {
    /// Nameservers written into every node's static network configuration.
    #[serde(default)]
    pub nameservers: Vec<String>,
    /// Default gateway for the static network configuration.
    #[serde(default = "default_gateway")]
    pub gateway: String,
    /// Guest timezone; omitted from user-data when unset.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Run a package index update on first boot.
    #[serde(default)]
    pub package_update: bool,
    /// Packages installed on first boot; omitted when empty.
    #[serde(default)]
    pub packages: Vec<String>,
    /// Commands run at the end of first boot; omitted when empty.
    #[serde(default)]
    pub runcmd: Vec<String>,
}

impl Default for CloudInitDefaults {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            gateway: default_gateway(),
            timezone: None,
            package_update: false,
            packages: Vec::new(),
            runcmd: Vec::new(),
        }
    }
}

fn default_bridge() -> String {
    DEFAULT_BRIDGE.to_owned()
}

fn default_gateway() -> String {
    DEFAULT_GATEWAY.to_owned()
}

fn default_true() -> bool {
    true
}

impl FleetConfig {
    /// Load and parse the fleet file at `path`.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet config {}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse fleet config {}", path))
    }

    /// All nodes in provisioning order: control-plane nodes first, then
    /// workers, each preserving file order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.control_plane_nodes.iter().chain(self.worker_nodes.iter())
    }

    /// Look up a node by name.
    pub fn find_node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes().find(|node| node.name == name)
    }

    /// Read the configured SSH public keys, one trimmed line per file.
    ///
    /// An empty key list in the fleet file is a usage error surfaced later by
    /// the seed document builder; an unreadable path is an error here.
    pub fn load_ssh_public_keys(&self) -> Result<Vec<String>> {
        self.ssh_public_key_paths
            .iter()
            .map(|path| {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read SSH public key {}", path))?;
                Ok(content.trim().to_owned())
            })
            .collect()
    }
}

impl NodeSpec {
    /// Usage check shared by the seed document builder: a node must carry at
    /// least one SSH public key to be reachable after first boot.
    pub fn require_ssh_keys(&self, keys: &[String]) -> Result<(), ProvisionError> {
        if keys.is_empty() {
            return Err(ProvisionError::EmptySshKeys {
                node: self.name.clone(),
            });
        }
        Ok(())
    }
}
