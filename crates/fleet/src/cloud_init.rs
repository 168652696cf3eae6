//! Cloud-init NoCloud document generation.
//!
//! Builds the three seed documents consumed by the guest's first boot:
//! `user-data` (accounts, packages, commands), `meta-data` (instance
//! identity), and `network-config` (static addressing). Document structure is
//! expressed as serde types so rendering is a pure function of the inputs;
//! the only nondeterminism is the instance-id suffix, isolated in
//! [`instance_id_for`].

use color_eyre::{eyre::Context as _, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{CloudInitDefaults, NodeSpec};
use crate::error::ProvisionError;

/// Marker line cloud-init requires at the top of user-data.
pub const CLOUD_CONFIG_MARKER: &str = "#cloud-config";

/// Sudo grant for the administrative account.
const ADMIN_SUDO: &str = "ALL=(ALL) NOPASSWD:ALL";

/// The `user-data` document: first-boot account and package directives.
#[derive(Debug, Clone, Serialize)]
pub struct UserData {
    hostname: String,
    manage_etc_hosts: bool,
    disable_root_pw: bool,
    users: Vec<UserAccount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timezone: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    package_update: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    runcmd: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct UserAccount {
    name: String,
    sudo: String,
    ssh_authorized_keys: Vec<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl UserData {
    /// Render as `#cloud-config` YAML.
    ///
    /// Optional directives left unset in the fleet file are absent from the
    /// output entirely, so the guest agent sees no no-op keys.
    pub fn render(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize user-data")?;
        Ok(format!("{}\n{}", CLOUD_CONFIG_MARKER, yaml))
    }
}

/// The `meta-data` document: instance identity.
#[derive(Debug, Clone, Serialize)]
pub struct MetaData {
    /// Unique id for this generation; cloud-init re-runs first boot when it
    /// changes.
    #[serde(rename = "instance-id")]
    pub instance_id: String,
    /// Hostname reported to the guest.
    #[serde(rename = "local-hostname")]
    pub local_hostname: String,
}

impl MetaData {
    /// Render as pretty-printed JSON.
    pub fn render(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize meta-data")
    }
}

/// Derive a fresh instance id from the hostname plus a short random suffix.
pub fn instance_id_for(hostname: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", hostname, &suffix[..8])
}

/// The `network-config` document: one statically addressed interface.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkConfig {
    network: NetworkSection,
}

#[derive(Debug, Clone, Serialize)]
struct NetworkSection {
    version: u32,
    ethernets: Ethernets,
}

#[derive(Debug, Clone, Serialize)]
struct Ethernets {
    eth0: EthernetConfig,
}

#[derive(Debug, Clone, Serialize)]
struct EthernetConfig {
    dhcp4: bool,
    addresses: Vec<String>,
    gateway4: String,
    nameservers: Nameservers,
}

#[derive(Debug, Clone, Serialize)]
struct Nameservers {
    addresses: Vec<String>,
}

impl NetworkConfig {
    /// Static /24 addressing for `eth0` with DHCP disabled.
    pub fn new(ip_address: &str, gateway: &str, nameservers: &[String]) -> Self {
        Self {
            network: NetworkSection {
                version: 2,
                ethernets: Ethernets {
                    eth0: EthernetConfig {
                        dhcp4: false,
                        addresses: vec![format!("{}/24", ip_address)],
                        gateway4: gateway.to_owned(),
                        nameservers: Nameservers {
                            addresses: nameservers.to_vec(),
                        },
                    },
                },
            },
        }
    }

    /// Render as YAML.
    pub fn render(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize network-config")
    }
}

/// The three documents generated for one node.
#[derive(Debug, Clone)]
pub struct SeedDocuments {
    /// First-boot account and package directives.
    pub user_data: UserData,
    /// Instance identity.
    pub meta_data: MetaData,
    /// Static network configuration.
    pub network_config: NetworkConfig,
}

impl SeedDocuments {
    /// Build the documents for `node` from the global defaults.
    ///
    /// The administrative account always gets passwordless sudo and all
    /// supplied keys; an empty key list is rejected here rather than
    /// producing an unreachable guest.
    pub fn new(
        node: &NodeSpec,
        ssh_user: &str,
        ssh_keys: Vec<String>,
        defaults: &CloudInitDefaults,
    ) -> Result<Self, ProvisionError> {
        node.require_ssh_keys(&ssh_keys)?;

        let user_data = UserData {
            hostname: node.name.clone(),
            manage_etc_hosts: true,
            disable_root_pw: true,
            users: vec![UserAccount {
                name: ssh_user.to_owned(),
                sudo: ADMIN_SUDO.to_owned(),
                ssh_authorized_keys: ssh_keys,
            }],
            timezone: defaults.timezone.clone(),
            package_update: defaults.package_update,
            packages: defaults.packages.clone(),
            runcmd: defaults.runcmd.clone(),
        };

        let meta_data = MetaData {
            instance_id: instance_id_for(&node.name),
            local_hostname: node.name.clone(),
        };

        let network_config =
            NetworkConfig::new(&node.ip_address, &defaults.gateway, &defaults.nameservers);

        Ok(Self {
            user_data,
            meta_data,
            network_config,
        })
    }
}
