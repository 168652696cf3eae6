//! Golden-image VM fleet provisioning.
//!
//! vmfleet clones a libvirt golden-image domain into per-node VMs: it
//! generates a cloud-init seed ISO carrying each node's identity (hostname,
//! static network, SSH trust, MAC address), clones the golden disk image,
//! rewrites the domain XML, and defines/starts the result with virsh.

use camino::Utf8PathBuf;
use color_eyre::Result;

pub mod cloud_init;
pub mod cmdext;
pub mod config;
pub mod create;
pub mod domain_xml;
pub mod error;
pub mod list;
pub mod qemu_img;
pub mod rm;
pub mod seed_iso;
pub mod virsh;
pub mod xml_utils;

/// Global options shared by every subcommand.
#[derive(Debug, clap::Parser)]
pub struct GlobalOpts {
    /// Path to the fleet configuration file
    #[clap(long, global = true, default_value = "fleet.yaml")]
    pub config: Utf8PathBuf,

    /// Libvirt connection URI (e.g. qemu:///system)
    #[clap(long, global = true)]
    pub connect: Option<String>,

    /// Directory where per-node seed files and ISOs are staged
    #[clap(long, global = true, default_value = "cloud-init-data")]
    pub seed_dir: Utf8PathBuf,
}

impl GlobalOpts {
    /// Load the fleet configuration file.
    pub fn load_config(&self) -> Result<config::FleetConfig> {
        config::FleetConfig::load(&self.config)
    }

    /// Build a virsh handle for the configured connection.
    pub fn virsh(&self) -> virsh::Virsh {
        virsh::Virsh::new(self.connect.clone())
    }
}
