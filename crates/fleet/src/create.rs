//! `create` and `create-all`: provision nodes from the golden image.
//!
//! Per-node pipeline: existence check, seed ISO, base descriptor dump and
//! rewrite, disk clone, define + start. The rewrite is side-effect-free, so
//! a bad base descriptor aborts the node before any disk or hypervisor
//! mutation. `create-all` reports per-node failures and keeps going.

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::{
    eyre::{eyre, Context as _},
    Result,
};
use tracing::{error, info};
use uuid::Uuid;

use crate::cloud_init::SeedDocuments;
use crate::config::{FleetConfig, NodeSpec};
use crate::domain_xml::{self, DomainRewrite};
use crate::qemu_img::{self, CloneStrategy};
use crate::seed_iso::SeedIsoBuilder;
use crate::xml_utils;
use crate::GlobalOpts;

/// Options for provisioning a single node.
#[derive(Debug, Parser)]
pub struct CreateOpts {
    /// Name of the node to provision (must appear in the fleet file)
    pub name: String,
}

/// Provision one node by name.
pub fn run(global: &GlobalOpts, opts: CreateOpts) -> Result<()> {
    let config = global.load_config()?;
    let node = config.find_node(&opts.name).ok_or_else(|| {
        eyre!("node '{}' is not defined in {}", opts.name, global.config)
    })?;
    provision_node(global, &config, node)
}

/// Provision every node in the fleet file, continuing past failures.
pub fn run_all(global: &GlobalOpts) -> Result<()> {
    let config = global.load_config()?;
    let mut failed = 0usize;
    for node in config.nodes() {
        if let Err(err) = provision_node(global, &config, node) {
            error!("provisioning node '{}' failed: {:#}", node.name, err);
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(eyre!("{} node(s) failed to provision", failed));
    }
    Ok(())
}

fn provision_node(global: &GlobalOpts, config: &FleetConfig, node: &NodeSpec) -> Result<()> {
    let virsh = global.virsh();

    // Each node re-queries the registry, so a node created earlier in the
    // same run is visible here.
    if virsh.domain_exists(&node.name)? {
        info!("domain '{}' already exists, skipping", node.name);
        return Ok(());
    }

    let ssh_keys = config.load_ssh_public_keys()?;
    let docs = SeedDocuments::new(node, &config.ssh_user, ssh_keys, &config.cloud_init)?;
    let seed = SeedIsoBuilder::new(&global.seed_dir, &node.name);
    let iso_path = seed
        .build(&docs)
        .with_context(|| format!("Failed to build seed ISO for '{}'", node.name))?;
    info!("seed ISO for '{}' at {}", node.name, iso_path);

    let base_xml = virsh.dump_domain_xml(&config.base_vm_name)?;
    let base = xml_utils::parse_xml(&base_xml)
        .with_context(|| format!("Failed to parse descriptor of '{}'", config.base_vm_name))?;
    let base_disk =
        Utf8PathBuf::from(domain_xml::base_disk_source(&base, &config.base_vm_name)?);
    let disk_path = qemu_img::clone_path_for(&base_disk, &node.name);

    let uuid = Uuid::new_v4().to_string();
    let rewrite = DomainRewrite {
        name: &node.name,
        uuid: &uuid,
        vcpus: node.vcpu,
        memory_gb: node.memory_gb,
        disk_path: disk_path.as_str(),
        mac_address: &node.mac_address,
        bridge: &config.bridge,
        seed_iso: iso_path.as_str(),
    };
    let descriptor = domain_xml::transform(&base, &rewrite)?.to_xml_string()?;

    let strategy = CloneStrategy::for_node(node.cow_clone);
    qemu_img::clone_disk(strategy, &base_disk, &disk_path, node.disk_gb)?;
    info!("disk for '{}' cloned to {} ({:?})", node.name, disk_path, strategy);

    virsh.create_domain(&node.name, &descriptor)?;
    info!("node '{}' provisioned", node.name);
    Ok(())
}
