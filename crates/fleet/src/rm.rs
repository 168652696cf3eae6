//! `rm`: tear down a provisioned domain.

use clap::Parser;
use color_eyre::Result;
use tracing::info;

use crate::GlobalOpts;

/// Options for removing a domain.
#[derive(Debug, Parser)]
pub struct RmOpts {
    /// Name of the domain to remove
    pub name: String,
}

/// Force-stop (best effort) and undefine the domain.
///
/// The cloned disk image and the seed directory are left in place; only the
/// hypervisor registration is removed.
pub fn run(global: &GlobalOpts, opts: RmOpts) -> Result<()> {
    global.virsh().delete_domain(&opts.name)?;
    info!("domain '{}' destroyed and undefined", opts.name);
    Ok(())
}
