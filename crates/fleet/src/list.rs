//! `list`: show all domains known to the hypervisor.

use color_eyre::{eyre::Context as _, Result};

use crate::GlobalOpts;

/// Print every domain name, including stopped domains.
pub fn run(global: &GlobalOpts) -> Result<()> {
    let domains = global
        .virsh()
        .list_all_domains()
        .context("Failed to list domains")?;
    if domains.is_empty() {
        println!("No domains defined");
        return Ok(());
    }
    for name in domains {
        println!("{}", name);
    }
    Ok(())
}
