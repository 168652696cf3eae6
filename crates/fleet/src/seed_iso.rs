//! Seed ISO packaging for the NoCloud `cidata` volume.
//!
//! Materializes the rendered cloud-init documents in a per-node staging
//! directory and packages them into a single ISO-9660 volume the guest's
//! first-boot agent reads. Two packaging tools are supported because neither
//! is guaranteed to be installed: `cloud-localds` is tried first, then
//! `genisoimage` with an explicit `cidata` volume label.

use std::fs;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::Context as _, Result};
use tracing::debug;

use crate::cloud_init::SeedDocuments;
use crate::cmdext::CommandRunExt;
use crate::error::ProvisionError;

/// Volume label cloud-init's NoCloud datasource looks for.
pub const SEED_VOLUME_LABEL: &str = "cidata";

/// Which external tool authors the ISO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoTool {
    /// `cloud-localds`, the purpose-built cloud-init seed packager.
    CloudLocalds,
    /// `genisoimage` with explicit label and Joliet extensions.
    Genisoimage,
}

impl IsoTool {
    /// Probe the host for an available packaging tool.
    pub fn detect() -> Result<Self, ProvisionError> {
        Self::from_probe(
            which::which("cloud-localds").is_ok(),
            which::which("genisoimage").is_ok(),
        )
    }

    /// Resolve the fallback order from probe results: `cloud-localds` wins,
    /// `genisoimage` is the fallback, neither is fatal.
    pub fn from_probe(cloud_localds: bool, genisoimage: bool) -> Result<Self, ProvisionError> {
        if cloud_localds {
            Ok(IsoTool::CloudLocalds)
        } else if genisoimage {
            Ok(IsoTool::Genisoimage)
        } else {
            Err(ProvisionError::MissingIsoTool)
        }
    }
}

/// Builds the seed ISO for one node under a staging root.
#[derive(Debug)]
pub struct SeedIsoBuilder {
    staging_dir: Utf8PathBuf,
    iso_path: Utf8PathBuf,
}

impl SeedIsoBuilder {
    /// Stage under `<seed_root>/<hostname>/`, producing
    /// `<hostname>-cidata.iso` next to the rendered documents.
    pub fn new(seed_root: &Utf8Path, hostname: &str) -> Self {
        let staging_dir = seed_root.join(hostname);
        let iso_path = staging_dir.join(format!("{}-{}.iso", hostname, SEED_VOLUME_LABEL));
        Self {
            staging_dir,
            iso_path,
        }
    }

    /// Path the ISO will be written to.
    pub fn iso_path(&self) -> &Utf8Path {
        &self.iso_path
    }

    fn user_data_path(&self) -> Utf8PathBuf {
        self.staging_dir.join("user-data")
    }

    fn meta_data_path(&self) -> Utf8PathBuf {
        self.staging_dir.join("meta-data")
    }

    fn network_config_path(&self) -> Utf8PathBuf {
        self.staging_dir.join("network-config")
    }

    /// Render the documents into the staging directory with the fixed
    /// `user-data` / `meta-data` / `network-config` layout.
    pub fn write_seed_files(&self, docs: &SeedDocuments) -> Result<()> {
        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("Failed to create seed directory {}", self.staging_dir))?;

        for (path, content) in [
            (self.user_data_path(), docs.user_data.render()?),
            (self.meta_data_path(), docs.meta_data.render()?),
            (self.network_config_path(), docs.network_config.render()?),
        ] {
            fs::write(&path, content).with_context(|| format!("Failed to write {}", path))?;
        }
        Ok(())
    }

    /// Write the seed files and package them into the `cidata` ISO.
    ///
    /// Packaging failure aborts the node's provisioning before any disk
    /// cloning or hypervisor mutation happens.
    pub fn build(&self, docs: &SeedDocuments) -> Result<Utf8PathBuf> {
        self.write_seed_files(docs)?;
        let tool = IsoTool::detect()?;
        debug!("packaging {} with {:?}", self.iso_path, tool);
        self.run_tool(tool)?;
        Ok(self.iso_path.clone())
    }

    fn run_tool(&self, tool: IsoTool) -> Result<(), ProvisionError> {
        match tool {
            IsoTool::CloudLocalds => {
                Command::new("cloud-localds")
                    .arg("--network-config")
                    .arg(self.network_config_path())
                    .arg(&self.iso_path)
                    .arg(self.user_data_path())
                    .arg(self.meta_data_path())
                    .run_checked()?;
            }
            IsoTool::Genisoimage => {
                Command::new("genisoimage")
                    .args(["-output", self.iso_path.as_str()])
                    .args(["-volid", SEED_VOLUME_LABEL])
                    .args(["-joliet", "-r"])
                    .arg(self.user_data_path())
                    .arg(self.meta_data_path())
                    .arg(self.network_config_path())
                    .run_checked()?;
            }
        }
        Ok(())
    }
}
