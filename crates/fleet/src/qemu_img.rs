//! Disk cloning helpers built around `qemu-img`.
//!
//! Every node gets exactly one disk image derived from the golden image,
//! placed next to it. Copy-on-write clones are qcow2 overlays created with
//! `qemu-img create -b`; full clones are plain file copies with no runtime
//! dependency on the base image.

use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{eyre::Context as _, Result};
use tracing::debug;

use crate::cmdext::CommandRunExt;
use crate::error::ProvisionError;

/// Disk image format shared by the golden image and its clones.
pub const DISK_FORMAT: &str = "qcow2";

/// How a node's disk is derived from the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneStrategy {
    /// qcow2 overlay backed by the base image: fast and small, but the base
    /// image must stay in place unmodified.
    CopyOnWrite,
    /// Byte-for-byte copy: slower and larger, independent of the base image.
    FullCopy,
}

impl CloneStrategy {
    /// Resolve the per-node flag; the choice is explicit and never
    /// overridden.
    pub fn for_node(cow_clone: bool) -> Self {
        if cow_clone {
            CloneStrategy::CopyOnWrite
        } else {
            CloneStrategy::FullCopy
        }
    }
}

/// Deterministic clone location: the base image's directory plus the node
/// name and the shared format extension.
pub fn clone_path_for(base_disk: &Utf8Path, node_name: &str) -> Utf8PathBuf {
    let dir = base_disk.parent().unwrap_or(Utf8Path::new(""));
    dir.join(format!("{}.{}", node_name, DISK_FORMAT))
}

/// Argument vector for the overlay creation command.
///
/// Factored out so the exact invocation is testable without qemu-img
/// installed.
pub fn overlay_args(base_disk: &Utf8Path, target: &Utf8Path, size_gb: u32) -> Vec<String> {
    vec![
        "create".to_owned(),
        "-f".to_owned(),
        DISK_FORMAT.to_owned(),
        "-b".to_owned(),
        base_disk.to_string(),
        "-F".to_owned(),
        DISK_FORMAT.to_owned(),
        target.to_string(),
        format!("{}G", size_gb),
    ]
}

/// Create a qcow2 overlay of `base_disk` at `target`, sized to `size_gb`.
pub fn create_overlay(
    base_disk: &Utf8Path,
    target: &Utf8Path,
    size_gb: u32,
) -> Result<(), ProvisionError> {
    Command::new("qemu-img")
        .args(overlay_args(base_disk, target, size_gb))
        .run_checked()?;
    Ok(())
}

/// Produce the node's disk image at `target` using the chosen strategy.
pub fn clone_disk(
    strategy: CloneStrategy,
    base_disk: &Utf8Path,
    target: &Utf8Path,
    size_gb: u32,
) -> Result<()> {
    debug!("cloning {} -> {} ({:?})", base_disk, target, strategy);
    match strategy {
        CloneStrategy::CopyOnWrite => {
            create_overlay(base_disk, target, size_gb)?;
        }
        CloneStrategy::FullCopy => {
            std::fs::copy(base_disk, target)
                .with_context(|| format!("Failed to copy {} to {}", base_disk, target))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_path_is_deterministic() {
        let base = Utf8Path::new("/var/lib/libvirt/images/golden.qcow2");
        assert_eq!(
            clone_path_for(base, "cp-1"),
            "/var/lib/libvirt/images/cp-1.qcow2"
        );
        assert_eq!(clone_path_for(base, "cp-1"), clone_path_for(base, "cp-1"));
    }

    #[test]
    fn test_overlay_args_reference_backing_file() {
        let args = overlay_args(
            Utf8Path::new("/images/golden.qcow2"),
            Utf8Path::new("/images/node-a.qcow2"),
            40,
        );
        assert_eq!(
            args,
            vec![
                "create",
                "-f",
                "qcow2",
                "-b",
                "/images/golden.qcow2",
                "-F",
                "qcow2",
                "/images/node-a.qcow2",
                "40G",
            ]
        );
    }

    #[test]
    fn test_strategy_is_explicit() {
        assert_eq!(CloneStrategy::for_node(true), CloneStrategy::CopyOnWrite);
        assert_eq!(CloneStrategy::for_node(false), CloneStrategy::FullCopy);
    }

    #[test]
    fn test_full_copy_is_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();
        let base = dir.join("golden.qcow2");
        std::fs::write(&base, b"fake image bytes").unwrap();

        let target = clone_path_for(&base, "node-a");
        clone_disk(CloneStrategy::FullCopy, &base, &target, 40).unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"fake image bytes");
        // The copy must survive removal of the base image.
        std::fs::remove_file(&base).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"fake image bytes");
    }
}
