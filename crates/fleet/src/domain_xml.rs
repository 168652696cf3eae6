//! Domain descriptor transformation.
//!
//! Takes the golden image's domain XML and rewrites a copy of it into a new
//! node's descriptor: fresh name and UUID, the node's CPU/memory sizing, the
//! cloned disk as the primary disk, the node's MAC on the provisioning
//! bridge, and the seed ISO attached as the only cdrom with boot order 2.
//! The base tree is never mutated; every call clones it first.

use crate::error::ProvisionError;
use crate::xml_utils::XmlElement;

/// Per-node values applied to the base descriptor.
///
/// The UUID is supplied by the caller so the rewrite itself is a pure
/// function of its inputs.
#[derive(Debug)]
pub struct DomainRewrite<'a> {
    /// New domain name (also the guest hostname).
    pub name: &'a str,
    /// Freshly generated domain UUID.
    pub uuid: &'a str,
    /// Virtual CPU count, applied to `<vcpu>` and the CPU topology cores.
    pub vcpus: u32,
    /// Memory in GiB, written to `<memory>`/`<currentMemory>` in KiB.
    pub memory_gb: u32,
    /// Path of the cloned disk image.
    pub disk_path: &'a str,
    /// MAC address for the bridged interface.
    pub mac_address: &'a str,
    /// Bridge the rewritten interface must sit on.
    pub bridge: &'a str,
    /// Path of the seed ISO to attach as a cdrom.
    pub seed_iso: &'a str,
}

/// Locate the base domain's primary disk image path.
///
/// Scans `device="disk"` entries for a file-backed source; the golden image
/// cannot be provisioned from without one.
pub fn base_disk_source(base: &XmlElement, domain: &str) -> Result<String, ProvisionError> {
    let sources = base.child("devices").map(file_disk_sources).unwrap_or_default();
    sources
        .into_iter()
        .next()
        .ok_or_else(|| ProvisionError::MissingBaseDisk {
            domain: domain.to_owned(),
        })
}

/// File paths of all `device="disk"` sources, in document order.
fn file_disk_sources(devices: &XmlElement) -> Vec<String> {
    devices
        .children
        .iter()
        .filter(|child| is_disk_device(child, "disk"))
        .filter_map(|disk| disk.child("source"))
        .filter_map(|source| source.attr("file"))
        .map(|file| file.to_owned())
        .collect()
}

fn is_disk_device(elem: &XmlElement, device: &str) -> bool {
    elem.name == "disk" && elem.attr("device") == Some(device)
}

/// Rewrite a copy of `base` into the node's descriptor.
///
/// `base` is left untouched; the returned tree is fully independent.
pub fn transform(base: &XmlElement, rewrite: &DomainRewrite) -> Result<XmlElement, ProvisionError> {
    // Lookup failures report the domain being inspected, not the node being
    // built.
    let base_name = base
        .child("name")
        .map(|name| name.text.clone())
        .unwrap_or_default();
    let mut domain = base.clone();

    rewrite_identity(&mut domain, rewrite);
    rewrite_sizing(&mut domain, rewrite);

    let devices = domain
        .child_mut("devices")
        .ok_or_else(|| ProvisionError::MissingBaseDisk {
            domain: base_name.clone(),
        })?;
    rewrite_primary_disk(devices, &base_name, rewrite)?;
    rewrite_bridge_mac(devices, &base_name, rewrite)?;
    replace_seed_cdrom(devices, rewrite);

    force_hd_boot(&mut domain);

    Ok(domain)
}

/// Domain name and unique identifier.
fn rewrite_identity(domain: &mut XmlElement, rewrite: &DomainRewrite) {
    if let Some(name) = domain.child_mut("name") {
        name.set_text(rewrite.name);
    }
    if let Some(uuid) = domain.child_mut("uuid") {
        uuid.set_text(rewrite.uuid);
    }
}

/// vCPU count, CPU topology cores, and both memory fields in KiB.
fn rewrite_sizing(domain: &mut XmlElement, rewrite: &DomainRewrite) {
    if let Some(vcpu) = domain.child_mut("vcpu") {
        vcpu.set_text(rewrite.vcpus.to_string());
    }
    if let Some(topology) = domain.find_path_mut(&["cpu", "topology"]) {
        topology.set_attr("cores", &rewrite.vcpus.to_string());
    }

    let memory_kib = (rewrite.memory_gb as u64 * 1024 * 1024).to_string();
    for field in ["memory", "currentMemory"] {
        if let Some(elem) = domain.child_mut(field) {
            elem.set_text(memory_kib.clone());
            elem.set_attr("unit", "KiB");
        }
    }
}

/// Repoint the primary disk at the cloned image and drop any inherited
/// backing-file override; the clone encodes its own backing chain.
fn rewrite_primary_disk(
    devices: &mut XmlElement,
    base_name: &str,
    rewrite: &DomainRewrite,
) -> Result<(), ProvisionError> {
    let mut rewritten = false;
    for disk in devices
        .children
        .iter_mut()
        .filter(|child| is_disk_device(child, "disk"))
    {
        if let Some(source) = disk.child_mut("source") {
            if source.attr("file").is_some() {
                source.set_attr("file", rewrite.disk_path);
                source.remove_attr("backing_file");
                rewritten = true;
            }
        }
    }
    if !rewritten {
        return Err(ProvisionError::MissingBaseDisk {
            domain: base_name.to_owned(),
        });
    }
    Ok(())
}

/// Set the node's MAC on the interface attached to the provisioning bridge.
fn rewrite_bridge_mac(
    devices: &mut XmlElement,
    base_name: &str,
    rewrite: &DomainRewrite,
) -> Result<(), ProvisionError> {
    let interface = devices
        .children
        .iter_mut()
        .filter(|child| child.name == "interface" && child.attr("type") == Some("bridge"))
        .find(|iface| {
            iface
                .child("source")
                .and_then(|source| source.attr("bridge"))
                == Some(rewrite.bridge)
        })
        .ok_or_else(|| ProvisionError::MissingBridgeInterface {
            domain: base_name.to_owned(),
            bridge: rewrite.bridge.to_owned(),
        })?;

    match interface.child_mut("mac") {
        Some(mac) => mac.set_attr("address", rewrite.mac_address),
        None => {
            let mut mac = XmlElement::new("mac");
            mac.set_attr("address", rewrite.mac_address);
            interface.children.insert(0, mac);
        }
    }
    Ok(())
}

/// Drop every pre-existing cdrom and attach the seed ISO as the single
/// removable device: read-only, on the secondary bus, boot order 2 so the
/// hard disk is tried first.
fn replace_seed_cdrom(devices: &mut XmlElement, rewrite: &DomainRewrite) {
    devices
        .children
        .retain(|child| !is_disk_device(child, "cdrom"));

    let mut cdrom = XmlElement::with_attrs("disk", &[("type", "file"), ("device", "cdrom")]);
    cdrom
        .children
        .push(XmlElement::with_attrs("driver", &[("name", "qemu"), ("type", "raw")]));
    cdrom
        .children
        .push(XmlElement::with_attrs("source", &[("file", rewrite.seed_iso)]));
    cdrom
        .children
        .push(XmlElement::with_attrs("target", &[("dev", "hdc"), ("bus", "sata")]));
    cdrom.children.push(XmlElement::new("readonly"));
    cdrom
        .children
        .push(XmlElement::with_attrs("boot", &[("order", "2")]));
    devices.children.push(cdrom);
}

/// Force the default boot device to the hard disk so the seed ISO is only
/// reached through its own boot-order attribute.
fn force_hd_boot(domain: &mut XmlElement) {
    if let Some(boot) = domain.find_path_mut(&["os", "boot"]) {
        boot.set_attr("dev", "hd");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml_utils::parse_xml;
    use indoc::indoc;

    const BASE_XML: &str = indoc! {r#"
        <domain type="kvm">
          <name>golden-image</name>
          <uuid>1b4e28ba-2fa1-11d2-883f-b9a761bde3fb</uuid>
          <memory unit="KiB">2097152</memory>
          <currentMemory unit="KiB">2097152</currentMemory>
          <vcpu placement="static">1</vcpu>
          <cpu mode="host-passthrough">
            <topology sockets="1" cores="1" threads="1"/>
          </cpu>
          <os>
            <type arch="x86_64" machine="q35">hvm</type>
            <boot dev="cdrom"/>
          </os>
          <devices>
            <disk type="file" device="disk">
              <driver name="qemu" type="qcow2"/>
              <source file="/var/lib/libvirt/images/golden.qcow2" backing_file="/var/lib/libvirt/images/upstream.qcow2"/>
              <target dev="vda" bus="virtio"/>
            </disk>
            <disk type="file" device="cdrom">
              <driver name="qemu" type="raw"/>
              <source file="/var/lib/libvirt/images/install.iso"/>
              <target dev="hdc" bus="sata"/>
              <readonly/>
            </disk>
            <interface type="bridge">
              <mac address="52:54:00:aa:bb:cc"/>
              <source bridge="br0"/>
              <model type="virtio"/>
            </interface>
            <interface type="network">
              <mac address="52:54:00:dd:ee:ff"/>
              <source network="default"/>
            </interface>
          </devices>
        </domain>
    "#};

    fn rewrite<'a>() -> DomainRewrite<'a> {
        DomainRewrite {
            name: "node-a",
            uuid: "7d444840-9dc0-11d1-b245-5ffdce74fad2",
            vcpus: 2,
            memory_gb: 4,
            disk_path: "/var/lib/libvirt/images/node-a.qcow2",
            mac_address: "52:54:00:00:00:05",
            bridge: "br0",
            seed_iso: "/srv/seeds/node-a/node-a-cidata.iso",
        }
    }

    #[test]
    fn test_base_disk_source_found() {
        let base = parse_xml(BASE_XML).unwrap();
        assert_eq!(
            base_disk_source(&base, "golden-image").unwrap(),
            "/var/lib/libvirt/images/golden.qcow2"
        );
    }

    #[test]
    fn test_base_disk_source_missing() {
        let base = parse_xml("<domain><devices/></domain>").unwrap();
        let err = base_disk_source(&base, "golden-image").unwrap_err();
        match err {
            ProvisionError::MissingBaseDisk { domain } => assert_eq!(domain, "golden-image"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_base_disk_ignores_cdrom_sources() {
        let base = parse_xml(indoc! {r#"
            <domain>
              <devices>
                <disk type="file" device="cdrom">
                  <source file="/images/install.iso"/>
                </disk>
              </devices>
            </domain>
        "#})
        .unwrap();
        assert!(base_disk_source(&base, "golden-image").is_err());
    }

    #[test]
    fn test_transform_identity_and_sizing() {
        let base = parse_xml(BASE_XML).unwrap();
        let domain = transform(&base, &rewrite()).unwrap();

        assert_eq!(domain.child("name").unwrap().text, "node-a");
        assert_eq!(
            domain.child("uuid").unwrap().text,
            "7d444840-9dc0-11d1-b245-5ffdce74fad2"
        );
        assert_eq!(domain.child("vcpu").unwrap().text, "2");
        assert_eq!(
            domain.find_path(&["cpu", "topology"]).unwrap().attr("cores"),
            Some("2")
        );
        for field in ["memory", "currentMemory"] {
            let elem = domain.child(field).unwrap();
            assert_eq!(elem.text, "4194304");
            assert_eq!(elem.attr("unit"), Some("KiB"));
        }
    }

    #[test]
    fn test_transform_repoints_disk_and_strips_backing_override() {
        let base = parse_xml(BASE_XML).unwrap();
        let domain = transform(&base, &rewrite()).unwrap();

        let source = domain.find_path(&["devices", "disk", "source"]).unwrap();
        assert_eq!(source.attr("file"), Some("/var/lib/libvirt/images/node-a.qcow2"));
        assert_eq!(source.attr("backing_file"), None);
    }

    #[test]
    fn test_transform_sets_bridge_mac_only() {
        let base = parse_xml(BASE_XML).unwrap();
        let domain = transform(&base, &rewrite()).unwrap();
        let devices = domain.child("devices").unwrap();

        let interfaces: Vec<_> = devices
            .children
            .iter()
            .filter(|child| child.name == "interface")
            .collect();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(
            interfaces[0].child("mac").unwrap().attr("address"),
            Some("52:54:00:00:00:05")
        );
        // The non-bridged interface keeps its MAC.
        assert_eq!(
            interfaces[1].child("mac").unwrap().attr("address"),
            Some("52:54:00:dd:ee:ff")
        );
    }

    #[test]
    fn test_transform_missing_bridge_is_fatal() {
        let base = parse_xml(BASE_XML).unwrap();
        let mut wanted = rewrite();
        wanted.bridge = "br1";
        let err = transform(&base, &wanted).unwrap_err();
        match err {
            ProvisionError::MissingBridgeInterface { domain, bridge } => {
                assert_eq!(domain, "golden-image");
                assert_eq!(bridge, "br1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transform_inserts_mac_when_absent() {
        let base = parse_xml(indoc! {r#"
            <domain>
              <devices>
                <disk type="file" device="disk">
                  <source file="/images/golden.qcow2"/>
                </disk>
                <interface type="bridge">
                  <source bridge="br0"/>
                </interface>
              </devices>
            </domain>
        "#})
        .unwrap();
        let domain = transform(&base, &rewrite()).unwrap();
        let mac = domain
            .find_path(&["devices", "interface", "mac"])
            .unwrap();
        assert_eq!(mac.attr("address"), Some("52:54:00:00:00:05"));
    }

    #[test]
    fn test_transform_single_seed_cdrom() {
        let base = parse_xml(BASE_XML).unwrap();
        let domain = transform(&base, &rewrite()).unwrap();
        let devices = domain.child("devices").unwrap();

        let cdroms: Vec<_> = devices
            .children
            .iter()
            .filter(|child| is_disk_device(child, "cdrom"))
            .collect();
        assert_eq!(cdroms.len(), 1);

        let cdrom = cdroms[0];
        assert_eq!(
            cdrom.child("source").unwrap().attr("file"),
            Some("/srv/seeds/node-a/node-a-cidata.iso")
        );
        assert_eq!(cdrom.child("target").unwrap().attr("dev"), Some("hdc"));
        assert_eq!(cdrom.child("target").unwrap().attr("bus"), Some("sata"));
        assert!(cdrom.child("readonly").is_some());
        assert_eq!(cdrom.child("boot").unwrap().attr("order"), Some("2"));

        // The primary disk carries no boot-order override of its own.
        let disk = devices
            .children
            .iter()
            .find(|child| is_disk_device(child, "disk"))
            .unwrap();
        assert!(disk.child("boot").is_none());
    }

    #[test]
    fn test_transform_appends_cdrom_when_base_has_none() {
        let base = parse_xml(indoc! {r#"
            <domain>
              <devices>
                <disk type="file" device="disk">
                  <source file="/images/golden.qcow2"/>
                </disk>
                <interface type="bridge">
                  <source bridge="br0"/>
                  <mac address="52:54:00:aa:bb:cc"/>
                </interface>
              </devices>
            </domain>
        "#})
        .unwrap();
        let domain = transform(&base, &rewrite()).unwrap();
        let devices = domain.child("devices").unwrap();
        let cdroms: Vec<_> = devices
            .children
            .iter()
            .filter(|child| is_disk_device(child, "cdrom"))
            .collect();
        assert_eq!(cdroms.len(), 1);
    }

    #[test]
    fn test_transform_forces_hd_boot() {
        let base = parse_xml(BASE_XML).unwrap();
        assert_eq!(
            base.find_path(&["os", "boot"]).unwrap().attr("dev"),
            Some("cdrom")
        );
        let domain = transform(&base, &rewrite()).unwrap();
        assert_eq!(
            domain.find_path(&["os", "boot"]).unwrap().attr("dev"),
            Some("hd")
        );
    }

    #[test]
    fn test_transform_never_mutates_base() {
        let base = parse_xml(BASE_XML).unwrap();
        let before = base.clone();
        let _ = transform(&base, &rewrite()).unwrap();
        let _ = transform(&base, &rewrite()).unwrap();
        assert_eq!(base, before);
    }

    #[test]
    fn test_transformed_descriptor_serializes_round_trip() {
        let base = parse_xml(BASE_XML).unwrap();
        let domain = transform(&base, &rewrite()).unwrap();
        let serialized = domain.to_xml_string().unwrap();
        assert!(serialized.starts_with("<?xml"));
        assert_eq!(parse_xml(&serialized).unwrap(), domain);
    }

    #[test]
    fn test_transform_tolerates_minimal_descriptor() {
        // No cpu topology, no os/boot, no currentMemory: rewrite only what
        // exists, as dumpxml output varies across hypervisor versions.
        let base = parse_xml(indoc! {r#"
            <domain>
              <name>golden-image</name>
              <memory unit="KiB">1048576</memory>
              <devices>
                <disk type="file" device="disk">
                  <source file="/images/golden.qcow2"/>
                </disk>
                <interface type="bridge">
                  <source bridge="br0"/>
                  <mac address="52:54:00:aa:bb:cc"/>
                </interface>
              </devices>
            </domain>
        "#})
        .unwrap();
        let domain = transform(&base, &rewrite()).unwrap();
        assert_eq!(domain.child("name").unwrap().text, "node-a");
        assert_eq!(domain.child("memory").unwrap().text, "4194304");
        assert!(domain.child("currentMemory").is_none());
        assert!(domain.find_path(&["os", "boot"]).is_none());
    }
}
