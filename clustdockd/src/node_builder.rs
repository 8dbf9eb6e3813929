//! Transforms a hypervisor base domain's XML description into a new
//! domain's XML description for one node.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::collections::HashSet;
use std::io::Cursor;

#[derive(Debug, thiserror::Error)]
pub enum BuildXmlError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml description has no /domain/{0} element")]
    MissingElement(&'static str),
    #[error("xml description has no primary disk source")]
    MissingDiskSource,
}

/// One bridge attachment to append under `/domain/devices`.
pub struct ExtraIface<'a> {
    pub bridge: &'a str,
}

/// Inputs for [`build_xml`], one per node being materialized.
pub struct XmlTransform<'a> {
    pub name: &'a str,
    pub img_path: &'a str,
    pub extra_ifaces: &'a [ExtraIface<'a>],
    pub mem: Option<u32>,
    pub cpu: Option<u32>,
}

/// Result of the transform: the new domain XML, and the base image path
/// read off the original disk source (callers need this to run
/// `qemu-img create -b <baseimg_path> <img_path>`).
pub struct BuiltXml {
    pub xml: String,
    pub baseimg_path: String,
}

/// Applies, in order: rename `/domain/name`; drop `/domain/uuid`; drop every
/// `/domain/devices/interface/mac`; rewrite the primary disk's `source/@file`
/// to `img_path` (capturing the old value); append one `<interface
/// type="bridge">` per extra interface; replace `/domain/memory` and drop
/// `/domain/currentMemory` when `mem` is set; overwrite `/domain/vcpu`'s text
/// when `cpu` is set.
pub fn build_xml(base_xml: &str, t: &XmlTransform) -> Result<BuiltXml, BuildXmlError> {
    let mut reader = Reader::from_str(base_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut path: Vec<String> = Vec::new();
    let mut baseimg_path: Option<String> = None;
    let mut existing_bridges: HashSet<String> = HashSet::new();
    let mut primary_disk_pending = true;
    let mut in_primary_disk = false;
    let mut rename_name_text = false;
    let mut rewrite_vcpu_text = false;
    // Skip mode: swallow events until the matching End for `target` at the
    // current nesting depth is consumed.
    let mut skip: Option<(&'static str, u32)> = None;

    loop {
        let event = reader.read_event()?;
        if let Event::Eof = event {
            break;
        }

        if let Some((target, depth)) = skip.as_mut() {
            match &event {
                Event::Start(e) if local_name(e) == *target => *depth += 1,
                Event::End(e) if local_name_end(e) == *target => {
                    *depth -= 1;
                    if *depth == 0 {
                        let finished_memory = *target == "memory";
                        skip = None;
                        if finished_memory {
                            if let Some(mem) = t.mem {
                                write_memory(&mut writer, mem)?;
                            }
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        match &event {
            Event::Start(e) => {
                let name = local_name(e);
                let parent_is_domain = path.last().map(String::as_str) == Some("domain");
                let parent_is_devices = path.last().map(String::as_str) == Some("devices");
                let parent_is_interface = path.last().map(String::as_str) == Some("interface");

                if parent_is_domain && name == "uuid" {
                    skip = Some(("uuid", 1));
                    path.push(name.to_string());
                    continue;
                }
                if parent_is_domain && name == "currentMemory" && t.mem.is_some() {
                    skip = Some(("currentMemory", 1));
                    path.push(name.to_string());
                    continue;
                }
                if parent_is_domain && name == "memory" && t.mem.is_some() {
                    skip = Some(("memory", 1));
                    path.push(name.to_string());
                    continue;
                }
                if parent_is_interface && name == "mac" {
                    skip = Some(("mac", 1));
                    path.push(name.to_string());
                    continue;
                }
                if parent_is_devices && name == "disk" && primary_disk_pending {
                    in_primary_disk = true;
                }
                if parent_is_domain && name == "name" {
                    rename_name_text = true;
                }
                if parent_is_domain && name == "vcpu" && t.cpu.is_some() {
                    rewrite_vcpu_text = true;
                }

                path.push(name.to_string());
                writer.write_event(event.borrow())?;
            }
            Event::Empty(e) => {
                let name = local_name(e);
                let parent_is_disk = path.last().map(String::as_str) == Some("disk");
                if parent_is_disk && in_primary_disk && name == "source" {
                    let (rewritten, old) = rewrite_file_attr(e, &t.img_path)?;
                    baseimg_path = Some(old);
                    writer.write_event(Event::Empty(rewritten))?;
                    continue;
                }
                let parent_is_interface = path.last().map(String::as_str) == Some("interface");
                if parent_is_interface && name == "source" {
                    if let Some(bridge) = attr_value(e, "bridge") {
                        existing_bridges.insert(bridge);
                    }
                }
                writer.write_event(event.borrow())?;
            }
            Event::Text(e) => {
                if rename_name_text {
                    writer.write_event(Event::Text(BytesText::new(t.name)))?;
                    rename_name_text = false;
                    continue;
                }
                if rewrite_vcpu_text {
                    let cpu = t.cpu.expect("rewrite_vcpu_text only set when cpu is Some");
                    writer.write_event(Event::Text(BytesText::new(&cpu.to_string())))?;
                    rewrite_vcpu_text = false;
                    continue;
                }
                writer.write_event(event.borrow())?;
                let _ = e;
            }
            Event::End(e) => {
                let name = local_name_end(e);
                if name == "disk" && in_primary_disk {
                    in_primary_disk = false;
                    primary_disk_pending = false;
                }
                if name == "devices" {
                    for iface in t.extra_ifaces {
                        if !existing_bridges.contains(iface.bridge) {
                            write_interface(&mut writer, iface.bridge)?;
                        }
                    }
                }
                path.pop();
                writer.write_event(event.borrow())?;
            }
            other => {
                writer.write_event(other.borrow())?;
            }
        }
    }

    let baseimg_path = baseimg_path.ok_or(BuildXmlError::MissingDiskSource)?;
    let xml = String::from_utf8(writer.into_inner().into_inner())
        .expect("xml writer only emits input-derived utf8");
    Ok(BuiltXml { xml, baseimg_path })
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn local_name_end(e: &quick_xml::events::BytesEnd) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr_value(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn rewrite_file_attr(
    e: &BytesStart,
    new_file: &str,
) -> Result<(BytesStart<'static>, String), BuildXmlError> {
    let mut new = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    let mut old_value = None;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"file" {
            old_value = Some(attr.unescape_value()?.into_owned());
            new.push_attribute(("file", new_file));
        } else {
            new.push_attribute((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned().as_str(),
                attr.unescape_value()?.into_owned().as_str(),
            ));
        }
    }
    let old_value = old_value.ok_or(BuildXmlError::MissingDiskSource)?;
    Ok((new, old_value))
}

fn write_memory<W: std::io::Write>(writer: &mut Writer<W>, mem: u32) -> Result<(), BuildXmlError> {
    let mut start = BytesStart::new("memory");
    start.push_attribute(("unit", "MB"));
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(&mem.to_string())))?;
    writer.write_event(Event::End(quick_xml::events::BytesEnd::new("memory")))?;
    Ok(())
}

fn write_interface<W: std::io::Write>(
    writer: &mut Writer<W>,
    bridge: &str,
) -> Result<(), BuildXmlError> {
    let mut iface = BytesStart::new("interface");
    iface.push_attribute(("type", "bridge"));
    writer.write_event(Event::Start(iface))?;

    let mut source = BytesStart::new("source");
    source.push_attribute(("bridge", bridge));
    writer.write_event(Event::Empty(source))?;

    let mut model = BytesStart::new("model");
    model.push_attribute(("type", "virtio"));
    writer.write_event(Event::Empty(model))?;

    writer.write_event(Event::End(quick_xml::events::BytesEnd::new("interface")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"<domain type='kvm'>
  <name>base-web</name>
  <uuid>abc-123</uuid>
  <memory unit='KiB'>1048576</memory>
  <currentMemory unit='KiB'>1048576</currentMemory>
  <vcpu placement='static'>1</vcpu>
  <devices>
    <disk type='file' device='disk'>
      <source file='/var/lib/libvirt/images/base-web.qcow2'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:aa:bb:cc'/>
      <source network='default'/>
    </interface>
  </devices>
</domain>"#;

    #[test]
    fn renames_strips_and_rewrites_disk() {
        let t = XmlTransform {
            name: "web0",
            img_path: "/var/lib/libvirt/images/web0.qcow2",
            extra_ifaces: &[],
            mem: None,
            cpu: None,
        };
        let built = build_xml(BASE, &t).unwrap();
        assert_eq!(built.baseimg_path, "/var/lib/libvirt/images/base-web.qcow2");
        assert!(built.xml.contains("<name>web0</name>"));
        assert!(!built.xml.contains("<uuid>"));
        assert!(!built.xml.contains("<mac "));
        assert!(built.xml.contains("file=\"/var/lib/libvirt/images/web0.qcow2\""));
    }

    #[test]
    fn appends_extra_interfaces() {
        let t = XmlTransform {
            name: "web0",
            img_path: "/x/web0.qcow2",
            extra_ifaces: &[ExtraIface { bridge: "br0" }],
            mem: None,
            cpu: None,
        };
        let built = build_xml(BASE, &t).unwrap();
        assert!(built.xml.contains("bridge=\"br0\""));
        assert!(built.xml.contains("type=\"virtio\""));
    }

    #[test]
    fn sets_memory_and_drops_current_memory() {
        let t = XmlTransform {
            name: "web0",
            img_path: "/x/web0.qcow2",
            extra_ifaces: &[],
            mem: Some(2048),
            cpu: None,
        };
        let built = build_xml(BASE, &t).unwrap();
        assert!(built.xml.contains("<memory unit=\"MB\">2048</memory>"));
        assert!(!built.xml.contains("currentMemory"));
    }

    #[test]
    fn sets_cpu_text() {
        let t = XmlTransform {
            name: "web0",
            img_path: "/x/web0.qcow2",
            extra_ifaces: &[],
            mem: None,
            cpu: Some(4),
        };
        let built = build_xml(BASE, &t).unwrap();
        assert!(built.xml.contains("<vcpu placement=\"static\">4</vcpu>"));
    }

    #[test]
    fn transform_is_idempotent_on_its_own_output() {
        let t = XmlTransform {
            name: "web0",
            img_path: "/x/web0.qcow2",
            extra_ifaces: &[ExtraIface { bridge: "br0" }],
            mem: Some(2048),
            cpu: Some(2),
        };
        let first = build_xml(BASE, &t).unwrap();
        let second = build_xml(&first.xml, &t).unwrap();
        assert_eq!(first.xml, second.xml);
        assert_eq!(first.xml.matches("<interface").count(), 2);
    }
}
