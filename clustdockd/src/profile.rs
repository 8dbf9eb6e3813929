//! Cluster profiles: a named recipe (kind + attribute bag) selected by name
//! when spawning, with optional per-index overrides.

use crate::model::{AddIface, Hooks, NodeKind, NodeSpec, NodeSpecKind};
use crate::rangeset::{self, IndexSet};
use crate::render::{self, TemplateContext};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile override key '{0}' is not a valid index or range")]
    BadOverrideKey(String, #[source] rangeset::RangeError),
    #[error("profile attribute template error: {0}")]
    Render(#[from] render::RenderError),
    #[error("profile is missing required attribute '{0}'")]
    MissingAttr(&'static str),
    #[error("profile attribute '{0}' is not a valid integer: {1}")]
    BadInt(&'static str, String),
    #[error("add_ifaces entry '{0}' is not in bridge:ifname:address form")]
    BadAddIface(String),
}

/// One profile as loaded from configuration: a `default` attribute bag
/// applied to every node, plus index-keyed overrides (e.g. `"0-3"` or `"5"`)
/// whose values override the defaults for matching indices.
#[derive(Debug, Clone)]
pub struct ClusterProfile {
    pub kind: NodeKind,
    pub default: BTreeMap<String, String>,
    overrides: Vec<(IndexSet, BTreeMap<String, String>)>,
}

impl ClusterProfile {
    /// Builds a profile from its raw TOML shape: a default bag and a map of
    /// range-expression keys to override bags. Overrides are kept in
    /// declaration order; later overrides win on key collision for indices
    /// matched by more than one range.
    pub fn new(
        kind: NodeKind,
        default: BTreeMap<String, String>,
        raw_overrides: Vec<(String, BTreeMap<String, String>)>,
    ) -> Result<Self, ProfileError> {
        let mut overrides = Vec::with_capacity(raw_overrides.len());
        for (key, bag) in raw_overrides {
            let set = rangeset::parse_ranges(&key)
                .map_err(|e| ProfileError::BadOverrideKey(key.clone(), e))?;
            overrides.push((set, bag));
        }
        Ok(Self {
            kind,
            default,
            overrides,
        })
    }

    /// Resolves the attribute bag for one index: the default bag with every
    /// override whose range contains `idx` layered on top, in declaration
    /// order.
    pub fn attrs_for_idx(&self, idx: u32) -> BTreeMap<String, String> {
        let mut attrs = self.default.clone();
        for (set, bag) in &self.overrides {
            if set.contains(&idx) {
                for (k, v) in bag {
                    attrs.insert(k.clone(), v.clone());
                }
            }
        }
        attrs
    }

    /// Resolves this profile's attribute bag for `idx`, template-expands
    /// every value against the node's own attributes, and builds the
    /// concrete [`NodeSpec`] that gets handed to a `HostDriver::start`.
    pub fn build_node_spec(
        &self,
        clustername: &str,
        idx: u32,
        host: &str,
    ) -> Result<NodeSpec, ProfileError> {
        let name = format!("{clustername}{idx}");
        let ctx = TemplateContext {
            name: &name,
            idx: Some(idx),
            clustername,
            host,
        };
        let raw = self.attrs_for_idx(idx);
        let mut attrs = BTreeMap::new();
        for (k, v) in &raw {
            attrs.insert(k.clone(), render::render_template(v, &ctx)?);
        }

        let add_ifaces = parse_add_ifaces(attrs.get("add_ifaces").map(String::as_str))?;
        let hooks = Hooks {
            before_start: attrs.get("hook_before_start").cloned(),
            after_start: attrs.get("hook_after_start").cloned(),
            after_end: attrs.get("hook_after_end").cloned(),
        };

        let kind = match self.kind {
            NodeKind::Container => NodeSpecKind::Container {
                image: required(&attrs, "image")?,
                run_options: attrs.get("run_options").cloned().unwrap_or_default(),
            },
            NodeKind::Vm => {
                let storage_dir = required(&attrs, "storage_dir")?;
                let img_path = format!("{storage_dir}/{name}.qcow2");
                NodeSpecKind::Vm {
                    base_domain: required(&attrs, "base_domain")?,
                    storage_dir,
                    img_path,
                    mem: optional_u32(&attrs, "mem")?,
                    cpu: optional_u32(&attrs, "cpu")?,
                }
            }
        };

        Ok(NodeSpec {
            name,
            clustername: clustername.to_string(),
            idx: Some(idx),
            host: host.to_string(),
            add_ifaces,
            hooks,
            kind,
        })
    }
}

fn required(attrs: &BTreeMap<String, String>, key: &'static str) -> Result<String, ProfileError> {
    attrs
        .get(key)
        .cloned()
        .ok_or(ProfileError::MissingAttr(key))
}

fn optional_u32(
    attrs: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<u32>, ProfileError> {
    match attrs.get(key) {
        None => Ok(None),
        Some(v) if v.is_empty() => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| ProfileError::BadInt(key, v.clone())),
    }
}

/// Parses `"br0:eth1:dhcp,br1:eth2:10.0.0.5"` into an ordered list of
/// [`AddIface`].
fn parse_add_ifaces(raw: Option<&str>) -> Result<Vec<AddIface>, ProfileError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let mut ifaces = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(3, ':');
        let (Some(bridge), Some(ifname), Some(address)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ProfileError::BadAddIface(entry.to_string()));
        };
        ifaces.push(AddIface {
            bridge: bridge.to_string(),
            ifname: ifname.to_string(),
            address: address.to_string(),
        });
    }
    Ok(ifaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn override_layers_on_top_of_default() {
        let profile = ClusterProfile::new(
            NodeKind::Container,
            bag(&[("image", "debian:bookworm"), ("run_options", "")]),
            vec![("0-3".to_string(), bag(&[("run_options", "--privileged")]))],
        )
        .unwrap();

        assert_eq!(
            profile.attrs_for_idx(2).get("run_options").unwrap(),
            "--privileged"
        );
        assert_eq!(
            profile.attrs_for_idx(9).get("run_options").unwrap(),
            ""
        );
        assert_eq!(
            profile.attrs_for_idx(9).get("image").unwrap(),
            "debian:bookworm"
        );
    }

    #[test]
    fn builds_container_node_spec_with_templating() {
        let profile = ClusterProfile::new(
            NodeKind::Container,
            bag(&[("image", "debian:bookworm"), ("run_options", "--hostname={name}")]),
            vec![],
        )
        .unwrap();
        let spec = profile.build_node_spec("web", 3, "hostA").unwrap();
        assert_eq!(spec.name, "web3");
        match spec.kind {
            NodeSpecKind::Container { image, run_options } => {
                assert_eq!(image, "debian:bookworm");
                assert_eq!(run_options, "--hostname=web3");
            }
            _ => panic!("expected container kind"),
        }
    }

    #[test]
    fn builds_vm_node_spec_with_computed_img_path() {
        let profile = ClusterProfile::new(
            NodeKind::Vm,
            bag(&[("base_domain", "base-web"), ("storage_dir", "/var/lib/libvirt/images")]),
            vec![],
        )
        .unwrap();
        let spec = profile.build_node_spec("web", 0, "hostA").unwrap();
        match spec.kind {
            NodeSpecKind::Vm { img_path, .. } => {
                assert_eq!(img_path, "/var/lib/libvirt/images/web0.qcow2");
            }
            _ => panic!("expected vm kind"),
        }
    }

    #[test]
    fn missing_required_attr_is_an_error() {
        let profile = ClusterProfile::new(NodeKind::Container, BTreeMap::new(), vec![]).unwrap();
        let err = profile.build_node_spec("web", 0, "hostA").unwrap_err();
        assert!(matches!(err, ProfileError::MissingAttr("image")));
    }

    #[test]
    fn parses_add_ifaces() {
        let profile = ClusterProfile::new(
            NodeKind::Container,
            bag(&[
                ("image", "debian:bookworm"),
                ("add_ifaces", "br0:eth1:dhcp,br1:eth2:10.0.0.5"),
            ]),
            vec![],
        )
        .unwrap();
        let spec = profile.build_node_spec("web", 0, "hostA").unwrap();
        assert_eq!(spec.add_ifaces.len(), 2);
        assert_eq!(spec.add_ifaces[1].address, "10.0.0.5");
    }

    #[test]
    fn rejects_bad_override_key() {
        let err = ClusterProfile::new(
            NodeKind::Container,
            BTreeMap::new(),
            vec![("not-a-range".to_string(), BTreeMap::new())],
        )
        .unwrap_err();
        assert!(matches!(err, ProfileError::BadOverrideKey(key, _) if key == "not-a-range"));
    }
}
