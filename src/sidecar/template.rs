use super::{DEFAULT_LISTENER_NAME, DEFAULT_VIRTUAL_HOST_NAME};
use crate::error::PlanError;

use serde_json::Value;

use std::fmt::{self, Display};
use std::fs::File;
use std::io;
use std::path::Path;

static BUNDLED_ENVOY_TEMPLATE: &str = include_str!("../../assets/envoy-sidecar.yaml");

/// Selects which virtual host's domain list gets rewritten
#[derive(Debug, Clone, PartialEq)]
pub enum DomainTarget {
    /// Look up the listener and the virtual host by name. Every filter chain and filter of
    /// the named listener is searched, under both `config` and `typed_config`. Templates that
    /// don't have the named virtual host fall back to `FirstVirtualHost`.
    Named {
        listener: String,
        virtual_host: String,
    },
    /// `static_resources.listeners[0].filter_chains[0].filters[0]`
    /// `.config.route_config.virtual_hosts[0]`. Only kept for compatibility with templates
    /// that don't name their listeners. Any other virtual hosts are left alone.
    FirstVirtualHost,
}

impl DomainTarget {
    pub fn named(listener: impl Into<String>, virtual_host: impl Into<String>) -> DomainTarget {
        DomainTarget::Named {
            listener: listener.into(),
            virtual_host: virtual_host.into(),
        }
    }
}

impl Default for DomainTarget {
    fn default() -> DomainTarget {
        DomainTarget::named(DEFAULT_LISTENER_NAME, DEFAULT_VIRTUAL_HOST_NAME)
    }
}

/// Error loading a sidecar template from yaml
#[derive(Debug)]
pub enum TemplateLoadError {
    Io(io::Error),
    Format(serde_yaml::Error),
    NotAMapping,
}

impl From<serde_yaml::Error> for TemplateLoadError {
    fn from(err: serde_yaml::Error) -> TemplateLoadError {
        TemplateLoadError::Format(err)
    }
}

impl From<io::Error> for TemplateLoadError {
    fn from(err: io::Error) -> TemplateLoadError {
        TemplateLoadError::Io(err)
    }
}

impl Display for TemplateLoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            TemplateLoadError::Io(ref e) => write!(f, "IO error: {}", e),
            TemplateLoadError::Format(ref e) => write!(f, "Sidecar template format error: {}", e),
            TemplateLoadError::NotAMapping => {
                f.write_str("Sidecar template must be a yaml mapping at the top level")
            }
        }
    }
}
impl std::error::Error for TemplateLoadError {}

/// A parsed Envoy configuration document. The document is kept as json internally so that
/// it can be addressed with json pointers, and is converted back to yaml for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfigTemplate {
    document: Value,
}

impl SidecarConfigTemplate {
    /// The template that ships with this crate. It terminates TLS on 443 with the
    /// certificate mounted at `/var/run/certs`, requires client certificates signed by the
    /// bundled CA, and forwards everything to port 80 on localhost.
    pub fn bundled() -> Result<SidecarConfigTemplate, TemplateLoadError> {
        SidecarConfigTemplate::from_yaml_str(BUNDLED_ENVOY_TEMPLATE)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<SidecarConfigTemplate, TemplateLoadError> {
        let document: Value = serde_yaml::from_str(yaml)?;
        SidecarConfigTemplate::from_value(document)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<SidecarConfigTemplate, TemplateLoadError> {
        log::debug!("Loading sidecar template from '{}'", path.as_ref().display());
        let reader = File::open(path.as_ref())?;
        let document: Value = serde_yaml::from_reader(reader)?;
        SidecarConfigTemplate::from_value(document)
    }

    pub fn from_value(document: Value) -> Result<SidecarConfigTemplate, TemplateLoadError> {
        if document.is_object() {
            Ok(SidecarConfigTemplate { document })
        } else {
            Err(TemplateLoadError::NotAMapping)
        }
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Returns the current domain list of the targeted virtual host
    pub fn domains(&self, target: &DomainTarget) -> Result<Vec<String>, PlanError> {
        let pointer = locate_virtual_host(&self.document, target)?;
        let domains = self
            .document
            .pointer(&pointer)
            .and_then(|vh| vh.get("domains"))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(domains)
    }

    /// Returns a copy of this template with the targeted domain list replaced
    pub fn rewrite_domains(
        &self,
        target: &DomainTarget,
        domains: &[String],
    ) -> Result<SidecarConfigTemplate, PlanError> {
        rewrite_domains(&self.document, target, domains)
            .map(|document| SidecarConfigTemplate { document })
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.document)
    }
}

/// Returns a new document identical to `template` except that the targeted virtual host's
/// `domains` are replaced by `domains`, verbatim and in order.
pub fn rewrite_domains(
    template: &Value,
    target: &DomainTarget,
    domains: &[String],
) -> Result<Value, PlanError> {
    if domains.is_empty() {
        return Err(PlanError::config_shape(
            "at least one domain is required for the virtual host",
        ));
    }
    let pointer = locate_virtual_host(template, target)?;
    let mut document = template.clone();
    let virtual_host = document
        .pointer_mut(&pointer)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| PlanError::config_shape(format!("'{}' is not a mapping", pointer)))?;
    let domain_values = domains.iter().map(|d| Value::from(d.as_str())).collect();
    virtual_host.insert("domains".to_owned(), Value::Array(domain_values));
    log::debug!("Rewrote virtual host '{}' domains to {:?}", pointer, domains);
    Ok(document)
}

/// Returns a json pointer to the targeted virtual host object
fn locate_virtual_host(document: &Value, target: &DomainTarget) -> Result<String, PlanError> {
    match *target {
        DomainTarget::FirstVirtualHost => locate_first_virtual_host(document),
        DomainTarget::Named {
            ref listener,
            ref virtual_host,
        } => locate_named_virtual_host(document, listener, virtual_host).or_else(|err| {
            let pointer = locate_first_virtual_host(document).map_err(|_| err.clone())?;
            log::warn!(
                "{}, rewriting the first virtual host of the template instead",
                err
            );
            Ok(pointer)
        }),
    }
}

enum Segment {
    Key(&'static str),
    First(&'static str),
}

const FIRST_VIRTUAL_HOST_PATH: &[Segment] = &[
    Segment::Key("static_resources"),
    Segment::First("listeners"),
    Segment::First("filter_chains"),
    Segment::First("filters"),
    Segment::Key("config"),
    Segment::Key("route_config"),
    Segment::First("virtual_hosts"),
];

fn locate_first_virtual_host(document: &Value) -> Result<String, PlanError> {
    let mut current = document;
    let mut pointer = String::new();
    let mut path = String::new();
    for segment in FIRST_VIRTUAL_HOST_PATH {
        let (key, first) = match *segment {
            Segment::Key(key) => (key, false),
            Segment::First(key) => (key, true),
        };
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(key);
        current = current
            .get(key)
            .ok_or_else(|| PlanError::config_shape(format!("missing '{}'", path)))?;
        pointer.push('/');
        pointer.push_str(key);

        if first {
            path.push_str("[0]");
            current = current
                .as_array()
                .and_then(|list| list.first())
                .ok_or_else(|| PlanError::config_shape(format!("'{}' is missing or empty", path)))?;
            pointer.push_str("/0");
        }
    }
    Ok(pointer)
}

fn locate_named_virtual_host(
    document: &Value,
    listener_name: &str,
    virtual_host_name: &str,
) -> Result<String, PlanError> {
    let listeners = document
        .pointer("/static_resources/listeners")
        .and_then(Value::as_array)
        .ok_or_else(|| PlanError::config_shape("missing 'static_resources.listeners'"))?;
    let (listener_idx, listener) = listeners
        .iter()
        .enumerate()
        .find(|(_, l)| l.get("name").and_then(Value::as_str) == Some(listener_name))
        .ok_or_else(|| {
            PlanError::config_shape(format!("no listener named '{}'", listener_name))
        })?;

    let chains = listener
        .get("filter_chains")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for (chain_idx, chain) in chains.iter().enumerate() {
        let filters = chain
            .get("filters")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        for (filter_idx, filter) in filters.iter().enumerate() {
            for config_key in &["config", "typed_config"] {
                let hosts = filter
                    .get(*config_key)
                    .and_then(|c| c.pointer("/route_config/virtual_hosts"))
                    .and_then(Value::as_array);
                let found = hosts.and_then(|hosts| {
                    hosts.iter().position(|vh| {
                        vh.get("name").and_then(Value::as_str) == Some(virtual_host_name)
                    })
                });
                if let Some(host_idx) = found {
                    return Ok(format!(
                        "/static_resources/listeners/{}/filter_chains/{}/filters/{}/{}\
                         /route_config/virtual_hosts/{}",
                        listener_idx, chain_idx, filter_idx, config_key, host_idx
                    ));
                }
            }
        }
    }
    Err(PlanError::config_shape(format!(
        "listener '{}' has no virtual host named '{}'",
        listener_name, virtual_host_name
    )))
}
