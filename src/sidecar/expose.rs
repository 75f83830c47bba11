use super::{CERT_VOLUME_NAME, CONFIG_VOLUME_NAME, SIDECAR_CONTAINER_NAME};
use crate::error::PlanError;
use crate::workload::{Labels, WorkloadSpec};

use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

/// What a Service needs in order to route external traffic to a workload's sidecar. This is
/// only ever derived from a workload that went through `SidecarInjector::inject`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureDescriptor {
    pub selector: Labels,
    pub ports: Vec<ServicePort>,
}

impl ExposureDescriptor {
    /// Renders the body of a Service of the given type, for example `LoadBalancer`
    pub fn to_service_body(&self, service_type: &str) -> Value {
        json!({
            "spec": {
                "type": service_type,
                "ports": self.ports,
                "selector": self.selector,
            }
        })
    }
}

/// Derives the exposure of an augmented workload: its selector is the pod template's label
/// set, and its ports are the ports declared by the sidecar container.
pub fn plan(augmented: &WorkloadSpec) -> Result<ExposureDescriptor, PlanError> {
    let template = augmented
        .template()
        .ok_or_else(|| PlanError::invariant("workload has no pod template"))?;
    let sidecar = augmented.container(SIDECAR_CONTAINER_NAME).ok_or_else(|| {
        PlanError::invariant(format!(
            "workload has no '{}' container, \
             the sidecar must be injected before planning an exposure",
            SIDECAR_CONTAINER_NAME
        ))
    })?;
    for volume in &[CONFIG_VOLUME_NAME, CERT_VOLUME_NAME] {
        if augmented.volume(volume).is_none() {
            return Err(PlanError::invariant(format!(
                "workload has no '{}' volume for the sidecar",
                volume
            )));
        }
    }

    let selector = template.metadata.labels.clone();
    if selector.is_empty() {
        return Err(PlanError::invariant("pod template has no labels to select"));
    }
    if selector != augmented.spec.selector.match_labels {
        return Err(PlanError::invariant(
            "deployment selector does not match the pod template labels",
        ));
    }
    if sidecar.ports.is_empty() {
        return Err(PlanError::invariant("sidecar container declares no ports"));
    }

    let ports = sidecar
        .ports
        .iter()
        .enumerate()
        .map(|(i, port)| {
            let name = port.name.clone().unwrap_or_else(|| {
                if i == 0 {
                    SIDECAR_CONTAINER_NAME.to_owned()
                } else {
                    format!("{}-{}", SIDECAR_CONTAINER_NAME, port.container_port)
                }
            });
            ServicePort {
                name,
                port: port.container_port,
                protocol: port.protocol.clone().unwrap_or_else(|| "TCP".to_owned()),
            }
        })
        .collect();
    Ok(ExposureDescriptor { selector, ports })
}
