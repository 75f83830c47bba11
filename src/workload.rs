//! Typed description of a workload: a Deployment-shaped tree of metadata, a selector and a
//! pod template. Only the fields that the sidecar transform reads or writes are modelled
//! explicitly. Everything else on a pod spec or a container is kept in an `extra` map, so
//! that a caller-supplied workload survives a round trip through these types untouched.
use crate::error::PlanError;

use serde_json::Value;

use std::collections::{BTreeMap, HashSet};

pub type Labels = BTreeMap<String, String>;

/// Builds a label set from `(key, value)` pairs
pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Labels,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: Labels,
}

/// The caller-supplied workload. This has the same shape as a Kubernetes Deployment without
/// the `apiVersion` and `kind`, which are added when it's declared.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkloadSpec {
    #[serde(default)]
    pub metadata: Metadata,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub selector: LabelSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<PodTemplate>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Quantities are kept as the strings Kubernetes uses, like `100m` or `64Mi`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    #[serde(flatten)]
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSource {
    ConfigMap(ConfigMapVolume),
    Secret(SecretVolume),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMapVolume {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolume {
    pub secret_name: String,
}

impl VolumeSpec {
    pub fn config_map(name: impl Into<String>, config_map: impl Into<String>) -> VolumeSpec {
        VolumeSpec {
            name: name.into(),
            source: VolumeSource::ConfigMap(ConfigMapVolume {
                name: config_map.into(),
            }),
        }
    }

    pub fn secret(name: impl Into<String>, secret_name: impl Into<String>) -> VolumeSpec {
        VolumeSpec {
            name: name.into(),
            source: VolumeSource::Secret(SecretVolume {
                secret_name: secret_name.into(),
            }),
        }
    }
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, container_port: u16) -> Self {
        self.ports.push(ContainerPort {
            name: None,
            container_port,
            protocol: None,
        });
        self
    }
}

impl WorkloadSpec {
    /// Creates a workload with a single pod template holding the given containers
    pub fn with_containers(containers: Vec<ContainerSpec>) -> WorkloadSpec {
        WorkloadSpec {
            metadata: Metadata::default(),
            spec: DeploymentSpec {
                template: Some(PodTemplate {
                    metadata: Metadata::default(),
                    spec: PodSpec {
                        containers,
                        ..Default::default()
                    },
                }),
                ..Default::default()
            },
        }
    }

    pub fn from_value(value: Value) -> Result<WorkloadSpec, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Value {
        // every field is a string, number, bool, list or string-keyed map, so this can't fail
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn template(&self) -> Option<&PodTemplate> {
        self.spec.template.as_ref()
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        self.template().map(|t| &t.spec)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.pod_spec()
            .and_then(|pod| pod.containers.iter().find(|c| c.name == name))
    }

    pub fn volume(&self, name: &str) -> Option<&VolumeSpec> {
        self.pod_spec()
            .and_then(|pod| pod.volumes.iter().find(|v| v.name == name))
    }

    /// Checks the structural invariants of the pod template: container names and volume
    /// names are unique, and every volume mount refers to a volume that exists.
    pub fn validate(&self) -> Result<(), PlanError> {
        let pod = match self.pod_spec() {
            Some(pod) => pod,
            None => return Err(PlanError::invariant("workload has no pod template")),
        };

        let mut container_names = HashSet::new();
        for container in pod.containers.iter() {
            if !container_names.insert(container.name.as_str()) {
                return Err(PlanError::invariant(format!(
                    "duplicate container name '{}'",
                    container.name
                )));
            }
        }

        let mut volume_names = HashSet::new();
        for volume in pod.volumes.iter() {
            if !volume_names.insert(volume.name.as_str()) {
                return Err(PlanError::invariant(format!(
                    "duplicate volume name '{}'",
                    volume.name
                )));
            }
        }

        for container in pod.containers.iter() {
            if let Some(mount) = container
                .volume_mounts
                .iter()
                .find(|m| !volume_names.contains(m.name.as_str()))
            {
                return Err(PlanError::invariant(format!(
                    "container '{}' mounts volume '{}', which does not exist",
                    container.name, mount.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn workload_round_trips_unknown_container_fields() {
        let input = json!({
            "spec": {
                "replicas": 1,
                "selector": {},
                "strategy": { "type": "Recreate" },
                "template": {
                    "spec": {
                        "containers": [{
                            "name": "nginx",
                            "image": "nginx:1.7.9",
                            "ports": [{ "containerPort": 80 }],
                            "env": [{ "name": "MODE", "value": "prod" }],
                        }],
                        "serviceAccountName": "web",
                    }
                }
            }
        });
        let workload = WorkloadSpec::from_value(input).expect("failed to parse workload");
        let nginx = workload.container("nginx").expect("missing nginx container");
        assert_eq!(80, nginx.ports[0].container_port);
        assert_eq!(Some(&json!([{ "name": "MODE", "value": "prod" }])), nginx.extra.get("env"));

        let output = workload.to_value();
        assert_eq!(Some(&json!("web")), output.pointer("/spec/template/spec/serviceAccountName"));
        assert_eq!(Some(&json!("Recreate")), output.pointer("/spec/strategy/type"));
    }

    #[test]
    fn volume_sources_use_kubernetes_field_names() {
        let volumes = vec![
            VolumeSpec::config_map("envoy-conf", "sidecar"),
            VolumeSpec::secret("cert", "wildcard-certificate"),
        ];
        let actual = serde_json::to_value(&volumes).unwrap();
        let expected = json!([
            { "name": "envoy-conf", "configMap": { "name": "sidecar" } },
            { "name": "cert", "secret": { "secretName": "wildcard-certificate" } },
        ]);
        assert_eq!(expected, actual);
    }

    #[test]
    fn validate_rejects_mounts_of_missing_volumes() {
        let mut container = ContainerSpec::new("app", "busybox:latest");
        container.volume_mounts.push(VolumeMount {
            name: "data".to_owned(),
            mount_path: "/data".to_owned(),
            read_only: None,
        });
        let workload = WorkloadSpec::with_containers(vec![container]);
        match workload.validate() {
            Err(PlanError::InvariantViolation(msg)) => assert!(msg.contains("'data'")),
            other => panic!("expected invariant violation, got: {:?}", other),
        }
    }

    #[test]
    fn validate_rejects_duplicate_container_names() {
        let workload = WorkloadSpec::with_containers(vec![
            ContainerSpec::new("app", "busybox:latest"),
            ContainerSpec::new("app", "nginx:1.7.9"),
        ]);
        assert!(workload.validate().is_err());
    }

    #[test]
    fn validate_requires_a_pod_template() {
        let workload = WorkloadSpec::default();
        assert_eq!(
            Err(PlanError::InvariantViolation(
                "workload has no pod template".to_owned()
            )),
            workload.validate()
        );
    }
}
