use super::{
    ConfigMapRef, SecretRef, CERT_DIR, CERT_VOLUME_NAME, CONFIG_VOLUME_NAME, ENVOY_BINARY,
    ENVOY_CONFIG_DIR, ENVOY_IMAGE, HTTPS_PORT, SIDECAR_CONFIG_KEY, SIDECAR_CONTAINER_NAME,
};
use crate::error::PlanError;
use crate::workload::{
    ContainerPort, ContainerSpec, Labels, ResourceRequirements, VolumeMount, VolumeSpec,
    WorkloadSpec,
};

use std::collections::BTreeMap;

/// Adds the Envoy sidecar to workloads. The `Default` injector uses the fixed Envoy
/// container that the bundled sidecar template expects.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarInjector {
    sidecar: ContainerSpec,
}

impl Default for SidecarInjector {
    fn default() -> SidecarInjector {
        SidecarInjector {
            sidecar: envoy_container(),
        }
    }
}

impl SidecarInjector {
    pub fn sidecar(&self) -> &ContainerSpec {
        &self.sidecar
    }

    /// Returns a new workload with the sidecar added. The pod template labels and the
    /// selector are both set to exactly `app_labels`; apart from that the transform only
    /// appends. Fails with `NameCollision` if the workload already has an `envoy` container
    /// or an `envoy-conf` or `cert` volume.
    pub fn inject(
        &self,
        spec: &WorkloadSpec,
        name: &str,
        app_labels: &Labels,
        sidecar_config: &ConfigMapRef,
        cert_secret: &SecretRef,
    ) -> Result<WorkloadSpec, PlanError> {
        if name.is_empty() {
            return Err(PlanError::invariant("workload name must not be empty"));
        }
        if app_labels.is_empty() {
            return Err(PlanError::invariant(format!(
                "workload '{}' needs at least one label to be selectable",
                name
            )));
        }
        let template = spec.template().ok_or_else(|| {
            PlanError::invariant(format!("workload '{}' has no pod template", name))
        })?;

        if template
            .spec
            .containers
            .iter()
            .any(|c| c.name == self.sidecar.name)
        {
            return Err(PlanError::NameCollision {
                kind: "container",
                name: self.sidecar.name.clone(),
            });
        }
        let reserved_volumes = [CONFIG_VOLUME_NAME, CERT_VOLUME_NAME];
        if let Some(volume) = template
            .spec
            .volumes
            .iter()
            .find(|v| reserved_volumes.contains(&v.name.as_str()))
        {
            return Err(PlanError::NameCollision {
                kind: "volume",
                name: volume.name.clone(),
            });
        }

        let mut augmented = spec.clone();
        augmented.spec.selector.match_labels = app_labels.clone();
        if let Some(template) = augmented.spec.template.as_mut() {
            template.metadata.labels = app_labels.clone();
            let pod = &mut template.spec;
            pod.containers.push(self.sidecar.clone());
            pod.volumes.push(VolumeSpec::config_map(
                CONFIG_VOLUME_NAME,
                sidecar_config.name.as_str(),
            ));
            pod.volumes.push(VolumeSpec::secret(
                CERT_VOLUME_NAME,
                cert_secret.secret_name.as_str(),
            ));
        }
        augmented.validate()?;

        log::debug!(
            "Injected sidecar into workload '{}' with config map '{}' and certificate secret '{}'",
            name,
            sidecar_config.name,
            cert_secret.secret_name
        );
        Ok(augmented)
    }
}

/// Injects the default Envoy sidecar. See `SidecarInjector::inject`.
pub fn inject(
    spec: &WorkloadSpec,
    name: &str,
    app_labels: &Labels,
    sidecar_config: &ConfigMapRef,
    cert_secret: &SecretRef,
) -> Result<WorkloadSpec, PlanError> {
    SidecarInjector::default().inject(spec, name, app_labels, sidecar_config, cert_secret)
}

fn quantities(cpu: &str, memory: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("cpu".to_owned(), cpu.to_owned());
    map.insert("memory".to_owned(), memory.to_owned());
    map
}

fn envoy_container() -> ContainerSpec {
    ContainerSpec {
        name: SIDECAR_CONTAINER_NAME.to_owned(),
        image: ENVOY_IMAGE.to_owned(),
        command: vec![ENVOY_BINARY.to_owned()],
        args: vec![
            format!("--config-path {}/{}", ENVOY_CONFIG_DIR, SIDECAR_CONFIG_KEY),
            "--mode serve".to_owned(),
            "-l debug".to_owned(),
        ],
        ports: vec![ContainerPort {
            name: None,
            container_port: HTTPS_PORT,
            protocol: Some("TCP".to_owned()),
        }],
        resources: Some(ResourceRequirements {
            limits: quantities("200m", "128Mi"),
            requests: quantities("100m", "64Mi"),
        }),
        volume_mounts: vec![
            VolumeMount {
                name: CONFIG_VOLUME_NAME.to_owned(),
                mount_path: ENVOY_CONFIG_DIR.to_owned(),
                read_only: None,
            },
            VolumeMount {
                name: CERT_VOLUME_NAME.to_owned(),
                mount_path: CERT_DIR.to_owned(),
                read_only: None,
            },
        ],
        extra: BTreeMap::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::workload::{labels, VolumeSource};
    use serde_json::json;

    fn nginx() -> WorkloadSpec {
        WorkloadSpec::with_containers(vec![
            ContainerSpec::new("nginx", "nginx:1.7.9").with_port(80)
        ])
    }

    fn run(spec: &WorkloadSpec) -> Result<WorkloadSpec, PlanError> {
        inject(
            spec,
            "nginx",
            &labels(vec![("app", "nginx")]),
            &ConfigMapRef::new("sidecar"),
            &SecretRef::new("wildcard-certificate"),
        )
    }

    #[test]
    fn inject_appends_the_sidecar_and_its_volumes() {
        let input = nginx();
        let output = run(&input).expect("injection failed");
        let pod = output.pod_spec().unwrap();

        assert_eq!(2, pod.containers.len());
        assert_eq!(input.pod_spec().unwrap().containers[0], pod.containers[0]);
        let envoy = &pod.containers[1];
        assert_eq!("envoy", envoy.name);
        assert_eq!("envoyproxy/envoy:v1.12.2", envoy.image);
        assert_eq!(443, envoy.ports[0].container_port);
        assert_eq!(Some("TCP"), envoy.ports[0].protocol.as_deref());

        let volume_names: Vec<&str> = pod.volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(vec!["envoy-conf", "cert"], volume_names);
        match pod.volumes[1].source {
            VolumeSource::Secret(ref secret) => {
                assert_eq!("wildcard-certificate", secret.secret_name)
            }
            ref other => panic!("expected secret volume, got: {:?}", other),
        }
    }

    #[test]
    fn inject_does_not_modify_its_input() {
        let input = nginx();
        let before = input.clone();
        let _ = run(&input).unwrap();
        assert_eq!(before, input);
    }

    #[test]
    fn inject_replaces_labels_and_selector() {
        let mut input = nginx();
        input.spec.selector.match_labels = labels(vec![("tier", "web")]);
        if let Some(template) = input.spec.template.as_mut() {
            template.metadata.labels = labels(vec![("tier", "web"), ("team", "edge")]);
        }
        let output = run(&input).unwrap();
        let expected = labels(vec![("app", "nginx")]);
        assert_eq!(expected, output.spec.selector.match_labels);
        assert_eq!(expected, output.template().unwrap().metadata.labels);
    }

    #[test]
    fn inject_keeps_existing_volumes_first() {
        let mut input = nginx();
        if let Some(template) = input.spec.template.as_mut() {
            template.spec.volumes.push(VolumeSpec::config_map("content", "nginx-content"));
        }
        let output = run(&input).unwrap();
        let volume_names: Vec<&str> = output
            .pod_spec()
            .unwrap()
            .volumes
            .iter()
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(vec!["content", "envoy-conf", "cert"], volume_names);
    }

    #[test]
    fn inject_is_deterministic() {
        let input = nginx();
        let first = serde_json::to_string(&run(&input).unwrap()).unwrap();
        let second = serde_json::to_string(&run(&input).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn existing_envoy_container_is_a_collision() {
        let input = WorkloadSpec::with_containers(vec![
            ContainerSpec::new("nginx", "nginx:1.7.9"),
            ContainerSpec::new("envoy", "envoyproxy/envoy:v1.14.1"),
        ]);
        assert_eq!(
            Err(PlanError::NameCollision {
                kind: "container",
                name: "envoy".to_owned()
            }),
            run(&input)
        );
    }

    #[test]
    fn existing_cert_volume_is_a_collision() {
        let mut input = nginx();
        if let Some(template) = input.spec.template.as_mut() {
            template.spec.volumes.push(VolumeSpec::secret("cert", "my-own-cert"));
        }
        assert_eq!(
            Err(PlanError::NameCollision {
                kind: "volume",
                name: "cert".to_owned()
            }),
            run(&input)
        );
    }

    #[test]
    fn existing_envoy_conf_volume_is_a_collision() {
        let mut input = nginx();
        if let Some(template) = input.spec.template.as_mut() {
            template.spec.volumes.push(VolumeSpec::config_map("envoy-conf", "nginx-envoy"));
        }
        assert_eq!(
            Err(PlanError::NameCollision {
                kind: "volume",
                name: "envoy-conf".to_owned()
            }),
            run(&input)
        );
    }

    #[test]
    fn inject_requires_a_pod_template() {
        let result = run(&WorkloadSpec::default());
        match result {
            Err(PlanError::InvariantViolation(msg)) => assert!(msg.contains("no pod template")),
            other => panic!("expected invariant violation, got: {:?}", other),
        }
    }

    #[test]
    fn envoy_container_serializes_like_a_kubernetes_container() {
        let actual = serde_json::to_value(SidecarInjector::default().sidecar()).unwrap();
        let expected = json!({
            "name": "envoy",
            "image": "envoyproxy/envoy:v1.12.2",
            "command": ["/usr/local/bin/envoy"],
            "args": ["--config-path /etc/envoy/sidecar.yaml", "--mode serve", "-l debug"],
            "ports": [{ "containerPort": 443, "protocol": "TCP" }],
            "resources": {
                "limits": { "cpu": "200m", "memory": "128Mi" },
                "requests": { "cpu": "100m", "memory": "64Mi" },
            },
            "volumeMounts": [
                { "name": "envoy-conf", "mountPath": "/etc/envoy" },
                { "name": "cert", "mountPath": "/var/run/certs" },
            ],
        });
        assert_eq!(expected, actual);
    }
}
