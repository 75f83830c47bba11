//! Turns a plain workload into a TLS-terminated, Envoy-fronted one.
//!
//! The transform runs in three steps, each of them a pure function:
//!
//! 1. `SidecarConfigTemplate::rewrite_domains` points the Envoy virtual host at the
//!    hostnames the application is served under.
//! 2. `SidecarInjector::inject` appends the `envoy` container and its `envoy-conf` and `cert`
//!    volumes to the pod template, and pins the pod labels and the selector.
//! 3. `plan` derives the `ExposureDescriptor` that the Service is built from.
//!
//! None of these mutate their inputs.
mod expose;
mod inject;
mod template;

pub use self::expose::{plan, ExposureDescriptor, ServicePort};
pub use self::inject::{inject, SidecarInjector};
pub use self::template::{
    rewrite_domains, DomainTarget, SidecarConfigTemplate, TemplateLoadError,
};

pub const SIDECAR_CONTAINER_NAME: &str = "envoy";
pub const CONFIG_VOLUME_NAME: &str = "envoy-conf";
pub const CERT_VOLUME_NAME: &str = "cert";

pub const ENVOY_IMAGE: &str = "envoyproxy/envoy:v1.12.2";
pub const ENVOY_BINARY: &str = "/usr/local/bin/envoy";
pub const ENVOY_CONFIG_DIR: &str = "/etc/envoy";
pub const CERT_DIR: &str = "/var/run/certs";
pub const HTTPS_PORT: u16 = 443;

/// Key of the rendered Envoy config inside the sidecar config map
pub const SIDECAR_CONFIG_KEY: &str = "sidecar.yaml";
/// Key of the CA bundle used to validate client certificates presented by the CDN
pub const CA_BUNDLE_KEY: &str = "cloudflare-ca.pem";

/// Names used by the bundled Envoy template
pub const DEFAULT_LISTENER_NAME: &str = "listener_https";
pub const DEFAULT_VIRTUAL_HOST_NAME: &str = "backend";

/// Reference to the config map holding the rendered sidecar config
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigMapRef {
    pub name: String,
}

impl ConfigMapRef {
    pub fn new(name: impl Into<String>) -> ConfigMapRef {
        ConfigMapRef { name: name.into() }
    }
}

/// Reference to a secret holding a TLS key and certificate pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretRef {
    pub secret_name: String,
}

impl SecretRef {
    pub fn new(secret_name: impl Into<String>) -> SecretRef {
        SecretRef {
            secret_name: secret_name.into(),
        }
    }
}
