//! The standard deployment pattern for an application serving an API: the workload gets an
//! Envoy sidecar that terminates TLS with the namespace's wildcard certificate, and is exposed
//! through a `LoadBalancer` Service pointing at the sidecar.
use crate::certificate::CertificateReference;
use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::kinds;
use crate::provisioner::Scope;
use crate::resource::Handle;
use crate::sidecar::{
    self, ConfigMapRef, DomainTarget, ExposureDescriptor, SidecarConfigTemplate,
    SidecarInjector, TemplateLoadError, CA_BUNDLE_KEY, SIDECAR_CONFIG_KEY,
};
use crate::workload::{Labels, WorkloadSpec};

use serde_json::json;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const APP_LABEL: &str = "app";
pub const SERVICE_TYPE: &str = "LoadBalancer";
pub const EXTERNAL_IP_POINTER: &str = "/status/loadBalancer/ingress/0/ip";

/// Everything that's shared by all the sidecars of a stack
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarOptions {
    pub template: SidecarConfigTemplate,
    pub target: DomainTarget,
    /// PEM bundle of the CA that signs the client certificates presented by the CDN
    pub ca_bundle: String,
    pub injector: SidecarInjector,
}

impl SidecarOptions {
    pub fn new(template: SidecarConfigTemplate, ca_bundle: impl Into<String>) -> SidecarOptions {
        SidecarOptions {
            template,
            target: DomainTarget::default(),
            ca_bundle: ca_bundle.into(),
            injector: SidecarInjector::default(),
        }
    }

    /// Loads the template from `template_path`, or uses the bundled one if no path is given,
    /// and reads the CA bundle verbatim from `ca_bundle_path`
    pub fn load(
        template_path: Option<&Path>,
        ca_bundle_path: &Path,
    ) -> Result<SidecarOptions, TemplateLoadError> {
        let template = match template_path {
            Some(path) => SidecarConfigTemplate::from_file(path)?,
            None => SidecarConfigTemplate::bundled()?,
        };
        let ca_bundle = fs::read_to_string(ca_bundle_path)?;
        Ok(SidecarOptions::new(template, ca_bundle))
    }

    pub fn with_target(mut self, target: DomainTarget) -> Self {
        self.target = target;
        self
    }
}

/// An application declared with the standard pattern. This holds handles to the resources
/// that were declared, never the resources themselves.
#[derive(Debug, Clone)]
pub struct StandardApp {
    name: String,
    hostname: String,
    alias: String,
    scope: Scope,
    config_map: Handle,
    deployment: Handle,
    service: Handle,
    exposure: Deferred<ExposureDescriptor>,
}

impl StandardApp {
    /// Declares the sidecar config map, the augmented deployment and its service, in that
    /// order, since the service selector comes from the labels set on the deployment.
    ///
    /// `hostname` is the internal hostname of the app and `alias` the public one that the CDN
    /// proxies to it. The Envoy virtual host accepts both.
    pub fn declare(
        scope: &Scope,
        name: &str,
        hostname: &str,
        alias: &str,
        workload: impl Into<Deferred<WorkloadSpec>>,
        certificate: &CertificateReference,
        options: &SidecarOptions,
    ) -> Result<StandardApp, PlanError> {
        if name.is_empty() {
            return Err(PlanError::invariant("application name must not be empty"));
        }
        log::info!(
            "Declaring app '{}' serving '{}' and '{}'",
            name,
            hostname,
            alias
        );

        let domains = vec![hostname.to_owned(), alias.to_owned()];
        let sidecar_config = options.template.rewrite_domains(&options.target, &domains)?;
        let sidecar_yaml = sidecar_config.to_yaml().map_err(|e| {
            PlanError::config_shape(format!("failed to render sidecar config: {}", e))
        })?;

        let config_map_name = format!("{}-sidecar", name);
        let mut data = BTreeMap::new();
        data.insert(SIDECAR_CONFIG_KEY.to_owned(), sidecar_yaml);
        data.insert(CA_BUNDLE_KEY.to_owned(), options.ca_bundle.clone());
        let config_map = scope.declare_in_cluster(
            kinds::core::v1::ConfigMap,
            &config_map_name,
            json!({ "data": data }),
        )?;

        let app_labels = app_labels(name);
        let config_ref = ConfigMapRef::new(config_map_name);
        let injector = options.injector.clone();
        let app_name = name.to_owned();
        let workload: Deferred<WorkloadSpec> = workload.into();
        let augmented = workload
            .combine(&certificate.secret())
            .and_then(move |(spec, secret)| {
                let mut augmented =
                    injector.inject(&spec, &app_name, &app_labels, &config_ref, &secret)?;
                augmented.metadata.name = Some(app_name);
                Ok(augmented)
            });

        let deployment = scope.declare_in_cluster(
            kinds::apps::v1::Deployment,
            name,
            augmented.map(|w| w.to_value()),
        )?;

        let exposure = augmented.and_then(|w| sidecar::plan(&w));
        let service = scope.declare_in_cluster(
            kinds::core::v1::Service,
            name,
            exposure.map(|e| e.to_service_body(SERVICE_TYPE)),
        )?;

        Ok(StandardApp {
            name: name.to_owned(),
            hostname: hostname.to_owned(),
            alias: alias.to_owned(),
            scope: scope.clone(),
            config_map,
            deployment,
            service,
            exposure,
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Internal hostname of this app
    pub fn hostname(&self) -> &str {
        self.hostname.as_str()
    }

    pub fn alias(&self) -> &str {
        self.alias.as_str()
    }

    /// External IP address assigned to the app's load balancer
    pub fn external_ip(&self) -> Deferred<String> {
        self.scope.observe_str(&self.service, EXTERNAL_IP_POINTER)
    }

    pub fn exposure(&self) -> Deferred<ExposureDescriptor> {
        self.exposure.clone()
    }

    pub fn config_map(&self) -> &Handle {
        &self.config_map
    }

    pub fn deployment(&self) -> &Handle {
        &self.deployment
    }

    pub fn service(&self) -> &Handle {
        &self.service
    }
}

/// The single matchable identity every app is selected by
pub fn app_labels(name: &str) -> Labels {
    let mut labels = Labels::new();
    labels.insert(APP_LABEL.to_owned(), name.to_owned());
    labels
}
