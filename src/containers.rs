use crate::app::{SidecarOptions, StandardApp};
use crate::certificate::{AcmeSettings, WildcardCertificate};
use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::provisioner::Scope;
use crate::resource::Handle;
use crate::workload::WorkloadSpec;

/// A group of apps sharing a namespace, an internal domain and a wildcard certificate for it
#[derive(Debug, Clone)]
pub struct Containers {
    scope: Scope,
    namespace: Handle,
    provider: Handle,
    domain: String,
    certificate: WildcardCertificate,
}

impl Containers {
    /// `scope` must already be bound to the namespace. Everything declared in the cluster on
    /// behalf of the group goes through `provider`.
    pub fn declare(
        scope: &Scope,
        namespace: Handle,
        provider: Handle,
        domain: &str,
        acme: &AcmeSettings,
    ) -> Result<Containers, PlanError> {
        if scope.namespace() != Some(namespace.name()) {
            return Err(PlanError::invariant(format!(
                "containers for namespace '{}' declared in scope {:?}",
                namespace.name(),
                scope.namespace()
            )));
        }
        let scope = scope.with_provider(&provider);
        let certificate = WildcardCertificate::declare(&scope, domain, acme)?;
        Ok(Containers {
            scope,
            namespace,
            provider,
            domain: domain.to_owned(),
            certificate,
        })
    }

    pub fn domain(&self) -> &str {
        self.domain.as_str()
    }

    pub fn namespace(&self) -> &Handle {
        &self.namespace
    }

    pub fn provider(&self) -> &Handle {
        &self.provider
    }

    pub fn certificate(&self) -> &WildcardCertificate {
        &self.certificate
    }

    /// Declares an app that is reachable as `{name}.{domain}` internally and as `host` publicly
    pub fn new_service(
        &self,
        name: &str,
        host: &str,
        workload: impl Into<Deferred<WorkloadSpec>>,
        options: &SidecarOptions,
    ) -> Result<StandardApp, PlanError> {
        let internal_host = format!("{}.{}", name, self.domain);
        StandardApp::declare(
            &self.scope,
            name,
            &internal_host,
            host,
            workload,
            &self.certificate.certificate,
            options,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kinds;
    use crate::provisioner::{InMemoryProvisioner, PlannedState};
    use crate::resource::ObjectId;
    use crate::sidecar::SidecarConfigTemplate;
    use crate::workload::ContainerSpec;
    use serde_json::json;

    use std::sync::Arc;

    fn acme() -> AcmeSettings {
        AcmeSettings {
            server: "https://acme-v02.api.letsencrypt.org/directory".to_owned(),
            email: "ops@example.com".to_owned(),
            project: "my-project".to_owned(),
        }
    }

    fn namespace_handle() -> Handle {
        Handle::new(kinds::core::v1::Namespace, ObjectId::cluster_scoped("my-namespace"))
    }

    fn provider_handle() -> Handle {
        Handle::new(
            kinds::provisioner::v1::KubernetesProvider,
            ObjectId::cluster_scoped("k8sprovider"),
        )
    }

    #[test]
    fn scope_must_match_the_namespace() {
        let scope = Scope::new(Arc::new(InMemoryProvisioner::new())).within_namespace("other");
        let result = Containers::declare(
            &scope,
            namespace_handle(),
            provider_handle(),
            "example.com",
            &acme(),
        );
        assert!(matches!(result, Err(PlanError::InvariantViolation(_))));
    }

    #[test]
    fn services_are_served_under_the_internal_domain() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone()).within_namespace("my-namespace");
        let containers = Containers::declare(
            &scope,
            namespace_handle(),
            provider_handle(),
            "my-namespace.gcp.internal.example.com",
            &acme(),
        )
        .unwrap();
        let options = SidecarOptions::new(SidecarConfigTemplate::bundled().unwrap(), "ca");
        let workload = WorkloadSpec::with_containers(vec![
            ContainerSpec::new("nginx", "nginx:1.7.9").with_port(80)
        ]);
        let app = containers
            .new_service("nginx", "nginx.example.com", workload, &options)
            .unwrap();

        assert_eq!("nginx.my-namespace.gcp.internal.example.com", app.hostname());
        assert_eq!("nginx.example.com", app.alias());
        assert_eq!(Some("my-namespace"), app.deployment().namespace());
        // the deployment waits on the certificate
        assert!(app.exposure().is_pending());

        let certificate = containers.certificate().certificate.handle().unwrap().clone();
        provisioner.report_ready(&certificate, json!({})).unwrap();
        let deployment = provisioner
            .plan()
            .into_iter()
            .find(|p| &p.handle == app.deployment())
            .map(|p| p.state);
        match deployment {
            Some(PlannedState::Declared(manifest)) => {
                assert_eq!(json!({ "name": "k8sprovider" }), manifest["providerRef"])
            }
            other => panic!("expected a declared deployment, got: {:?}", other),
        }
    }
}
