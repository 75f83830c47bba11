//! Wildcard certificates issued by cert-manager with an ACME DNS-01 solver.
//!
//! Only the declarations live here. The ACME exchange, the DNS-01 challenge and renewals are
//! all handled by cert-manager once the issuer and certificate resources exist.
use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::iam::{self, ServiceAccount};
use crate::kinds;
use crate::provisioner::Scope;
use crate::resource::Handle;
use crate::sidecar::SecretRef;

use serde_json::json;

pub const SECRET_NAME_POINTER: &str = "/spec/secretName";
pub const ISSUER_NAME: &str = "letsencrypt-issuer";
pub const CERTIFICATE_NAME: &str = "wildcard-certificate";
pub const SOLVER_SECRET_NAME: &str = "cert-secret";
pub const SOLVER_SECRET_KEY: &str = "key.json";
pub const DNS_ADMIN_ROLE: &str = "roles/dns.admin";

/// A certificate whose secret may not exist yet. The secret name is read through a typed
/// accessor on the issued certificate, and resolves once the certificate is ready.
#[derive(Debug, Clone)]
pub struct CertificateReference {
    handle: Option<Handle>,
    secret: Deferred<SecretRef>,
}

impl CertificateReference {
    /// References the secret of a declared `Certificate` resource
    pub fn issued(scope: &Scope, handle: Handle) -> CertificateReference {
        let secret = scope
            .observe_str(&handle, SECRET_NAME_POINTER)
            .map(SecretRef::new);
        CertificateReference {
            handle: Some(handle),
            secret,
        }
    }

    /// References a secret that already exists outside of this stack
    pub fn from_secret(secret: SecretRef) -> CertificateReference {
        CertificateReference::from_deferred(Deferred::resolved(secret))
    }

    pub fn from_deferred(secret: Deferred<SecretRef>) -> CertificateReference {
        CertificateReference {
            handle: None,
            secret,
        }
    }

    pub fn secret(&self) -> Deferred<SecretRef> {
        self.secret.clone()
    }

    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }
}

/// Settings of the ACME issuer
#[derive(Debug, Clone, PartialEq)]
pub struct AcmeSettings {
    pub server: String,
    pub email: String,
    pub project: String,
}

/// All the resources behind a namespace's wildcard certificate
#[derive(Debug, Clone)]
pub struct WildcardCertificate {
    pub service_account: ServiceAccount,
    pub solver_secret: Handle,
    pub issuer: Handle,
    pub certificate: CertificateReference,
}

impl WildcardCertificate {
    /// Declares a certificate for `*.{domain}`. A cloud service account with DNS admin rights
    /// is created for the DNS-01 solver, and its key is stored in a secret the issuer reads.
    pub fn declare(
        scope: &Scope,
        domain: &str,
        acme: &AcmeSettings,
    ) -> Result<WildcardCertificate, PlanError> {
        let wildcard = format!("*.{}", domain);
        log::info!("Declaring wildcard certificate for '{}'", wildcard);

        let service_account =
            ServiceAccount::declare(scope, "cert-manager", "My Cert-Manager Service Account")?;
        iam::bind_to_role(scope, "cert-dns", &service_account, DNS_ADMIN_ROLE)?;
        let key = service_account.create_key(scope)?;

        let private_key = scope.observe_str(&key, iam::PRIVATE_KEY_POINTER);
        let solver_secret = scope.declare_in_cluster(
            kinds::core::v1::Secret,
            SOLVER_SECRET_NAME,
            private_key.map(|key| {
                json!({
                    "type": "Opaque",
                    "data": { SOLVER_SECRET_KEY: key },
                })
            }),
        )?;

        let issuer = scope.declare_in_cluster(
            kinds::cert_manager_io::v1alpha2::Issuer,
            ISSUER_NAME,
            json!({
                "spec": {
                    "acme": {
                        "server": acme.server,
                        "email": acme.email,
                        "privateKeySecretRef": { "name": ISSUER_NAME },
                        "solvers": [{
                            "dns01": {
                                "clouddns": {
                                    "project": acme.project,
                                    "serviceAccountSecretRef": {
                                        "name": solver_secret.name(),
                                        "key": SOLVER_SECRET_KEY,
                                    }
                                }
                            }
                        }]
                    }
                }
            }),
        )?;

        let certificate = scope.declare_in_cluster(
            kinds::cert_manager_io::v1alpha2::Certificate,
            CERTIFICATE_NAME,
            json!({
                "spec": {
                    "secretName": CERTIFICATE_NAME,
                    "issuerRef": {
                        "name": issuer.name(),
                        "kind": kinds::cert_manager_io::v1alpha2::Issuer.kind,
                    },
                    "dnsNames": [wildcard],
                    "acme": {
                        "config": [{
                            "dns01": { "provider": "clouddns" },
                            "domains": [wildcard],
                        }]
                    }
                }
            }),
        )?;

        Ok(WildcardCertificate {
            service_account,
            solver_secret,
            issuer,
            certificate: CertificateReference::issued(scope, certificate),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provisioner::InMemoryProvisioner;

    use std::sync::Arc;

    fn acme() -> AcmeSettings {
        AcmeSettings {
            server: "https://acme-staging-v02.api.letsencrypt.org/directory".to_owned(),
            email: "ops@example.com".to_owned(),
            project: "my-project".to_owned(),
        }
    }

    #[test]
    fn secret_name_resolves_once_the_certificate_is_ready() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone()).within_namespace("my-namespace");
        let domain = "my-namespace.gcp.internal.example.com";
        let wildcard = WildcardCertificate::declare(&scope, domain, &acme()).unwrap();

        let secret = wildcard.certificate.secret();
        assert!(secret.is_pending());
        let handle = wildcard.certificate.handle().unwrap().clone();
        provisioner.report_ready(&handle, json!({ "conditions": [] })).unwrap();
        assert_eq!(Some(Ok(SecretRef::new("wildcard-certificate"))), secret.try_now());
    }

    #[test]
    fn issuer_points_at_the_solver_secret() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone()).within_namespace("my-namespace");
        WildcardCertificate::declare(&scope, "example.com", &acme()).unwrap();

        let issuer = provisioner
            .plan()
            .into_iter()
            .find(|p| p.handle.kind.kind == "Issuer")
            .unwrap();
        match issuer.state {
            crate::provisioner::PlannedState::Declared(manifest) => {
                let clouddns = manifest.pointer("/spec/acme/solvers/0/dns01/clouddns").unwrap();
                assert_eq!(json!("cert-secret"), clouddns["serviceAccountSecretRef"]["name"]);
                assert_eq!(Some(&json!("my-namespace")), manifest.pointer("/metadata/namespace"));
            }
            other => panic!("expected a declared issuer, got: {:?}", other),
        }
    }

    #[test]
    fn certificate_covers_the_wildcard_domain() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone());
        let wildcard = WildcardCertificate::declare(&scope, "example.com", &acme()).unwrap();
        let handle = wildcard.certificate.handle().unwrap().clone();
        provisioner.report_ready(&handle, json!({})).unwrap();
        let names = scope.observe(&handle, "/spec/dnsNames/0");
        assert_eq!(Some(Ok(json!("*.example.com"))), names.try_now());
    }
}
