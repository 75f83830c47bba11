//! The CDN zone that fronts the public domain.
//!
//! Public hostnames are proxied by the CDN to the internal hostnames of the apps, and the
//! internal subdomain is delegated to the cloud's managed DNS with NS records.
use crate::deferred::Deferred;
use crate::dns::{DnsZone, NAMESERVERS_POINTER};
use crate::error::PlanError;
use crate::kinds;
use crate::provisioner::Scope;
use crate::resource::{sanitize_name, Handle};

use serde_json::json;

pub const DELEGATION_TTL: u32 = 3600;
pub const ZONE_PLAN: &str = "free";

/// Settings applied to every zone. Strict TLS plus client auth means the origin only ever talks
/// to the CDN, which presents a certificate signed by the CDN's origin-pull CA.
pub fn default_zone_settings() -> serde_json::Value {
    json!({
        "alwaysUseHttps": "on",
        "minTlsVersion": "1.0",
        "ssl": "strict",
        "tlsClientAuth": "on",
    })
}

#[derive(Debug, Clone)]
pub struct CdnZone {
    domain: String,
    zone: Handle,
    settings: Handle,
    scope: Scope,
}

impl CdnZone {
    pub fn declare(scope: &Scope, domain: &str) -> Result<CdnZone, PlanError> {
        log::info!("Declaring CDN zone for '{}'", domain);
        let zone = scope.declare(
            kinds::cdn::v1::Zone,
            &sanitize_name(&format!("cdn-{}", domain)),
            json!({
                "spec": {
                    "zone": domain,
                    "jumpStart": false,
                    "paused": false,
                    "plan": ZONE_PLAN,
                }
            }),
        )?;
        let settings = scope.declare(
            kinds::cdn::v1::ZoneSettingsOverride,
            &format!("{}-settings", zone.name()),
            json!({
                "spec": {
                    "zoneRef": { "name": zone.name() },
                    "settings": default_zone_settings(),
                }
            }),
        )?;
        Ok(CdnZone {
            domain: domain.to_owned(),
            zone,
            settings,
            scope: scope.clone(),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.zone
    }

    pub fn settings(&self) -> &Handle {
        &self.settings
    }

    pub fn add_record(
        &self,
        record_type: &str,
        name: &str,
        value: &str,
        ttl: u32,
    ) -> Result<Handle, PlanError> {
        self.scope.declare(
            kinds::cdn::v1::Record,
            &sanitize_name(&format!("{}-{}-{}", record_type, name, value)),
            json!({
                "spec": {
                    "zoneRef": { "name": self.zone.name() },
                    "type": record_type,
                    "name": name,
                    "value": value,
                    "ttl": ttl,
                }
            }),
        )
    }

    /// Proxies requests for the public `host` through the CDN to `alias`
    pub fn add_proxy(&self, host: &str, alias: &str) -> Result<Handle, PlanError> {
        log::info!("Proxying '{}' to '{}'", host, alias);
        self.scope.declare(
            kinds::cdn::v1::Record,
            &sanitize_name(&format!("proxy-{}", host)),
            json!({
                "spec": {
                    "zoneRef": { "name": self.zone.name() },
                    "type": "CNAME",
                    "name": host,
                    "value": alias,
                    "proxied": true,
                }
            }),
        )
    }

    /// Delegates the domain of `subdomain` to its nameservers. The NS records can only be
    /// declared once the nameservers are known, so this returns their handles as a deferred
    /// value.
    pub fn add_subdomain(&self, subdomain: &dyn DnsZone) -> Deferred<Vec<Handle>> {
        let cdn = self.clone();
        let domain = subdomain.domain().to_owned();
        subdomain.nameservers().and_then(move |servers| {
            log::info!(
                "Delegating '{}' to {} nameservers",
                domain,
                servers.len()
            );
            servers
                .iter()
                .map(|server| cdn.add_record("NS", &domain, server, DELEGATION_TTL))
                .collect()
        })
    }
}

impl DnsZone for CdnZone {
    fn domain(&self) -> &str {
        self.domain.as_str()
    }

    fn nameservers(&self) -> Deferred<Vec<String>> {
        self.scope.observe_str_list(&self.zone, NAMESERVERS_POINTER)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dns::ManagedDnsZone;
    use crate::provisioner::{InMemoryProvisioner, PlannedState};

    use std::sync::Arc;

    fn spec_of(provisioner: &InMemoryProvisioner, handle: &Handle) -> serde_json::Value {
        let planned = provisioner
            .plan()
            .into_iter()
            .find(|p| &p.handle == handle)
            .unwrap();
        match planned.state {
            PlannedState::Declared(manifest) => manifest["spec"].clone(),
            other => panic!("expected {} to be declared, got: {:?}", handle, other),
        }
    }

    #[test]
    fn zone_is_declared_with_default_settings() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone());
        let cdn = CdnZone::declare(&scope, "example.com").unwrap();
        assert_eq!("cdn-example-com", cdn.handle().name());

        let zone = spec_of(&provisioner, cdn.handle());
        assert_eq!(json!("example.com"), zone["zone"]);
        assert_eq!(json!("free"), zone["plan"]);

        let settings = spec_of(&provisioner, cdn.settings());
        assert_eq!(json!("strict"), settings["settings"]["ssl"]);
        assert_eq!(json!("on"), settings["settings"]["tlsClientAuth"]);
        assert_eq!(json!("cdn-example-com"), settings["zoneRef"]["name"]);
    }

    #[test]
    fn proxy_is_a_proxied_cname() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone());
        let cdn = CdnZone::declare(&scope, "example.com").unwrap();
        let proxy = cdn
            .add_proxy("nginx.example.com", "nginx.my-namespace.gcp.internal.example.com")
            .unwrap();
        let spec = spec_of(&provisioner, &proxy);
        assert_eq!(json!("CNAME"), spec["type"]);
        assert_eq!(json!(true), spec["proxied"]);
        assert_eq!(json!("nginx.my-namespace.gcp.internal.example.com"), spec["value"]);
    }

    #[test]
    fn subdomain_gets_one_ns_record_per_nameserver() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone());
        let cdn = CdnZone::declare(&scope, "example.com").unwrap();
        let subdomain = ManagedDnsZone::declare(&scope, "gcp.internal.example.com").unwrap();

        let records = cdn.add_subdomain(&subdomain);
        assert!(records.is_pending());
        assert_eq!(3, provisioner.len());

        provisioner
            .report_ready(
                subdomain.handle(),
                json!({
                    "nameServers": [
                        "ns-cloud-a1.googledomains.com.",
                        "ns-cloud-a2.googledomains.com.",
                    ]
                }),
            )
            .unwrap();
        let records = records.try_now().unwrap().unwrap();
        assert_eq!(2, records.len());
        let servers = ["ns-cloud-a1.googledomains.com.", "ns-cloud-a2.googledomains.com."];
        for (record, server) in records.iter().zip(&servers) {
            let spec = spec_of(&provisioner, record);
            assert_eq!(json!("NS"), spec["type"]);
            assert_eq!(json!("gcp.internal.example.com."), spec["name"]);
            assert_eq!(json!(server), spec["value"]);
            assert_eq!(json!(3600), spec["ttl"]);
        }
    }

    #[test]
    fn subdomain_failure_declares_nothing() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone());
        let cdn = CdnZone::declare(&scope, "example.com").unwrap();
        let subdomain = ManagedDnsZone::declare(&scope, "gcp.internal.example.com").unwrap();

        let records = cdn.add_subdomain(&subdomain);
        provisioner.report_failed(subdomain.handle(), "quota exceeded").unwrap();
        assert!(matches!(records.try_now(), Some(Err(PlanError::DeferredResolution(_)))));
        assert_eq!(3, provisioner.len());
    }
}
