//! Managed DNS zones, used to serve the subdomain that applications inside the cloud live under
use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::kinds;
use crate::provisioner::Scope;
use crate::resource::{sanitize_name, Handle};

use serde_json::json;

pub const NAMESERVERS_POINTER: &str = "/status/nameServers";

/// Anything that serves a domain and can be delegated to through NS records
pub trait DnsZone {
    fn domain(&self) -> &str;

    fn nameservers(&self) -> Deferred<Vec<String>>;
}

/// A zone in the cloud provider's managed DNS
#[derive(Debug, Clone)]
pub struct ManagedDnsZone {
    domain: String,
    handle: Handle,
    scope: Scope,
}

impl ManagedDnsZone {
    /// Declares a zone for `domain`. The domain is always stored fully qualified, with the
    /// trailing dot, and the zone itself is named after the domain with dots turned into dashes.
    pub fn declare(scope: &Scope, domain: &str) -> Result<ManagedDnsZone, PlanError> {
        let domain = fully_qualified(domain);
        let zone_name = zone_name(&domain);
        log::info!("Declaring managed DNS zone '{}' for '{}'", zone_name, domain);
        let handle = scope.declare(
            kinds::dns_cloud::v1beta1::DNSManagedZone,
            &zone_name,
            json!({
                "spec": {
                    "dnsName": domain,
                }
            }),
        )?;
        Ok(ManagedDnsZone {
            domain,
            handle,
            scope: scope.clone(),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Declares a record set in this zone. `name` is the fully qualified host the record is for,
    /// given without the trailing dot.
    pub fn add_record(
        &self,
        record_type: &str,
        name: &str,
        value: impl Into<Deferred<String>>,
        ttl: u32,
    ) -> Result<Handle, PlanError> {
        let record_name = sanitize_name(&format!("{}-{}", record_type, name));
        let zone = self.handle.name().to_owned();
        let record_type = record_type.to_owned();
        let dns_name = fully_qualified(name);
        let value: Deferred<String> = value.into();
        self.scope.declare(
            kinds::dns_cloud::v1beta1::DNSRecordSet,
            &record_name,
            value.map(move |value| {
                json!({
                    "spec": {
                        "name": dns_name,
                        "type": record_type,
                        "ttl": ttl,
                        "managedZoneRef": { "name": zone },
                        "rrdatas": [value],
                    }
                })
            }),
        )
    }
}

impl DnsZone for ManagedDnsZone {
    fn domain(&self) -> &str {
        self.domain.as_str()
    }

    fn nameservers(&self) -> Deferred<Vec<String>> {
        self.scope.observe_str_list(&self.handle, NAMESERVERS_POINTER)
    }
}

fn fully_qualified(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_owned()
    } else {
        format!("{}.", domain)
    }
}

/// `gcp.internal.example.com.` becomes `gcp-internal-example-com`
pub fn zone_name(domain: &str) -> String {
    domain.trim_end_matches('.').replace('.', "-")
}
