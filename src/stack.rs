//! The whole topology, declared from a `StackConfig`.
//!
//! The public domain is served by the CDN, and a subdomain of it is delegated to the cloud's
//! managed DNS, which holds the records of the apps' internal hostnames. Apps run in a single
//! namespace of a public cluster, and the CDN proxies each app's public host to its internal one.
use crate::app::{SidecarOptions, StandardApp};
use crate::cdn::CdnZone;
use crate::cluster::{ClusterSettings, PublicCluster};
use crate::config::StackConfig;
use crate::containers::Containers;
use crate::deferred::Deferred;
use crate::dns::ManagedDnsZone;
use crate::error::Error;
use crate::provisioner::Scope;
use crate::resource::Handle;

pub const APP_RECORD_TTL: u32 = 300;

/// An app along with the records that make it reachable
#[derive(Debug, Clone)]
pub struct PublishedApp {
    pub app: StandardApp,
    /// A record of the internal hostname, pointing at the app's load balancer
    pub record: Handle,
    /// CDN proxy from the public host to the internal hostname
    pub proxy: Handle,
}

impl PublishedApp {
    pub fn internal_url(&self) -> String {
        format!("https://{}", self.app.hostname())
    }

    pub fn public_url(&self) -> String {
        format!("https://{}", self.app.alias())
    }
}

#[derive(Debug, Clone)]
pub struct Stack {
    pub cdn: CdnZone,
    pub subdomain: ManagedDnsZone,
    /// NS records delegating the subdomain, declared once its nameservers are known
    pub delegation: Deferred<Vec<Handle>>,
    pub cluster: PublicCluster,
    pub containers: Containers,
    pub apps: Vec<PublishedApp>,
}

impl Stack {
    /// Declares everything in `config`, in dependency order. The config is validated first, and
    /// any error aborts the declaration pass. Whatever was declared before the error stays
    /// declared, it's up to the caller to discard it.
    pub fn declare(
        scope: &Scope,
        config: &StackConfig,
        options: &SidecarOptions,
    ) -> Result<Stack, Error> {
        config.validate()?;
        let deployer_email = config.deployer_email()?;

        let cdn = CdnZone::declare(scope, &config.domain)?;
        let subdomain = ManagedDnsZone::declare(scope, &config.internal_subdomain())?;
        let delegation = cdn.add_subdomain(&subdomain);

        let settings = ClusterSettings::new(
            config.zone.as_str(),
            config.cluster_version.as_str(),
            config.project.as_str(),
            deployer_email,
        )
        .with_node_count(config.node_count);
        let cluster = PublicCluster::declare(scope, settings)?;
        let containers = cluster.new_containers(
            &config.namespace,
            &config.containers_domain(),
            &config.acme_settings(),
        )?;

        let mut apps = Vec::with_capacity(config.apps.len());
        for app_config in config.apps.iter() {
            let host = app_config.public_host(&config.domain);
            let app = containers.new_service(
                &app_config.name,
                &host,
                app_config.workload.clone(),
                options,
            )?;
            let record =
                subdomain.add_record("A", app.hostname(), app.external_ip(), APP_RECORD_TTL)?;
            let proxy = cdn.add_proxy(&host, app.hostname())?;
            log::info!(
                "App '{}' is served at 'https://{}' and 'https://{}'",
                app.name(),
                host,
                app.hostname()
            );
            apps.push(PublishedApp { app, record, proxy });
        }

        Ok(Stack {
            cdn,
            subdomain,
            delegation,
            cluster,
            containers,
            apps,
        })
    }

    /// The stack's outputs, as `(name, value)` pairs
    pub fn outputs(&self) -> Vec<(String, String)> {
        let mut outputs = Vec::new();
        for published in self.apps.iter() {
            let name = published.app.name();
            outputs.push((format!("{}InternalURL", name), published.internal_url()));
            outputs.push((format!("{}PublicURL", name), published.public_url()));
        }
        outputs
    }
}
