//! Configuration of a stack. A `StackConfig` can be built directly in code, or loaded from a
//! yaml file with `StackConfig::load`.
mod stack_file;

pub use self::stack_file::{StackConfigError, CREDENTIALS_ENV_VAR, STACK_CONFIG_ENV_VAR};

use crate::certificate::AcmeSettings;
use crate::iam;
use crate::workload::WorkloadSpec;

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use std::collections::HashSet;
use std::path::PathBuf;

pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const DEFAULT_ZONE: &str = "us-west2-b";
pub const DEFAULT_CLUSTER_VERSION: &str = "1.15";
pub const DEFAULT_NODE_COUNT: u32 = 3;
pub const DEFAULT_NAMESPACE: &str = "my-namespace";
pub const DEFAULT_CA_BUNDLE_PATH: &str = "cloudflare-ca.pem";

lazy_static! {
    static ref DOMAIN_REGEX: Regex =
        Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap();
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref DNS_LABEL_REGEX: Regex =
        Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap();
}

/// An app that is deployed into the stack's namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub name: String,
    /// Public hostname of the app. Defaults to `{name}.{domain}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub workload: WorkloadSpec,
}

impl AppConfig {
    pub fn new(name: impl Into<String>, workload: WorkloadSpec) -> AppConfig {
        AppConfig {
            name: name.into(),
            host: None,
            workload,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn public_host(&self, domain: &str) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| format!("{}.{}", self.name, domain))
    }
}

fn default_zone() -> String {
    DEFAULT_ZONE.to_owned()
}
fn default_cluster_version() -> String {
    DEFAULT_CLUSTER_VERSION.to_owned()
}
fn default_node_count() -> u32 {
    DEFAULT_NODE_COUNT
}
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_owned()
}
fn default_acme_server() -> String {
    LETS_ENCRYPT_PRODUCTION.to_owned()
}
fn default_ca_bundle() -> PathBuf {
    PathBuf::from(DEFAULT_CA_BUNDLE_PATH)
}

/// Everything a stack is declared from. Only the domain, the email used for the ACME account
/// and the cloud project are required, the rest has defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackConfig {
    pub domain: String,
    pub lets_encrypt_email: String,
    pub project: String,
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default = "default_cluster_version")]
    pub cluster_version: String,
    #[serde(default = "default_node_count")]
    pub node_count: u32,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_acme_server")]
    pub acme_server: String,
    /// Email of the account that runs the deployment. When absent it's read from `credentials`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployer_email: Option<String>,
    /// Service account credentials, either as json or base64 encoded json
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Path to an Envoy config to use instead of the bundled one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_template: Option<PathBuf>,
    #[serde(default = "default_ca_bundle")]
    pub ca_bundle: PathBuf,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

impl StackConfig {
    pub fn new(
        domain: impl Into<String>,
        lets_encrypt_email: impl Into<String>,
        project: impl Into<String>,
    ) -> StackConfig {
        StackConfig {
            domain: domain.into(),
            lets_encrypt_email: lets_encrypt_email.into(),
            project: project.into(),
            zone: default_zone(),
            cluster_version: default_cluster_version(),
            node_count: default_node_count(),
            namespace: default_namespace(),
            acme_server: default_acme_server(),
            deployer_email: None,
            credentials: None,
            sidecar_template: None,
            ca_bundle: default_ca_bundle(),
            apps: Vec::new(),
        }
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn with_cluster_version(mut self, version: impl Into<String>) -> Self {
        self.cluster_version = version.into();
        self
    }

    pub fn with_node_count(mut self, node_count: u32) -> Self {
        self.node_count = node_count;
        self
    }

    pub fn within_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_acme_server(mut self, server: impl Into<String>) -> Self {
        self.acme_server = server.into();
        self
    }

    pub fn with_deployer_email(mut self, email: impl Into<String>) -> Self {
        self.deployer_email = Some(email.into());
        self
    }

    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    pub fn with_sidecar_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.sidecar_template = Some(path.into());
        self
    }

    pub fn with_ca_bundle(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_bundle = path.into();
        self
    }

    pub fn with_app(mut self, app: AppConfig) -> Self {
        self.apps.push(app);
        self
    }

    /// The subdomain served by the cloud's managed DNS
    pub fn internal_subdomain(&self) -> String {
        format!("gcp.internal.{}", self.domain)
    }

    /// The domain apps in the namespace are reachable under internally
    pub fn containers_domain(&self) -> String {
        format!("{}.{}", self.namespace, self.internal_subdomain())
    }

    pub fn acme_settings(&self) -> AcmeSettings {
        AcmeSettings {
            server: self.acme_server.clone(),
            email: self.lets_encrypt_email.clone(),
            project: self.project.clone(),
        }
    }

    pub fn deployer_email(&self) -> Result<String, StackConfigError> {
        if let Some(email) = self.deployer_email.as_ref() {
            return Ok(email.clone());
        }
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            StackConfigError::Invalid(format!(
                "either 'deployerEmail' or 'credentials' must be set, \
                 or the credentials given in the {} environment variable",
                CREDENTIALS_ENV_VAR
            ))
        })?;
        iam::account_email(credentials)
            .map_err(|e| StackConfigError::Invalid(format!("invalid credentials: {}", e)))
    }

    /// Checks everything that can be checked before anything is declared
    pub fn validate(&self) -> Result<(), StackConfigError> {
        if !DOMAIN_REGEX.is_match(&self.domain) {
            return invalid(format!("'{}' is not a valid domain", self.domain));
        }
        if !EMAIL_REGEX.is_match(&self.lets_encrypt_email) {
            return invalid(format!(
                "'{}' is not a valid email address",
                self.lets_encrypt_email
            ));
        }
        if self.project.trim().is_empty() {
            return invalid("project must not be empty");
        }
        if self.zone.trim().is_empty() {
            return invalid("zone must not be empty");
        }
        if self.node_count == 0 {
            return invalid("node count must be at least 1");
        }
        if !DNS_LABEL_REGEX.is_match(&self.namespace) {
            return invalid(format!("'{}' is not a valid namespace name", self.namespace));
        }
        let acme = Url::parse(&self.acme_server).map_err(|e| {
            StackConfigError::Invalid(format!("invalid acme server '{}': {}", self.acme_server, e))
        })?;
        if acme.scheme() != "https" {
            return invalid(format!("acme server '{}' must use https", self.acme_server));
        }
        self.deployer_email()?;

        let mut names = HashSet::new();
        for app in self.apps.iter() {
            if !DNS_LABEL_REGEX.is_match(&app.name) {
                return invalid(format!("'{}' is not a valid app name", app.name));
            }
            if !names.insert(app.name.as_str()) {
                return invalid(format!("app '{}' is defined more than once", app.name));
            }
            let host = app.public_host(&self.domain);
            if !DOMAIN_REGEX.is_match(&host) {
                return invalid(format!("'{}' is not a valid host for app '{}'", host, app.name));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Result<(), StackConfigError> {
    Err(StackConfigError::Invalid(message.into()))
}
