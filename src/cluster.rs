//! A managed Kubernetes cluster that hosts public APIs.
//!
//! The cluster is declared without its default node pool. A separate pool runs under its own
//! service account, which only gets the roles it needs to ship logs and metrics. Once the
//! cluster is up, cert-manager is installed so that namespaces can request certificates.
use crate::certificate::AcmeSettings;
use crate::containers::Containers;
use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::iam::{self, ServiceAccount};
use crate::kinds;
use crate::provisioner::Scope;
use crate::resource::{sanitize_name, Handle};

use serde_json::{json, Value};

pub const ENDPOINT_POINTER: &str = "/status/endpoint";
pub const CA_CERTIFICATE_POINTER: &str = "/status/masterAuth/clusterCaCertificate";

pub const LOGGING_SERVICE: &str = "logging.googleapis.com/kubernetes";
pub const MONITORING_SERVICE: &str = "monitoring.googleapis.com/kubernetes";
pub const MACHINE_TYPE: &str = "n1-standard-1";
pub const CERT_MANAGER_MANIFEST: &str =
    "https://github.com/jetstack/cert-manager/releases/download/v0.11.1/cert-manager.yaml";
pub const ADMIN_BINDING_NAME: &str = "admin-binding-deploy";
pub const DEFAULT_NODE_COUNT: u32 = 3;

/// Everything needed to declare a `PublicCluster`
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSettings {
    /// Resource name of the cluster. Slashes are allowed here, and are replaced in the name of
    /// the actual cluster.
    pub name: String,
    pub zone: String,
    pub version: String,
    pub node_count: u32,
    pub project: String,
    /// Email of the account that runs the deployment. It is made a cluster admin, since
    /// manipulating cluster roles requires that.
    pub deployer_email: String,
}

impl ClusterSettings {
    pub fn new(
        zone: impl Into<String>,
        version: impl Into<String>,
        project: impl Into<String>,
        deployer_email: impl Into<String>,
    ) -> ClusterSettings {
        let zone = zone.into();
        ClusterSettings {
            name: format!("gcp/cluster/{}", zone),
            zone,
            version: version.into(),
            node_count: DEFAULT_NODE_COUNT,
            project: project.into(),
            deployer_email: deployer_email.into(),
        }
    }

    pub fn with_node_count(mut self, node_count: u32) -> Self {
        self.node_count = node_count;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NodePool {
    pub service_account: ServiceAccount,
    pub handle: Handle,
}

#[derive(Debug, Clone)]
pub struct PublicCluster {
    settings: ClusterSettings,
    scope: Scope,
    handle: Handle,
    kubeconfig: Deferred<String>,
    provider: Handle,
    admin_binding: Handle,
    node_pool: NodePool,
    cert_manager: Handle,
}

impl PublicCluster {
    pub fn declare(scope: &Scope, settings: ClusterSettings) -> Result<PublicCluster, PlanError> {
        let cluster_name = sanitize_name(&settings.name);
        log::info!(
            "Declaring cluster '{}' in '{}' running version {}",
            cluster_name,
            settings.zone,
            settings.version
        );
        let handle = scope.declare(
            kinds::container_cloud::v1beta1::ContainerCluster,
            &cluster_name,
            json!({
                "spec": {
                    "location": settings.zone,
                    "initialNodeCount": 1,
                    "minMasterVersion": settings.version,
                    // empty credentials disable basic auth
                    "masterAuth": { "username": "", "password": "" },
                    "loggingService": LOGGING_SERVICE,
                    "monitoringService": MONITORING_SERVICE,
                    "addonsConfig": {
                        "httpLoadBalancing": { "disabled": true },
                    },
                    "removeDefaultNodePool": true,
                }
            }),
        )?;

        let endpoint = scope.observe_str(&handle, ENDPOINT_POINTER);
        let ca_certificate = scope.observe_str(&handle, CA_CERTIFICATE_POINTER);
        let context = format!("{}_{}_{}", settings.project, settings.zone, cluster_name);
        let kubeconfig = endpoint
            .combine(&ca_certificate)
            .and_then(move |(endpoint, ca)| admin_kubeconfig(&context, &endpoint, &ca));

        let provider = scope.declare(
            kinds::provisioner::v1::KubernetesProvider,
            &sanitize_name(&format!("k8sprovider/{}", settings.zone)),
            kubeconfig.map(|kubeconfig| json!({ "spec": { "kubeconfig": kubeconfig } })),
        )?;

        let admin_scope = scope.with_provider(&provider);
        let admin_binding = admin_scope.declare_in_cluster(
            kinds::rbac_authorization_k8s_io::v1::ClusterRoleBinding,
            ADMIN_BINDING_NAME,
            json!({
                "roleRef": {
                    "apiGroup": "rbac.authorization.k8s.io",
                    "kind": "ClusterRole",
                    "name": "cluster-admin",
                },
                "subjects": [{
                    "kind": "User",
                    "name": settings.deployer_email,
                }]
            }),
        )?;

        let node_pool = declare_node_pool(
            scope,
            &handle,
            &settings.zone,
            "gcp/cluster/nodepool/default",
            settings.node_count,
        )?;

        let cert_manager = scope.declare(
            kinds::provisioner::v1::ConfigFile,
            "cert-manager",
            json!({
                "spec": {
                    "file": CERT_MANAGER_MANIFEST,
                    "providerRef": { "name": provider.name() },
                    "dependsOn": [dependency(&admin_binding), dependency(&node_pool.handle)],
                }
            }),
        )?;

        Ok(PublicCluster {
            settings,
            scope: scope.clone(),
            handle,
            kubeconfig,
            provider,
            admin_binding,
            node_pool,
            cert_manager,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn zone(&self) -> &str {
        self.settings.zone.as_str()
    }

    /// Kubeconfig with admin access to the cluster, available once the cluster is ready
    pub fn admin_kubeconfig(&self) -> Deferred<String> {
        self.kubeconfig.clone()
    }

    pub fn provider(&self) -> &Handle {
        &self.provider
    }

    pub fn admin_binding(&self) -> &Handle {
        &self.admin_binding
    }

    pub fn node_pool(&self) -> &NodePool {
        &self.node_pool
    }

    pub fn cert_manager(&self) -> &Handle {
        &self.cert_manager
    }

    /// Creates a namespace and a container group in it, along with a wildcard certificate for
    /// the internal `domain` the group's apps are served under.
    pub fn new_containers(
        &self,
        namespace: &str,
        domain: &str,
        acme: &AcmeSettings,
    ) -> Result<Containers, PlanError> {
        // the namespace is where certificates get requested, so cert-manager must be running
        let namespace_handle = self.scope.with_provider(&self.provider).declare_in_cluster(
            kinds::core::v1::Namespace,
            namespace,
            json!({
                "dependsOn": [
                    dependency(&self.admin_binding),
                    dependency(&self.node_pool.handle),
                    dependency(&self.cert_manager),
                ]
            }),
        )?;

        // TODO: give the namespace a provider without cluster admin rights
        let namespace_name = namespace.to_owned();
        let namespace_dependency = dependency(&namespace_handle);
        let provider = self.scope.declare(
            kinds::provisioner::v1::KubernetesProvider,
            &sanitize_name(&format!("k8sprovider/{}/{}", self.settings.zone, namespace)),
            self.kubeconfig.map(move |kubeconfig| {
                json!({
                    "spec": {
                        "kubeconfig": kubeconfig,
                        "namespace": namespace_name,
                        "dependsOn": [namespace_dependency],
                    }
                })
            }),
        )?;

        let scope = self.scope.within_namespace(namespace);
        Containers::declare(&scope, namespace_handle, provider, domain, acme)
    }
}

fn declare_node_pool(
    scope: &Scope,
    cluster: &Handle,
    zone: &str,
    name: &str,
    node_count: u32,
) -> Result<NodePool, PlanError> {
    let service_account =
        ServiceAccount::declare(scope, "gcpcluster", "Node Pool GCP Cluster Service Account")?;
    iam::bind_to_role(scope, "gcpcluster/logging", &service_account, "roles/logging.logWriter")?;
    iam::bind_to_role(scope, "gcpcluster/monitoring", &service_account, "roles/monitoring.editor")?;

    let zone = zone.to_owned();
    let cluster_name = cluster.name().to_owned();
    let handle = scope.declare(
        kinds::container_cloud::v1beta1::ContainerNodePool,
        &sanitize_name(name),
        service_account.email().map(move |email| {
            json!({
                "spec": {
                    "location": zone,
                    "clusterRef": { "name": cluster_name },
                    "initialNodeCount": node_count,
                    "nodeConfig": {
                        "machineType": MACHINE_TYPE,
                        "serviceAccount": email,
                    },
                    "management": {
                        "autoRepair": true,
                        "autoUpgrade": true,
                    },
                }
            })
        }),
    )?;
    Ok(NodePool {
        service_account,
        handle,
    })
}

fn dependency(handle: &Handle) -> String {
    format!("{}/{}", handle.kind.kind, handle.name())
}

/// Renders a kubeconfig that authenticates through the gcloud cli
pub fn admin_kubeconfig(
    context: &str,
    endpoint: &str,
    ca_certificate: &str,
) -> Result<String, PlanError> {
    let config: Value = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": context,
            "cluster": {
                "certificate-authority-data": ca_certificate,
                "server": format!("https://{}", endpoint),
            }
        }],
        "contexts": [{
            "name": context,
            "context": {
                "cluster": context,
                "user": context,
            }
        }],
        "current-context": context,
        "preferences": {},
        "users": [{
            "name": context,
            "user": {
                "auth-provider": {
                    "name": "gcp",
                    "config": {
                        "cmd-args": "config config-helper --format=json",
                        "cmd-path": "gcloud",
                        "expiry-key": "{.credential.token_expiry}",
                        "token-key": "{.credential.access_token}",
                    }
                }
            }
        }]
    });
    serde_yaml::to_string(&config)
        .map_err(|e| PlanError::invariant(format!("failed to render kubeconfig: {}", e)))
}
