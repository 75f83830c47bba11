use std::fmt::{self, Display};
use std::hash::{self, Hash};

/// A basic description of a kind of resource that can be declared to the provisioner, with
/// just enough information to render a manifest for it. We use `&'static str` for all of
/// these so that it's easy to pass references around without copying. Kinds registered by
/// other providers can be declared simply with a static, like:
///
/// ```rust
/// use cloud_app::kinds::ResourceKind;
///
/// #[allow(non_upper_case_globals)]
/// pub static VirtualService: &ResourceKind = &ResourceKind {
///     api_version: "networking.istio.io/v1beta1",
///     kind: "VirtualService",
///     plural_kind: "virtualservices",
///     namespaced: true,
/// };
/// assert_eq!("networking.istio.io", VirtualService.group());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKind {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub plural_kind: &'static str,
    pub namespaced: bool,
}

impl Hash for ResourceKind {
    fn hash<H: hash::Hasher>(&self, hasher: &mut H) {
        self.api_version.hash(hasher);
        self.kind.hash(hasher);
    }
}

impl ResourceKind {
    pub fn as_group_and_version(&self) -> (&str, &str) {
        match self.api_version.find('/') {
            Some(slash_idx) => (
                &self.api_version[..slash_idx],
                &self.api_version[(slash_idx + 1)..],
            ),
            None => ("", self.api_version),
        }
    }

    pub fn group(&self) -> &str {
        self.as_group_and_version().0
    }

    pub fn version(&self) -> &str {
        self.as_group_and_version().1
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.plural_kind)
    }
}

macro_rules! resource_kind {
    ($ref_name:ident, $api_version:expr, $kind:expr, $plural_kind:expr, $namespaced:expr) => {
        #[allow(non_upper_case_globals)]
        pub static $ref_name: &crate::kinds::ResourceKind = &crate::kinds::ResourceKind {
            api_version: $api_version,
            kind: $kind,
            plural_kind: $plural_kind,
            namespaced: $namespaced,
        };
    };
}

macro_rules! def_kinds {
    (@group $group:expr, [
        $( $version:ident => [
            $( $kind:ident ~ $plural_kind:ident ~ $namespaced:expr ),*
        ]),*
    ]) => {
        $(
            pub mod $version {
                $(
                    resource_kind!(
                        $kind,
                        concat!($group, "/", stringify!($version)),
                        stringify!($kind),
                        stringify!($plural_kind),
                        $namespaced
                    );
                )*
            }
        )*
    };
    (@core => [
        $( $version:ident => [
            $( $kind:ident ~ $plural_kind:ident ~ $namespaced:expr ),*
        ]),*
    ]) => {
        pub mod core {
            $(pub mod $version {
                $(
                    resource_kind!(
                        $kind,
                        stringify!($version),
                        stringify!($kind),
                        stringify!($plural_kind),
                        $namespaced
                    );
                )*
            })*
        }
    }
}

def_kinds! {
    @core => [
        v1 => [
            Namespace ~ namespaces ~ false,
            Service ~ services ~ true,
            Secret ~ secrets ~ true,
            ConfigMap ~ configmaps ~ true
        ]
    ]
}

pub mod apps {
    def_kinds! {
        @group "apps", [
            v1 => [
                Deployment ~ deployments ~ true
            ]
        ]
    }
}

pub mod rbac_authorization_k8s_io {
    def_kinds! {
        @group "rbac.authorization.k8s.io", [
            v1 => [
                ClusterRoleBinding ~ clusterrolebindings ~ false
            ]
        ]
    }
}

/// Kinds installed into the cluster by cert-manager
pub mod cert_manager_io {
    def_kinds! {
        @group "cert-manager.io", [
            v1alpha2 => [
                Issuer ~ issuers ~ true,
                Certificate ~ certificates ~ true
            ]
        ]
    }
}

/// Managed cluster kinds of the cloud provider
pub mod container_cloud {
    def_kinds! {
        @group "container.cnrm.cloud.google.com", [
            v1beta1 => [
                ContainerCluster ~ containerclusters ~ false,
                ContainerNodePool ~ containernodepools ~ false
            ]
        ]
    }
}

/// Cloud DNS kinds
pub mod dns_cloud {
    def_kinds! {
        @group "dns.cnrm.cloud.google.com", [
            v1beta1 => [
                DNSManagedZone ~ dnsmanagedzones ~ false,
                DNSRecordSet ~ dnsrecordsets ~ false
            ]
        ]
    }
}

/// Cloud IAM kinds
pub mod iam_cloud {
    def_kinds! {
        @group "iam.cnrm.cloud.google.com", [
            v1beta1 => [
                IAMServiceAccount ~ iamserviceaccounts ~ false,
                IAMServiceAccountKey ~ iamserviceaccountkeys ~ false,
                IAMPolicyMember ~ iampolicymembers ~ false
            ]
        ]
    }
}

/// CDN zone kinds
pub mod cdn {
    def_kinds! {
        @group "cdn.cloudflare.com", [
            v1 => [
                Zone ~ zones ~ false,
                ZoneSettingsOverride ~ zonesettingsoverrides ~ false,
                Record ~ records ~ false
            ]
        ]
    }
}

/// Kinds that are handled by the provisioning engine itself rather than by a cloud API
pub mod provisioner {
    def_kinds! {
        @group "provisioner.cloud-app.dev", [
            v1 => [
                KubernetesProvider ~ kubernetesproviders ~ false,
                ConfigFile ~ configfiles ~ false
            ]
        ]
    }
}
