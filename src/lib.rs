//! cloud-app declares the infrastructure for applications serving public APIs: a CDN zone for
//! the public domain, a managed DNS zone for an internal subdomain, a Kubernetes cluster, and a
//! standard deployment pattern in which every app gets an Envoy sidecar that terminates TLS and
//! a `LoadBalancer` Service pointing at it.
//!
//! Nothing here talks to a cloud API. Every component hands declarative resource bodies to a
//! `ResourceProvisioner`, and values that only exist once a resource has been created (like
//! the external IP of a load balancer) flow between components as `Deferred` values.
//!
//! The heart of it is the sidecar transform, which works on plain values and can be used on
//! its own:
//!
//! ```rust
//! use cloud_app::prelude::*;
//!
//! let workload = WorkloadSpec::with_containers(vec![
//!     ContainerSpec::new("nginx", "nginx:1.7.9").with_port(80),
//! ]);
//! let augmented = sidecar::inject(
//!     &workload,
//!     "nginx",
//!     &app_labels("nginx"),
//!     &ConfigMapRef::new("nginx-sidecar"),
//!     &SecretRef::new("wildcard-certificate"),
//! ).unwrap();
//! let exposure = sidecar::plan(&augmented).unwrap();
//!
//! assert_eq!(Some("nginx"), exposure.selector.get("app").map(String::as_str));
//! assert_eq!(443, exposure.ports[0].port);
//! // the caller's workload is never modified
//! assert_eq!(1, workload.pod_spec().unwrap().containers.len());
//! ```
//!
//! `stack::Stack` puts all of the components together, the way the `cloud-app-plan` binary
//! uses it.

#[macro_use]
extern crate serde_derive;

pub mod app;
pub mod cdn;
pub mod certificate;
pub mod cluster;
pub mod config;
pub mod containers;
pub mod deferred;
pub mod dns;
pub mod error;
pub mod iam;
pub mod kinds;
pub mod provisioner;
pub mod resource;
pub mod sidecar;
pub mod stack;
pub mod workload;

pub use serde;
pub use serde_json;
pub use serde_yaml;

pub mod prelude {
    pub use crate::app::{app_labels, SidecarOptions, StandardApp};
    pub use crate::certificate::CertificateReference;
    pub use crate::config::StackConfig;
    pub use crate::deferred::Deferred;
    pub use crate::dns::DnsZone;
    pub use crate::error::{Error, PlanError};
    pub use crate::kinds::{self, ResourceKind};
    pub use crate::provisioner::{InMemoryProvisioner, ResourceProvisioner, Scope};
    pub use crate::resource::{Handle, ObjectId};
    pub use crate::sidecar::{
        self, ConfigMapRef, DomainTarget, ExposureDescriptor, SecretRef, SidecarConfigTemplate,
    };
    pub use crate::workload::{ContainerSpec, VolumeSpec, WorkloadSpec};
    pub use serde::{Deserialize, Serialize};
}
