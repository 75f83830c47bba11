//! The contract with the external provisioning engine.
//!
//! Components never create infrastructure themselves. They hand declarative resource bodies
//! to a `ResourceProvisioner` and get back `Handle`s, whose fields can be observed as
//! `Deferred` values that resolve once the engine reports the resource as ready.
mod memory;

pub use self::memory::{InMemoryProvisioner, PlannedResource, PlannedState};

use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::kinds::ResourceKind;
use crate::resource::{Handle, ObjectId};

use serde_json::{json, Value};

use std::fmt::{self, Debug};
use std::sync::Arc;

/// Operations that the provisioning engine must support
pub trait ResourceProvisioner: Send + Sync + 'static {
    /// Registers or updates a resource. Declarations are idempotent, keyed by the kind and
    /// id; declaring the same resource twice replaces its body. The body may still be
    /// pending, in which case the engine waits for it before creating anything.
    fn declare(
        &self,
        kind: &'static ResourceKind,
        id: ObjectId,
        body: Deferred<Value>,
    ) -> Result<Handle, PlanError>;

    /// Returns the value at the json pointer `field_path` of the resource, which becomes
    /// available once the engine reports the resource as ready. The value fails to resolve
    /// if the resource fails or if the field is absent once it's ready.
    fn observe(&self, handle: &Handle, field_path: &str) -> Deferred<Value>;
}

/// Observes a field that must hold a string
pub fn observe_str(
    provisioner: &dyn ResourceProvisioner,
    handle: &Handle,
    field_path: &str,
) -> Deferred<String> {
    let description = format!("{} at '{}'", handle, field_path);
    provisioner
        .observe(handle, field_path)
        .and_then(move |value| match value {
            Value::String(s) => Ok(s),
            other => Err(PlanError::unresolved(format!(
                "expected a string for {}, got: {}",
                description, other
            ))),
        })
}

/// Observes a field that must hold a list of strings
pub fn observe_str_list(
    provisioner: &dyn ResourceProvisioner,
    handle: &Handle,
    field_path: &str,
) -> Deferred<Vec<String>> {
    let description = format!("{} at '{}'", handle, field_path);
    provisioner
        .observe(handle, field_path)
        .and_then(move |value| {
            let items = value.as_array().ok_or_else(|| {
                PlanError::unresolved(format!(
                    "expected a list for {}, got: {}",
                    description, value
                ))
            })?;
            items
                .iter()
                .map(|item| {
                    item.as_str().map(String::from).ok_or_else(|| {
                        PlanError::unresolved(format!(
                            "expected only strings in the list for {}, got: {}",
                            description, item
                        ))
                    })
                })
                .collect()
        })
}

/// A provisioner bound to a namespace, and optionally to the Kubernetes provider that the
/// engine uses to reach the cluster. This is what components hold on to, so that the
/// resources they declare end up in the right place without every component passing the
/// namespace around.
#[derive(Clone)]
pub struct Scope {
    provisioner: Arc<dyn ResourceProvisioner>,
    namespace: Option<String>,
    provider: Option<Handle>,
}

impl Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Scope")
            .field("namespace", &self.namespace)
            .field("provider", &self.provider)
            .finish()
    }
}

impl Scope {
    pub fn new(provisioner: Arc<dyn ResourceProvisioner>) -> Scope {
        Scope {
            provisioner,
            namespace: None,
            provider: None,
        }
    }

    pub fn within_namespace(&self, namespace: impl Into<String>) -> Scope {
        Scope {
            namespace: Some(namespace.into()),
            ..self.clone()
        }
    }

    /// Returns a scope whose in-cluster resources are created through `provider`
    pub fn with_provider(&self, provider: &Handle) -> Scope {
        Scope {
            provider: Some(provider.clone()),
            ..self.clone()
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn provider(&self) -> Option<&Handle> {
        self.provider.as_ref()
    }

    pub fn provisioner(&self) -> &dyn ResourceProvisioner {
        self.provisioner.as_ref()
    }

    /// Returns the id a resource of the given kind and name gets in this scope. Resources
    /// that aren't namespaced always get an empty namespace.
    pub fn id_for(&self, kind: &ResourceKind, name: &str) -> ObjectId {
        match self.namespace {
            Some(ref ns) if kind.namespaced => ObjectId::new(ns.as_str(), name),
            _ => ObjectId::cluster_scoped(name),
        }
    }

    pub fn declare(
        &self,
        kind: &'static ResourceKind,
        name: &str,
        body: impl Into<Deferred<Value>>,
    ) -> Result<Handle, PlanError> {
        let id = self.id_for(kind, name);
        log::debug!("Declaring {} '{}'", kind.kind, id);
        self.provisioner.declare(kind, id, body.into())
    }

    /// Declares a resource that lives inside a Kubernetes cluster. The body gets a
    /// `providerRef` naming this scope's provider, which tells the engine which cluster the
    /// resource goes to. Without a provider the body is declared as is.
    pub fn declare_in_cluster(
        &self,
        kind: &'static ResourceKind,
        name: &str,
        body: impl Into<Deferred<Value>>,
    ) -> Result<Handle, PlanError> {
        let body: Deferred<Value> = body.into();
        let body = match self.provider {
            Some(ref provider) => {
                let provider_name = provider.name().to_owned();
                body.map(move |body| with_provider_ref(body, provider_name))
            }
            None => {
                log::debug!("No provider in scope for {} '{}'", kind.kind, name);
                body
            }
        };
        self.declare(kind, name, body)
    }

    pub fn observe(&self, handle: &Handle, field_path: &str) -> Deferred<Value> {
        self.provisioner.observe(handle, field_path)
    }

    pub fn observe_str(&self, handle: &Handle, field_path: &str) -> Deferred<String> {
        observe_str(self.provisioner(), handle, field_path)
    }

    pub fn observe_str_list(&self, handle: &Handle, field_path: &str) -> Deferred<Vec<String>> {
        observe_str_list(self.provisioner(), handle, field_path)
    }
}

fn with_provider_ref(mut body: Value, provider_name: String) -> Value {
    if let Some(fields) = body.as_object_mut() {
        fields.insert("providerRef".to_owned(), json!({ "name": provider_name }));
    }
    body
}
