use super::ResourceProvisioner;
use crate::deferred::{Deferred, Resolver};
use crate::error::PlanError;
use crate::kinds::ResourceKind;
use crate::resource::{manifest, Handle, ObjectId};

use serde_json::Value;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

const PENDING_PLACEHOLDER: &str = "<pending>";

enum Readiness {
    Pending,
    Ready(Value),
    Failed(PlanError),
}

struct Entry {
    handle: Handle,
    body: Deferred<Value>,
    readiness: Readiness,
    observers: Vec<(String, Resolver<Value>)>,
}

impl Entry {
    fn observable_document(&self, status: &Value) -> Result<Value, PlanError> {
        let body = match self.body.try_now() {
            Some(result) => result?,
            None => {
                return Err(PlanError::unresolved(format!(
                    "body of {} is still pending",
                    self.handle
                )))
            }
        };
        let mut document = manifest(self.handle.kind, &self.handle.id, &body);
        if let Some(object) = document.as_object_mut() {
            object.insert("status".to_owned(), status.clone());
        }
        Ok(document)
    }
}

#[derive(Default)]
struct State {
    entries: Vec<Entry>,
    index: HashMap<(&'static ResourceKind, ObjectId), usize>,
}

impl State {
    fn entry_mut(&mut self, handle: &Handle) -> Result<&mut Entry, PlanError> {
        let key = (handle.kind, handle.id.clone());
        match self.index.get(&key) {
            Some(&idx) => Ok(&mut self.entries[idx]),
            None => Err(PlanError::unresolved(format!(
                "{} was never declared",
                handle
            ))),
        }
    }
}

/// The state of a declared resource as seen by the plan
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedState {
    /// The body depends on a value that hasn't resolved yet
    Pending,
    /// The full manifest that will be handed to the engine
    Declared(Value),
    Failed(PlanError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedResource {
    pub handle: Handle,
    pub state: PlannedState,
}

/// A provisioner that only records what was declared. Nothing is ever created; observed
/// fields resolve when `report_ready` is called for their resource, which makes it useful
/// both for previewing a plan and for driving the components in tests.
#[derive(Default)]
pub struct InMemoryProvisioner {
    state: Mutex<State>,
}

impl InMemoryProvisioner {
    pub fn new() -> InMemoryProvisioner {
        InMemoryProvisioner::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the handles of every declared resource, in the order they were first declared
    pub fn handles(&self) -> Vec<Handle> {
        self.lock_state()
            .entries
            .iter()
            .map(|e| e.handle.clone())
            .collect()
    }

    pub fn find(&self, kind: &'static ResourceKind, name: &str) -> Option<Handle> {
        self.lock_state()
            .entries
            .iter()
            .find(|e| e.handle.kind == kind && e.handle.name() == name)
            .map(|e| e.handle.clone())
    }

    /// Reports the resource as ready with the given `status`, resolving every observer of
    /// it. Observers of fields that are absent fail.
    pub fn report_ready(&self, handle: &Handle, status: Value) -> Result<(), PlanError> {
        let (document, observers) = {
            let mut state = self.lock_state();
            let entry = state.entry_mut(handle)?;
            let document = match entry.observable_document(&status) {
                Ok(doc) => doc,
                Err(PlanError::DeferredResolution(msg)) if entry.body.is_pending() => {
                    return Err(PlanError::DeferredResolution(msg));
                }
                Err(err) => {
                    entry.readiness = Readiness::Failed(err.clone());
                    let observers = std::mem::replace(&mut entry.observers, Vec::new());
                    drop(state);
                    for (_, resolver) in observers {
                        resolver.fail(err.clone());
                    }
                    return Err(err);
                }
            };
            entry.readiness = Readiness::Ready(status);
            let observers = std::mem::replace(&mut entry.observers, Vec::new());
            (document, observers)
        };

        log::info!("{} is ready, resolving {} observers", handle, observers.len());
        for (pointer, resolver) in observers {
            resolve_field(&document, handle, &pointer, resolver);
        }
        Ok(())
    }

    /// Reports that the engine failed to create the resource. Every observer of it fails.
    pub fn report_failed(&self, handle: &Handle, message: &str) -> Result<(), PlanError> {
        let error = PlanError::unresolved(format!("{} failed: {}", handle, message));
        let observers = {
            let mut state = self.lock_state();
            let entry = state.entry_mut(handle)?;
            entry.readiness = Readiness::Failed(error.clone());
            std::mem::replace(&mut entry.observers, Vec::new())
        };
        log::warn!("{}", error);
        for (_, resolver) in observers {
            resolver.fail(error.clone());
        }
        Ok(())
    }

    /// Returns every declared resource in declaration order
    pub fn plan(&self) -> Vec<PlannedResource> {
        self.lock_state()
            .entries
            .iter()
            .map(|entry| {
                let state = match entry.body.try_now() {
                    None => PlannedState::Pending,
                    Some(Ok(body)) => {
                        PlannedState::Declared(manifest(entry.handle.kind, &entry.handle.id, &body))
                    }
                    Some(Err(err)) => PlannedState::Failed(err),
                };
                PlannedResource {
                    handle: entry.handle.clone(),
                    state,
                }
            })
            .collect()
    }

    /// Returns the first failed declaration, which means the declaration pass must be aborted
    pub fn first_failure(&self) -> Option<PlanError> {
        self.plan().into_iter().find_map(|planned| match planned.state {
            PlannedState::Failed(err) => Some(err),
            _ => None,
        })
    }

    /// Returns the manifest of every declared resource, failing if any body failed or is
    /// still pending
    pub fn manifests(&self) -> Result<Vec<Value>, PlanError> {
        self.plan()
            .into_iter()
            .map(|planned| match planned.state {
                PlannedState::Declared(manifest) => Ok(manifest),
                PlannedState::Failed(err) => Err(err),
                PlannedState::Pending => Err(PlanError::unresolved(format!(
                    "body of {} is still pending",
                    planned.handle
                ))),
            })
            .collect()
    }

    /// Renders the plan as a multi-document yaml stream. Bodies that are still pending are
    /// rendered with a `<pending>` placeholder in place of everything but their identity.
    pub fn render_yaml(&self) -> Result<String, serde_yaml::Error> {
        let mut out = String::new();
        for planned in self.plan() {
            let document = match planned.state {
                PlannedState::Declared(manifest) => manifest,
                PlannedState::Pending => {
                    let placeholder = serde_json::json!({ "spec": PENDING_PLACEHOLDER });
                    manifest(planned.handle.kind, &planned.handle.id, &placeholder)
                }
                PlannedState::Failed(err) => {
                    let placeholder = serde_json::json!({ "error": err.to_string() });
                    manifest(planned.handle.kind, &planned.handle.id, &placeholder)
                }
            };
            let yaml = serde_yaml::to_string(&document)?;
            if !yaml.starts_with("---") {
                out.push_str("---\n");
            }
            out.push_str(&yaml);
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }
}

fn resolve_field(document: &Value, handle: &Handle, pointer: &str, resolver: Resolver<Value>) {
    match document.pointer(pointer) {
        Some(value) => resolver.resolve(value.clone()),
        None => resolver.fail(PlanError::unresolved(format!(
            "{} has no field at '{}'",
            handle, pointer
        ))),
    }
}

impl ResourceProvisioner for InMemoryProvisioner {
    fn declare(
        &self,
        kind: &'static ResourceKind,
        id: ObjectId,
        body: Deferred<Value>,
    ) -> Result<Handle, PlanError> {
        if id.name().is_empty() {
            return Err(PlanError::Rejected(format!(
                "{} declared without a name",
                kind.kind
            )));
        }
        let handle = Handle::new(kind, id);
        let mut state = self.lock_state();
        let key = (kind, handle.id.clone());
        match state.index.get(&key) {
            Some(&idx) => {
                log::debug!("Updating declaration of {}", handle);
                let entry = &mut state.entries[idx];
                entry.body = body;
            }
            None => {
                log::debug!("Recording declaration of {}", handle);
                let idx = state.entries.len();
                state.entries.push(Entry {
                    handle: handle.clone(),
                    body,
                    readiness: Readiness::Pending,
                    observers: Vec::new(),
                });
                state.index.insert(key, idx);
            }
        }
        Ok(handle)
    }

    fn observe(&self, handle: &Handle, field_path: &str) -> Deferred<Value> {
        let mut state = self.lock_state();
        let entry = match state.entry_mut(handle) {
            Ok(entry) => entry,
            Err(err) => return Deferred::failed(err),
        };
        match entry.readiness {
            Readiness::Pending => {
                let (resolver, value) = Deferred::pending();
                entry.observers.push((field_path.to_owned(), resolver));
                value
            }
            Readiness::Failed(ref err) => Deferred::failed(err.clone()),
            Readiness::Ready(ref status) => {
                let result = entry.observable_document(status).and_then(|document| {
                    document.pointer(field_path).cloned().ok_or_else(|| {
                        PlanError::unresolved(format!(
                            "{} has no field at '{}'",
                            handle, field_path
                        ))
                    })
                });
                Deferred::from_result(result)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kinds;
    use serde_json::json;

    fn service_body() -> Value {
        json!({ "spec": { "type": "LoadBalancer" } })
    }

    #[test]
    fn declare_is_idempotent_per_kind_and_id() {
        let provisioner = InMemoryProvisioner::new();
        let id = ObjectId::new("default", "nginx");
        let first = provisioner
            .declare(kinds::core::v1::Service, id.clone(), Deferred::resolved(service_body()))
            .unwrap();
        let second = provisioner
            .declare(
                kinds::core::v1::Service,
                id.clone(),
                Deferred::resolved(json!({ "spec": { "type": "ClusterIP" } })),
            )
            .unwrap();
        provisioner
            .declare(kinds::core::v1::ConfigMap, id, Deferred::resolved(json!({})))
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(2, provisioner.len());
        let manifests = provisioner.manifests().unwrap();
        assert_eq!(Some("ClusterIP"), manifests[0].pointer("/spec/type").and_then(Value::as_str));
    }

    #[test]
    fn declare_rejects_empty_names() {
        let provisioner = InMemoryProvisioner::new();
        let result = provisioner.declare(
            kinds::core::v1::Service,
            ObjectId::new("default", ""),
            Deferred::resolved(service_body()),
        );
        match result {
            Err(PlanError::Rejected(_)) => {}
            other => panic!("expected rejection, got: {:?}", other),
        }
    }

    #[test]
    fn observers_resolve_when_the_resource_is_ready() {
        let provisioner = InMemoryProvisioner::new();
        let handle = provisioner
            .declare(
                kinds::core::v1::Service,
                ObjectId::new("default", "nginx"),
                Deferred::resolved(service_body()),
            )
            .unwrap();
        let ip = provisioner.observe(&handle, "/status/loadBalancer/ingress/0/ip");
        let service_type = provisioner.observe(&handle, "/spec/type");
        assert!(ip.is_pending());

        provisioner
            .report_ready(&handle, json!({ "loadBalancer": { "ingress": [{ "ip": "34.1.2.3" }] } }))
            .unwrap();
        assert_eq!(Some(Ok(json!("34.1.2.3"))), ip.try_now());
        assert_eq!(Some(Ok(json!("LoadBalancer"))), service_type.try_now());

        // observing after readiness resolves immediately
        let name = provisioner.observe(&handle, "/metadata/name");
        assert_eq!(Some(Ok(json!("nginx"))), name.try_now());
    }

    #[test]
    fn missing_fields_fail_to_resolve() {
        let provisioner = InMemoryProvisioner::new();
        let handle = provisioner
            .declare(
                kinds::core::v1::Service,
                ObjectId::new("default", "nginx"),
                Deferred::resolved(service_body()),
            )
            .unwrap();
        let ip = provisioner.observe(&handle, "/status/loadBalancer/ingress/0/ip");
        provisioner.report_ready(&handle, json!({ "loadBalancer": {} })).unwrap();
        match ip.try_now() {
            Some(Err(PlanError::DeferredResolution(msg))) => assert!(msg.contains("no field")),
            other => panic!("expected resolution failure, got: {:?}", other),
        }
    }

    #[test]
    fn failed_resources_fail_their_observers() {
        let provisioner = InMemoryProvisioner::new();
        let handle = provisioner
            .declare(
                kinds::cert_manager_io::v1alpha2::Certificate,
                ObjectId::new("my-namespace", "wildcard-certificate"),
                Deferred::resolved(json!({ "spec": { "secretName": "wildcard-certificate" } })),
            )
            .unwrap();
        let secret = provisioner.observe(&handle, "/spec/secretName");
        provisioner.report_failed(&handle, "dns01 challenge failed").unwrap();
        match secret.try_now() {
            Some(Err(PlanError::DeferredResolution(msg))) => {
                assert!(msg.contains("dns01 challenge failed"))
            }
            other => panic!("expected resolution failure, got: {:?}", other),
        }
    }

    #[test]
    fn pending_bodies_are_rendered_with_a_placeholder() {
        let provisioner = InMemoryProvisioner::new();
        let (_resolver, body) = Deferred::<Value>::pending();
        provisioner
            .declare(kinds::apps::v1::Deployment, ObjectId::new("default", "nginx"), body)
            .unwrap();
        assert_eq!(PlannedState::Pending, provisioner.plan()[0].state);
        assert!(provisioner.manifests().is_err());

        let yaml = provisioner.render_yaml().unwrap();
        assert!(yaml.contains("<pending>"));
        assert!(yaml.contains("kind: Deployment"));
    }

    #[test]
    fn report_ready_requires_a_resolved_body() {
        let provisioner = InMemoryProvisioner::new();
        let (_resolver, body) = Deferred::<Value>::pending();
        let handle = provisioner
            .declare(kinds::apps::v1::Deployment, ObjectId::new("default", "nginx"), body)
            .unwrap();
        assert!(provisioner.report_ready(&handle, json!({})).is_err());
    }
}
