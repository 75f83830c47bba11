//! Identities of declared resources, and helpers for building their json bodies.
//!
//! Every declared resource is identified by its kind together with an `ObjectId`, which is
//! the combination of an optional namespace and a name. Missing namespaces are represented
//! as empty strings, the same way the Kubernetes api treats them, and `namespace()` returns
//! an `Option<&str>` for cases where the difference matters.
use crate::kinds::ResourceKind;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use std::fmt::{self, Display};

pub type JsonObject = Map<String, Value>;

lazy_static! {
    static ref INVALID_NAME_CHARS: Regex = Regex::new("[^a-z0-9-]+").unwrap();
}

/// An owned namespace and name pair
#[derive(Debug, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct ObjectId {
    pub namespace: String,
    pub name: String,
}

impl ObjectId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> ObjectId {
        ObjectId {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// An id for a resource that is not namespaced
    pub fn cluster_scoped(name: impl Into<String>) -> ObjectId {
        ObjectId::new("", name)
    }

    /// Returns an option containing a non-empty namespace. Will return None
    /// if the namespace is an empty string.
    pub fn namespace(&self) -> Option<&str> {
        if self.namespace.is_empty() {
            None
        } else {
            Some(self.namespace.as_str())
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl<'a> From<(&'a str, &'a str)> for ObjectId {
    fn from((namespace, name): (&'a str, &'a str)) -> ObjectId {
        ObjectId::new(namespace, name)
    }
}

/// A reference to a resource that has been accepted by the provisioner. Handles are cheap
/// to clone and carry no state of their own; values are read through
/// `ResourceProvisioner::observe`.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Handle {
    pub kind: &'static ResourceKind,
    pub id: ObjectId,
}

impl Handle {
    pub fn new(kind: &'static ResourceKind, id: ObjectId) -> Handle {
        Handle { kind, id }
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.id.namespace()
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.kind.kind, self.id)
    }
}

/// Renders the full manifest for a declared body, filling in `apiVersion`, `kind` and the
/// `metadata` name and namespace. Any other metadata in the body is kept.
pub fn manifest(kind: &ResourceKind, id: &ObjectId, body: &Value) -> Value {
    let mut object = JsonObject::new();
    object.insert("apiVersion".to_owned(), Value::from(kind.api_version));
    object.insert("kind".to_owned(), Value::from(kind.kind));

    let mut metadata = body
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    metadata.insert("name".to_owned(), Value::from(id.name()));
    match id.namespace() {
        Some(ns) if kind.namespaced => {
            metadata.insert("namespace".to_owned(), Value::from(ns));
        }
        _ => {
            metadata.remove("namespace");
        }
    }
    object.insert("metadata".to_owned(), Value::Object(metadata));

    if let Some(fields) = body.as_object() {
        for (key, value) in fields {
            if key != "metadata" {
                object.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(object)
}

/// Turns an arbitrary string into something that's usable as a resource name, by lowercasing
/// it and replacing every run of unsupported characters with a single dash.
///
/// ```rust
/// use cloud_app::resource::sanitize_name;
///
/// assert_eq!("gcp-cluster-us-west2-b", sanitize_name("gcp/cluster/us-west2-b"));
/// assert_eq!("record-nginx-example-com", sanitize_name("record/nginx.Example.com."));
/// ```
pub fn sanitize_name(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let replaced = INVALID_NAME_CHARS.replace_all(&lower, "-");
    replaced.trim_matches('-').to_owned()
}

pub fn str_value<'a>(json: &'a Value, pointer: &str) -> Option<&'a str> {
    json.pointer(pointer).and_then(Value::as_str)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kinds;
    use serde_json::json;

    #[test]
    fn manifest_fills_in_type_and_id() {
        let body = json!({
            "metadata": { "labels": { "app": "nginx" } },
            "data": { "sidecar.yaml": "static_resources: {}" },
        });
        let id = ObjectId::new("my-namespace", "nginx-sidecar");
        let actual = manifest(kinds::core::v1::ConfigMap, &id, &body);
        let expected = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "labels": { "app": "nginx" },
                "name": "nginx-sidecar",
                "namespace": "my-namespace",
            },
            "data": { "sidecar.yaml": "static_resources: {}" },
        });
        assert_eq!(expected, actual);
    }

    #[test]
    fn manifest_drops_namespace_for_cluster_scoped_kinds() {
        let body = json!({ "metadata": { "namespace": "ignored" } });
        let id = ObjectId::new("my-namespace", "my-namespace");
        let actual = manifest(kinds::core::v1::Namespace, &id, &body);
        assert_eq!(None, actual.pointer("/metadata/namespace"));
        assert_eq!(Some("my-namespace"), str_value(&actual, "/metadata/name"));
    }

    #[test]
    fn object_id_namespace_is_none_when_empty() {
        let id = ObjectId::cluster_scoped("gcp-dns-subdomain");
        assert_eq!(None, id.namespace());
        assert_eq!("/gcp-dns-subdomain", id.to_string());
    }
}
