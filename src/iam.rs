//! Cloud service accounts and their role bindings
use crate::deferred::Deferred;
use crate::error::PlanError;
use crate::kinds;
use crate::provisioner::Scope;
use crate::resource::{sanitize_name, Handle};

use serde_json::{json, Value};

pub const EMAIL_POINTER: &str = "/status/email";
/// The key material is reported base64 encoded, which is exactly what a Secret's `data` wants
pub const PRIVATE_KEY_POINTER: &str = "/status/privateKey";
pub const CREDENTIALS_KEY_TYPE: &str = "TYPE_GOOGLE_CREDENTIALS_FILE";

#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub account_id: String,
    pub handle: Handle,
    email: Deferred<String>,
}

impl ServiceAccount {
    pub fn declare(
        scope: &Scope,
        account_id: &str,
        display_name: &str,
    ) -> Result<ServiceAccount, PlanError> {
        let handle = scope.declare(
            kinds::iam_cloud::v1beta1::IAMServiceAccount,
            account_id,
            json!({
                "spec": {
                    "accountId": account_id,
                    "displayName": display_name,
                }
            }),
        )?;
        let email = scope.observe_str(&handle, EMAIL_POINTER);
        Ok(ServiceAccount {
            account_id: account_id.to_owned(),
            handle,
            email,
        })
    }

    pub fn email(&self) -> Deferred<String> {
        self.email.clone()
    }

    /// The IAM member string of this account, like
    /// `serviceAccount:foo@project.iam.gserviceaccount.com`
    pub fn member(&self) -> Deferred<String> {
        self.email.map(|email| format!("serviceAccount:{}", email))
    }

    /// Declares a credentials-file key for this account
    pub fn create_key(&self, scope: &Scope) -> Result<Handle, PlanError> {
        scope.declare(
            kinds::iam_cloud::v1beta1::IAMServiceAccountKey,
            &format!("{}-key", self.account_id),
            json!({
                "spec": {
                    "serviceAccountRef": { "name": self.handle.name() },
                    "privateKeyType": CREDENTIALS_KEY_TYPE,
                }
            }),
        )
    }
}

/// Grants `role` on the project to the service account
pub fn bind_to_role(
    scope: &Scope,
    name: &str,
    account: &ServiceAccount,
    role: &str,
) -> Result<Handle, PlanError> {
    let role = role.to_owned();
    scope.declare(
        kinds::iam_cloud::v1beta1::IAMPolicyMember,
        &sanitize_name(&format!("iam-role-{}", name)),
        account.member().map(move |member| {
            json!({
                "spec": {
                    "role": role,
                    "member": member,
                }
            })
        }),
    )
}

/// Reads the `client_email` out of service account credentials. The credentials may be given
/// either as the raw json document or base64 encoded, which is how they are usually stored in
/// configuration.
pub fn account_email(credentials: &str) -> Result<String, PlanError> {
    let trimmed = credentials.trim();
    let document: Value = match serde_json::from_str(trimmed) {
        Ok(doc) => doc,
        Err(_) => {
            let decoded = base64::decode(trimmed).map_err(|e| {
                PlanError::invariant(format!("credentials are neither json nor base64: {}", e))
            })?;
            serde_json::from_slice(&decoded).map_err(|e| {
                PlanError::invariant(format!("decoded credentials are not json: {}", e))
            })?
        }
    };
    document
        .get("client_email")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| PlanError::invariant("credentials have no 'client_email'"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provisioner::InMemoryProvisioner;

    use std::sync::Arc;

    const CREDENTIALS: &str = r#"{
        "type": "service_account",
        "client_email": "deployer@my-project.iam.gserviceaccount.com"
    }"#;

    #[test]
    fn account_email_reads_raw_json() {
        assert_eq!(
            Ok("deployer@my-project.iam.gserviceaccount.com".to_owned()),
            account_email(CREDENTIALS)
        );
    }

    #[test]
    fn account_email_reads_base64_json() {
        let encoded = base64::encode(CREDENTIALS);
        assert_eq!(
            Ok("deployer@my-project.iam.gserviceaccount.com".to_owned()),
            account_email(&encoded)
        );
    }

    #[test]
    fn account_email_requires_client_email() {
        assert!(account_email(r#"{"type": "service_account"}"#).is_err());
        assert!(account_email("not credentials at all!").is_err());
    }

    #[test]
    fn role_binding_waits_for_the_account_email() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let scope = Scope::new(provisioner.clone());
        let account =
            ServiceAccount::declare(&scope, "gcpcluster", "Node Pool Service Account").unwrap();
        let binding =
            bind_to_role(&scope, "gcpcluster/logging", &account, "roles/logging.logWriter")
                .unwrap();
        assert_eq!("iam-role-gcpcluster-logging", binding.name());
        assert!(provisioner.manifests().is_err());

        provisioner
            .report_ready(
                &account.handle,
                json!({ "email": "gcpcluster@my-project.iam.gserviceaccount.com" }),
            )
            .unwrap();
        let manifests = provisioner.manifests().unwrap();
        assert_eq!(
            Some(&json!("serviceAccount:gcpcluster@my-project.iam.gserviceaccount.com")),
            manifests[1].pointer("/spec/member")
        );
    }
}
