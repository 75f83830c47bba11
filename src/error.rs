use crate::config::StackConfigError;

use std::fmt::{self, Display};

/// Anything that stops a stack from being declared. Config problems are caught before the
/// first declaration, planning problems may show up part way through.
#[derive(Debug)]
pub enum Error {
    Config(StackConfigError),
    Plan(PlanError),
}

impl From<StackConfigError> for Error {
    fn from(err: StackConfigError) -> Error {
        Error::Config(err)
    }
}

impl From<PlanError> for Error {
    fn from(err: PlanError) -> Error {
        Error::Plan(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Config(ref e) => write!(f, "Invalid stack config: {}", e),
            Error::Plan(ref e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Config(ref e) => Some(e),
            Error::Plan(ref e) => Some(e),
        }
    }
}

/// Errors produced by the planning transforms and by deferred values. These are all
/// structural problems detected locally, so none of them are ever retried. Any of them
/// aborts the whole declaration pass.
///
/// `PlanError` is `Clone` because a single failure is fanned out to every value that
/// depends on the failed one.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    /// The sidecar config document doesn't have the expected nesting
    ConfigShape(String),
    /// The caller-supplied workload already uses a name that the injector reserves
    NameCollision { kind: &'static str, name: String },
    /// A structural invariant of a workload was violated, for example planning an exposure
    /// for a workload that never had the sidecar injected
    InvariantViolation(String),
    /// An upstream deferred value failed to resolve
    DeferredResolution(String),
    /// The provisioner refused to accept a declaration
    Rejected(String),
}

impl PlanError {
    pub fn config_shape(message: impl Into<String>) -> PlanError {
        PlanError::ConfigShape(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> PlanError {
        PlanError::InvariantViolation(message.into())
    }

    pub fn unresolved(message: impl Into<String>) -> PlanError {
        PlanError::DeferredResolution(message.into())
    }

    pub fn is_name_collision(&self) -> bool {
        matches!(self, PlanError::NameCollision { .. })
    }
}

impl Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PlanError::ConfigShape(ref msg) => write!(f, "Malformed sidecar config: {}", msg),
            PlanError::NameCollision { kind, ref name } => write!(
                f,
                "Workload already defines a {} named '{}', which is reserved for the sidecar",
                kind, name
            ),
            PlanError::InvariantViolation(ref msg) => write!(f, "Invariant violated: {}", msg),
            PlanError::DeferredResolution(ref msg) => {
                write!(f, "Deferred value failed to resolve: {}", msg)
            }
            PlanError::Rejected(ref msg) => write!(f, "Declaration rejected: {}", msg),
        }
    }
}

impl std::error::Error for PlanError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stack_error_keeps_the_plan_error_as_its_source() {
        use std::error::Error as _;

        let err: Error = PlanError::invariant("no sidecar").into();
        assert!(matches!(err, Error::Plan(PlanError::InvariantViolation(_))));
        assert_eq!("Invariant violated: no sidecar", err.to_string());
        assert!(err.source().is_some());
    }

    #[test]
    fn name_collision_message_names_the_reserved_item() {
        let err = PlanError::NameCollision {
            kind: "container",
            name: "envoy".to_owned(),
        };
        assert!(err.is_name_collision());
        assert_eq!(
            "Workload already defines a container named 'envoy', which is reserved for the sidecar",
            err.to_string()
        );
    }
}
